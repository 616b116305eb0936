//! Core types for the wallet domain model
//!
//! Wallet variants are a tagged enum resolved once into [`Capabilities`] when a
//! wallet is constructed, so callers never check for optional features at run time.

use serde::{Deserialize, Serialize};

/// Where a wallet's funds live
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Chain {
    /// Funds held in on-chain outputs
    OnChain,
    /// Funds held off-chain (lightning custodian, etc.)
    OffChain,
}

/// Kind of wallet
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WalletKind {
    /// HD native segwit (BIP84)
    HdSegwitBech32,
    /// HD wrapped segwit (BIP49)
    HdSegwitP2sh,
    /// HD legacy (BIP44)
    HdLegacy,
    /// Single-key legacy wallet
    Legacy,
    /// HD multi-signature vault
    Multisig,
    /// Watch-only (xpub or address)
    WatchOnly,
    /// Lightning custodian account
    Lightning,
}

impl WalletKind {
    /// Type tag sent to the companion surface
    pub fn type_tag(&self) -> &'static str {
        match self {
            WalletKind::HdSegwitBech32 => "HDsegwitBech32",
            WalletKind::HdSegwitP2sh => "HDsegwitP2SH",
            WalletKind::HdLegacy => "HDlegacyP2PKH",
            WalletKind::Legacy => "legacy",
            WalletKind::Multisig => "HDmultisig",
            WalletKind::WatchOnly => "watchOnly",
            WalletKind::Lightning => "lightningCustodianWallet",
        }
    }

    pub fn chain(&self) -> Chain {
        match self {
            WalletKind::Lightning => Chain::OffChain,
            _ => Chain::OnChain,
        }
    }

    pub fn is_hd(&self) -> bool {
        matches!(
            self,
            WalletKind::HdSegwitBech32
                | WalletKind::HdSegwitP2sh
                | WalletKind::HdLegacy
                | WalletKind::Multisig
        )
    }
}

impl std::fmt::Display for WalletKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.type_tag())
    }
}

/// Optional features of a wallet, resolved once at construction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities {
    pub chain: Chain,
    pub multisig: bool,
    /// Can derive external addresses by index
    pub indexed_addresses: bool,
    /// Can issue invoices (lightning)
    pub invoices: bool,
    pub allows_receive: bool,
    pub bip47_supported: bool,
    pub bip47_enabled: bool,
}

impl Capabilities {
    /// Resolve capabilities for a wallet kind
    pub fn resolve(kind: WalletKind, bip47_enabled: bool) -> Self {
        let bip47_supported = matches!(kind, WalletKind::HdSegwitBech32 | WalletKind::HdLegacy);
        Self {
            chain: kind.chain(),
            multisig: kind == WalletKind::Multisig,
            indexed_addresses: kind.is_hd(),
            invoices: kind == WalletKind::Lightning,
            allows_receive: kind != WalletKind::WatchOnly,
            bip47_supported,
            bip47_enabled: bip47_supported && bip47_enabled,
        }
    }

    /// Extended public key is exported only for single-sig on-chain wallets
    pub fn exports_xpub(&self) -> bool {
        self.chain == Chain::OnChain && !self.multisig
    }

    pub fn exports_payment_code(&self) -> bool {
        self.bip47_supported && self.bip47_enabled
    }
}

/// Unit a wallet prefers for displaying amounts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum BalanceUnit {
    #[default]
    #[serde(rename = "BTC")]
    Btc,
    #[serde(rename = "sats")]
    Sats,
    #[serde(rename = "local_currency")]
    LocalCurrency,
}

impl std::fmt::Display for BalanceUnit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BalanceUnit::Btc => write!(f, "BTC"),
            BalanceUnit::Sats => write!(f, "sats"),
            BalanceUnit::LocalCurrency => write!(f, "local_currency"),
        }
    }
}

/// A wallet transaction as stored by the wallet store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub hash: String,
    /// Signed amount in the smallest unit (negative for outgoing)
    pub value: i64,
    pub confirmations: u32,
    /// Unix seconds when first seen
    pub received: i64,
    /// Memo embedded by the wallet itself
    #[serde(default)]
    pub memo: Option<String>,
}

impl Transaction {
    pub fn is_confirmed(&self) -> bool {
        self.confirmations > 0
    }
}
