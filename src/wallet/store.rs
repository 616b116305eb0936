//! Wallet store collaborator interfaces
//!
//! The authoritative wallet store is owned by the host application. This core
//! only reads from it, plus the two mutations a companion may request
//! (visibility toggle, transaction refresh).

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::Result;

use super::types::{BalanceUnit, Capabilities, Transaction, WalletKind};

/// One wallet as exposed by the host wallet store
#[async_trait]
pub trait WalletHandle: Send + Sync {
    fn id(&self) -> &str;

    fn label(&self) -> String;

    fn kind(&self) -> WalletKind;

    /// Capabilities resolved when the wallet was constructed
    fn capabilities(&self) -> &Capabilities;

    fn preferred_balance_unit(&self) -> BalanceUnit;

    /// Balance in the smallest unit
    async fn balance(&self) -> Result<i64>;

    /// Transactions, newest first
    async fn transactions(&self) -> Result<Vec<Transaction>>;

    fn hide_balance(&self) -> bool;

    fn set_hide_balance(&self, hide: bool);

    /// Next receive address, possibly deriving or contacting a backend
    async fn receive_address(&self) -> Result<String>;

    /// Receive address from local state only
    fn cached_address(&self) -> Result<String>;

    /// Index of the next unused external address, when indexed derivation exists
    fn next_free_address_index(&self) -> Option<u32>;

    fn external_address_at(&self, index: u32) -> Result<String>;

    fn xpub(&self) -> Option<String>;

    fn secret(&self) -> Option<String>;

    fn payment_code(&self) -> Result<Option<String>>;

    /// Issue an invoice; only meaningful when `capabilities().invoices`
    async fn create_invoice(&self, amount: i64, description: &str) -> Result<String>;

    /// Extract the payment hash of an invoice issued by this wallet
    async fn invoice_payment_hash(&self, invoice: &str) -> Result<String>;
}

/// Host wallet store
#[async_trait]
pub trait WalletStore: Send + Sync {
    /// Wallets in display order
    async fn wallets(&self) -> Vec<Arc<dyn WalletHandle>>;

    async fn wallet_at(&self, index: usize) -> Option<Arc<dyn WalletHandle>> {
        self.wallets().await.get(index).cloned()
    }

    fn is_initialized(&self) -> bool;

    /// Memo stored outside the wallet, keyed by transaction hash
    fn transaction_memo(&self, hash: &str) -> Option<String>;

    /// Refresh transactions from the network
    async fn fetch_transactions(&self) -> Result<()>;

    /// Persist wallet state
    async fn save(&self) -> Result<()>;
}
