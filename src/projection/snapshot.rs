//! Per-wallet snapshot construction
//!
//! Every wallet is built concurrently and independently. A wallet that fails
//! any step is logged and left out; the batch itself never fails. When the
//! balance-display permission is withheld, amounts are zeroed before they
//! leave the builder.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, error, warn};

use crate::error::Result;
use crate::preferences::{PermissionGate, PreferenceStore};
use crate::wallet::{
    format_balance, relative_time, BalanceUnit, Chain, Transaction, WalletHandle, WalletStore,
};

/// Default number of transactions carried per wallet
pub const DEFAULT_TRANSACTION_WINDOW: usize = 10;

/// Transaction classification shown on the companion
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TransactionKind {
    PendingConfirmation,
    Received,
}

impl TransactionKind {
    pub fn from_confirmations(confirmations: u32) -> Self {
        if confirmations > 0 {
            TransactionKind::Received
        } else {
            TransactionKind::PendingConfirmation
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionSummary {
    #[serde(rename = "type")]
    pub kind: TransactionKind,
    /// Smallest-unit amount, untouched by formatting
    pub value: i64,
    pub amount: String,
    pub memo: String,
    pub time: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WalletSummary {
    pub id: String,
    pub label: String,
    #[serde(rename = "type")]
    pub wallet_type: String,
    pub preferred_balance_unit: BalanceUnit,
    pub balance: i64,
    pub formatted_balance: String,
    pub receive_address: String,
    pub transactions: Vec<TransactionSummary>,
    pub hide_balance: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub xpub: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payment_code: Option<String>,
}

/// Content digest of a wallet set, used to suppress redundant sends
///
/// Relative transaction times are left out: they are derived from the clock,
/// so identical wallet data must hash the same whenever it is built.
pub fn digest(wallets: &[WalletSummary]) -> String {
    let mut hasher = Sha256::new();
    for wallet in wallets {
        let mut stable = wallet.clone();
        for tx in &mut stable.transactions {
            tx.time.clear();
        }
        hasher.update(serde_json::to_vec(&stable).unwrap_or_default());
    }
    format!("{:x}", hasher.finalize())
}

/// Where the balance-display permission is read from
#[derive(Clone)]
struct DisplayPermission {
    preferences: Arc<dyn PreferenceStore>,
    scope: String,
}

/// Builds [`WalletSummary`] values from the wallet store
#[derive(Clone)]
pub struct SnapshotBuilder {
    transaction_window: usize,
    permission: Option<DisplayPermission>,
    clock: fn() -> DateTime<Utc>,
}

impl Default for SnapshotBuilder {
    fn default() -> Self {
        Self::new(DEFAULT_TRANSACTION_WINDOW)
    }
}

impl SnapshotBuilder {
    pub fn new(transaction_window: usize) -> Self {
        Self {
            transaction_window,
            permission: None,
            clock: Utc::now,
        }
    }

    /// Consult the balance-display permission on every build
    ///
    /// Without one, real amounts are always emitted.
    pub fn with_permission(
        mut self,
        preferences: Arc<dyn PreferenceStore>,
        scope: impl Into<String>,
    ) -> Self {
        self.permission = Some(DisplayPermission {
            preferences,
            scope: scope.into(),
        });
        self
    }

    /// Time source for relative transaction times
    pub fn with_clock(mut self, clock: fn() -> DateTime<Utc>) -> Self {
        self.clock = clock;
        self
    }

    /// Build summaries for all wallets, `None` when the store is not initialized
    pub async fn build(&self, store: &dyn WalletStore) -> Option<Vec<WalletSummary>> {
        if !store.is_initialized() {
            debug!("Wallets not initialized, no snapshot");
            return None;
        }

        let display_allowed = self.display_allowed().await;
        if !display_allowed {
            debug!("Balance display not allowed, zeroing amounts");
        }

        let now = (self.clock)();
        let wallets = store.wallets().await;
        let results = join_all(
            wallets
                .iter()
                .map(|wallet| self.build_one(store, wallet, display_allowed, now)),
        )
        .await;

        let summaries: Vec<WalletSummary> = results
            .into_iter()
            .zip(wallets.iter())
            .filter_map(|(result, wallet)| match result {
                Ok(summary) => Some(summary),
                Err(e) if e.is_per_wallet() => {
                    warn!(
                        wallet_label = %wallet.label(),
                        wallet_type = %wallet.kind(),
                        "Wallet left out of snapshot: {}",
                        e
                    );
                    None
                }
                Err(e) => {
                    error!(
                        wallet_label = %wallet.label(),
                        wallet_type = %wallet.kind(),
                        "Failed to build wallet summary: {}",
                        e
                    );
                    None
                }
            })
            .collect();

        debug!("Built {} of {} wallet summaries", summaries.len(), wallets.len());
        Some(summaries)
    }

    async fn display_allowed(&self) -> bool {
        match &self.permission {
            Some(permission) => {
                PermissionGate::new(permission.preferences.as_ref(), &permission.scope)
                    .is_balance_display_allowed()
                    .await
            }
            None => true,
        }
    }

    async fn build_one(
        &self,
        store: &dyn WalletStore,
        wallet: &Arc<dyn WalletHandle>,
        display_allowed: bool,
        now: DateTime<Utc>,
    ) -> Result<WalletSummary> {
        let caps = *wallet.capabilities();
        let unit = wallet.preferred_balance_unit();

        let receive_address = resolve_address(wallet.as_ref()).await?;
        let balance = wallet.balance().await?;
        let balance = if display_allowed { balance } else { 0 };

        let transactions = wallet
            .transactions()
            .await?
            .iter()
            .take(self.transaction_window)
            .map(|tx| summarize_transaction(store, tx, unit, display_allowed, now))
            .collect();

        let xpub = if caps.exports_xpub() {
            wallet.xpub().or_else(|| wallet.secret())
        } else {
            None
        };

        let payment_code = if caps.exports_payment_code() {
            wallet.payment_code()?
        } else {
            None
        };

        Ok(WalletSummary {
            id: wallet.id().to_string(),
            label: wallet.label(),
            wallet_type: wallet.kind().type_tag().to_string(),
            preferred_balance_unit: unit,
            balance,
            formatted_balance: format_balance(balance, unit),
            receive_address,
            transactions,
            hide_balance: wallet.hide_balance(),
            xpub,
            payment_code,
        })
    }
}

fn summarize_transaction(
    store: &dyn WalletStore,
    tx: &Transaction,
    unit: BalanceUnit,
    display_allowed: bool,
    now: DateTime<Utc>,
) -> TransactionSummary {
    let memo = store
        .transaction_memo(&tx.hash)
        .or_else(|| tx.memo.clone().filter(|m| !m.is_empty()))
        .unwrap_or_default();
    let value = if display_allowed { tx.value } else { 0 };

    TransactionSummary {
        kind: TransactionKind::from_confirmations(tx.confirmations),
        value,
        amount: format_balance(value, unit),
        memo,
        time: relative_time(tx.received, now),
    }
}

/// Receive address with fallbacks
///
/// On-chain wallets try the async getter, then index derivation at the next
/// free index, then the local getter. Off-chain wallets use the local getter.
async fn resolve_address(wallet: &dyn WalletHandle) -> Result<String> {
    let on_chain = wallet.capabilities().chain == Chain::OnChain;
    let primary = if on_chain {
        wallet.receive_address().await
    } else {
        wallet.cached_address()
    };

    let err = match primary {
        Ok(address) => return Ok(address),
        Err(e) => e,
    };
    debug!("Receive address for {} failed, falling back: {}", wallet.label(), err);

    if on_chain {
        if let Some(index) = wallet.next_free_address_index() {
            match wallet.external_address_at(index) {
                Ok(address) => return Ok(address),
                Err(e) => debug!("Index derivation for {} failed: {}", wallet.label(), e),
            }
        }
    }

    wallet.cached_address()
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::TimeZone;

    use crate::error::Error;
    use crate::preferences::MemoryPreferenceStore;
    use crate::wallet::{Capabilities, MemoryWallet, MemoryWalletStore, WalletKind, WalletRecord};

    const SCOPE: &str = "group.test.shared";

    /// Wallet whose balance or payment code cannot be read
    struct Unreadable {
        inner: MemoryWallet,
        balance_fails: bool,
    }

    #[async_trait]
    impl WalletHandle for Unreadable {
        fn id(&self) -> &str {
            self.inner.id()
        }

        fn label(&self) -> String {
            self.inner.label()
        }

        fn kind(&self) -> WalletKind {
            self.inner.kind()
        }

        fn capabilities(&self) -> &Capabilities {
            self.inner.capabilities()
        }

        fn preferred_balance_unit(&self) -> BalanceUnit {
            self.inner.preferred_balance_unit()
        }

        async fn balance(&self) -> Result<i64> {
            if self.balance_fails {
                return Err(Error::WalletStore("balance unavailable".into()));
            }
            self.inner.balance().await
        }

        async fn transactions(&self) -> Result<Vec<Transaction>> {
            self.inner.transactions().await
        }

        fn hide_balance(&self) -> bool {
            self.inner.hide_balance()
        }

        fn set_hide_balance(&self, hide: bool) {
            self.inner.set_hide_balance(hide)
        }

        async fn receive_address(&self) -> Result<String> {
            self.inner.receive_address().await
        }

        fn cached_address(&self) -> Result<String> {
            self.inner.cached_address()
        }

        fn next_free_address_index(&self) -> Option<u32> {
            self.inner.next_free_address_index()
        }

        fn external_address_at(&self, index: u32) -> Result<String> {
            self.inner.external_address_at(index)
        }

        fn xpub(&self) -> Option<String> {
            self.inner.xpub()
        }

        fn secret(&self) -> Option<String> {
            self.inner.secret()
        }

        fn payment_code(&self) -> Result<Option<String>> {
            Err(Error::WalletStore("payment code unavailable".into()))
        }

        async fn create_invoice(&self, amount: i64, description: &str) -> Result<String> {
            self.inner.create_invoice(amount, description).await
        }

        async fn invoice_payment_hash(&self, invoice: &str) -> Result<String> {
            self.inner.invoice_payment_hash(invoice).await
        }
    }

    struct ListStore(Vec<Arc<dyn WalletHandle>>);

    #[async_trait]
    impl WalletStore for ListStore {
        async fn wallets(&self) -> Vec<Arc<dyn WalletHandle>> {
            self.0.clone()
        }

        fn is_initialized(&self) -> bool {
            true
        }

        fn transaction_memo(&self, _hash: &str) -> Option<String> {
            None
        }

        async fn fetch_transactions(&self) -> Result<()> {
            Ok(())
        }

        async fn save(&self) -> Result<()> {
            Ok(())
        }
    }

    fn clock_at_43s() -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_043, 0).unwrap()
    }

    fn clock_at_46s() -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_046, 0).unwrap()
    }

    fn tx(hash: &str, confirmations: u32, memo: Option<&str>) -> Transaction {
        Transaction {
            hash: hash.to_string(),
            value: 1_500,
            confirmations,
            received: 1_700_000_000,
            memo: memo.map(String::from),
        }
    }

    fn with_address(mut record: WalletRecord) -> WalletRecord {
        record.address = Some("bc1qprimary".to_string());
        record
    }

    #[test]
    fn test_kind_follows_confirmations() {
        assert_eq!(TransactionKind::from_confirmations(0), TransactionKind::PendingConfirmation);
        assert_eq!(TransactionKind::from_confirmations(1), TransactionKind::Received);
        assert_eq!(TransactionKind::from_confirmations(144), TransactionKind::Received);
    }

    #[tokio::test]
    async fn test_uninitialized_store_builds_nothing() {
        let store = MemoryWalletStore::new(vec![]);
        store.set_initialized(false);
        assert!(SnapshotBuilder::default().build(&store).await.is_none());
    }

    #[tokio::test]
    async fn test_address_falls_back_to_index_derivation() {
        let mut record = WalletRecord::new("hd", "Savings", WalletKind::HdSegwitBech32, 1);
        record.external_addresses = vec!["bc1q0".into(), "bc1q1".into()];
        record.next_free_address_index = 1;
        let store = MemoryWalletStore::new(vec![record]);

        let wallets = SnapshotBuilder::default().build(&store).await.unwrap();
        assert_eq!(wallets.len(), 1);
        assert_eq!(wallets[0].receive_address, "bc1q1");
    }

    #[tokio::test]
    async fn test_address_falls_back_to_local_getter() {
        let mut record = WalletRecord::new("l", "Paper", WalletKind::Legacy, 1);
        record.cached_address = Some("1Legacy".into());
        let store = MemoryWalletStore::new(vec![record]);

        let wallets = SnapshotBuilder::default().build(&store).await.unwrap();
        assert_eq!(wallets[0].receive_address, "1Legacy");
    }

    #[tokio::test]
    async fn test_wallet_excluded_when_all_address_paths_fail() {
        let broken = WalletRecord::new("b", "Broken", WalletKind::HdSegwitP2sh, 1);
        let good = with_address(WalletRecord::new("g", "Good", WalletKind::HdLegacy, 2));
        let store = MemoryWalletStore::new(vec![broken, good]);

        let wallets = SnapshotBuilder::default().build(&store).await.unwrap();
        assert_eq!(wallets.len(), 1);
        assert_eq!(wallets[0].label, "Good");
    }

    #[tokio::test]
    async fn test_multisig_never_carries_xpub() {
        let mut record = with_address(WalletRecord::new("m", "Vault", WalletKind::Multisig, 1));
        record.xpub = Some("Zpub-vault".into());
        let store = MemoryWalletStore::new(vec![record]);

        let wallets = SnapshotBuilder::default().build(&store).await.unwrap();
        assert_eq!(wallets[0].xpub, None);
        let json = serde_json::to_value(&wallets[0]).unwrap();
        assert!(json.get("xpub").is_none());
    }

    #[tokio::test]
    async fn test_xpub_falls_back_to_secret() {
        let mut record = with_address(WalletRecord::new("l", "Paper", WalletKind::Legacy, 1));
        record.secret = Some("L1secret".into());
        let store = MemoryWalletStore::new(vec![record]);

        let wallets = SnapshotBuilder::default().build(&store).await.unwrap();
        assert_eq!(wallets[0].xpub.as_deref(), Some("L1secret"));
    }

    #[tokio::test]
    async fn test_payment_code_only_when_enabled() {
        let mut enabled =
            with_address(WalletRecord::new("a", "A", WalletKind::HdSegwitBech32, 1));
        enabled.payment_code = Some("PM8T-a".into());
        enabled.bip47_enabled = true;
        let mut disabled =
            with_address(WalletRecord::new("b", "B", WalletKind::HdSegwitBech32, 1));
        disabled.payment_code = Some("PM8T-b".into());
        let store = MemoryWalletStore::new(vec![enabled, disabled]);

        let wallets = SnapshotBuilder::default().build(&store).await.unwrap();
        assert_eq!(wallets[0].payment_code.as_deref(), Some("PM8T-a"));
        assert_eq!(wallets[1].payment_code, None);
    }

    #[tokio::test]
    async fn test_transaction_window_and_memo_precedence() {
        let mut record =
            with_address(WalletRecord::new("w", "Daily", WalletKind::HdSegwitBech32, 1));
        record.transactions = (0..15)
            .map(|i| tx(&format!("h{}", i), i % 2, Some("wallet memo")))
            .collect();
        record.transactions[1].memo = None;
        let store = MemoryWalletStore::new(vec![record]);
        store.set_memo("h0", "rent");

        let wallets = SnapshotBuilder::new(3).build(&store).await.unwrap();
        let txs = &wallets[0].transactions;
        assert_eq!(txs.len(), 3);
        assert_eq!(txs[0].memo, "rent");
        assert_eq!(txs[1].memo, "");
        assert_eq!(txs[2].memo, "wallet memo");
        assert_eq!(txs[0].kind, TransactionKind::PendingConfirmation);
        assert_eq!(txs[1].kind, TransactionKind::Received);
        assert_eq!(txs[0].value, 1_500);
    }

    #[tokio::test]
    async fn test_sample_fixture() {
        let path = std::path::Path::new(env!("CARGO_MANIFEST_DIR")).join("fixtures/wallets.json");
        let store = MemoryWalletStore::load(&path).unwrap();

        let wallets = SnapshotBuilder::default().build(&store).await.unwrap();
        assert_eq!(wallets.len(), 3);
        assert_eq!(wallets[0].transactions[0].memo, "salary");
        assert!(wallets[0].payment_code.is_some());
        assert_eq!(wallets[1].receive_address, "bc1qvault1");
        assert_eq!(wallets[1].xpub, None);
        assert_eq!(wallets[2].wallet_type, "lightningCustodianWallet");
    }

    #[tokio::test]
    async fn test_failing_wallet_steps_exclude_only_that_wallet() {
        let mut broken_balance = with_address(WalletRecord::new("a", "A", WalletKind::Legacy, 1));
        broken_balance.transactions = vec![tx("ha", 1, None)];
        let mut broken_code =
            with_address(WalletRecord::new("b", "B", WalletKind::HdSegwitBech32, 2));
        broken_code.bip47_enabled = true;
        let good = with_address(WalletRecord::new("c", "C", WalletKind::HdLegacy, 3));

        let store = ListStore(vec![
            Arc::new(Unreadable {
                inner: MemoryWallet::new(broken_balance),
                balance_fails: true,
            }),
            Arc::new(Unreadable {
                inner: MemoryWallet::new(broken_code),
                balance_fails: false,
            }),
            Arc::new(MemoryWallet::new(good)),
        ]);

        let wallets = SnapshotBuilder::default().build(&store).await.unwrap();
        assert_eq!(wallets.len(), 1);
        assert_eq!(wallets[0].label, "C");
        assert_eq!(wallets[0].balance, 3);
    }

    #[tokio::test]
    async fn test_withheld_permission_zeroes_amounts() {
        let mut record = with_address(WalletRecord::new("w", "Daily", WalletKind::Legacy, 4_200));
        record.transactions = vec![tx("h0", 3, None)];
        let store = MemoryWalletStore::new(vec![record]);
        let prefs = Arc::new(MemoryPreferenceStore::new());
        let builder = SnapshotBuilder::default().with_permission(prefs.clone(), SCOPE);

        let wallets = builder.build(&store).await.unwrap();
        assert_eq!(wallets[0].balance, 0);
        assert_eq!(wallets[0].formatted_balance, "0 BTC");
        assert_eq!(wallets[0].transactions[0].value, 0);
        assert_eq!(wallets[0].transactions[0].amount, "0 BTC");
        assert_eq!(wallets[0].receive_address, "bc1qprimary");

        PermissionGate::new(prefs.as_ref(), SCOPE)
            .set_balance_display_allowed(true)
            .await
            .unwrap();
        let wallets = builder.build(&store).await.unwrap();
        assert_eq!(wallets[0].balance, 4_200);
        assert_eq!(wallets[0].transactions[0].value, 1_500);
    }

    #[tokio::test]
    async fn test_digest_stable_across_relative_time_buckets() {
        let mut record = with_address(WalletRecord::new("w", "Daily", WalletKind::Legacy, 1));
        record.transactions = vec![tx("h0", 1, None)];
        let store = MemoryWalletStore::new(vec![record]);

        let early = SnapshotBuilder::default()
            .with_clock(clock_at_43s)
            .build(&store)
            .await
            .unwrap();
        let late = SnapshotBuilder::default()
            .with_clock(clock_at_46s)
            .build(&store)
            .await
            .unwrap();

        assert_eq!(early[0].transactions[0].time, "just now");
        assert_eq!(late[0].transactions[0].time, "a minute ago");
        assert_eq!(digest(&early), digest(&late));
    }

    #[tokio::test]
    async fn test_digest_tracks_content() {
        let store = MemoryWalletStore::new(vec![with_address(WalletRecord::new(
            "w",
            "Daily",
            WalletKind::HdSegwitBech32,
            1,
        ))]);
        let builder = SnapshotBuilder::default();

        let before = digest(&builder.build(&store).await.unwrap());
        assert_eq!(before, digest(&builder.build(&store).await.unwrap()));

        store.wallets().await[0].set_hide_balance(true);
        assert_ne!(before, digest(&builder.build(&store).await.unwrap()));
    }
}
