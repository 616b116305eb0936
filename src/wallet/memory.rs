//! Fixture-backed wallet store
//!
//! Loads wallets from a JSON fixture (wallets.json layout) and keeps them in
//! memory. `save` writes the fixture back, `fetch_transactions` re-reads
//! balances and transactions from it.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use crate::error::{Error, Result};

use super::store::{WalletHandle, WalletStore};
use super::types::{BalanceUnit, Capabilities, Transaction, WalletKind};

/// One wallet entry of the fixture file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalletRecord {
    pub id: String,
    pub label: String,
    pub kind: WalletKind,
    #[serde(default)]
    pub preferred_balance_unit: BalanceUnit,
    pub balance: i64,
    #[serde(default)]
    pub transactions: Vec<Transaction>,
    #[serde(default)]
    pub hide_balance: bool,
    /// Address returned by the async getter; absent means derivation fails
    #[serde(default)]
    pub address: Option<String>,
    /// Address known from local state; absent means the sync getter fails
    #[serde(default)]
    pub cached_address: Option<String>,
    #[serde(default)]
    pub external_addresses: Vec<String>,
    #[serde(default)]
    pub next_free_address_index: u32,
    #[serde(default)]
    pub xpub: Option<String>,
    #[serde(default)]
    pub secret: Option<String>,
    #[serde(default)]
    pub payment_code: Option<String>,
    #[serde(default)]
    pub bip47_enabled: bool,
}

impl WalletRecord {
    pub fn new(
        id: impl Into<String>,
        label: impl Into<String>,
        kind: WalletKind,
        balance: i64,
    ) -> Self {
        Self {
            id: id.into(),
            label: label.into(),
            kind,
            preferred_balance_unit: BalanceUnit::default(),
            balance,
            transactions: Vec::new(),
            hide_balance: false,
            address: None,
            cached_address: None,
            external_addresses: Vec::new(),
            next_free_address_index: 0,
            xpub: None,
            secret: None,
            payment_code: None,
            bip47_enabled: false,
        }
    }
}

/// Memo metadata stored outside the wallets
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TxMetadata {
    #[serde(default)]
    pub memo: Option<String>,
}

/// Fixture file structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WalletFixture {
    #[serde(default)]
    pub wallets: Vec<WalletRecord>,
    #[serde(default)]
    pub tx_metadata: HashMap<String, TxMetadata>,
}

/// In-memory wallet backed by a [`WalletRecord`]
pub struct MemoryWallet {
    id: String,
    record: RwLock<WalletRecord>,
    capabilities: Capabilities,
    hide_balance: AtomicBool,
    /// invoice -> payment hash
    invoices: Mutex<HashMap<String, String>>,
}

impl MemoryWallet {
    pub fn new(record: WalletRecord) -> Self {
        let capabilities = Capabilities::resolve(record.kind, record.bip47_enabled);
        let hide_balance = AtomicBool::new(record.hide_balance);
        Self {
            id: record.id.clone(),
            record: RwLock::new(record),
            capabilities,
            hide_balance,
            invoices: Mutex::new(HashMap::new()),
        }
    }

    /// Current state as a fixture record
    pub fn to_record(&self) -> WalletRecord {
        let mut record = self.read().clone();
        record.hide_balance = self.hide_balance.load(Ordering::SeqCst);
        record
    }

    fn refresh_from(&self, fresh: &WalletRecord) {
        if let Ok(mut record) = self.record.write() {
            record.balance = fresh.balance;
            record.transactions = fresh.transactions.clone();
        }
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, WalletRecord> {
        self.record.read().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl WalletHandle for MemoryWallet {
    fn id(&self) -> &str {
        &self.id
    }

    fn label(&self) -> String {
        self.read().label.clone()
    }

    fn kind(&self) -> WalletKind {
        self.read().kind
    }

    fn capabilities(&self) -> &Capabilities {
        &self.capabilities
    }

    fn preferred_balance_unit(&self) -> BalanceUnit {
        self.read().preferred_balance_unit
    }

    async fn balance(&self) -> Result<i64> {
        Ok(self.read().balance)
    }

    async fn transactions(&self) -> Result<Vec<Transaction>> {
        Ok(self.read().transactions.clone())
    }

    fn hide_balance(&self) -> bool {
        self.hide_balance.load(Ordering::SeqCst)
    }

    fn set_hide_balance(&self, hide: bool) {
        self.hide_balance.store(hide, Ordering::SeqCst);
    }

    async fn receive_address(&self) -> Result<String> {
        let record = self.read();
        record.address.clone().ok_or_else(|| Error::AddressDerivation {
            wallet: record.label.clone(),
            reason: "no receive address available".to_string(),
        })
    }

    fn cached_address(&self) -> Result<String> {
        let record = self.read();
        record.cached_address.clone().ok_or_else(|| Error::AddressDerivation {
            wallet: record.label.clone(),
            reason: "no cached address".to_string(),
        })
    }

    fn next_free_address_index(&self) -> Option<u32> {
        if self.capabilities.indexed_addresses {
            Some(self.read().next_free_address_index)
        } else {
            None
        }
    }

    fn external_address_at(&self, index: u32) -> Result<String> {
        let record = self.read();
        record
            .external_addresses
            .get(index as usize)
            .cloned()
            .ok_or_else(|| Error::AddressDerivation {
                wallet: record.label.clone(),
                reason: format!("no external address at index {}", index),
            })
    }

    fn xpub(&self) -> Option<String> {
        self.read().xpub.clone()
    }

    fn secret(&self) -> Option<String> {
        self.read().secret.clone()
    }

    fn payment_code(&self) -> Result<Option<String>> {
        Ok(self.read().payment_code.clone())
    }

    async fn create_invoice(&self, amount: i64, description: &str) -> Result<String> {
        if !self.capabilities.invoices {
            return Err(Error::Invoice(format!(
                "{} wallets cannot issue invoices",
                self.kind()
            )));
        }

        let mut invoices = self
            .invoices
            .lock()
            .map_err(|e| Error::Internal(format!("Invoice lock failed: {}", e)))?;

        let preimage = format!("{}:{}:{}:{}", self.id, amount, description, invoices.len());
        let payment_hash = format!("{:x}", Sha256::digest(preimage.as_bytes()));
        let invoice = format!("lnbc{}n1p{}", amount, &payment_hash[..32]);

        invoices.insert(invoice.clone(), payment_hash);
        debug!("Issued invoice for {} sats", amount);
        Ok(invoice)
    }

    async fn invoice_payment_hash(&self, invoice: &str) -> Result<String> {
        let invoices = self
            .invoices
            .lock()
            .map_err(|e| Error::Internal(format!("Invoice lock failed: {}", e)))?;
        invoices
            .get(invoice)
            .cloned()
            .ok_or_else(|| Error::Invoice("unknown invoice".to_string()))
    }
}

/// Wallet store holding [`MemoryWallet`]s
pub struct MemoryWalletStore {
    wallets: tokio::sync::RwLock<Vec<Arc<MemoryWallet>>>,
    tx_metadata: RwLock<HashMap<String, TxMetadata>>,
    initialized: AtomicBool,
    /// Fixture file used by `save` and `fetch_transactions`
    path: Option<PathBuf>,
    save_count: AtomicU64,
}

impl MemoryWalletStore {
    /// Create an initialized store from records
    pub fn new(records: Vec<WalletRecord>) -> Self {
        Self::from_fixture(
            WalletFixture {
                wallets: records,
                tx_metadata: HashMap::new(),
            },
            None,
        )
    }

    fn from_fixture(fixture: WalletFixture, path: Option<PathBuf>) -> Self {
        let wallets = fixture
            .wallets
            .into_iter()
            .map(|record| Arc::new(MemoryWallet::new(record)))
            .collect();

        Self {
            wallets: tokio::sync::RwLock::new(wallets),
            tx_metadata: RwLock::new(fixture.tx_metadata),
            initialized: AtomicBool::new(true),
            path,
            save_count: AtomicU64::new(0),
        }
    }

    /// Load a store from a fixture file
    pub fn load(path: &Path) -> Result<Self> {
        let fixture = read_fixture(path)?;
        info!("Loaded {} wallets from {}", fixture.wallets.len(), path.display());
        Ok(Self::from_fixture(fixture, Some(path.to_path_buf())))
    }

    pub fn set_initialized(&self, initialized: bool) {
        self.initialized.store(initialized, Ordering::SeqCst);
    }

    pub fn set_memo(&self, hash: impl Into<String>, memo: impl Into<String>) {
        if let Ok(mut metadata) = self.tx_metadata.write() {
            metadata.insert(hash.into(), TxMetadata { memo: Some(memo.into()) });
        }
    }

    /// Number of completed saves
    pub fn save_count(&self) -> u64 {
        self.save_count.load(Ordering::SeqCst)
    }

    async fn snapshot_fixture(&self) -> WalletFixture {
        let wallets = self.wallets.read().await.iter().map(|w| w.to_record()).collect();
        let tx_metadata = self
            .tx_metadata
            .read()
            .map(|m| m.clone())
            .unwrap_or_default();
        WalletFixture { wallets, tx_metadata }
    }
}

fn read_fixture(path: &Path) -> Result<WalletFixture> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| Error::WalletStore(format!("Failed to read {}: {}", path.display(), e)))?;
    serde_json::from_str(&content)
        .map_err(|e| Error::WalletStore(format!("Failed to parse {}: {}", path.display(), e)))
}

#[async_trait]
impl WalletStore for MemoryWalletStore {
    async fn wallets(&self) -> Vec<Arc<dyn WalletHandle>> {
        self.wallets
            .read()
            .await
            .iter()
            .map(|w| w.clone() as Arc<dyn WalletHandle>)
            .collect()
    }

    fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::SeqCst)
    }

    fn transaction_memo(&self, hash: &str) -> Option<String> {
        self.tx_metadata
            .read()
            .ok()?
            .get(hash)
            .and_then(|m| m.memo.clone())
            .filter(|memo| !memo.is_empty())
    }

    async fn fetch_transactions(&self) -> Result<()> {
        let Some(path) = &self.path else {
            debug!("No fixture path, transaction refresh is a no-op");
            return Ok(());
        };

        let fixture = read_fixture(path)?;
        let wallets = self.wallets.read().await;
        for wallet in wallets.iter() {
            match fixture.wallets.iter().find(|r| r.id == wallet.id()) {
                Some(fresh) => wallet.refresh_from(fresh),
                None => warn!("Wallet {} missing from fixture on refresh", wallet.id()),
            }
        }
        Ok(())
    }

    async fn save(&self) -> Result<()> {
        if let Some(path) = &self.path {
            let fixture = self.snapshot_fixture().await;
            let content = serde_json::to_string_pretty(&fixture)?;
            tokio::fs::write(path, content).await?;
            debug!("Saved {} wallets to {}", fixture.wallets.len(), path.display());
        }
        self.save_count.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wallet::types::Chain;
    use tempfile::tempdir;

    fn lightning() -> WalletRecord {
        WalletRecord::new("ln-1", "Lightning", WalletKind::Lightning, 2_000)
    }

    #[tokio::test]
    async fn test_invoice_round_trip_to_payment_hash() {
        let wallet = MemoryWallet::new(lightning());
        let invoice = wallet.create_invoice(500, "coffee").await.unwrap();
        assert!(invoice.starts_with("lnbc500"));

        let hash = wallet.invoice_payment_hash(&invoice).await.unwrap();
        assert_eq!(hash.len(), 64);
    }

    #[tokio::test]
    async fn test_onchain_wallet_cannot_issue_invoice() {
        let record = WalletRecord::new("w", "Savings", WalletKind::HdSegwitBech32, 1);
        let wallet = MemoryWallet::new(record);
        assert!(matches!(
            wallet.create_invoice(500, "x").await,
            Err(Error::Invoice(_))
        ));
    }

    #[test]
    fn test_index_only_for_hd_wallets() {
        let legacy = MemoryWallet::new(WalletRecord::new("l", "Old", WalletKind::Legacy, 1));
        assert_eq!(legacy.next_free_address_index(), None);
        assert_eq!(legacy.capabilities().chain, Chain::OnChain);

        let mut record = WalletRecord::new("h", "HD", WalletKind::HdSegwitBech32, 1);
        record.next_free_address_index = 4;
        assert_eq!(MemoryWallet::new(record).next_free_address_index(), Some(4));
    }

    #[tokio::test]
    async fn test_save_persists_hide_balance() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("wallets.json");
        let fixture = WalletFixture {
            wallets: vec![lightning()],
            tx_metadata: HashMap::new(),
        };
        std::fs::write(&path, serde_json::to_string(&fixture).unwrap()).unwrap();

        let store = MemoryWalletStore::load(&path).unwrap();
        store.wallets().await[0].set_hide_balance(true);
        store.save().await.unwrap();

        let reloaded = MemoryWalletStore::load(&path).unwrap();
        assert!(reloaded.wallets().await[0].hide_balance());
        assert_eq!(store.save_count(), 1);
    }

    #[tokio::test]
    async fn test_fetch_transactions_rereads_fixture() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("wallets.json");
        let mut fixture = WalletFixture {
            wallets: vec![lightning()],
            tx_metadata: HashMap::new(),
        };
        std::fs::write(&path, serde_json::to_string(&fixture).unwrap()).unwrap();
        let store = MemoryWalletStore::load(&path).unwrap();

        fixture.wallets[0].balance = 9_000;
        std::fs::write(&path, serde_json::to_string(&fixture).unwrap()).unwrap();
        store.fetch_transactions().await.unwrap();

        assert_eq!(store.wallets().await[0].balance().await.unwrap(), 9_000);
    }

    #[test]
    fn test_empty_memo_is_ignored() {
        let store = MemoryWalletStore::new(vec![]);
        store.set_memo("abc", "");
        assert_eq!(store.transaction_memo("abc"), None);
        store.set_memo("abc", "rent");
        assert_eq!(store.transaction_memo("abc").as_deref(), Some("rent"));
    }
}
