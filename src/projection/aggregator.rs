//! Balance/transaction aggregation across all wallets
//!
//! [`aggregate`] is pure; [`project`] gathers the wallet views and consults the
//! permission gate first.

use std::fmt;

use serde::{Serialize, Serializer};
use tracing::{debug, warn};

use crate::preferences::{keys, PermissionGate};
use crate::wallet::{Transaction, WalletStore};

/// Latest transaction time reported in the aggregate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LatestTransactionTime {
    /// Unix seconds of the newest confirmed transaction, 0 when none
    Epoch(i64),
    /// Exactly one unconfirmed transaction and no confirmed ones
    Unconfirmed,
}

impl fmt::Display for LatestTransactionTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LatestTransactionTime::Epoch(secs) => write!(f, "{}", secs),
            LatestTransactionTime::Unconfirmed => {
                f.write_str(keys::LATEST_TRANSACTION_IS_UNCONFIRMED)
            }
        }
    }
}

impl Serialize for LatestTransactionTime {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            LatestTransactionTime::Epoch(secs) => serializer.serialize_i64(*secs),
            LatestTransactionTime::Unconfirmed => {
                serializer.serialize_str(keys::LATEST_TRANSACTION_IS_UNCONFIRMED)
            }
        }
    }
}

/// Summary over all visible wallets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregateProjection {
    pub total_balance: i64,
    pub latest_transaction_time: LatestTransactionTime,
    pub display_allowed: bool,
}

impl AggregateProjection {
    /// Zeroed projection; never carries real figures
    pub fn zeroed(display_allowed: bool) -> Self {
        Self {
            total_balance: 0,
            latest_transaction_time: LatestTransactionTime::Epoch(0),
            display_allowed,
        }
    }
}

/// The data the aggregator needs from one wallet
#[derive(Debug, Clone, Default)]
pub struct WalletView {
    pub hide_balance: bool,
    pub balance: i64,
    /// Newest first
    pub transactions: Vec<Transaction>,
}

/// Aggregate wallet views into a projection
pub fn aggregate(wallets: &[WalletView], initialized: bool, allowed: bool) -> AggregateProjection {
    if !initialized || !allowed {
        return AggregateProjection::zeroed(allowed);
    }

    let mut total_balance = 0i64;
    let mut latest_confirmed = 0i64;
    // Carried across wallets: one confirmed tx anywhere earlier disables the marker
    let mut only_unconfirmed = true;

    for wallet in wallets.iter().filter(|w| !w.hide_balance) {
        total_balance = total_balance.saturating_add(wallet.balance);

        for tx in wallet.transactions.iter().filter(|tx| tx.is_confirmed()) {
            only_unconfirmed = false;
            latest_confirmed = latest_confirmed.max(tx.received);
        }

        // NOTE: returns for the whole projection on the first qualifying wallet,
        // so later wallets' balances are skipped. Kept as-is for compatibility
        // with existing companion surfaces; looks like it was meant per wallet.
        if only_unconfirmed
            && wallet.transactions.len() == 1
            && !wallet.transactions[0].is_confirmed()
        {
            return AggregateProjection {
                total_balance,
                latest_transaction_time: LatestTransactionTime::Unconfirmed,
                display_allowed: true,
            };
        }
    }

    AggregateProjection {
        total_balance,
        latest_transaction_time: LatestTransactionTime::Epoch(latest_confirmed),
        display_allowed: true,
    }
}

/// Read one view per wallet; a wallet whose balance cannot be read is skipped
pub async fn collect_views(store: &dyn WalletStore) -> Vec<WalletView> {
    let mut views = Vec::new();
    for wallet in store.wallets().await {
        if wallet.hide_balance() {
            views.push(WalletView {
                hide_balance: true,
                ..Default::default()
            });
            continue;
        }

        let balance = match wallet.balance().await {
            Ok(balance) => balance,
            Err(e) => {
                warn!("Skipping wallet {} in aggregate: {}", wallet.label(), e);
                continue;
            }
        };
        let transactions = wallet.transactions().await.unwrap_or_else(|e| {
            warn!("No transactions for wallet {} in aggregate: {}", wallet.label(), e);
            Vec::new()
        });

        views.push(WalletView {
            hide_balance: false,
            balance,
            transactions,
        });
    }
    views
}

/// Compute the projection for the current wallet store state
pub async fn project(store: &dyn WalletStore, gate: &PermissionGate<'_>) -> AggregateProjection {
    let initialized = store.is_initialized();
    let allowed = gate.is_balance_display_allowed().await;
    if !initialized || !allowed {
        debug!(initialized, allowed, "Aggregate projection zeroed");
        return AggregateProjection::zeroed(allowed);
    }

    let views = collect_views(store).await;
    aggregate(&views, initialized, allowed)
}
