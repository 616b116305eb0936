//! Widget field publisher
//!
//! Writes the aggregate projection into the shared preference scope as
//! string-encoded fields the home-screen widget reads.

use std::sync::Arc;

use tracing::{debug, error};

use crate::error::Result;
use crate::preferences::{keys, PermissionGate, PreferenceStore};
use crate::projection::{project, AggregateProjection};
use crate::wallet::WalletStore;

pub struct WidgetPublisher {
    wallets: Arc<dyn WalletStore>,
    preferences: Arc<dyn PreferenceStore>,
    scope: String,
}

impl WidgetPublisher {
    pub fn new(
        wallets: Arc<dyn WalletStore>,
        preferences: Arc<dyn PreferenceStore>,
        scope: impl Into<String>,
    ) -> Self {
        Self {
            wallets,
            preferences,
            scope: scope.into(),
        }
    }

    /// Recompute and write the widget fields; failures are logged only
    pub async fn publish(&self) {
        if !self.wallets.is_initialized() {
            debug!("Wallets not initialized, widget fields untouched");
            return;
        }

        match self.try_publish().await {
            Ok(projection) => debug!(
                total = projection.total_balance,
                latest = %projection.latest_transaction_time,
                "Widget fields published"
            ),
            Err(e) => error!("Failed to sync widget balance with wallets: {}", e),
        }
    }

    async fn try_publish(&self) -> Result<AggregateProjection> {
        let gate = PermissionGate::new(self.preferences.as_ref(), &self.scope);
        let projection = project(self.wallets.as_ref(), &gate).await;

        self.preferences.set_scope(&self.scope).await?;
        let total_balance = projection.total_balance.to_string();
        let latest_transaction_time = projection.latest_transaction_time.to_string();
        let (balance, time) = futures::join!(
            self.preferences
                .set(keys::ALL_WALLETS_BALANCE, &total_balance),
            self.preferences.set(
                keys::ALL_WALLETS_LATEST_TRANSACTION_TIME,
                &latest_transaction_time
            ),
        );
        balance?;
        time?;
        Ok(projection)
    }
}
