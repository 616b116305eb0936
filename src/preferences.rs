//! Shared preference store and the balance-display permission gate
//!
//! The preference store is a scoped string key/value store shared with the
//! companion widget surface. The permission gate is a single persisted flag
//! in that store deciding whether real balances may ever leave this core.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::error::{Error, Result};

/// Keys written for the widget surface
pub mod keys {
    pub const ALL_WALLETS_BALANCE: &str = "WidgetCommunicationAllWalletsSatoshiBalance";
    pub const ALL_WALLETS_LATEST_TRANSACTION_TIME: &str =
        "WidgetCommunicationAllWalletsLatestTransactionTime";
    pub const DISPLAY_BALANCE_ALLOWED: &str = "WidgetCommunicationDisplayBalanceAllowed";
    pub const LATEST_TRANSACTION_IS_UNCONFIRMED: &str =
        "WidgetCommunicationLatestTransactionIsUnconfirmed";
}

/// Scoped key/value store shared with the companion surface
#[async_trait]
pub trait PreferenceStore: Send + Sync {
    /// Select the storage group subsequent calls operate on
    async fn set_scope(&self, name: &str) -> Result<()>;

    async fn get(&self, key: &str) -> Result<Option<String>>;

    async fn set(&self, key: &str, value: &str) -> Result<()>;

    async fn clear(&self, key: &str) -> Result<()>;
}

/// In-memory preference store
#[derive(Default)]
pub struct MemoryPreferenceStore {
    scope: RwLock<String>,
    groups: RwLock<HashMap<String, HashMap<String, String>>>,
}

impl MemoryPreferenceStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read a key from an explicit scope without touching the current one
    pub fn peek(&self, scope: &str, key: &str) -> Option<String> {
        self.groups
            .read()
            .ok()?
            .get(scope)
            .and_then(|group| group.get(key).cloned())
    }

    fn current_scope(&self) -> Result<String> {
        self.scope
            .read()
            .map(|s| s.clone())
            .map_err(|e| Error::Preference(format!("Scope lock failed: {}", e)))
    }
}

#[async_trait]
impl PreferenceStore for MemoryPreferenceStore {
    async fn set_scope(&self, name: &str) -> Result<()> {
        let mut scope = self
            .scope
            .write()
            .map_err(|e| Error::Preference(format!("Scope lock failed: {}", e)))?;
        *scope = name.to_string();
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        let scope = self.current_scope()?;
        let groups = self
            .groups
            .read()
            .map_err(|e| Error::Preference(format!("Store lock failed: {}", e)))?;
        Ok(groups.get(&scope).and_then(|group| group.get(key).cloned()))
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        let scope = self.current_scope()?;
        let mut groups = self
            .groups
            .write()
            .map_err(|e| Error::Preference(format!("Store lock failed: {}", e)))?;
        groups
            .entry(scope)
            .or_default()
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn clear(&self, key: &str) -> Result<()> {
        let scope = self.current_scope()?;
        let mut groups = self
            .groups
            .write()
            .map_err(|e| Error::Preference(format!("Store lock failed: {}", e)))?;
        if let Some(group) = groups.get_mut(&scope) {
            group.remove(key);
        }
        Ok(())
    }
}

/// "Is balance display allowed" gate
///
/// Reads fail open: a store error is treated as allowed and the allowed value
/// is written back so the next read is consistent.
pub struct PermissionGate<'a> {
    store: &'a dyn PreferenceStore,
    scope: &'a str,
}

impl<'a> PermissionGate<'a> {
    pub fn new(store: &'a dyn PreferenceStore, scope: &'a str) -> Self {
        Self { store, scope }
    }

    pub async fn is_balance_display_allowed(&self) -> bool {
        match self.read().await {
            Ok(allowed) => allowed,
            Err(e) => {
                warn!("Permission read failed, assuming display allowed: {}", e);
                if let Err(e) = self.set_balance_display_allowed(true).await {
                    warn!("Failed to persist display permission: {}", e);
                }
                true
            }
        }
    }

    pub async fn set_balance_display_allowed(&self, allowed: bool) -> Result<()> {
        self.store.set_scope(self.scope).await?;
        if allowed {
            self.store.set(keys::DISPLAY_BALANCE_ALLOWED, "1").await
        } else {
            self.store.clear(keys::DISPLAY_BALANCE_ALLOWED).await
        }
    }

    async fn read(&self) -> Result<bool> {
        self.store.set_scope(self.scope).await?;
        let value = self.store.get(keys::DISPLAY_BALANCE_ALLOWED).await?;
        debug!("Display permission raw value: {:?}", value);
        Ok(value.as_deref() == Some("1"))
    }
}
