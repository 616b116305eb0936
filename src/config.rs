//! Configuration loading and validation

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Main configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub sync: SyncConfig,
    #[serde(default)]
    pub companion: CompanionConfig,
    #[serde(default)]
    pub preferences: PreferencesConfig,
    #[serde(default)]
    pub invoice: InvoiceConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Outbound sync settings
#[derive(Debug, Clone, Deserialize)]
pub struct SyncConfig {
    /// Currency assumed to be on the companion before anything is sent
    #[serde(default = "default_currency")]
    pub default_currency: String,
    /// Largest encoded envelope the channel accepts
    #[serde(default = "default_max_payload_bytes")]
    pub max_payload_bytes: usize,
    #[serde(default = "default_transactions_per_wallet")]
    pub transactions_per_wallet: usize,
    #[serde(default = "default_event_queue_capacity")]
    pub event_queue_capacity: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            default_currency: default_currency(),
            max_payload_bytes: default_max_payload_bytes(),
            transactions_per_wallet: default_transactions_per_wallet(),
            event_queue_capacity: default_event_queue_capacity(),
        }
    }
}

/// Companion-side settings
#[derive(Debug, Clone, Deserialize)]
pub struct CompanionConfig {
    /// How long a companion request waits before assuming an empty reply
    #[serde(default = "default_reply_timeout_ms")]
    pub reply_timeout_ms: u64,
    /// Where the companion replica persists its last-synced state
    #[serde(default)]
    pub state_path: Option<PathBuf>,
}

impl Default for CompanionConfig {
    fn default() -> Self {
        Self {
            reply_timeout_ms: default_reply_timeout_ms(),
            state_path: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PreferencesConfig {
    /// Shared storage group for widget fields and the permission flag
    #[serde(default = "default_scope")]
    pub scope: String,
}

impl Default for PreferencesConfig {
    fn default() -> Self {
        Self {
            scope: default_scope(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct InvoiceConfig {
    /// Description used when a companion request carries none
    #[serde(default = "default_invoice_description")]
    pub default_description: String,
}

impl Default for InvoiceConfig {
    fn default() -> Self {
        Self {
            default_description: default_invoice_description(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LoggingConfig {
    /// Emit JSON log lines
    #[serde(default)]
    pub json: bool,
}

fn default_currency() -> String {
    "USD".to_string()
}

fn default_max_payload_bytes() -> usize {
    crate::channel::DEFAULT_MAX_PAYLOAD_BYTES
}

fn default_transactions_per_wallet() -> usize {
    crate::projection::DEFAULT_TRANSACTION_WINDOW
}

fn default_event_queue_capacity() -> usize {
    64
}

fn default_reply_timeout_ms() -> u64 {
    5_000
}

fn default_scope() -> String {
    "group.io.companion.shared".to_string()
}

fn default_invoice_description() -> String {
    "Invoice from companion".to_string()
}

impl Config {
    /// Load configuration from file and environment
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        let settings = config::Config::builder()
            .set_default("sync.default_currency", default_currency())?
            .set_default("sync.max_payload_bytes", default_max_payload_bytes() as i64)?
            .set_default(
                "sync.transactions_per_wallet",
                default_transactions_per_wallet() as i64,
            )?
            .set_default("sync.event_queue_capacity", default_event_queue_capacity() as i64)?
            .set_default("companion.reply_timeout_ms", default_reply_timeout_ms() as i64)?
            .set_default("preferences.scope", default_scope())?
            .set_default("invoice.default_description", default_invoice_description())?
            .set_default("logging.json", false)?
            // Load from file if exists
            .add_source(config::File::from(path).required(false))
            // Override with environment variables (prefix COMPANION_SYNC_)
            .add_source(
                config::Environment::with_prefix("COMPANION_SYNC")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .context("Failed to build configuration")?;

        let config: Config = settings
            .try_deserialize()
            .context("Failed to deserialize configuration")?;

        config.validate()?;

        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.sync.max_payload_bytes == 0 {
            anyhow::bail!("max_payload_bytes must be positive");
        }

        if self.sync.transactions_per_wallet == 0 {
            anyhow::bail!("transactions_per_wallet must be positive");
        }

        if self.sync.event_queue_capacity == 0 {
            anyhow::bail!("event_queue_capacity must be positive");
        }

        if self.sync.default_currency.trim().is_empty() {
            anyhow::bail!("default_currency must not be empty");
        }

        if self.preferences.scope.trim().is_empty() {
            anyhow::bail!("preferences scope must not be empty");
        }

        if self.companion.reply_timeout_ms == 0 {
            anyhow::bail!("reply_timeout_ms must be positive");
        }

        if self.sync.max_payload_bytes < 1_024 {
            tracing::warn!(
                "max_payload_bytes is {} - most wallet sets will not fit",
                self.sync.max_payload_bytes
            );
        }

        Ok(())
    }

    /// Configuration summary for display
    pub fn display_summary(&self) -> String {
        format!(
            r#"Configuration:
  Sync:
    default_currency: {}
    max_payload: {} bytes
    transactions_per_wallet: {}
    event_queue_capacity: {}
  Companion:
    reply_timeout: {}ms
    state_path: {}
  Preferences:
    scope: {}
  Invoice:
    default_description: {}
  Logging:
    json: {}
"#,
            self.sync.default_currency,
            self.sync.max_payload_bytes,
            self.sync.transactions_per_wallet,
            self.sync.event_queue_capacity,
            self.companion.reply_timeout_ms,
            self.companion
                .state_path
                .as_ref()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| "(not set)".to_string()),
            self.preferences.scope,
            self.invoice.default_description,
            self.logging.json,
        )
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            sync: SyncConfig::default(),
            companion: CompanionConfig::default(),
            preferences: PreferencesConfig::default(),
            invoice: InvoiceConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}
