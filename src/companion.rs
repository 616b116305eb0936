//! Companion-side replica
//!
//! Holds the only durable copy of the last-synced projection. Envelopes are
//! applied last-value-wins: a wallet set replaces the previous one wholesale.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::channel::{Delivery, Envelope, MemoryTransport, Reply, RequestMessage};
use crate::error::Result;
use crate::projection::WalletSummary;

/// Number of envelopes applied, by kind
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppliedCounts {
    pub wallets: u64,
    pub context: u64,
    pub currency: u64,
}

/// State mirrored on the companion
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompanionState {
    pub wallets: Vec<WalletSummary>,
    pub is_wallets_initialized: bool,
    #[serde(default)]
    pub preferred_fiat_currency: Option<String>,
    #[serde(skip)]
    pub applied: AppliedCounts,
}

impl CompanionState {
    pub fn apply(&mut self, envelope: Envelope) {
        match envelope {
            Envelope::Wallets { wallets, .. } => {
                self.wallets = wallets;
                self.applied.wallets += 1;
            }
            Envelope::Context {
                is_wallets_initialized,
                ..
            } => {
                self.is_wallets_initialized = is_wallets_initialized;
                self.applied.context += 1;
            }
            Envelope::Currency {
                preferred_fiat_currency,
            } => {
                self.preferred_fiat_currency = Some(preferred_fiat_currency);
                self.applied.currency += 1;
            }
        }
    }

    pub async fn persist(&self, path: &Path) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        tokio::fs::write(path, content).await?;
        debug!("Persisted companion state to {}", path.display());
        Ok(())
    }

    /// Restore persisted state; a missing file yields the empty state
    pub async fn restore(path: &Path) -> Result<Self> {
        match tokio::fs::read_to_string(path).await {
            Ok(content) => Ok(serde_json::from_str(&content)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Simulated companion device attached to a [`MemoryTransport`]
pub struct CompanionReplica {
    state: CompanionState,
    transport: Arc<MemoryTransport>,
    deliveries: mpsc::UnboundedReceiver<Delivery>,
    reply_timeout: Duration,
}

impl CompanionReplica {
    pub fn new(
        transport: Arc<MemoryTransport>,
        deliveries: mpsc::UnboundedReceiver<Delivery>,
        reply_timeout: Duration,
    ) -> Self {
        Self {
            state: CompanionState::default(),
            transport,
            deliveries,
            reply_timeout,
        }
    }

    pub fn with_state(mut self, state: CompanionState) -> Self {
        self.state = state;
        self
    }

    pub fn state(&self) -> &CompanionState {
        &self.state
    }

    /// Apply every delivery received so far, returning how many were applied
    pub fn drain(&mut self) -> usize {
        let mut applied = 0;
        while let Ok(delivery) = self.deliveries.try_recv() {
            match Envelope::decode(&delivery.payload) {
                Ok(envelope) => {
                    debug!(kind = envelope.kind(), mode = ?delivery.mode, "Applying envelope");
                    self.state.apply(envelope);
                    applied += 1;
                }
                Err(e) => warn!("Discarding undecodable delivery: {}", e),
            }
        }
        applied
    }

    /// Send a request and wait a bounded time; silence yields an empty reply
    pub async fn request(&self, message: RequestMessage) -> Reply {
        let rx = match self.transport.send_request(message) {
            Ok(rx) => rx,
            Err(e) => {
                info!("Companion request not delivered: {}", e);
                return Reply::empty();
            }
        };

        match tokio::time::timeout(self.reply_timeout, rx).await {
            Ok(Ok(reply)) => reply,
            Ok(Err(_)) => {
                debug!("Request closed without reply");
                Reply::empty()
            }
            Err(_) => {
                warn!("No reply within {:?}", self.reply_timeout);
                Reply::empty()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::{LinkState, SyncTransport};
    use crate::wallet::BalanceUnit;
    use tempfile::tempdir;

    fn summary(label: &str) -> WalletSummary {
        WalletSummary {
            id: label.to_lowercase(),
            label: label.to_string(),
            wallet_type: "HDsegwitBech32".to_string(),
            preferred_balance_unit: BalanceUnit::Btc,
            balance: 1,
            formatted_balance: "0.00000001 BTC".to_string(),
            receive_address: "bc1q".to_string(),
            transactions: vec![],
            hide_balance: false,
            xpub: None,
            payment_code: None,
        }
    }

    fn replica(timeout_ms: u64) -> CompanionReplica {
        let (transport, deliveries) = MemoryTransport::new(LinkState::new(true, true, true));
        CompanionReplica::new(
            Arc::new(transport),
            deliveries,
            Duration::from_millis(timeout_ms),
        )
    }

    #[test]
    fn test_wallet_set_replaces_wholesale() {
        let mut state = CompanionState::default();
        state.apply(Envelope::wallets(vec![summary("A"), summary("B")]));
        state.apply(Envelope::wallets(vec![summary("C")]));
        assert_eq!(state.wallets.len(), 1);
        assert_eq!(state.wallets[0].label, "C");
        assert_eq!(state.applied.wallets, 2);
    }

    #[tokio::test]
    async fn test_only_last_durable_value_is_observed() {
        let (transport, deliveries) = MemoryTransport::new(LinkState::new(true, true, false));
        let transport = Arc::new(transport);
        let mut replica =
            CompanionReplica::new(transport.clone(), deliveries, Duration::from_millis(50));

        for label in ["A", "B", "C"] {
            let payload = serde_json::to_vec(&Envelope::wallets(vec![summary(label)])).unwrap();
            transport.send_durable(payload).await.unwrap();
        }
        transport.set_reachable(true);

        assert_eq!(replica.drain(), 1);
        assert_eq!(replica.state().wallets[0].label, "C");
    }

    #[tokio::test]
    async fn test_request_without_listener_is_empty() {
        let replica = replica(50);
        let reply = replica
            .request(RequestMessage {
                message: Some("fetchTransactions".into()),
                ..Default::default()
            })
            .await;
        assert!(reply.is_empty());
    }

    #[tokio::test]
    async fn test_unanswered_request_times_out_empty() {
        let replica = replica(20);
        // Listener exists but never replies
        let _subscription = replica.transport.subscribe();
        let started = std::time::Instant::now();
        let reply = replica.request(RequestMessage::default()).await;
        assert!(reply.is_empty());
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_persist_and_restore() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("companion.json");

        let mut state = CompanionState::default();
        state.apply(Envelope::wallets(vec![summary("A")]));
        state.apply(Envelope::currency("EUR"));
        state.persist(&path).await.unwrap();

        let restored = CompanionState::restore(&path).await.unwrap();
        assert_eq!(restored.wallets, state.wallets);
        assert_eq!(restored.preferred_fiat_currency.as_deref(), Some("EUR"));

        let missing = CompanionState::restore(&dir.path().join("absent.json")).await.unwrap();
        assert_eq!(missing, CompanionState::default());
    }
}
