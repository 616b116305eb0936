//! Outbound sync controller
//!
//! A single actor owns [`SyncChannelState`] and decides when to rebuild and
//! retransmit. Events arrive on an `mpsc` queue and are handled one at a time
//! in arrival order. Send failures are logged and never retried; the next
//! trigger naturally tries again.

use std::sync::Arc;

use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, info, warn};

use crate::channel::{Envelope, LinkState, SyncChannel};
use crate::error::{Error, Result};
use crate::projection::{digest, SnapshotBuilder, WalletSummary};
use crate::wallet::WalletStore;
use crate::widget::WidgetPublisher;

/// Inputs to the outbound controller
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundEvent {
    LinkChanged(LinkState),
    WalletsInitialized(bool),
    CurrencyChanged(String),
    /// Wallet data changed on the host side
    WalletsChanged,
    /// Balance-display permission was toggled; amounts are re-projected
    PermissionChanged,
}

/// What the controller knows about the companion and what it last sent
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncChannelState {
    pub installed: bool,
    pub paired: bool,
    pub reachable: bool,
    pub wallets_initialized: bool,
    pub last_sent_currency: String,
    /// Digest of the last wallet set sent
    pub last_sent_projection: Option<String>,
}

impl SyncChannelState {
    pub fn new(default_currency: impl Into<String>) -> Self {
        Self {
            installed: false,
            paired: false,
            reachable: false,
            wallets_initialized: false,
            last_sent_currency: default_currency.into(),
            last_sent_projection: None,
        }
    }

    pub fn link(&self) -> LinkState {
        LinkState::new(self.installed, self.paired, self.reachable)
    }

    /// Installed, paired and wallets initialized
    pub fn can_sync(&self) -> bool {
        self.installed && self.paired && self.wallets_initialized
    }

    /// Syncable and the companion is reachable right now
    pub fn is_live(&self) -> bool {
        self.can_sync() && self.reachable
    }
}

/// Sender side of the controller's event queue
#[derive(Clone)]
pub struct OutboundHandle {
    tx: mpsc::Sender<OutboundEvent>,
}

impl OutboundHandle {
    pub async fn send(&self, event: OutboundEvent) -> Result<()> {
        self.tx
            .send(event)
            .await
            .map_err(|_| Error::Internal("outbound controller stopped".to_string()))
    }
}

pub struct OutboundController {
    state: SyncChannelState,
    preferred_currency: Option<String>,
    wallets: Arc<dyn WalletStore>,
    builder: SnapshotBuilder,
    channel: SyncChannel,
    widget: Option<Arc<WidgetPublisher>>,
    events: mpsc::Receiver<OutboundEvent>,
}

impl OutboundController {
    pub fn new(
        wallets: Arc<dyn WalletStore>,
        builder: SnapshotBuilder,
        channel: SyncChannel,
        default_currency: &str,
        queue_capacity: usize,
    ) -> (Self, OutboundHandle) {
        let (tx, events) = mpsc::channel(queue_capacity.max(1));
        let controller = Self {
            state: SyncChannelState::new(default_currency),
            preferred_currency: None,
            wallets,
            builder,
            channel,
            widget: None,
            events,
        };
        (controller, OutboundHandle { tx })
    }

    /// Republish widget fields alongside wallet and permission changes
    pub fn with_widget(mut self, widget: Arc<WidgetPublisher>) -> Self {
        self.widget = Some(widget);
        self
    }

    pub fn state(&self) -> &SyncChannelState {
        &self.state
    }

    /// Process events until shutdown or until every handle is dropped
    pub async fn run(mut self, mut shutdown: broadcast::Receiver<()>) {
        info!("Outbound sync controller started");
        loop {
            tokio::select! {
                event = self.events.recv() => {
                    match event {
                        Some(event) => self.handle(event).await,
                        None => break,
                    }
                }
                _ = shutdown.recv() => {
                    info!("Outbound sync controller shutting down");
                    break;
                }
            }
        }
    }

    pub async fn handle(&mut self, event: OutboundEvent) {
        debug!(?event, "Outbound event");
        match event {
            OutboundEvent::LinkChanged(link) => self.on_link_changed(link).await,
            OutboundEvent::WalletsInitialized(initialized) => {
                self.on_wallets_initialized(initialized).await
            }
            OutboundEvent::CurrencyChanged(code) => {
                self.preferred_currency = Some(code);
                self.sync_currency().await;
            }
            OutboundEvent::WalletsChanged | OutboundEvent::PermissionChanged => {
                self.on_wallets_changed().await
            }
        }
    }

    async fn on_link_changed(&mut self, link: LinkState) {
        if link == self.state.link() {
            return;
        }
        self.state.installed = link.installed;
        self.state.paired = link.paired;
        self.state.reachable = link.reachable;
        self.resync().await;
    }

    async fn on_wallets_initialized(&mut self, initialized: bool) {
        if initialized == self.state.wallets_initialized {
            return;
        }
        self.state.wallets_initialized = initialized;
        if initialized {
            self.publish_widget().await;
        }
        self.resync().await;
    }

    /// Full resend after an init or link transition
    async fn resync(&mut self) {
        if !self.state.can_sync() {
            debug!(link = ?self.state.link(), "Companion not ready, skipping resync");
            return;
        }

        self.send_wallets().await;

        if self.state.is_live() {
            let context = Envelope::context(self.state.wallets_initialized);
            if let Err(e) = self.channel.send_durable(&context).await {
                warn!("Failed to update companion context: {}", e);
            }
        }

        self.sync_currency().await;
    }

    async fn on_wallets_changed(&mut self) {
        self.publish_widget().await;
        if !self.state.can_sync() {
            return;
        }

        let Some(wallets) = self.builder.build(self.wallets.as_ref()).await else {
            return;
        };
        let hash = digest(&wallets);
        if self.state.last_sent_projection.as_deref() == Some(hash.as_str()) {
            debug!("Wallet set unchanged, not resending");
            return;
        }
        self.transmit(wallets, hash).await;
    }

    async fn send_wallets(&mut self) {
        let Some(wallets) = self.builder.build(self.wallets.as_ref()).await else {
            return;
        };
        let hash = digest(&wallets);
        self.transmit(wallets, hash).await;
    }

    async fn transmit(&mut self, wallets: Vec<WalletSummary>, hash: String) {
        let count = wallets.len();
        match self
            .channel
            .send(&Envelope::wallets(wallets), self.state.reachable)
            .await
        {
            Ok(mode) => {
                info!(wallets = count, ?mode, "Sent wallet set to companion");
                self.state.last_sent_projection = Some(hash);
            }
            Err(e) if e.is_transport() => warn!("Wallet set not delivered to companion: {}", e),
            Err(e) => error!("Failed to send wallets to companion: {}", e),
        }
    }

    async fn sync_currency(&mut self) {
        if !self.state.is_live() {
            return;
        }
        let Some(code) = self.preferred_currency.clone().filter(|c| !c.is_empty()) else {
            return;
        };
        if code == self.state.last_sent_currency {
            debug!("Preferred currency unchanged ({}), not sending", code);
            return;
        }

        match self.channel.send_best_effort(&Envelope::currency(code.as_str())).await {
            Ok(()) => {
                info!("Updated companion preferred currency to {}", code);
                self.state.last_sent_currency = code;
            }
            Err(e) if e.is_transport() => {
                warn!("Preferred currency not delivered to companion: {}", e)
            }
            Err(e) => error!("Failed to update companion preferred currency: {}", e),
        }
    }

    async fn publish_widget(&self) {
        if let Some(widget) = &self.widget {
            widget.publish().await;
        }
    }
}
