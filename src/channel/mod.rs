//! Companion sync channel
//!
//! Two delivery primitives over one narrow link:
//!
//! - **best-effort**: delivered promptly while the companion is reachable,
//!   dropped otherwise
//! - **durable**: eventually delivered; only the newest undelivered value is
//!   kept, so intermediate states may never be observed by the companion
//!
//! [`SyncChannel`] picks the mode from reachability and enforces the payload
//! bound. Transports implement [`SyncTransport`].

pub mod memory;

use std::sync::Arc;

use async_trait::async_trait;
use rand::Rng;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::projection::WalletSummary;

pub use memory::{Delivery, MemoryTransport};

/// Default payload bound in bytes
pub const DEFAULT_MAX_PAYLOAD_BYTES: usize = 65_536;

/// Upper bound (inclusive) of envelope nonces
const NONCE_MAX: u8 = 10;

/// Payload sent to the companion
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum Envelope {
    /// Full wallet set
    Wallets {
        wallets: Vec<WalletSummary>,
        #[serde(rename = "randomId")]
        random_id: u8,
    },
    /// Lightweight "wallets initialized" context update
    #[serde(rename_all = "camelCase")]
    Context {
        is_wallets_initialized: bool,
        random_id: u8,
    },
    /// Preferred fiat currency
    #[serde(rename_all = "camelCase")]
    Currency { preferred_fiat_currency: String },
}

impl Envelope {
    pub fn wallets(wallets: Vec<WalletSummary>) -> Self {
        Envelope::Wallets {
            wallets,
            random_id: nonce(),
        }
    }

    pub fn context(is_wallets_initialized: bool) -> Self {
        Envelope::Context {
            is_wallets_initialized,
            random_id: nonce(),
        }
    }

    pub fn currency(code: impl Into<String>) -> Self {
        Envelope::Currency {
            preferred_fiat_currency: code.into(),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Envelope::Wallets { .. } => "wallets",
            Envelope::Context { .. } => "context",
            Envelope::Currency { .. } => "currency",
        }
    }

    pub fn decode(payload: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(payload)?)
    }
}

/// Nonce forcing the receiving side to treat a repeat payload as new
fn nonce() -> u8 {
    rand::thread_rng().gen_range(0..=NONCE_MAX)
}

/// Companion link status
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LinkState {
    pub installed: bool,
    pub paired: bool,
    pub reachable: bool,
}

impl LinkState {
    pub fn new(installed: bool, paired: bool, reachable: bool) -> Self {
        Self {
            installed,
            paired,
            reachable,
        }
    }

    /// Companion app is installed on a paired device
    pub fn is_linked(&self) -> bool {
        self.installed && self.paired
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryMode {
    BestEffort,
    Durable,
}

impl DeliveryMode {
    /// Best-effort while reachable, durable otherwise
    pub fn select(reachable: bool) -> Self {
        if reachable {
            DeliveryMode::BestEffort
        } else {
            DeliveryMode::Durable
        }
    }
}

/// Request message as sent by the companion
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestMessage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wallet_index: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub amount: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hide_balance: Option<bool>,
}

/// Reply payload; `{}` when empty
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Reply {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub invoice_payment_request: Option<String>,
}

impl Reply {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn invoice(invoice: impl Into<String>) -> Self {
        Self {
            invoice_payment_request: Some(invoice.into()),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.invoice_payment_request.is_none()
    }
}

/// A request from the companion with its reply slot
#[derive(Debug)]
pub struct IncomingRequest {
    pub message: RequestMessage,
    pub reply: oneshot::Sender<Reply>,
}

impl IncomingRequest {
    /// Send a reply; the companion may have stopped waiting
    pub fn respond(self, reply: Reply) {
        if self.reply.send(reply).is_err() {
            debug!("Companion stopped waiting for reply");
        }
    }
}

/// Stream of incoming requests; dropping it unsubscribes
pub struct Subscription {
    rx: mpsc::Receiver<IncomingRequest>,
}

impl Subscription {
    pub fn new(rx: mpsc::Receiver<IncomingRequest>) -> Self {
        Self { rx }
    }

    pub async fn next(&mut self) -> Option<IncomingRequest> {
        self.rx.recv().await
    }
}

/// Transport to the companion surface
#[async_trait]
pub trait SyncTransport: Send + Sync {
    async fn send_best_effort(&self, payload: Vec<u8>) -> Result<()>;

    /// Replace the pending durable value
    async fn send_durable(&self, payload: Vec<u8>) -> Result<()>;

    /// Link status, including reachability changes
    fn link(&self) -> watch::Receiver<LinkState>;

    fn subscribe(&self) -> Subscription;
}

/// Bounded, mode-selecting front of a [`SyncTransport`]
#[derive(Clone)]
pub struct SyncChannel {
    transport: Arc<dyn SyncTransport>,
    max_payload_bytes: usize,
}

impl SyncChannel {
    pub fn new(transport: Arc<dyn SyncTransport>, max_payload_bytes: usize) -> Self {
        Self {
            transport,
            max_payload_bytes,
        }
    }

    pub fn encode(&self, envelope: &Envelope) -> Result<Vec<u8>> {
        let payload = serde_json::to_vec(envelope)?;
        if payload.len() > self.max_payload_bytes {
            warn!(
                kind = envelope.kind(),
                size = payload.len(),
                "Envelope exceeds payload bound"
            );
            return Err(Error::PayloadTooLarge {
                size: payload.len(),
                max: self.max_payload_bytes,
            });
        }
        Ok(payload)
    }

    /// Send with the mode selected from reachability
    pub async fn send(&self, envelope: &Envelope, reachable: bool) -> Result<DeliveryMode> {
        let mode = DeliveryMode::select(reachable);
        match mode {
            DeliveryMode::BestEffort => self.send_best_effort(envelope).await?,
            DeliveryMode::Durable => self.send_durable(envelope).await?,
        }
        Ok(mode)
    }

    pub async fn send_best_effort(&self, envelope: &Envelope) -> Result<()> {
        let payload = self.encode(envelope)?;
        debug!(kind = envelope.kind(), bytes = payload.len(), "Sending best-effort");
        self.transport.send_best_effort(payload).await
    }

    pub async fn send_durable(&self, envelope: &Envelope) -> Result<()> {
        let payload = self.encode(envelope)?;
        debug!(kind = envelope.kind(), bytes = payload.len(), "Sending durable");
        self.transport.send_durable(payload).await
    }

    pub fn link(&self) -> watch::Receiver<LinkState> {
        self.transport.link()
    }

    pub fn subscribe(&self) -> Subscription {
        self.transport.subscribe()
    }
}
