//! In-process transport to a simulated companion
//!
//! Deliveries are pushed onto an unbounded queue the companion side drains.
//! The durable slot holds at most one payload and is flushed whenever the
//! companion becomes reachable.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, info, warn};

use crate::error::{Error, Result};

use super::{
    DeliveryMode, IncomingRequest, LinkState, Reply, RequestMessage, Subscription, SyncTransport,
};

/// Listener queue depth for incoming requests
const REQUEST_QUEUE_DEPTH: usize = 32;

/// A payload that reached the companion
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub mode: DeliveryMode,
    pub payload: Vec<u8>,
}

pub struct MemoryTransport {
    link_tx: watch::Sender<LinkState>,
    durable: Mutex<Option<Vec<u8>>>,
    to_companion: mpsc::UnboundedSender<Delivery>,
    listener: Mutex<Option<mpsc::Sender<IncomingRequest>>>,
    dropped: AtomicU64,
}

impl MemoryTransport {
    pub fn new(initial: LinkState) -> (Self, mpsc::UnboundedReceiver<Delivery>) {
        let (link_tx, _) = watch::channel(initial);
        let (to_companion, deliveries) = mpsc::unbounded_channel();
        let transport = Self {
            link_tx,
            durable: Mutex::new(None),
            to_companion,
            listener: Mutex::new(None),
            dropped: AtomicU64::new(0),
        };
        (transport, deliveries)
    }

    pub fn link_state(&self) -> LinkState {
        *self.link_tx.borrow()
    }

    /// Update link status; becoming reachable flushes the durable slot
    pub fn set_link(&self, state: LinkState) {
        let previous = self.link_tx.send_replace(state);
        if previous != state {
            info!(
                installed = state.installed,
                paired = state.paired,
                reachable = state.reachable,
                "Companion link changed"
            );
        }
        if state.reachable {
            self.flush_durable();
        }
    }

    pub fn set_reachable(&self, reachable: bool) {
        let mut state = self.link_state();
        state.reachable = reachable;
        self.set_link(state);
    }

    /// Payload waiting in the durable slot
    pub fn pending_durable(&self) -> Option<Vec<u8>> {
        self.durable.lock().ok().and_then(|slot| slot.clone())
    }

    /// Best-effort sends dropped while unreachable
    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::SeqCst)
    }

    /// Deliver a companion request to the current listener
    pub fn send_request(&self, message: RequestMessage) -> Result<oneshot::Receiver<Reply>> {
        let (reply_tx, reply_rx) = oneshot::channel();
        let listener = self
            .listener
            .lock()
            .map_err(|e| Error::Transport(format!("Listener lock failed: {}", e)))?
            .clone()
            .ok_or(Error::CompanionUnavailable)?;

        listener
            .try_send(IncomingRequest {
                message,
                reply: reply_tx,
            })
            .map_err(|e| match e {
                mpsc::error::TrySendError::Closed(_) => Error::CompanionUnavailable,
                mpsc::error::TrySendError::Full(_) => {
                    Error::Transport("request queue full".to_string())
                }
            })?;
        Ok(reply_rx)
    }

    fn flush_durable(&self) {
        let payload = match self.durable.lock() {
            Ok(mut slot) => slot.take(),
            Err(e) => {
                warn!("Durable slot lock failed: {}", e);
                return;
            }
        };
        if let Some(payload) = payload {
            debug!(bytes = payload.len(), "Flushing durable context");
            self.deliver(DeliveryMode::Durable, payload);
        }
    }

    fn deliver(&self, mode: DeliveryMode, payload: Vec<u8>) {
        if self.to_companion.send(Delivery { mode, payload }).is_err() {
            debug!("Companion side closed, delivery discarded");
        }
    }
}

#[async_trait]
impl SyncTransport for MemoryTransport {
    async fn send_best_effort(&self, payload: Vec<u8>) -> Result<()> {
        if !self.link_state().reachable {
            self.dropped.fetch_add(1, Ordering::SeqCst);
            return Err(Error::CompanionUnavailable);
        }
        self.deliver(DeliveryMode::BestEffort, payload);
        Ok(())
    }

    async fn send_durable(&self, payload: Vec<u8>) -> Result<()> {
        {
            let mut slot = self
                .durable
                .lock()
                .map_err(|e| Error::Transport(format!("Durable slot lock failed: {}", e)))?;
            if slot.replace(payload).is_some() {
                debug!("Replaced undelivered durable context");
            }
        }
        if self.link_state().reachable {
            self.flush_durable();
        }
        Ok(())
    }

    fn link(&self) -> watch::Receiver<LinkState> {
        self.link_tx.subscribe()
    }

    fn subscribe(&self) -> Subscription {
        let (tx, rx) = mpsc::channel(REQUEST_QUEUE_DEPTH);
        if let Ok(mut listener) = self.listener.lock() {
            *listener = Some(tx);
        }
        Subscription::new(rx)
    }
}
