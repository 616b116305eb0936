//! Incoming-payment notification registration

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use tracing::debug;

use crate::error::{Error, Result};

/// Registers payment hashes for incoming-payment alerts
#[async_trait]
pub trait NotificationSubscriber: Send + Sync {
    async fn is_enabled(&self) -> bool;

    async fn subscribe(&self, payment_hashes: &[String]) -> Result<()>;
}

/// Notifier that records every subscription
#[derive(Default)]
pub struct RecordingNotifier {
    enabled: AtomicBool,
    fail: AtomicBool,
    subscribed: Mutex<Vec<String>>,
}

impl RecordingNotifier {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled: AtomicBool::new(enabled),
            ..Default::default()
        }
    }

    /// Make subsequent subscriptions fail
    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn subscribed(&self) -> Vec<String> {
        self.subscribed.lock().map(|s| s.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl NotificationSubscriber for RecordingNotifier {
    async fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    async fn subscribe(&self, payment_hashes: &[String]) -> Result<()> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(Error::Notification("subscription endpoint unavailable".into()));
        }
        let mut subscribed = self
            .subscribed
            .lock()
            .map_err(|e| Error::Notification(format!("Lock failed: {}", e)))?;
        subscribed.extend(payment_hashes.iter().cloned());
        debug!("Subscribed {} payment hashes", payment_hashes.len());
        Ok(())
    }
}
