//! Sync session wiring
//!
//! A session owns the outbound controller task and a link watcher task. The
//! watcher forwards link changes to the controller and keeps the inbound
//! listener subscribed only while the companion is installed, paired,
//! reachable and wallets are initialized. Ending the session unsubscribes
//! everything.

use std::sync::Arc;

use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::channel::{IncomingRequest, LinkState, Subscription, SyncChannel, SyncTransport};
use crate::config::Config;
use crate::error::Result;
use crate::notify::NotificationSubscriber;
use crate::preferences::{PermissionGate, PreferenceStore};
use crate::projection::SnapshotBuilder;
use crate::wallet::WalletStore;
use crate::widget::WidgetPublisher;

use super::inbound::InboundHandler;
use super::outbound::{OutboundController, OutboundEvent, OutboundHandle};

/// External collaborators a session runs against
#[derive(Clone)]
pub struct Collaborators {
    pub wallets: Arc<dyn WalletStore>,
    pub preferences: Arc<dyn PreferenceStore>,
    pub notifier: Arc<dyn NotificationSubscriber>,
    pub transport: Arc<dyn SyncTransport>,
}

pub struct SyncSession;

impl SyncSession {
    /// Spawn the session tasks
    pub fn start(config: &Config, collaborators: Collaborators) -> SessionHandle {
        let Collaborators {
            wallets,
            preferences,
            notifier,
            transport,
        } = collaborators;

        let (shutdown_tx, _) = broadcast::channel(1);
        let channel = SyncChannel::new(transport, config.sync.max_payload_bytes);
        let builder = SnapshotBuilder::new(config.sync.transactions_per_wallet)
            .with_permission(preferences.clone(), config.preferences.scope.clone());
        let widget = Arc::new(WidgetPublisher::new(
            wallets.clone(),
            preferences.clone(),
            config.preferences.scope.clone(),
        ));

        let (controller, outbound) = OutboundController::new(
            wallets.clone(),
            builder.clone(),
            channel.clone(),
            &config.sync.default_currency,
            config.sync.event_queue_capacity,
        );
        let controller = controller.with_widget(widget);

        let inbound = Arc::new(
            InboundHandler::new(
                wallets.clone(),
                notifier,
                builder,
                channel.clone(),
                config.invoice.default_description.clone(),
            )
            .with_outbound(outbound.clone()),
        );

        let (initialized_tx, initialized_rx) = watch::channel(false);

        let controller_task = tokio::spawn(controller.run(shutdown_tx.subscribe()));
        let watcher_task = tokio::spawn(watch_link(
            channel,
            outbound.clone(),
            inbound,
            initialized_rx,
            shutdown_tx.clone(),
        ));

        info!("Sync session started");
        SessionHandle {
            outbound,
            preferences,
            scope: config.preferences.scope.clone(),
            initialized: initialized_tx,
            shutdown: shutdown_tx,
            tasks: vec![controller_task, watcher_task],
        }
    }
}

/// Host-facing side of a running session
pub struct SessionHandle {
    outbound: OutboundHandle,
    preferences: Arc<dyn PreferenceStore>,
    scope: String,
    initialized: watch::Sender<bool>,
    shutdown: broadcast::Sender<()>,
    tasks: Vec<JoinHandle<()>>,
}

impl SessionHandle {
    pub fn outbound(&self) -> OutboundHandle {
        self.outbound.clone()
    }

    pub async fn set_wallets_initialized(&self, initialized: bool) -> Result<()> {
        self.initialized.send_replace(initialized);
        self.outbound
            .send(OutboundEvent::WalletsInitialized(initialized))
            .await
    }

    pub async fn set_preferred_currency(&self, code: impl Into<String>) -> Result<()> {
        self.outbound
            .send(OutboundEvent::CurrencyChanged(code.into()))
            .await
    }

    pub async fn wallets_changed(&self) -> Result<()> {
        self.outbound.send(OutboundEvent::WalletsChanged).await
    }

    /// Persist the display permission, then republish widget fields and the
    /// wallet set under the new permission
    pub async fn set_balance_display_allowed(&self, allowed: bool) -> Result<()> {
        PermissionGate::new(self.preferences.as_ref(), &self.scope)
            .set_balance_display_allowed(allowed)
            .await?;
        self.outbound.send(OutboundEvent::PermissionChanged).await
    }

    /// Stop all session tasks and wait for them
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(());
        for task in self.tasks {
            if let Err(e) = task.await {
                warn!("Session task ended abnormally: {}", e);
            }
        }
        info!("Sync session stopped");
    }
}

async fn watch_link(
    channel: SyncChannel,
    outbound: OutboundHandle,
    inbound: Arc<InboundHandler>,
    mut initialized: watch::Receiver<bool>,
    shutdown: broadcast::Sender<()>,
) {
    let mut link = channel.link();
    let mut shutdown_rx = shutdown.subscribe();
    let mut subscription: Option<Subscription> = None;

    let initial = *link.borrow_and_update();
    if outbound.send(OutboundEvent::LinkChanged(initial)).await.is_err() {
        return;
    }

    loop {
        let state = *link.borrow();
        let listening = accepts_requests(state, *initialized.borrow());
        match (listening, subscription.is_some()) {
            (true, false) => {
                debug!("Subscribing to companion requests");
                subscription = Some(channel.subscribe());
            }
            (false, true) => {
                debug!("Unsubscribing from companion requests");
                subscription = None;
            }
            _ => {}
        }

        tokio::select! {
            changed = link.changed() => {
                if changed.is_err() {
                    break;
                }
                let state = *link.borrow_and_update();
                if outbound.send(OutboundEvent::LinkChanged(state)).await.is_err() {
                    break;
                }
            }
            changed = initialized.changed() => {
                if changed.is_err() {
                    break;
                }
            }
            request = next_request(&mut subscription) => {
                match request {
                    Some(request) => {
                        let handler = inbound.clone();
                        tokio::spawn(async move {
                            if let Some(reply) = handler.handle(&request.message).await {
                                request.respond(reply);
                            }
                        });
                    }
                    None => subscription = None,
                }
            }
            _ = shutdown_rx.recv() => break,
        }
    }
    debug!("Link watcher stopped");
}

fn accepts_requests(link: LinkState, initialized: bool) -> bool {
    link.is_linked() && link.reachable && initialized
}

async fn next_request(subscription: &mut Option<Subscription>) -> Option<IncomingRequest> {
    match subscription {
        Some(subscription) => subscription.next().await,
        None => std::future::pending().await,
    }
}
