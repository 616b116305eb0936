//! Inbound companion request handling
//!
//! Each request is dispatched on its discriminant and handled in its own task.
//! Requests naming a wallet index are serialized per index, so two toggles of
//! the same wallet never interleave. Failures degrade to an empty reply.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{broadcast, Mutex};
use tracing::{debug, error, info, warn};

use crate::channel::{Envelope, Reply, RequestMessage, Subscription, SyncChannel};
use crate::error::{Error, Result};
use crate::notify::NotificationSubscriber;
use crate::projection::SnapshotBuilder;
use crate::wallet::WalletStore;

use super::outbound::{OutboundEvent, OutboundHandle};

/// A parsed companion request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompanionRequest {
    CreateInvoice {
        wallet_index: usize,
        amount: i64,
        description: Option<String>,
    },
    SendApplicationContext,
    FetchTransactions,
    HideBalance {
        wallet_index: usize,
        hide_balance: bool,
    },
}

impl CompanionRequest {
    /// Parse a raw message; `Ok(None)` for requests this side does not know
    pub fn parse(message: &RequestMessage) -> Result<Option<Self>> {
        if message.request.as_deref() == Some("createInvoice") {
            return Ok(Some(CompanionRequest::CreateInvoice {
                wallet_index: required(message.wallet_index, "walletIndex")?,
                amount: required(message.amount, "amount")?,
                description: message.description.clone(),
            }));
        }

        let request = match message.message.as_deref() {
            Some("sendApplicationContext") => CompanionRequest::SendApplicationContext,
            Some("fetchTransactions") => CompanionRequest::FetchTransactions,
            Some("hideBalance") => CompanionRequest::HideBalance {
                wallet_index: required(message.wallet_index, "walletIndex")?,
                hide_balance: required(message.hide_balance, "hideBalance")?,
            },
            _ => return Ok(None),
        };
        Ok(Some(request))
    }

    fn wallet_index(&self) -> Option<usize> {
        match self {
            CompanionRequest::CreateInvoice { wallet_index, .. }
            | CompanionRequest::HideBalance { wallet_index, .. } => Some(*wallet_index),
            _ => None,
        }
    }
}

fn required<T>(value: Option<T>, field: &str) -> Result<T> {
    value.ok_or_else(|| Error::Deserialization(format!("missing field {}", field)))
}

pub struct InboundHandler {
    wallets: Arc<dyn WalletStore>,
    notifier: Arc<dyn NotificationSubscriber>,
    builder: SnapshotBuilder,
    channel: SyncChannel,
    outbound: Option<OutboundHandle>,
    default_description: String,
    wallet_locks: DashMap<usize, Arc<Mutex<()>>>,
}

impl InboundHandler {
    pub fn new(
        wallets: Arc<dyn WalletStore>,
        notifier: Arc<dyn NotificationSubscriber>,
        builder: SnapshotBuilder,
        channel: SyncChannel,
        default_description: impl Into<String>,
    ) -> Self {
        Self {
            wallets,
            notifier,
            builder,
            channel,
            outbound: None,
            default_description: default_description.into(),
            wallet_locks: DashMap::new(),
        }
    }

    /// Nudge this controller after wallet mutations
    pub fn with_outbound(mut self, outbound: OutboundHandle) -> Self {
        self.outbound = Some(outbound);
        self
    }

    /// Handle one request; `None` means no reply is sent
    pub async fn handle(&self, message: &RequestMessage) -> Option<Reply> {
        let request = match CompanionRequest::parse(message) {
            Ok(Some(request)) => request,
            Ok(None) => {
                debug!(?message, "Ignoring unrecognized companion request");
                return None;
            }
            Err(e) => {
                warn!("Malformed companion request: {}", e);
                return Some(Reply::empty());
            }
        };

        let lock = request.wallet_index().map(|index| self.wallet_lock(index));
        let _guard = match &lock {
            Some(lock) => Some(lock.lock().await),
            None => None,
        };

        match self.dispatch(request).await {
            Ok(reply) => reply,
            Err(e) if e.is_per_wallet() => {
                warn!("Companion request rejected: {}", e);
                Some(Reply::empty())
            }
            Err(e) => {
                error!("Error handling companion request: {}", e);
                Some(Reply::empty())
            }
        }
    }

    /// Serve requests from a subscription until shutdown or unsubscribe
    pub async fn listen(
        self: Arc<Self>,
        mut subscription: Subscription,
        mut shutdown: broadcast::Receiver<()>,
    ) {
        loop {
            tokio::select! {
                request = subscription.next() => {
                    let Some(request) = request else { break };
                    let handler = self.clone();
                    tokio::spawn(async move {
                        if let Some(reply) = handler.handle(&request.message).await {
                            request.respond(reply);
                        }
                    });
                }
                _ = shutdown.recv() => break,
            }
        }
        debug!("Inbound listener stopped");
    }

    fn wallet_lock(&self, index: usize) -> Arc<Mutex<()>> {
        self.wallet_locks.entry(index).or_default().clone()
    }

    async fn dispatch(&self, request: CompanionRequest) -> Result<Option<Reply>> {
        match request {
            CompanionRequest::CreateInvoice {
                wallet_index,
                amount,
                description,
            } => {
                let invoice = self
                    .create_invoice(wallet_index, amount, description)
                    .await
                    .unwrap_or_else(|e| {
                        warn!("Error creating invoice: {}", e);
                        None
                    });
                Ok(Some(match invoice {
                    Some(invoice) => Reply::invoice(invoice),
                    None => Reply::empty(),
                }))
            }
            CompanionRequest::SendApplicationContext => {
                if let Some(wallets) = self.builder.build(self.wallets.as_ref()).await {
                    self.channel.send_durable(&Envelope::wallets(wallets)).await?;
                    info!("Pushed wallet set on companion request");
                }
                Ok(None)
            }
            CompanionRequest::FetchTransactions => {
                self.wallets.fetch_transactions().await?;
                self.wallets.save().await?;
                self.nudge().await;
                Ok(Some(Reply::empty()))
            }
            CompanionRequest::HideBalance {
                wallet_index,
                hide_balance,
            } => {
                let wallet = self
                    .wallets
                    .wallet_at(wallet_index)
                    .await
                    .ok_or(Error::WalletNotFound(wallet_index))?;
                wallet.set_hide_balance(hide_balance);
                self.wallets.save().await?;
                info!(wallet_index, hide_balance, "Wallet visibility changed by companion");
                self.nudge().await;
                Ok(Some(Reply::empty()))
            }
        }
    }

    /// Invoice string, or `None` when the wallet cannot issue invoices
    async fn create_invoice(
        &self,
        wallet_index: usize,
        amount: i64,
        description: Option<String>,
    ) -> Result<Option<String>> {
        let wallet = self
            .wallets
            .wallet_at(wallet_index)
            .await
            .ok_or(Error::WalletNotFound(wallet_index))?;
        let caps = *wallet.capabilities();

        if !caps.allows_receive {
            return Err(Error::ReceiveNotAllowed(wallet.label()));
        }
        if amount <= 0 {
            return Err(Error::InvalidAmount(amount));
        }
        if !caps.invoices {
            debug!("Wallet {} cannot issue invoices", wallet.label());
            return Ok(None);
        }

        let description = description.unwrap_or_else(|| self.default_description.clone());
        let invoice = wallet.create_invoice(amount, &description).await?;

        if self.notifier.is_enabled().await {
            let registered = match wallet.invoice_payment_hash(&invoice).await {
                Ok(hash) => self.notifier.subscribe(&[hash]).await,
                Err(e) => Err(e),
            };
            if let Err(e) = registered {
                warn!("Failed to register invoice for payment alerts: {}", e);
            }
        }

        Ok(Some(invoice))
    }

    async fn nudge(&self) {
        if let Some(outbound) = &self.outbound {
            if let Err(e) = outbound.send(OutboundEvent::WalletsChanged).await {
                debug!("Outbound controller not notified: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;

    use crate::channel::{LinkState, MemoryTransport, SyncTransport};
    use crate::notify::RecordingNotifier;
    use crate::wallet::{MemoryWalletStore, WalletHandle, WalletKind, WalletRecord};

    struct Harness {
        handler: Arc<InboundHandler>,
        wallets: Arc<MemoryWalletStore>,
        notifier: Arc<RecordingNotifier>,
        transport: Arc<MemoryTransport>,
    }

    fn harness(notifications: bool) -> Harness {
        let mut onchain = WalletRecord::new("w0", "Savings", WalletKind::HdSegwitBech32, 10_000);
        onchain.address = Some("bc1qsavings".into());
        let mut lightning = WalletRecord::new("w1", "Lightning", WalletKind::Lightning, 2_000);
        lightning.cached_address = Some("lndhub://w1".into());
        let mut watch = WalletRecord::new("w2", "Watch", WalletKind::WatchOnly, 5);
        watch.address = Some("bc1qwatch".into());

        let wallets = Arc::new(MemoryWalletStore::new(vec![onchain, lightning, watch]));
        let notifier = Arc::new(RecordingNotifier::new(notifications));
        let (transport, _deliveries) = MemoryTransport::new(LinkState::new(true, true, false));
        let transport = Arc::new(transport);
        let channel = SyncChannel::new(transport.clone(), 65_536);
        let handler = Arc::new(InboundHandler::new(
            wallets.clone(),
            notifier.clone(),
            SnapshotBuilder::default(),
            channel,
            "From companion",
        ));
        Harness {
            handler,
            wallets,
            notifier,
            transport,
        }
    }

    fn invoice_request(wallet_index: usize, amount: i64) -> RequestMessage {
        RequestMessage {
            request: Some("createInvoice".into()),
            wallet_index: Some(wallet_index),
            amount: Some(amount),
            ..Default::default()
        }
    }

    fn hide_request(wallet_index: usize, hide_balance: bool) -> RequestMessage {
        RequestMessage {
            message: Some("hideBalance".into()),
            wallet_index: Some(wallet_index),
            hide_balance: Some(hide_balance),
            ..Default::default()
        }
    }

    #[test]
    fn test_parse_discriminants() {
        let parsed = CompanionRequest::parse(&invoice_request(1, 500)).unwrap();
        assert_eq!(
            parsed,
            Some(CompanionRequest::CreateInvoice {
                wallet_index: 1,
                amount: 500,
                description: None
            })
        );

        let unknown = RequestMessage {
            message: Some("selfDestruct".into()),
            ..Default::default()
        };
        assert_eq!(CompanionRequest::parse(&unknown).unwrap(), None);

        let missing = RequestMessage {
            message: Some("hideBalance".into()),
            ..Default::default()
        };
        assert!(CompanionRequest::parse(&missing).is_err());
    }

    #[tokio::test]
    async fn test_create_invoice_replies_with_invoice_and_subscribes() {
        let h = harness(true);
        let reply = h.handler.handle(&invoice_request(1, 1_500)).await.unwrap();
        let invoice = reply.invoice_payment_request.unwrap();
        assert!(invoice.starts_with("lnbc1500"));
        assert_eq!(h.notifier.subscribed().len(), 1);
    }

    #[tokio::test]
    async fn test_notification_failure_keeps_invoice() {
        let h = harness(true);
        h.notifier.set_failing(true);
        let reply = h.handler.handle(&invoice_request(1, 1_500)).await.unwrap();
        assert!(reply.invoice_payment_request.is_some());
    }

    #[tokio::test]
    async fn test_invoice_failures_reply_empty() {
        let h = harness(false);
        // zero amount
        assert_eq!(h.handler.handle(&invoice_request(1, 0)).await, Some(Reply::empty()));
        // no invoice capability
        assert_eq!(h.handler.handle(&invoice_request(0, 100)).await, Some(Reply::empty()));
        // receive not allowed
        assert_eq!(h.handler.handle(&invoice_request(2, 100)).await, Some(Reply::empty()));
        // out of range
        assert_eq!(h.handler.handle(&invoice_request(9, 100)).await, Some(Reply::empty()));
        assert!(h.notifier.subscribed().is_empty());
    }

    #[tokio::test]
    async fn test_hide_balance_then_rebuild_reflects_flag() {
        let h = harness(false);
        let reply = h.handler.handle(&hide_request(0, true)).await;
        assert_eq!(reply, Some(Reply::empty()));
        assert_eq!(h.wallets.save_count(), 1);

        let wallets = SnapshotBuilder::default().build(h.wallets.as_ref()).await.unwrap();
        assert!(wallets[0].hide_balance);
        assert!(!wallets[1].hide_balance);
    }

    /// Store whose saves stay in flight briefly and record peak overlap
    struct OverlapTracking {
        inner: MemoryWalletStore,
        in_flight: AtomicUsize,
        peak: AtomicUsize,
    }

    #[async_trait]
    impl WalletStore for OverlapTracking {
        async fn wallets(&self) -> Vec<Arc<dyn WalletHandle>> {
            self.inner.wallets().await
        }

        fn is_initialized(&self) -> bool {
            self.inner.is_initialized()
        }

        fn transaction_memo(&self, hash: &str) -> Option<String> {
            self.inner.transaction_memo(hash)
        }

        async fn fetch_transactions(&self) -> Result<()> {
            self.inner.fetch_transactions().await
        }

        async fn save(&self) -> Result<()> {
            let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(current, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(5)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            self.inner.save().await
        }
    }

    fn overlap_harness() -> (Arc<InboundHandler>, Arc<OverlapTracking>) {
        let mut savings = WalletRecord::new("w0", "Savings", WalletKind::HdSegwitBech32, 10_000);
        savings.address = Some("bc1qsavings".into());
        let mut lightning = WalletRecord::new("w1", "Lightning", WalletKind::Lightning, 2_000);
        lightning.cached_address = Some("lndhub://w1".into());

        let store = Arc::new(OverlapTracking {
            inner: MemoryWalletStore::new(vec![savings, lightning]),
            in_flight: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        });
        let (transport, _deliveries) = MemoryTransport::new(LinkState::new(true, true, false));
        let handler = Arc::new(InboundHandler::new(
            store.clone(),
            Arc::new(RecordingNotifier::new(false)),
            SnapshotBuilder::default(),
            SyncChannel::new(Arc::new(transport), 65_536),
            "From companion",
        ));
        (handler, store)
    }

    async fn run_concurrently(handler: &Arc<InboundHandler>, requests: Vec<RequestMessage>) {
        let tasks: Vec<_> = requests
            .into_iter()
            .map(|request| {
                let handler = handler.clone();
                tokio::spawn(async move { handler.handle(&request).await })
            })
            .collect();
        for task in tasks {
            assert_eq!(task.await.unwrap(), Some(Reply::empty()));
        }
    }

    #[tokio::test]
    async fn test_requests_for_one_wallet_never_overlap() {
        let (handler, store) = overlap_harness();
        let requests = (0..10).map(|i| hide_request(0, i % 2 == 0)).collect();
        run_concurrently(&handler, requests).await;

        assert_eq!(store.peak.load(Ordering::SeqCst), 1);
        assert_eq!(store.inner.save_count(), 10);
    }

    #[tokio::test]
    async fn test_requests_for_different_wallets_may_overlap() {
        let (handler, store) = overlap_harness();
        run_concurrently(&handler, vec![hide_request(0, true), hide_request(1, true)]).await;

        assert_eq!(store.peak.load(Ordering::SeqCst), 2);
        let wallets = store.wallets().await;
        assert!(wallets[0].hide_balance());
        assert!(wallets[1].hide_balance());
    }

    #[tokio::test]
    async fn test_unknown_request_gets_no_reply() {
        let h = harness(false);
        let message = RequestMessage {
            message: Some("ping".into()),
            ..Default::default()
        };
        assert_eq!(h.handler.handle(&message).await, None);
    }

    #[tokio::test]
    async fn test_send_application_context_pushes_durable() {
        let h = harness(false);
        let message = RequestMessage {
            message: Some("sendApplicationContext".into()),
            ..Default::default()
        };
        assert_eq!(h.handler.handle(&message).await, None);

        let pending = Envelope::decode(&h.transport.pending_durable().unwrap()).unwrap();
        match pending {
            Envelope::Wallets { wallets, .. } => assert_eq!(wallets.len(), 3),
            other => panic!("unexpected envelope {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_fetch_transactions_saves() {
        let h = harness(false);
        let message = RequestMessage {
            message: Some("fetchTransactions".into()),
            ..Default::default()
        };
        assert_eq!(h.handler.handle(&message).await, Some(Reply::empty()));
        assert_eq!(h.wallets.save_count(), 1);
    }

    #[tokio::test]
    async fn test_listen_replies_over_subscription() {
        let h = harness(true);
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let subscription = h.transport.subscribe();
        let listener = tokio::spawn(h.handler.clone().listen(subscription, shutdown_rx));

        let reply = h.transport.send_request(invoice_request(1, 700)).unwrap();
        assert!(reply.await.unwrap().invoice_payment_request.is_some());

        let silent = h
            .transport
            .send_request(RequestMessage {
                message: Some("ping".into()),
                ..Default::default()
            })
            .unwrap();
        assert!(silent.await.is_err());

        shutdown_tx.send(()).unwrap();
        listener.await.unwrap();
    }
}
