//! CLI command implementations

use anyhow::Result;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::channel::{Envelope, LinkState, MemoryTransport, RequestMessage, SyncChannel};
use crate::companion::{CompanionReplica, CompanionState};
use crate::config::Config;
use crate::notify::RecordingNotifier;
use crate::preferences::{keys, MemoryPreferenceStore, PermissionGate};
use crate::projection::{digest, project, SnapshotBuilder};
use crate::sync::{Collaborators, SyncSession};
use crate::wallet::{format_balance, BalanceUnit, MemoryWalletStore, WalletStore};
use crate::widget::WidgetPublisher;

fn load_wallets(path: &Path) -> Result<Arc<MemoryWalletStore>> {
    let store = MemoryWalletStore::load(path)
        .map_err(|e| anyhow::anyhow!("Failed to load wallets: {}", e))?;
    Ok(Arc::new(store))
}

/// Compute the aggregate projection and the widget fields
pub async fn project_wallets(config: &Config, wallets_path: &Path, allow: bool) -> Result<()> {
    let wallets = load_wallets(wallets_path)?;
    let preferences = Arc::new(MemoryPreferenceStore::new());
    let scope = config.preferences.scope.as_str();

    let gate = PermissionGate::new(preferences.as_ref(), scope);
    gate.set_balance_display_allowed(allow).await?;

    let projection = project(wallets.as_ref(), &gate).await;
    WidgetPublisher::new(wallets.clone(), preferences.clone(), scope)
        .publish()
        .await;

    println!("\n=== AGGREGATE PROJECTION ===\n");
    println!("Display allowed: {}", projection.display_allowed);
    println!(
        "Total balance: {} ({})",
        projection.total_balance,
        format_balance(projection.total_balance, BalanceUnit::Btc)
    );
    println!("Latest transaction: {}", projection.latest_transaction_time);

    println!("\n=== WIDGET FIELDS ({}) ===\n", scope);
    for key in [
        keys::ALL_WALLETS_BALANCE,
        keys::ALL_WALLETS_LATEST_TRANSACTION_TIME,
        keys::DISPLAY_BALANCE_ALLOWED,
    ] {
        let value = preferences.peek(scope, key);
        println!("{:<55} {}", key, value.as_deref().unwrap_or("(absent)"));
    }
    println!();
    Ok(())
}

/// Build and print the wallet set sent to the companion
pub async fn snapshot(config: &Config, wallets_path: &Path, allow: bool, json: bool) -> Result<()> {
    let wallets = load_wallets(wallets_path)?;
    let preferences = Arc::new(MemoryPreferenceStore::new());
    let scope = config.preferences.scope.as_str();
    PermissionGate::new(preferences.as_ref(), scope)
        .set_balance_display_allowed(allow)
        .await?;

    let builder = SnapshotBuilder::new(config.sync.transactions_per_wallet)
        .with_permission(preferences, scope);

    let Some(summaries) = builder.build(wallets.as_ref()).await else {
        warn!("Wallets not initialized, nothing to send");
        return Ok(());
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&summaries)?);
        return Ok(());
    }

    let total = wallets.wallets().await.len();
    println!("\n=== COMPANION SNAPSHOT ({} of {} wallets) ===\n", summaries.len(), total);
    println!("{:<20} {:<26} {:<24} {}", "LABEL", "TYPE", "BALANCE", "ADDRESS");
    println!("{}", "-".repeat(100));
    for summary in &summaries {
        let balance = if summary.hide_balance {
            "(hidden)".to_string()
        } else {
            summary.formatted_balance.clone()
        };
        println!(
            "{:<20} {:<26} {:<24} {}",
            summary.label, summary.wallet_type, balance, summary.receive_address
        );
        for tx in &summary.transactions {
            println!("    {:?} {} {} {}", tx.kind, tx.amount, tx.time, tx.memo);
        }
    }

    let channel = SyncChannel::new(
        Arc::new(MemoryTransport::new(LinkState::default()).0),
        config.sync.max_payload_bytes,
    );
    let hash = digest(&summaries);
    match channel.encode(&Envelope::wallets(summaries)) {
        Ok(payload) => println!(
            "\nPayload: {} bytes (limit {}), digest {}",
            payload.len(),
            config.sync.max_payload_bytes,
            &hash[..16]
        ),
        Err(e) => println!("\nPayload rejected: {}", e),
    }
    println!();
    Ok(())
}

/// Host actions performed during a simulated session
#[derive(Debug, Default)]
pub struct SimulateOptions {
    pub allow: bool,
    pub currency: Option<String>,
    pub hide_wallet: Option<usize>,
    /// Wallet index and amount in sats
    pub invoice: Option<(usize, i64)>,
}

/// Run a full session against a simulated companion
pub async fn simulate(
    config: &Config,
    wallets_path: &Path,
    options: SimulateOptions,
) -> Result<()> {
    let SimulateOptions {
        allow,
        currency,
        hide_wallet,
        invoice,
    } = options;
    let wallets = load_wallets(wallets_path)?;
    wallets.set_initialized(false);

    let preferences = Arc::new(MemoryPreferenceStore::new());
    let (transport, deliveries) = MemoryTransport::new(LinkState::new(true, true, false));
    let transport = Arc::new(transport);

    let mut companion = CompanionReplica::new(
        transport.clone(),
        deliveries,
        Duration::from_millis(config.companion.reply_timeout_ms),
    );
    if let Some(path) = &config.companion.state_path {
        let restored = CompanionState::restore(path).await?;
        info!("Restored companion state with {} wallets", restored.wallets.len());
        companion = companion.with_state(restored);
    }

    let session = SyncSession::start(
        config,
        Collaborators {
            wallets: wallets.clone(),
            preferences: preferences.clone(),
            notifier: Arc::new(RecordingNotifier::new(true)),
            transport: transport.clone(),
        },
    );

    session.set_balance_display_allowed(allow).await?;

    info!("Wallets initialized while companion is unreachable");
    wallets.set_initialized(true);
    session.set_wallets_initialized(true).await?;
    settle().await;

    info!("Companion becomes reachable");
    transport.set_reachable(true);
    settle().await;

    if let Some(code) = currency {
        session.set_preferred_currency(code).await?;
        settle().await;
    }

    if let Some(index) = hide_wallet {
        let reply = companion
            .request(RequestMessage {
                message: Some("hideBalance".to_string()),
                wallet_index: Some(index),
                hide_balance: Some(true),
                ..Default::default()
            })
            .await;
        info!("hideBalance reply: {}", serde_json::to_string(&reply)?);
        settle().await;
    }

    if let Some((index, amount)) = invoice {
        let reply = companion
            .request(RequestMessage {
                request: Some("createInvoice".to_string()),
                wallet_index: Some(index),
                amount: Some(amount),
                ..Default::default()
            })
            .await;
        match reply.invoice_payment_request {
            Some(invoice) => println!("Invoice: {}", invoice),
            None => println!("Invoice: (none)"),
        }
    }

    session.shutdown().await;
    let applied = companion.drain();

    let state = companion.state();
    println!("\n=== COMPANION STATE ===\n");
    println!("Envelopes applied this run: {}", applied);
    println!(
        "Applied by kind: wallets={} context={} currency={}",
        state.applied.wallets, state.applied.context, state.applied.currency
    );
    println!("Wallets initialized: {}", state.is_wallets_initialized);
    println!(
        "Preferred currency: {}",
        state.preferred_fiat_currency.as_deref().unwrap_or("(default)")
    );
    for wallet in &state.wallets {
        let balance = if wallet.hide_balance {
            "(hidden)"
        } else {
            wallet.formatted_balance.as_str()
        };
        println!("  {:<20} {}", wallet.label, balance);
    }
    println!("Best-effort sends dropped: {}", transport.dropped_count());
    println!();

    if let Some(path) = &config.companion.state_path {
        state.persist(path).await?;
        info!("Companion state saved to {}", path.display());
    }

    Ok(())
}

/// Let spawned session tasks process queued events
async fn settle() {
    tokio::time::sleep(Duration::from_millis(50)).await;
}

/// Show current configuration
pub fn show_config(config: &Config) -> Result<()> {
    println!("{}", config.display_summary());
    Ok(())
}
