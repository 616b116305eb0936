//! companion-sync - wallet-state sync with companion surfaces
//!
//! Projects wallet balances and transactions into the bounded payloads a
//! companion device (watch, home-screen widget) displays, and simulates the
//! exchange against an in-memory companion.

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::error;

use companion_sync::cli::commands;
use companion_sync::config::Config;

/// Wallet-state sync for companion devices
#[derive(Parser)]
#[command(name = "companion-sync")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "config.toml")]
    config: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compute the aggregate balance projection and widget fields
    Project {
        /// Wallet fixture file
        #[arg(short, long, env = "COMPANION_SYNC_WALLETS", default_value = "wallets.json")]
        wallets: PathBuf,

        /// Allow real balances to be displayed
        #[arg(long)]
        allow: bool,
    },

    /// Build the wallet set sent to the companion
    Snapshot {
        /// Wallet fixture file
        #[arg(short, long, env = "COMPANION_SYNC_WALLETS", default_value = "wallets.json")]
        wallets: PathBuf,

        /// Allow real balances to be displayed
        #[arg(long)]
        allow: bool,

        /// Print raw JSON
        #[arg(long)]
        json: bool,
    },

    /// Run a sync session against a simulated companion
    Simulate {
        /// Wallet fixture file
        #[arg(short, long, env = "COMPANION_SYNC_WALLETS", default_value = "wallets.json")]
        wallets: PathBuf,

        /// Allow real balances to be displayed
        #[arg(long)]
        allow: bool,

        /// Change the preferred fiat currency during the session
        #[arg(long)]
        currency: Option<String>,

        /// Hide the balance of this wallet index from the companion
        #[arg(long, value_name = "INDEX")]
        hide: Option<usize>,

        /// Request an invoice from this wallet index
        #[arg(long, value_name = "INDEX", requires = "amount")]
        invoice: Option<usize>,

        /// Invoice amount in sats
        #[arg(long)]
        amount: Option<i64>,
    },

    /// Show current configuration
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env file
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    let config = match Config::load(&cli.config) {
        Ok(cfg) => cfg,
        Err(e) => {
            init_tracing(false);
            error!("Failed to load configuration: {}", e);
            std::process::exit(1);
        }
    };

    init_tracing(config.logging.json);

    let result = match cli.command {
        Commands::Project { wallets, allow } => {
            commands::project_wallets(&config, &wallets, allow).await
        }
        Commands::Snapshot {
            wallets,
            allow,
            json,
        } => commands::snapshot(&config, &wallets, allow, json).await,
        Commands::Simulate {
            wallets,
            allow,
            currency,
            hide,
            invoice,
            amount,
        } => {
            let options = commands::SimulateOptions {
                allow,
                currency,
                hide_wallet: hide,
                invoice: invoice.zip(amount),
            };
            commands::simulate(&config, &wallets, options).await
        }
        Commands::Config => commands::show_config(&config),
    };

    if let Err(e) = result {
        error!("Command failed: {}", e);
        std::process::exit(1);
    }

    Ok(())
}

fn init_tracing(json: bool) {
    let filter = tracing_subscriber::EnvFilter::from_default_env()
        .add_directive("companion_sync=info".parse().expect("static directive"));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true);

    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}
