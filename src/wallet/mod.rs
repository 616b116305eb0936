//! Wallet domain model
//!
//! The host application owns the authoritative wallet store; this module
//! defines the interfaces the sync core reads it through, plus a
//! fixture-backed implementation used by the CLI and tests.
//!
//! # Architecture
//!
//! ```text
//! WalletStore ──► WalletHandle (per wallet, Capabilities resolved once)
//!      │
//!      └── MemoryWalletStore (wallets.json fixture) ──► MemoryWallet
//! ```

pub mod format;
pub mod memory;
pub mod store;
pub mod types;

pub use format::{format_balance, relative_time};
pub use memory::{MemoryWallet, MemoryWalletStore, WalletFixture, WalletRecord};
pub use store::{WalletHandle, WalletStore};
pub use types::{BalanceUnit, Capabilities, Chain, Transaction, WalletKind};
