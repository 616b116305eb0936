//! Companion Sync Library
//!
//! Cross-device wallet-state synchronization: deterministic projections of
//! wallet balances and transactions, sent over a narrow unreliable link to a
//! companion surface that holds no wallet logic of its own.

pub mod channel;
pub mod cli;
pub mod companion;
pub mod config;
pub mod error;
pub mod notify;
pub mod preferences;
pub mod projection;
pub mod sync;
pub mod wallet;
pub mod widget;

// Re-export commonly used types
pub use config::Config;
pub use error::{Error, Result};
