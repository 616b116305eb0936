//! Display-oriented projections of wallet state
//!
//! ```text
//! WalletStore ──► aggregator ──► AggregateProjection ──► widget fields
//!      │
//!      └────────► snapshot ───► Vec<WalletSummary> ───► companion channel
//! ```

pub mod aggregator;
pub mod snapshot;

pub use aggregator::{aggregate, project, AggregateProjection, LatestTransactionTime, WalletView};
pub use snapshot::{
    digest, SnapshotBuilder, TransactionKind, TransactionSummary, WalletSummary,
    DEFAULT_TRANSACTION_WINDOW,
};
