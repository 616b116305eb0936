//! Companion synchronization controllers
//!
//! ```text
//!            host events                      companion requests
//!                │                                   │
//!                ▼                                   ▼
//!   ┌────────────────────────┐   WalletsChanged  ┌────────────────┐
//!   │  OutboundController    │◄──────────────────│ InboundHandler │
//!   │  (mpsc actor)          │                   │ (task/request) │
//!   └───────────┬────────────┘                   └───────┬────────┘
//!               │ best-effort / durable                  │ durable
//!               ▼                                        ▼
//!          ┌────────────────────── SyncChannel ───────────────┐
//!          └──────────────────────────────────────────────────┘
//! ```

pub mod inbound;
pub mod outbound;
pub mod session;

pub use inbound::{CompanionRequest, InboundHandler};
pub use outbound::{OutboundController, OutboundEvent, OutboundHandle, SyncChannelState};
pub use session::{Collaborators, SessionHandle, SyncSession};
