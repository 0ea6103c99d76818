//! Order lifecycle for escrowed purchases
//!
//! - **machine**: Pure transition table (role + guard checks)
//! - **coordinator**: OrderCoordinator, the saga of ledger step + store step
//! - **storage**: redb persistence with conditional writes
//! - **sweep**: Periodic deadline sweep for abandoned orders
//! - **reconcile**: Incident queue and ledger cross-check
//! - **reliability**: Seller reliability profile
//!
//! # Architecture
//!
//! ```text
//! OrderCommand → OrderCoordinator → machine::apply
//!                     │                  │
//!                     ▼                  ▼
//!               LedgerClient ──▶ Storage (redb, CAS)
//!                     │                  │
//!              incident on failure    Broadcast → Subscribers
//!                     ▼                  │
//!              ReconcileWorker      Notification → counter-party
//! ```
//!
//! # Data Flow
//!
//! 1. UI handler sends an OrderCommand with an authenticated actor
//! 2. The machine validates role and guard against the stored order
//! 3. Funds move on the ledger (place, confirm, refund only)
//! 4. Order + listing are committed iff nothing changed since step 2
//! 5. OrderEvent is broadcast, the counter-party is notified
//! 6. CommandResponse is returned

pub mod coordinator;
pub mod machine;
pub mod reconcile;
pub mod reliability;
pub mod storage;
pub mod sweep;

// Re-exports
pub use coordinator::{CoordinatorError, CoordinatorResult, OrderCoordinator};
pub use machine::{ActorRole, OrderAction, TransitionError};
pub use reconcile::{CrossCheckReport, ReconcileQueue, ReconcileReport, ReconcileWorker};
pub use reliability::{ReliabilityFlag, ReliabilityProfile};
pub use storage::{OrderStorage, StorageError, StorageResult};
pub use sweep::{DeadlineSweeper, SweepReport};

// Re-export shared types for convenience
pub use shared::order::{
    CommandError, CommandResponse, EventPayload, Listing, ListingStatus, Order, OrderCommand,
    OrderCommandPayload, OrderEvent, OrderEventType, OrderStatus,
};
