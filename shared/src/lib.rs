//! Shared types for the DealShield order coordinator
//!
//! Domain types used by the coordinator and by the UI-layer request
//! handlers that call into it: listings, orders, commands, events,
//! notifications and the unified error codes.

pub mod error;
pub mod notification;
pub mod order;
pub mod util;

// Re-exports
pub use error::{ErrorCategory, ErrorCode};
pub use notification::{Notification, NotificationKind};
pub use serde::{Deserialize, Serialize};
