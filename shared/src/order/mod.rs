//! Order domain types
//!
//! - Listings: catalog items an order reserves
//! - Commands: requests from UI handlers to drive an order
//! - Events: immutable facts recorded after each committed transition
//! - Order: the current off-chain record of a purchase

pub mod command;
pub mod event;
pub mod snapshot;
pub mod types;

// Re-exports
pub use command::{CommandError, CommandResponse, OrderCommand, OrderCommandPayload};
pub use event::{EventPayload, OrderEvent, OrderEventType};
pub use snapshot::{Order, OrderStatus};
pub use types::*;
