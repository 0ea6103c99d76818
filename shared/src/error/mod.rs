//! Error codes shared between the coordinator and its UI callers
//!
//! Numeric, stable across releases: UI code switches on the number, never on
//! the message text. See [`ErrorCategory`] for how ranges map to domains.

mod category;
mod codes;

pub use category::ErrorCategory;
pub use codes::{ErrorCode, InvalidErrorCode};
