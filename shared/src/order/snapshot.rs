//! Order record - the off-chain mirror of one escrowed purchase

use super::types::{CancellationReason, ShippingInfo};
use crate::util::hours_to_millis;
use serde::{Deserialize, Serialize};

/// Order status
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    #[default]
    AwaitingAcceptance,
    Accepted,
    Completed,
    Refunded,
    CancelledBySeller,
    /// Auto-cancelled by the sweep; funds stay locked until the buyer refunds
    CancelledMissed,
}

impl OrderStatus {
    /// Terminal states are never left again
    pub fn is_terminal(&self) -> bool {
        !matches!(self, OrderStatus::AwaitingAcceptance | OrderStatus::Accepted)
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OrderStatus::AwaitingAcceptance => write!(f, "AWAITING_ACCEPTANCE"),
            OrderStatus::Accepted => write!(f, "ACCEPTED"),
            OrderStatus::Completed => write!(f, "COMPLETED"),
            OrderStatus::Refunded => write!(f, "REFUNDED"),
            OrderStatus::CancelledBySeller => write!(f, "CANCELLED_BY_SELLER"),
            OrderStatus::CancelledMissed => write!(f, "CANCELLED_MISSED"),
        }
    }
}

/// One purchase attempt against a listing
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Order {
    /// Order ID (assigned by the coordinator)
    pub order_id: String,
    pub listing_id: String,
    /// Listing owner at placement time
    pub seller_id: String,
    pub buyer_id: String,
    pub shipping: ShippingInfo,
    /// Escrowed amount in lamports
    pub amount: u64,
    /// Platform fee in lamports
    pub fee: u64,
    /// Derived escrow account address
    pub escrow_address: String,
    /// Truncated listing identifier used as the escrow seed
    pub escrow_order_key: String,
    /// Guarantee window snapshotted from the listing when the order was placed
    pub guarantee_hours: f64,
    pub status: OrderStatus,
    pub accepted_by_seller: bool,
    /// Set on acceptance; anchors the fulfillment deadline
    #[serde(skip_serializing_if = "Option::is_none")]
    pub accepted_at: Option<i64>,
    pub delivery_started: bool,
    /// Set only when the order completes, never retracted
    pub is_late_delivery: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cancellation_reason: Option<CancellationReason>,
    pub created_at: i64,
    pub updated_at: i64,
    /// Compare-and-swap token, bumped on every committed write
    pub version: u64,
}

impl Order {
    /// Fulfillment deadline (`accepted_at + guarantee_hours`), `None` before acceptance
    pub fn deadline(&self) -> Option<i64> {
        self.accepted_at
            .map(|accepted| accepted + hours_to_millis(self.guarantee_hours))
    }

    /// Strictly past the deadline; never true before acceptance
    pub fn is_past_deadline(&self, now: i64) -> bool {
        self.deadline().is_some_and(|deadline| now > deadline)
    }

    pub fn is_open(&self) -> bool {
        !self.status.is_terminal()
    }
}
