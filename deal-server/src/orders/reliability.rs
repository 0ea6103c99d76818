//! Seller reliability
//!
//! Pure read-time aggregation over a seller's order history. Nothing is
//! cached; every call recomputes from the orders passed in.

use serde::{Deserialize, Serialize};
use shared::order::{Order, OrderStatus};

/// Unsuccessful outcomes at which the flag turns to `Caution`
pub const CAUTION_THRESHOLD: u32 = 3;
/// Unsuccessful outcomes at which the flag turns to `HighRisk`
pub const HIGH_RISK_THRESHOLD: u32 = 5;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReliabilityFlag {
    Reliable,
    Caution,
    HighRisk,
}

impl ReliabilityFlag {
    pub fn from_count(count: u32) -> Self {
        match count {
            c if c >= HIGH_RISK_THRESHOLD => ReliabilityFlag::HighRisk,
            c if c >= CAUTION_THRESHOLD => ReliabilityFlag::Caution,
            _ => ReliabilityFlag::Reliable,
        }
    }
}

/// Derived per-seller view, never persisted
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReliabilityProfile {
    pub seller_id: String,
    /// Refunded + missed + late completions
    pub count: u32,
    pub flag: ReliabilityFlag,
    pub total_orders: u32,
    pub refunded: u32,
    pub cancelled_missed: u32,
    pub late_completed: u32,
    /// Reported only, not part of `count`
    pub denied: u32,
}

impl ReliabilityProfile {
    /// Badge text
    pub fn summary(&self) -> String {
        match self.flag {
            ReliabilityFlag::HighRisk => {
                format!("High Risk: {}+ unsuccessful orders", HIGH_RISK_THRESHOLD)
            }
            ReliabilityFlag::Caution => format!("Caution: {} unsuccessful orders", self.count),
            ReliabilityFlag::Reliable => {
                format!("Highly Reliable: {} unsuccessful orders", self.count)
            }
        }
    }
}

/// Aggregate `orders` belonging to `seller_id`
///
/// Orders of other sellers are ignored.
pub fn compute(seller_id: &str, orders: &[Order]) -> ReliabilityProfile {
    let mut profile = ReliabilityProfile {
        seller_id: seller_id.to_string(),
        count: 0,
        flag: ReliabilityFlag::Reliable,
        total_orders: 0,
        refunded: 0,
        cancelled_missed: 0,
        late_completed: 0,
        denied: 0,
    };

    for order in orders.iter().filter(|o| o.seller_id == seller_id) {
        profile.total_orders += 1;
        match order.status {
            OrderStatus::Refunded => profile.refunded += 1,
            OrderStatus::CancelledMissed => profile.cancelled_missed += 1,
            OrderStatus::Completed if order.is_late_delivery => profile.late_completed += 1,
            OrderStatus::CancelledBySeller => profile.denied += 1,
            _ => {}
        }
    }

    profile.count = profile.refunded + profile.cancelled_missed + profile.late_completed;
    profile.flag = ReliabilityFlag::from_count(profile.count);
    profile
}
