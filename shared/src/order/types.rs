//! Listing and supporting value types

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Guarantee window applied when a listing does not declare a usable one
pub const DEFAULT_GUARANTEE_HOURS: f64 = 24.0;

/// How the item reaches the buyer
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeliveryMethod {
    #[default]
    HomeDelivery,
    Pickup,
}

impl DeliveryMethod {
    /// Verb used in buyer-facing messages ("agreed to hand over" / "agreed to deliver")
    pub fn action_verb(&self) -> &'static str {
        match self {
            DeliveryMethod::Pickup => "hand over",
            DeliveryMethod::HomeDelivery => "deliver",
        }
    }
}

/// Listing lifecycle status
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ListingStatus {
    #[default]
    Active,
    /// Reserved by exactly one open order
    Pending,
    Sold,
    Deleted,
}

/// An item offered for sale
///
/// The catalog owns listings; the coordinator only mirrors them and moves
/// `status` as orders progress.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Listing {
    pub listing_id: String,
    pub seller_id: String,
    pub title: String,
    /// Price in the on-chain unit (SOL)
    pub price: Decimal,
    pub delivery_method: DeliveryMethod,
    /// Seller-declared fulfillment window after acceptance, may be fractional
    #[serde(default)]
    pub guarantee_hours: Option<f64>,
    #[serde(default)]
    pub status: ListingStatus,
}

impl Listing {
    /// Guarantee window in hours, falling back to [`DEFAULT_GUARANTEE_HOURS`]
    /// when missing, non-positive or not finite.
    pub fn effective_guarantee_hours(&self) -> f64 {
        match self.guarantee_hours {
            Some(h) if h.is_finite() && h > 0.0 => h,
            _ => DEFAULT_GUARANTEE_HOURS,
        }
    }

    /// Deep link used in notifications
    pub fn link(&self) -> String {
        format!("/product/{}", self.listing_id)
    }
}

/// Where and to whom the item is delivered
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ShippingInfo {
    pub name: String,
    pub address: String,
    pub phone: String,
}

/// Reason recorded on denied, missed and refunded orders
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CancellationReason {
    pub title: String,
    pub description: String,
}

impl CancellationReason {
    pub fn new(title: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            description: description.into(),
        }
    }

    /// Standard reason for a buyer-claimed timeout refund
    pub fn deadline_missed() -> Self {
        Self::new(
            "Delivery Deadline Missed",
            "Seller failed to deliver within the guaranteed time frame.",
        )
    }

    /// Reason recorded by the sweep on abandoned orders
    pub fn delivery_never_started() -> Self {
        Self::new(
            "Delivery Deadline Missed",
            "Seller did not start delivery before the guaranteed deadline.",
        )
    }
}
