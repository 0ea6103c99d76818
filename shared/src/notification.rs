//! Counter-party notifications
//!
//! The coordinator emits these after a committed transition. Rendering and
//! delivery (bell, push, email) belong to the UI layer.

use crate::order::Listing;
use serde::{Deserialize, Serialize};

/// Notification kind (wire names match the notification feed)
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    /// To seller: a buyer placed an order
    NewOrder,
    /// To buyer: seller accepted
    OrderAccepted,
    /// To buyer: seller started delivery / is ready to hand over
    DeliveryStarted,
    /// To buyer on seller deny, to seller on timeout refund
    OrderDenied,
    /// To seller: buyer confirmed receipt, funds released
    OrderCompleted,
    /// To buyer: sweep cancelled an abandoned order
    DeliveryMissed,
}

/// A single notification addressed to one identity
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Notification {
    pub recipient_id: String,
    #[serde(rename = "type")]
    pub kind: NotificationKind,
    pub message: String,
    /// Deep link into the UI
    pub link: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub order_id: Option<String>,
}

impl Notification {
    fn for_listing(
        recipient_id: &str,
        kind: NotificationKind,
        listing: &Listing,
        order_id: &str,
        message: String,
    ) -> Self {
        Self {
            recipient_id: recipient_id.to_string(),
            kind,
            message,
            link: listing.link(),
            order_id: Some(order_id.to_string()),
        }
    }

    pub fn new_order(seller_id: &str, listing: &Listing, order_id: &str, buyer_name: &str) -> Self {
        Self::for_listing(
            seller_id,
            NotificationKind::NewOrder,
            listing,
            order_id,
            format!("New order received for \"{}\" from {}", listing.title, buyer_name),
        )
    }

    pub fn order_accepted(buyer_id: &str, listing: &Listing, order_id: &str) -> Self {
        Self::for_listing(
            buyer_id,
            NotificationKind::OrderAccepted,
            listing,
            order_id,
            format!(
                "Great news! The seller has agreed to {} your item \"{}\".",
                listing.delivery_method.action_verb(),
                listing.title
            ),
        )
    }

    pub fn delivery_started(buyer_id: &str, listing: &Listing, order_id: &str) -> Self {
        let message = match listing.delivery_method {
            crate::order::DeliveryMethod::Pickup => format!(
                "The seller is ready to hand over \"{}\". Please meet at the agreed location.",
                listing.title
            ),
            crate::order::DeliveryMethod::HomeDelivery => format!(
                "The seller has started delivery for \"{}\". It's on its way!",
                listing.title
            ),
        };
        Self::for_listing(
            buyer_id,
            NotificationKind::DeliveryStarted,
            listing,
            order_id,
            message,
        )
    }

    pub fn order_denied(buyer_id: &str, listing: &Listing, order_id: &str, reason: &str) -> Self {
        Self::for_listing(
            buyer_id,
            NotificationKind::OrderDenied,
            listing,
            order_id,
            format!(
                "The seller denied your order for \"{}\". Reason: {}",
                listing.title, reason
            ),
        )
    }

    pub fn order_refunded(seller_id: &str, listing: &Listing, order_id: &str) -> Self {
        Self::for_listing(
            seller_id,
            NotificationKind::OrderDenied,
            listing,
            order_id,
            format!(
                "Order for \"{}\" was cancelled and refunded due to missed delivery deadline.",
                listing.title
            ),
        )
    }

    pub fn order_completed(seller_id: &str, listing: &Listing, order_id: &str) -> Self {
        Self::for_listing(
            seller_id,
            NotificationKind::OrderCompleted,
            listing,
            order_id,
            format!(
                "The buyer confirmed receipt of \"{}\". Funds have been released to your wallet.",
                listing.title
            ),
        )
    }

    pub fn delivery_missed(buyer_id: &str, listing: &Listing, order_id: &str) -> Self {
        Self::for_listing(
            buyer_id,
            NotificationKind::DeliveryMissed,
            listing,
            order_id,
            format!(
                "The seller missed the delivery deadline for \"{}\". You can now claim a refund.",
                listing.title
            ),
        )
    }
}
