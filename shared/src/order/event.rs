//! Order events - immutable facts recorded after a committed transition

use super::snapshot::OrderStatus;
use super::types::CancellationReason;
use serde::{Deserialize, Serialize};

/// Order event - immutable audit record
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OrderEvent {
    /// Event unique ID
    pub event_id: String,
    /// Global sequence number (ordering across all orders)
    pub sequence: u64,
    /// Order this event belongs to
    pub order_id: String,
    /// Server timestamp of the transition (Unix milliseconds), the one guards used
    pub timestamp: i64,
    /// Timestamp the caller put on the command; audit only, may be skewed or forged
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_timestamp: Option<i64>,
    /// Identity that triggered the transition (buyer, seller or a system actor)
    pub actor_id: String,
    /// Command that triggered this event (for audit tracing)
    pub command_id: String,
    /// Status before the transition (`None` for placement)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub from_status: Option<OrderStatus>,
    /// Status after the transition
    pub to_status: OrderStatus,
    pub event_type: OrderEventType,
    pub payload: EventPayload,
}

/// Event type enumeration
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderEventType {
    OrderPlaced,
    OrderAccepted,
    OrderDenied,
    DeliveryStarted,
    OrderCompleted,
    OrderRefunded,
    DeliveryMissed,
}

impl OrderEventType {
    /// Events that close the order
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OrderEventType::OrderDenied
                | OrderEventType::OrderCompleted
                | OrderEventType::OrderRefunded
                | OrderEventType::DeliveryMissed
        )
    }
}

impl std::fmt::Display for OrderEventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OrderEventType::OrderPlaced => write!(f, "ORDER_PLACED"),
            OrderEventType::OrderAccepted => write!(f, "ORDER_ACCEPTED"),
            OrderEventType::OrderDenied => write!(f, "ORDER_DENIED"),
            OrderEventType::DeliveryStarted => write!(f, "DELIVERY_STARTED"),
            OrderEventType::OrderCompleted => write!(f, "ORDER_COMPLETED"),
            OrderEventType::OrderRefunded => write!(f, "ORDER_REFUNDED"),
            OrderEventType::DeliveryMissed => write!(f, "DELIVERY_MISSED"),
        }
    }
}

/// Event payload - transition-specific data
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventPayload {
    OrderPlaced {
        listing_id: String,
        amount: u64,
        fee: u64,
        escrow_address: String,
    },
    OrderAccepted {
        accepted_at: i64,
        deadline: i64,
    },
    OrderDenied {
        reason: CancellationReason,
    },
    DeliveryStarted,
    OrderCompleted {
        is_late_delivery: bool,
    },
    OrderRefunded {
        reason: CancellationReason,
    },
    DeliveryMissed {
        deadline: i64,
        reason: CancellationReason,
    },
}

impl EventPayload {
    pub fn event_type(&self) -> OrderEventType {
        match self {
            EventPayload::OrderPlaced { .. } => OrderEventType::OrderPlaced,
            EventPayload::OrderAccepted { .. } => OrderEventType::OrderAccepted,
            EventPayload::OrderDenied { .. } => OrderEventType::OrderDenied,
            EventPayload::DeliveryStarted => OrderEventType::DeliveryStarted,
            EventPayload::OrderCompleted { .. } => OrderEventType::OrderCompleted,
            EventPayload::OrderRefunded { .. } => OrderEventType::OrderRefunded,
            EventPayload::DeliveryMissed { .. } => OrderEventType::DeliveryMissed,
        }
    }
}
