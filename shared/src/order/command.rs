//! Order commands - requests from UI-layer handlers to drive an order

use super::snapshot::Order;
use super::types::{CancellationReason, ShippingInfo};
use crate::error::ErrorCode;
use serde::{Deserialize, Serialize};

/// Order command
///
/// `actor_id` is the already-authenticated identity issuing the call.
/// `timestamp` is when the client issued it. The coordinator records it on
/// the event for audit but takes "now" from its own clock.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderCommand {
    pub command_id: String,
    pub actor_id: String,
    pub timestamp: i64,
    pub payload: OrderCommandPayload,
}

impl OrderCommand {
    pub fn new(actor_id: impl Into<String>, payload: OrderCommandPayload) -> Self {
        Self {
            command_id: uuid::Uuid::new_v4().to_string(),
            actor_id: actor_id.into(),
            timestamp: crate::util::now_millis(),
            payload,
        }
    }

    /// Set the client-side issue time
    pub fn at(mut self, timestamp: i64) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Order targeted by the command, `None` for placement
    pub fn order_id(&self) -> Option<&str> {
        match &self.payload {
            OrderCommandPayload::PlaceOrder { .. } => None,
            OrderCommandPayload::AcceptOrder { order_id }
            | OrderCommandPayload::DenyOrder { order_id, .. }
            | OrderCommandPayload::StartDelivery { order_id }
            | OrderCommandPayload::ConfirmReceipt { order_id }
            | OrderCommandPayload::ClaimTimeoutRefund { order_id } => Some(order_id),
        }
    }
}

/// Command payload
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderCommandPayload {
    PlaceOrder {
        listing_id: String,
        shipping: ShippingInfo,
    },
    AcceptOrder {
        order_id: String,
    },
    DenyOrder {
        order_id: String,
        reason: CancellationReason,
    },
    StartDelivery {
        order_id: String,
    },
    ConfirmReceipt {
        order_id: String,
    },
    ClaimTimeoutRefund {
        order_id: String,
    },
}

/// Response returned to the command issuer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandResponse {
    /// The command ID this responds to
    pub command_id: String,
    /// Whether the command succeeded
    pub success: bool,
    /// Order state after the command
    #[serde(skip_serializing_if = "Option::is_none")]
    pub order: Option<Order>,
    /// Error details if failed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<CommandError>,
}

impl CommandResponse {
    pub fn success(command_id: String, order: Order) -> Self {
        Self {
            command_id,
            success: true,
            order: Some(order),
            error: None,
        }
    }

    pub fn error(command_id: String, error: CommandError) -> Self {
        Self {
            command_id,
            success: false,
            order: None,
            error: Some(error),
        }
    }
}

/// Command error
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CommandError {
    pub code: ErrorCode,
    pub message: String,
    /// Whether the caller may retry the same command
    pub retryable: bool,
}

impl CommandError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            retryable: false,
        }
    }

    pub fn retryable(mut self) -> Self {
        self.retryable = true;
        self
    }
}
