//! Order state machine
//!
//! Pure transition logic: `(order, actor, action, now) → outcome`. No I/O,
//! no clock reads. The coordinator supplies `now` and persists the outcome.
//!
//! ```text
//!                 Accept                ConfirmReceipt
//! AwaitingAcceptance ──────▶ Accepted ─────────────────▶ Completed
//!        │                   │  │  ▲
//!        │ Deny              │  │  └─ MarkDeliveryStarted (flag only)
//!        ▼                   │  │
//! CancelledBySeller          │  └─ ClaimRefund (now > deadline) ──▶ Refunded
//!                            │
//!                            └─ SweepTimeout (now > deadline ∧ ¬started) ──▶ CancelledMissed
//! ```

use shared::order::{
    CancellationReason, EventPayload, ListingStatus, Order, OrderStatus,
};
use thiserror::Error;

/// Prefix reserved for system actors (sweep, reconciliation)
pub const SYSTEM_ACTOR_PREFIX: &str = "system:";

/// Role an actor plays with respect to one order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActorRole {
    Buyer,
    Seller,
    System,
}

impl std::fmt::Display for ActorRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ActorRole::Buyer => write!(f, "buyer"),
            ActorRole::Seller => write!(f, "seller"),
            ActorRole::System => write!(f, "system"),
        }
    }
}

/// Resolve the actor's role, `None` if they are a stranger to the order
pub fn role_of(order: &Order, actor_id: &str) -> Option<ActorRole> {
    if actor_id == order.buyer_id {
        Some(ActorRole::Buyer)
    } else if actor_id == order.seller_id {
        Some(ActorRole::Seller)
    } else if actor_id.starts_with(SYSTEM_ACTOR_PREFIX) {
        Some(ActorRole::System)
    } else {
        None
    }
}

/// Transition request
#[derive(Debug, Clone, PartialEq)]
pub enum OrderAction {
    Accept,
    Deny { reason: CancellationReason },
    MarkDeliveryStarted,
    ConfirmReceipt,
    ClaimRefund,
    SweepTimeout,
}

impl OrderAction {
    pub fn required_role(&self) -> ActorRole {
        match self {
            OrderAction::Accept | OrderAction::Deny { .. } | OrderAction::MarkDeliveryStarted => {
                ActorRole::Seller
            }
            OrderAction::ConfirmReceipt | OrderAction::ClaimRefund => ActorRole::Buyer,
            OrderAction::SweepTimeout => ActorRole::System,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            OrderAction::Accept => "Accept",
            OrderAction::Deny { .. } => "Deny",
            OrderAction::MarkDeliveryStarted => "MarkDeliveryStarted",
            OrderAction::ConfirmReceipt => "ConfirmReceipt",
            OrderAction::ClaimRefund => "ClaimRefund",
            OrderAction::SweepTimeout => "SweepTimeout",
        }
    }

    /// Actions that move funds on the ledger before the store write
    pub fn settles_escrow(&self) -> bool {
        matches!(self, OrderAction::ConfirmReceipt | OrderAction::ClaimRefund)
    }
}

/// Listing status change implied by a transition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListingEffect {
    /// Status the listing must still have
    pub expected: ListingStatus,
    pub next: ListingStatus,
}

impl ListingEffect {
    const fn new(expected: ListingStatus, next: ListingStatus) -> Self {
        Self { expected, next }
    }
}

/// Result of a legal transition
#[derive(Debug, Clone, PartialEq)]
pub struct TransitionOutcome {
    /// Order after the transition, `version` already bumped
    pub order: Order,
    pub listing: Option<ListingEffect>,
    pub payload: EventPayload,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransitionError {
    #[error("{actor} may not {action} this order")]
    Unauthorized { actor: String, action: &'static str },

    #[error("Cannot {action} an order in {status}: {reason}")]
    InvalidTransition {
        status: OrderStatus,
        action: &'static str,
        reason: String,
    },
}

impl TransitionError {
    fn invalid(order: &Order, action: &OrderAction, reason: impl Into<String>) -> Self {
        TransitionError::InvalidTransition {
            status: order.status,
            action: action.name(),
            reason: reason.into(),
        }
    }
}

/// Apply `action` to `order` on behalf of `actor_id` at time `now`
///
/// The role check runs before the state check: a stranger gets
/// `Unauthorized` even against a terminal order.
pub fn apply(
    order: &Order,
    actor_id: &str,
    action: &OrderAction,
    now: i64,
) -> Result<TransitionOutcome, TransitionError> {
    let required = action.required_role();
    if role_of(order, actor_id) != Some(required) {
        return Err(TransitionError::Unauthorized {
            actor: actor_id.to_string(),
            action: action.name(),
        });
    }

    let mut next = order.clone();
    next.version = order.version + 1;
    next.updated_at = now;

    let (listing, payload) = match (order.status, action) {
        (OrderStatus::AwaitingAcceptance, OrderAction::Accept) => {
            next.status = OrderStatus::Accepted;
            next.accepted_by_seller = true;
            next.accepted_at = Some(now);
            let deadline = next.deadline().unwrap_or(now);
            (
                None,
                EventPayload::OrderAccepted {
                    accepted_at: now,
                    deadline,
                },
            )
        }
        (OrderStatus::AwaitingAcceptance, OrderAction::Deny { reason }) => {
            next.status = OrderStatus::CancelledBySeller;
            next.cancellation_reason = Some(reason.clone());
            (
                Some(ListingEffect::new(ListingStatus::Pending, ListingStatus::Active)),
                EventPayload::OrderDenied {
                    reason: reason.clone(),
                },
            )
        }
        (OrderStatus::AwaitingAcceptance, OrderAction::SweepTimeout) => {
            return Err(TransitionError::invalid(
                order,
                action,
                "no deadline before acceptance",
            ));
        }
        (OrderStatus::Accepted, OrderAction::MarkDeliveryStarted) => {
            if order.delivery_started {
                return Err(TransitionError::invalid(
                    order,
                    action,
                    "delivery already started",
                ));
            }
            next.delivery_started = true;
            (None, EventPayload::DeliveryStarted)
        }
        (OrderStatus::Accepted, OrderAction::ConfirmReceipt) => {
            // 超时确认仍然有效，仅标记迟到
            let late = order.is_past_deadline(now);
            next.status = OrderStatus::Completed;
            next.is_late_delivery = late;
            (
                Some(ListingEffect::new(ListingStatus::Pending, ListingStatus::Sold)),
                EventPayload::OrderCompleted {
                    is_late_delivery: late,
                },
            )
        }
        (OrderStatus::Accepted, OrderAction::ClaimRefund) => {
            if !order.is_past_deadline(now) {
                return Err(TransitionError::invalid(
                    order,
                    action,
                    "guarantee deadline has not passed",
                ));
            }
            let reason = CancellationReason::deadline_missed();
            next.status = OrderStatus::Refunded;
            next.cancellation_reason = Some(reason.clone());
            (
                Some(ListingEffect::new(ListingStatus::Pending, ListingStatus::Active)),
                EventPayload::OrderRefunded { reason },
            )
        }
        (OrderStatus::Accepted, OrderAction::SweepTimeout) => {
            if order.delivery_started {
                return Err(TransitionError::invalid(
                    order,
                    action,
                    "delivery already started",
                ));
            }
            if !order.is_past_deadline(now) {
                return Err(TransitionError::invalid(
                    order,
                    action,
                    "guarantee deadline has not passed",
                ));
            }
            let reason = CancellationReason::delivery_never_started();
            next.status = OrderStatus::CancelledMissed;
            next.cancellation_reason = Some(reason.clone());
            (
                Some(ListingEffect::new(ListingStatus::Pending, ListingStatus::Active)),
                EventPayload::DeliveryMissed {
                    deadline: order.deadline().unwrap_or(now),
                    reason,
                },
            )
        }
        _ => {
            return Err(TransitionError::invalid(order, action, "not allowed"));
        }
    };

    Ok(TransitionOutcome {
        order: next,
        listing,
        payload,
    })
}

/// Converge an order to an escrow state observed on the ledger
///
/// Returns `None` when the order already agrees with the escrow or when no
/// automatic repair exists. `now` decides lateness for a recovered
/// completion and should be the time of the original confirmation if known.
pub fn reconcile(order: &Order, escrow: crate::ledger::EscrowState, now: i64) -> Option<TransitionOutcome> {
    use crate::ledger::EscrowState;

    let mut next = order.clone();
    next.version = order.version + 1;
    next.updated_at = now;

    let (listing, payload) = match (order.status, escrow) {
        (OrderStatus::Accepted, EscrowState::Completed) => {
            let late = order.is_past_deadline(now);
            next.status = OrderStatus::Completed;
            next.is_late_delivery = late;
            (
                Some(ListingEffect::new(ListingStatus::Pending, ListingStatus::Sold)),
                EventPayload::OrderCompleted {
                    is_late_delivery: late,
                },
            )
        }
        (OrderStatus::Accepted, state) if state.is_refunded() => {
            let reason = CancellationReason::deadline_missed();
            next.status = OrderStatus::Refunded;
            next.cancellation_reason = Some(reason.clone());
            (
                Some(ListingEffect::new(ListingStatus::Pending, ListingStatus::Active)),
                EventPayload::OrderRefunded { reason },
            )
        }
        // Sweep already freed the listing; the buyer settled anyway
        (OrderStatus::CancelledMissed, EscrowState::Completed) => {
            next.status = OrderStatus::Completed;
            next.is_late_delivery = true;
            next.cancellation_reason = None;
            (
                Some(ListingEffect::new(ListingStatus::Active, ListingStatus::Sold)),
                EventPayload::OrderCompleted {
                    is_late_delivery: true,
                },
            )
        }
        (OrderStatus::CancelledMissed, state) if state.is_refunded() => {
            let reason = CancellationReason::deadline_missed();
            next.status = OrderStatus::Refunded;
            next.cancellation_reason = Some(reason.clone());
            (None, EventPayload::OrderRefunded { reason })
        }
        _ => return None,
    };

    Some(TransitionOutcome {
        order: next,
        listing,
        payload,
    })
}

/// Check the per-order invariants; returns the first violation
pub fn check_invariants(order: &Order) -> Result<(), String> {
    if order.accepted_at.is_some() != order.accepted_by_seller {
        return Err(format!(
            "accepted_at={:?} but accepted_by_seller={}",
            order.accepted_at, order.accepted_by_seller
        ));
    }
    if order.delivery_started && !order.accepted_by_seller {
        return Err("delivery_started without acceptance".to_string());
    }
    if order.is_late_delivery && order.status != OrderStatus::Completed {
        return Err(format!("is_late_delivery set on {} order", order.status));
    }

    let needs_acceptance = matches!(
        order.status,
        OrderStatus::Accepted
            | OrderStatus::Completed
            | OrderStatus::Refunded
            | OrderStatus::CancelledMissed
    );
    if needs_acceptance != order.accepted_by_seller {
        return Err(format!(
            "{} order has accepted_by_seller={}",
            order.status, order.accepted_by_seller
        ));
    }

    let needs_reason = matches!(
        order.status,
        OrderStatus::CancelledBySeller | OrderStatus::CancelledMissed | OrderStatus::Refunded
    );
    if needs_reason != order.cancellation_reason.is_some() {
        return Err(format!(
            "{} order has cancellation_reason={:?}",
            order.status, order.cancellation_reason
        ));
    }
    Ok(())
}
