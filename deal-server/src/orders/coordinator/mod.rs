//! OrderCoordinator - the facade every order action goes through
//!
//! Each operation is a small saga: an optional ledger step followed by a
//! conditional store write.
//!
//! # Command Flow
//!
//! ```text
//! execute(cmd)
//!     ├─ 1. Load order (or listing for PlaceOrder)
//!     ├─ 2. Role + guard check (machine::apply, pure)
//!     ├─ 3. Ledger step (PlaceOrder / ConfirmReceipt / ClaimTimeoutRefund only)
//!     │      └─ indeterminate outcome → re-query escrow (LedgerClient)
//!     ├─ 4. Conditional commit: order version + listing status, one redb txn
//!     │      └─ fails after ledger success → reconciliation incident
//!     ├─ 5. Broadcast OrderEvent
//!     ├─ 6. Notify counter-party (failure tolerated)
//!     └─ 7. Return order
//! ```
//!
//! The ledger never runs after the store write: if funds moved, the store
//! must follow; if they did not, the store is untouched.

mod error;
pub use error::*;

use super::machine::{self, ListingEffect, OrderAction, TransitionOutcome};
use super::reconcile::ReconcileQueue;
use super::reliability::{self, ReliabilityProfile};
use super::storage::{IncidentKind, ListingUpdate, OrderStorage, StorageError};
use crate::ledger::{
    EscrowRef, InitializeEscrow, LedgerClient, PLATFORM_FEE_LAMPORTS, to_lamports,
};
use crate::notify::NotificationEmitter;
use crate::utils::{Clock, SystemClock};
use shared::Notification;
use shared::order::{
    CancellationReason, CommandResponse, EventPayload, Listing, ListingStatus, Order,
    OrderCommand, OrderCommandPayload, OrderEvent, OrderStatus, ShippingInfo,
};
use std::sync::Arc;
use tokio::sync::broadcast;

/// Default broadcast capacity for committed events
pub const DEFAULT_EVENT_CHANNEL_CAPACITY: usize = 1024;

/// Actor identity used by the deadline sweep
pub const SWEEP_ACTOR: &str = "system:sweep";

/// Actor identity used by the reconciliation worker
pub const RECONCILE_ACTOR: &str = "system:reconcile";

/// Client/server clock difference worth a warning (5 minutes)
const CLIENT_SKEW_WARN_MS: u64 = 5 * 60 * 1000;

/// Order lifecycle coordinator
///
/// Cheap to clone; all clones share storage, ledger, event bus and the
/// reconciliation queue.
#[derive(Clone)]
pub struct OrderCoordinator {
    storage: OrderStorage,
    ledger: LedgerClient,
    emitter: Arc<dyn NotificationEmitter>,
    event_tx: broadcast::Sender<OrderEvent>,
    incidents: ReconcileQueue,
    platform_fee: u64,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for OrderCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OrderCoordinator")
            .field("storage", &"<OrderStorage>")
            .field("ledger", &self.ledger)
            .field("emitter", &"<dyn NotificationEmitter>")
            .field("event_tx", &"<broadcast::Sender>")
            .field("pending_incidents", &self.incidents.len())
            .field("platform_fee", &self.platform_fee)
            .field("clock", &self.clock)
            .finish()
    }
}

impl OrderCoordinator {
    pub fn new(
        storage: OrderStorage,
        ledger: LedgerClient,
        emitter: Arc<dyn NotificationEmitter>,
    ) -> Self {
        let (event_tx, _) = broadcast::channel(DEFAULT_EVENT_CHANNEL_CAPACITY);
        let incidents = ReconcileQueue::load(storage.clone());
        Self {
            storage,
            ledger,
            emitter,
            event_tx,
            incidents,
            platform_fee: PLATFORM_FEE_LAMPORTS,
            clock: Arc::new(SystemClock),
        }
    }

    /// Replace the time source used for guards, stamps and background passes
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_platform_fee(mut self, lamports: u64) -> Self {
        self.platform_fee = lamports;
        self
    }

    /// Replace the event bus; existing subscribers are disconnected
    pub fn with_event_capacity(mut self, capacity: usize) -> Self {
        let (event_tx, _) = broadcast::channel(capacity.max(1));
        self.event_tx = event_tx;
        self
    }

    pub fn storage(&self) -> &OrderStorage {
        &self.storage
    }

    pub fn ledger(&self) -> &LedgerClient {
        &self.ledger
    }

    pub fn incidents(&self) -> &ReconcileQueue {
        &self.incidents
    }

    pub fn platform_fee(&self) -> u64 {
        self.platform_fee
    }

    /// Server "now" (Unix milliseconds)
    pub fn now(&self) -> i64 {
        self.clock.now_millis()
    }

    /// Subscribe to committed order events
    pub fn subscribe(&self) -> broadcast::Receiver<OrderEvent> {
        self.event_tx.subscribe()
    }

    // ========== Command surface ==========

    /// Execute a command and wrap the outcome for the UI layer
    pub async fn execute_command(&self, cmd: OrderCommand) -> CommandResponse {
        let command_id = cmd.command_id.clone();
        match self.execute(&cmd).await {
            Ok(order) => CommandResponse::success(command_id, order),
            Err(err) => {
                tracing::debug!(command_id = %command_id, error = %err, "Command rejected");
                CommandResponse::error(command_id, err.into())
            }
        }
    }

    /// Execute a command
    ///
    /// Guards run against the coordinator clock. `cmd.timestamp` is only
    /// copied to the event as `client_timestamp`.
    pub async fn execute(&self, cmd: &OrderCommand) -> CoordinatorResult<Order> {
        let meta = CommandMetadata::from_command(cmd, self.now());
        if cmd.timestamp.abs_diff(meta.timestamp) > CLIENT_SKEW_WARN_MS {
            tracing::warn!(
                command_id = %meta.command_id,
                actor = %meta.actor_id,
                client_timestamp = cmd.timestamp,
                server_timestamp = meta.timestamp,
                "Command timestamp far from server clock, ignored"
            );
        }
        let action = match &cmd.payload {
            OrderCommandPayload::PlaceOrder {
                listing_id,
                shipping,
            } => {
                return self.place(&meta, listing_id, shipping).await;
            }
            OrderCommandPayload::AcceptOrder { .. } => OrderAction::Accept,
            OrderCommandPayload::DenyOrder { reason, .. } => {
                if reason.title.trim().is_empty() {
                    return Err(CoordinatorError::Validation(
                        "deny reason title must not be empty".to_string(),
                    ));
                }
                OrderAction::Deny {
                    reason: reason.clone(),
                }
            }
            OrderCommandPayload::StartDelivery { .. } => OrderAction::MarkDeliveryStarted,
            OrderCommandPayload::ConfirmReceipt { .. } => OrderAction::ConfirmReceipt,
            OrderCommandPayload::ClaimTimeoutRefund { .. } => OrderAction::ClaimRefund,
        };
        let order_id = cmd.order_id().unwrap_or_default();
        self.transition(&meta, order_id, action).await
    }

    // ========== Convenience operations ==========

    pub async fn place_order(
        &self,
        listing_id: &str,
        buyer_id: &str,
        shipping: ShippingInfo,
    ) -> CoordinatorResult<Order> {
        let cmd = OrderCommand::new(
            buyer_id,
            OrderCommandPayload::PlaceOrder {
                listing_id: listing_id.to_string(),
                shipping,
            },
        );
        self.execute(&cmd).await
    }

    pub async fn accept_order(&self, order_id: &str, seller_id: &str) -> CoordinatorResult<Order> {
        let cmd = OrderCommand::new(
            seller_id,
            OrderCommandPayload::AcceptOrder {
                order_id: order_id.to_string(),
            },
        );
        self.execute(&cmd).await
    }

    pub async fn deny_order(
        &self,
        order_id: &str,
        seller_id: &str,
        reason: CancellationReason,
    ) -> CoordinatorResult<Order> {
        let cmd = OrderCommand::new(
            seller_id,
            OrderCommandPayload::DenyOrder {
                order_id: order_id.to_string(),
                reason,
            },
        );
        self.execute(&cmd).await
    }

    pub async fn start_delivery(&self, order_id: &str, seller_id: &str) -> CoordinatorResult<Order> {
        let cmd = OrderCommand::new(
            seller_id,
            OrderCommandPayload::StartDelivery {
                order_id: order_id.to_string(),
            },
        );
        self.execute(&cmd).await
    }

    pub async fn confirm_receipt(&self, order_id: &str, buyer_id: &str) -> CoordinatorResult<Order> {
        let cmd = OrderCommand::new(
            buyer_id,
            OrderCommandPayload::ConfirmReceipt {
                order_id: order_id.to_string(),
            },
        );
        self.execute(&cmd).await
    }

    pub async fn claim_timeout_refund(
        &self,
        order_id: &str,
        buyer_id: &str,
    ) -> CoordinatorResult<Order> {
        let cmd = OrderCommand::new(
            buyer_id,
            OrderCommandPayload::ClaimTimeoutRefund {
                order_id: order_id.to_string(),
            },
        );
        self.execute(&cmd).await
    }

    /// Apply `SweepTimeout` as the sweep actor
    pub(crate) async fn sweep_order(&self, order_id: &str, now: i64) -> CoordinatorResult<Order> {
        let meta = CommandMetadata::system(SWEEP_ACTOR, now);
        self.transition(&meta, order_id, OrderAction::SweepTimeout).await
    }

    // ========== Listing catalog ==========

    /// Sync a listing from the external catalog (status is kept if known)
    pub fn upsert_listing(&self, listing: &Listing) -> CoordinatorResult<Listing> {
        Ok(self.storage.upsert_listing(listing)?)
    }

    /// Seller takes an Active listing off sale
    ///
    /// A listing reserved by an open order cannot be withdrawn.
    pub fn withdraw_listing(&self, listing_id: &str, seller_id: &str) -> CoordinatorResult<Listing> {
        let listing = self
            .storage
            .get_listing(listing_id)?
            .ok_or_else(|| CoordinatorError::ListingNotFound(listing_id.to_string()))?;
        if listing.seller_id != seller_id {
            return Err(CoordinatorError::Unauthorized(format!(
                "{} does not own listing {}",
                seller_id, listing_id
            )));
        }
        if listing.status != ListingStatus::Active {
            return Err(CoordinatorError::ListingNotAvailable(listing_id.to_string()));
        }
        let withdrawn = self.storage.set_listing_status(&ListingUpdate {
            listing_id: listing_id.to_string(),
            expected: ListingStatus::Active,
            next: ListingStatus::Deleted,
        })?;
        tracing::info!(listing_id = %listing_id, seller_id = %seller_id, "Listing withdrawn");
        Ok(withdrawn)
    }

    pub fn get_listing(&self, listing_id: &str) -> CoordinatorResult<Option<Listing>> {
        Ok(self.storage.get_listing(listing_id)?)
    }

    // ========== Queries ==========

    pub fn get_order(&self, order_id: &str) -> CoordinatorResult<Option<Order>> {
        Ok(self.storage.get_order(order_id)?)
    }

    /// Audit log of one order, oldest first
    pub fn order_events(&self, order_id: &str) -> CoordinatorResult<Vec<OrderEvent>> {
        Ok(self.storage.events_for_order(order_id)?)
    }

    pub fn orders_for_listing(&self, listing_id: &str) -> CoordinatorResult<Vec<Order>> {
        Ok(self.storage.orders_for_listing(listing_id)?)
    }

    /// Seller reliability, recomputed from order history on every call
    pub fn compute_reliability(&self, seller_id: &str) -> CoordinatorResult<ReliabilityProfile> {
        let orders = self.storage.orders_for_seller(seller_id)?;
        Ok(reliability::compute(seller_id, &orders))
    }

    // ========== Internals ==========

    async fn place(
        &self,
        cmd: &CommandMetadata,
        listing_id: &str,
        shipping: &ShippingInfo,
    ) -> CoordinatorResult<Order> {
        let buyer_id = cmd.actor_id.as_str();
        let now = cmd.timestamp;

        // 1. Listing must exist, belong to someone else and be on sale
        let listing = self
            .storage
            .get_listing(listing_id)?
            .ok_or_else(|| CoordinatorError::ListingNotFound(listing_id.to_string()))?;
        if listing.seller_id == buyer_id {
            return Err(CoordinatorError::SelfPurchase(buyer_id.to_string()));
        }
        if listing.status != ListingStatus::Active {
            return Err(CoordinatorError::ListingNotAvailable(listing_id.to_string()));
        }

        // 2. Price → lamports
        let amount = to_lamports(listing.price)
            .filter(|lamports| *lamports > 0)
            .ok_or_else(|| {
                CoordinatorError::InvalidAmount(format!("listing price {}", listing.price))
            })?;

        // 3. Ledger step: lock funds in an escrow owned by this order alone
        let order_id = uuid::Uuid::new_v4().to_string();
        let escrow = EscrowRef::derive(buyer_id, &listing.seller_id, &order_id);
        let escrow = self
            .ledger
            .initialize_escrow(&InitializeEscrow {
                escrow,
                amount,
                fee: self.platform_fee,
            })
            .await?;

        // 4. Store step: order + listing Active → Pending
        let order = Order {
            order_id,
            listing_id: listing_id.to_string(),
            seller_id: listing.seller_id.clone(),
            buyer_id: buyer_id.to_string(),
            shipping: shipping.clone(),
            amount,
            fee: self.platform_fee,
            escrow_address: escrow.address.clone(),
            escrow_order_key: escrow.order_key.clone(),
            guarantee_hours: listing.effective_guarantee_hours(),
            status: OrderStatus::AwaitingAcceptance,
            accepted_by_seller: false,
            accepted_at: None,
            delivery_started: false,
            is_late_delivery: false,
            cancellation_reason: None,
            created_at: now,
            updated_at: now,
            version: 1,
        };
        let event = build_event(
            cmd,
            None,
            &order,
            EventPayload::OrderPlaced {
                listing_id: listing_id.to_string(),
                amount,
                fee: self.platform_fee,
                escrow_address: escrow.address.clone(),
            },
        );
        let reserve = ListingUpdate {
            listing_id: listing_id.to_string(),
            expected: ListingStatus::Active,
            next: ListingStatus::Pending,
        };

        match self.storage.insert_order(&order, &reserve, event.clone()) {
            Ok(committed) => {
                tracing::info!(
                    order_id = %order.order_id,
                    listing_id = %listing_id,
                    buyer_id = %buyer_id,
                    amount,
                    escrow = %order.escrow_address,
                    "Order placed"
                );
                self.publish(committed);
                let buyer_name = if shipping.name.is_empty() {
                    buyer_id
                } else {
                    shipping.name.as_str()
                };
                self.notify(Notification::new_order(
                    &order.seller_id,
                    &listing,
                    &order.order_id,
                    buyer_name,
                ))
                .await;
                Ok(order)
            }
            Err(e) if e.is_conflict() => {
                // Lost the listing race after locking funds
                let incident_id = self.incidents.record(
                    IncidentKind::OrphanedEscrow {
                        order_id: order.order_id.clone(),
                        listing_id: listing_id.to_string(),
                        buyer_id: buyer_id.to_string(),
                        escrow_address: order.escrow_address.clone(),
                    },
                    now,
                );
                tracing::warn!(
                    listing_id = %listing_id,
                    buyer_id = %buyer_id,
                    escrow = %order.escrow_address,
                    incident_id = %incident_id,
                    error = %e,
                    "Listing taken concurrently after escrow was initialized"
                );
                Err(CoordinatorError::Conflict(e.to_string()))
            }
            Err(e) => {
                let incident_id = self.incidents.record(
                    IncidentKind::MissingOrder {
                        order: Box::new(order.clone()),
                        event: Box::new(event),
                    },
                    now,
                );
                tracing::error!(
                    order_id = %order.order_id,
                    escrow = %order.escrow_address,
                    incident_id = %incident_id,
                    error = %e,
                    "Escrow initialized but order write failed"
                );
                Err(CoordinatorError::StoreUnavailable {
                    message: e.to_string(),
                    incident_id: Some(incident_id),
                })
            }
        }
    }

    async fn transition(
        &self,
        cmd: &CommandMetadata,
        order_id: &str,
        action: OrderAction,
    ) -> CoordinatorResult<Order> {
        let now = cmd.timestamp;

        // 1. Load
        let order = self
            .storage
            .get_order(order_id)?
            .ok_or_else(|| CoordinatorError::OrderNotFound(order_id.to_string()))?;

        // 2. Role + guard
        let outcome = machine::apply(&order, &cmd.actor_id, &action, now)?;

        // 3. Ledger step
        let settled = if action.settles_escrow() {
            let escrow = escrow_of(&order);
            let settlement = match action {
                OrderAction::ConfirmReceipt => self.ledger.confirm_delivery(&escrow).await?,
                _ => self.ledger.refund_timeout(&escrow).await?,
            };
            tracing::debug!(
                order_id = %order_id,
                escrow = %settlement.address,
                state = ?settlement.state,
                signature = %settlement.signature,
                "Escrow settled"
            );
            true
        } else {
            false
        };

        // 4. Conditional commit
        let TransitionOutcome {
            order: next,
            listing,
            payload,
        } = outcome;
        let event = build_event(cmd, Some(order.status), &next, payload);
        let listing_update = listing.map(|effect| listing_update(&next, effect));

        match self
            .storage
            .commit_transition(order.version, &next, listing_update.as_ref(), event)
        {
            Ok(committed) => {
                tracing::info!(
                    order_id = %order_id,
                    actor = %cmd.actor_id,
                    event_type = %committed.event_type,
                    from = %order.status,
                    to = %next.status,
                    "Order transition committed"
                );
                self.publish(committed);
                self.notify_transition(&next, &action).await;
                Ok(next)
            }
            Err(e) if settled => Err(self.settlement_lost(&next, now, e)),
            Err(e) => Err(e.into()),
        }
    }

    /// Store write failed after the ledger moved funds
    fn settlement_lost(&self, target: &Order, at: i64, err: StorageError) -> CoordinatorError {
        let incident_id = self.incidents.record(
            IncidentKind::Settlement {
                order_id: target.order_id.clone(),
                target: target.status,
                at,
            },
            at,
        );
        if err.is_conflict() {
            tracing::warn!(
                order_id = %target.order_id,
                incident_id = %incident_id,
                error = %err,
                "Escrow settled but order changed concurrently, queued for convergence"
            );
            CoordinatorError::Conflict(err.to_string())
        } else {
            tracing::error!(
                order_id = %target.order_id,
                target = %target.status,
                incident_id = %incident_id,
                error = %err,
                "Escrow settled but order write failed"
            );
            CoordinatorError::StoreUnavailable {
                message: err.to_string(),
                incident_id: Some(incident_id),
            }
        }
    }

    pub(crate) fn publish(&self, event: OrderEvent) {
        // No subscribers is not an error
        let _ = self.event_tx.send(event);
    }

    async fn notify_transition(&self, order: &Order, action: &OrderAction) {
        let listing = match self.storage.get_listing(&order.listing_id) {
            Ok(Some(listing)) => listing,
            Ok(None) => {
                tracing::warn!(order_id = %order.order_id, listing_id = %order.listing_id, "Listing missing, notification skipped");
                return;
            }
            Err(e) => {
                tracing::warn!(order_id = %order.order_id, error = %e, "Failed to load listing for notification");
                return;
            }
        };
        let id = order.order_id.as_str();
        let notification = match action {
            OrderAction::Accept => Notification::order_accepted(&order.buyer_id, &listing, id),
            OrderAction::Deny { reason } => {
                Notification::order_denied(&order.buyer_id, &listing, id, &reason.title)
            }
            OrderAction::MarkDeliveryStarted => {
                Notification::delivery_started(&order.buyer_id, &listing, id)
            }
            OrderAction::ConfirmReceipt => {
                Notification::order_completed(&order.seller_id, &listing, id)
            }
            OrderAction::ClaimRefund => Notification::order_refunded(&order.seller_id, &listing, id),
            OrderAction::SweepTimeout => {
                Notification::delivery_missed(&order.buyer_id, &listing, id)
            }
        };
        self.notify(notification).await;
    }

    async fn notify(&self, notification: Notification) {
        let recipient = notification.recipient_id.clone();
        let kind = notification.kind;
        if let Err(e) = self.emitter.emit(notification).await {
            tracing::warn!(recipient = %recipient, kind = ?kind, error = %e, "Notification emit failed");
        }
    }
}

/// Escrow reference stored on the order
pub(crate) fn escrow_of(order: &Order) -> EscrowRef {
    EscrowRef {
        address: order.escrow_address.clone(),
        order_key: order.escrow_order_key.clone(),
        buyer_id: order.buyer_id.clone(),
        seller_id: order.seller_id.clone(),
    }
}

pub(crate) fn listing_update(order: &Order, effect: ListingEffect) -> ListingUpdate {
    ListingUpdate {
        listing_id: order.listing_id.clone(),
        expected: effect.expected,
        next: effect.next,
    }
}

/// Who issued a transition, and when
#[derive(Debug, Clone)]
pub(crate) struct CommandMetadata {
    pub command_id: String,
    pub actor_id: String,
    /// Server time
    pub timestamp: i64,
    pub client_timestamp: Option<i64>,
}

impl CommandMetadata {
    /// Metadata for a transition issued by a background job
    pub fn system(actor_id: &str, now: i64) -> Self {
        Self {
            command_id: uuid::Uuid::new_v4().to_string(),
            actor_id: actor_id.to_string(),
            timestamp: now,
            client_timestamp: None,
        }
    }

    /// Metadata for a caller command, stamped with server `now`
    pub fn from_command(cmd: &OrderCommand, now: i64) -> Self {
        Self {
            command_id: cmd.command_id.clone(),
            actor_id: cmd.actor_id.clone(),
            timestamp: now,
            client_timestamp: Some(cmd.timestamp),
        }
    }
}

/// Build the event for a transition; the store assigns `sequence`
pub(crate) fn build_event(
    cmd: &CommandMetadata,
    from_status: Option<OrderStatus>,
    order: &Order,
    payload: EventPayload,
) -> OrderEvent {
    OrderEvent {
        event_id: uuid::Uuid::new_v4().to_string(),
        sequence: 0,
        order_id: order.order_id.clone(),
        timestamp: cmd.timestamp,
        client_timestamp: cmd.client_timestamp,
        actor_id: cmd.actor_id.clone(),
        command_id: cmd.command_id.clone(),
        from_status,
        to_status: order.status,
        event_type: payload.event_type(),
        payload,
    }
}

#[cfg(test)]
mod tests;
