use super::*;
use crate::ledger::{EscrowState, LedgerError, LedgerFault, MemoryLedger};
use crate::notify::{NotificationEmitter, NotifyError};
use crate::orders::machine::check_invariants;
use crate::orders::reconcile::{CrossCheckReport, ReconcileReport, ReconcileWorker};
use crate::orders::reliability::ReliabilityFlag;
use crate::orders::sweep::DeadlineSweeper;
use crate::utils::ManualClock;
use async_trait::async_trait;
use parking_lot::Mutex;
use rust_decimal::Decimal;
use shared::order::{DeliveryMethod, OrderEventType};
use shared::util::MILLIS_PER_HOUR;
use shared::{ErrorCode, NotificationKind};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Clock origin; the harness clock is set to each command's time
const T: i64 = 1_700_000_000_000;
const H: i64 = MILLIS_PER_HOUR;

const SELLER: &str = "seller-wallet";
const BUYER: &str = "buyer-wallet";
const OTHER_BUYER: &str = "other-buyer-wallet";

// ========================================================================
// Emitters
// ========================================================================

#[derive(Default)]
struct RecordingEmitter {
    sent: Mutex<Vec<Notification>>,
}

impl RecordingEmitter {
    fn sent(&self) -> Vec<Notification> {
        self.sent.lock().clone()
    }

    fn count(&self, kind: NotificationKind) -> usize {
        self.sent.lock().iter().filter(|n| n.kind == kind).count()
    }
}

#[async_trait]
impl NotificationEmitter for RecordingEmitter {
    async fn emit(&self, notification: Notification) -> Result<(), NotifyError> {
        self.sent.lock().push(notification);
        Ok(())
    }
}

struct FailingEmitter;

#[async_trait]
impl NotificationEmitter for FailingEmitter {
    async fn emit(&self, _notification: Notification) -> Result<(), NotifyError> {
        Err(NotifyError::Delivery("push gateway down".to_string()))
    }
}

// ========================================================================
// Harness
// ========================================================================

struct Harness {
    coordinator: OrderCoordinator,
    ledger: Arc<MemoryLedger>,
    emitter: Arc<RecordingEmitter>,
    clock: Arc<ManualClock>,
}

fn harness() -> Harness {
    harness_with_timeout(Duration::from_secs(5))
}

fn harness_with_timeout(timeout: Duration) -> Harness {
    let storage = OrderStorage::open_in_memory().unwrap();
    let ledger = Arc::new(MemoryLedger::new());
    let emitter = Arc::new(RecordingEmitter::default());
    let clock = Arc::new(ManualClock::new(T));
    let coordinator = OrderCoordinator::new(
        storage,
        LedgerClient::new(ledger.clone(), timeout),
        emitter.clone(),
    )
    .with_clock(clock.clone());
    Harness {
        coordinator,
        ledger,
        emitter,
        clock,
    }
}

fn listing(listing_id: &str) -> Listing {
    Listing {
        listing_id: listing_id.to_string(),
        seller_id: SELLER.to_string(),
        title: "Vintage Camera".to_string(),
        price: Decimal::new(15, 1),
        delivery_method: DeliveryMethod::HomeDelivery,
        guarantee_hours: Some(24.0),
        status: ListingStatus::Active,
    }
}

fn shipping() -> ShippingInfo {
    ShippingInfo {
        name: "Alice".to_string(),
        address: "12 Harbour Road".to_string(),
        phone: "+1 555 0100".to_string(),
    }
}

fn reason(title: &str) -> CancellationReason {
    CancellationReason::new(title, "Item is no longer available")
}

fn assert_invariants(order: &Order) {
    if let Err(violation) = check_invariants(order) {
        panic!("invariant violated for {}: {}", order.order_id, violation);
    }
}

impl Harness {
    fn add_listing(&self, listing_id: &str) -> Listing {
        self.coordinator.upsert_listing(&listing(listing_id)).unwrap()
    }

    async fn run(
        &self,
        actor: &str,
        payload: OrderCommandPayload,
        at: i64,
    ) -> CoordinatorResult<Order> {
        // execute 在第一次 await 之前读取时钟
        self.clock.set(at);
        let cmd = OrderCommand::new(actor, payload).at(at);
        let result = self.coordinator.execute(&cmd).await;
        if let Ok(order) = &result {
            assert_invariants(order);
        }
        result
    }

    async fn place_as(&self, buyer: &str, listing_id: &str, at: i64) -> CoordinatorResult<Order> {
        self.run(
            buyer,
            OrderCommandPayload::PlaceOrder {
                listing_id: listing_id.to_string(),
                shipping: shipping(),
            },
            at,
        )
        .await
    }

    async fn place(&self, listing_id: &str, at: i64) -> Order {
        self.place_as(BUYER, listing_id, at).await.unwrap()
    }

    async fn accept(&self, order_id: &str, at: i64) -> CoordinatorResult<Order> {
        self.run(
            SELLER,
            OrderCommandPayload::AcceptOrder {
                order_id: order_id.to_string(),
            },
            at,
        )
        .await
    }

    async fn deny(&self, order_id: &str, reason: CancellationReason, at: i64) -> CoordinatorResult<Order> {
        self.run(
            SELLER,
            OrderCommandPayload::DenyOrder {
                order_id: order_id.to_string(),
                reason,
            },
            at,
        )
        .await
    }

    async fn start(&self, order_id: &str, at: i64) -> CoordinatorResult<Order> {
        self.run(
            SELLER,
            OrderCommandPayload::StartDelivery {
                order_id: order_id.to_string(),
            },
            at,
        )
        .await
    }

    async fn confirm(&self, order_id: &str, at: i64) -> CoordinatorResult<Order> {
        self.run(
            BUYER,
            OrderCommandPayload::ConfirmReceipt {
                order_id: order_id.to_string(),
            },
            at,
        )
        .await
    }

    async fn refund(&self, order_id: &str, at: i64) -> CoordinatorResult<Order> {
        self.run(
            BUYER,
            OrderCommandPayload::ClaimTimeoutRefund {
                order_id: order_id.to_string(),
            },
            at,
        )
        .await
    }

    /// Listing + placed at T + accepted at T
    async fn accepted_order(&self, listing_id: &str) -> Order {
        self.add_listing(listing_id);
        let order = self.place(listing_id, T).await;
        self.accept(&order.order_id, T).await.unwrap()
    }

    fn order(&self, order_id: &str) -> Order {
        self.coordinator.get_order(order_id).unwrap().unwrap()
    }

    fn listing_status(&self, listing_id: &str) -> ListingStatus {
        self.coordinator.get_listing(listing_id).unwrap().unwrap().status
    }

    fn escrow_state(&self, order: &Order) -> Option<EscrowState> {
        self.ledger.state_of(&order.escrow_address)
    }

    fn events(&self, order_id: &str) -> Vec<OrderEventType> {
        self.coordinator
            .order_events(order_id)
            .unwrap()
            .into_iter()
            .map(|e| e.event_type)
            .collect()
    }

    fn sweeper(&self) -> DeadlineSweeper {
        DeadlineSweeper::new(
            self.coordinator.clone(),
            Duration::from_secs(300),
            CancellationToken::new(),
        )
    }

    fn reconciler(&self) -> ReconcileWorker {
        ReconcileWorker::new(
            self.coordinator.clone(),
            Duration::from_secs(60),
            CancellationToken::new(),
        )
    }
}

mod test_flows;
