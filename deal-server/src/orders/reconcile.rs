//! Reconciliation - converge the order store to the ledger
//! 账本与订单存储的对账
//!
//! The ledger is the source of truth for "did funds move". When a store
//! write fails after a successful ledger step, the coordinator records an
//! incident here. The worker retries it with backoff until the store
//! agrees with the escrow, and periodically cross-checks open orders
//! against escrow state to catch divergence nobody reported.
//!
//! Incidents live in memory and are mirrored to redb when the store is
//! reachable, so a restart picks them up again.

use super::coordinator::{
    CommandMetadata, OrderCoordinator, RECONCILE_ACTOR, build_event, escrow_of, listing_update,
};
use super::machine;
use super::storage::{
    IncidentKind, ListingUpdate, OrderStorage, PendingReconciliation, StorageError,
};
use crate::ledger::EscrowState;
use dashmap::{DashMap, DashSet};
use shared::order::{ListingStatus, Order, OrderStatus};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

const RETRY_BASE_DELAY_SECS: u64 = 5;
const RETRY_MAX_DELAY_SECS: u64 = 60; // 1 minute max
/// How often due incidents are polled between cross-checks
const RETRY_TICK: Duration = Duration::from_secs(RETRY_BASE_DELAY_SECS);

/// Exponential backoff: delay = base * 2^retry_count, capped at max
pub fn retry_delay(retry_count: u32) -> Duration {
    let factor = 2u64.saturating_pow(retry_count.min(16));
    Duration::from_secs((RETRY_BASE_DELAY_SECS.saturating_mul(factor)).min(RETRY_MAX_DELAY_SECS))
}

// =========================================================================
// Queue
// =========================================================================

/// Pending incidents (in memory, mirrored to redb best-effort)
#[derive(Clone)]
pub struct ReconcileQueue {
    storage: OrderStorage,
    pending: Arc<DashMap<String, PendingReconciliation>>,
    wake: Arc<Notify>,
}

impl std::fmt::Debug for ReconcileQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReconcileQueue")
            .field("pending", &self.pending.len())
            .finish()
    }
}

impl ReconcileQueue {
    /// Create the queue and reload incidents persisted by a previous run
    pub fn load(storage: OrderStorage) -> Self {
        let pending = DashMap::new();
        match storage.get_incidents() {
            Ok(incidents) => {
                if !incidents.is_empty() {
                    tracing::warn!(count = incidents.len(), "Recovered pending reconciliation incidents");
                }
                for incident in incidents {
                    pending.insert(incident.incident_id.clone(), incident);
                }
            }
            Err(e) => tracing::error!(error = %e, "Failed to load reconciliation incidents"),
        }
        Self {
            storage,
            pending: Arc::new(pending),
            wake: Arc::new(Notify::new()),
        }
    }

    /// Record a new incident; returns its id
    pub fn record(&self, kind: IncidentKind, now: i64) -> String {
        let incident = PendingReconciliation {
            incident_id: uuid::Uuid::new_v4().to_string(),
            kind,
            created_at: now,
            retry_count: 0,
            last_attempt_at: None,
            last_error: None,
        };
        let incident_id = incident.incident_id.clone();
        self.persist(&incident);
        self.pending.insert(incident_id.clone(), incident);
        self.wake.notify_one();
        incident_id
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn get(&self, incident_id: &str) -> Option<PendingReconciliation> {
        self.pending.get(incident_id).map(|e| e.value().clone())
    }

    /// Snapshot of all pending incidents, oldest first
    pub fn pending(&self) -> Vec<PendingReconciliation> {
        let mut list: Vec<_> = self.pending.iter().map(|e| e.value().clone()).collect();
        list.sort_by_key(|i| i.created_at);
        list
    }

    fn persist(&self, incident: &PendingReconciliation) {
        if let Err(e) = self.storage.save_incident(incident) {
            // Store is down; the incident survives in memory and in the log
            tracing::error!(
                incident_id = %incident.incident_id,
                incident = %serde_json::to_string(&incident.kind).unwrap_or_default(),
                error = %e,
                "Failed to persist reconciliation incident"
            );
        }
    }

    fn retry_later(&self, mut incident: PendingReconciliation, now: i64, error: String) {
        incident.retry_count = incident.retry_count.saturating_add(1);
        incident.last_attempt_at = Some(now);
        incident.last_error = Some(error);
        self.persist(&incident);
        self.pending.insert(incident.incident_id.clone(), incident);
    }

    fn resolve(&self, incident_id: &str) {
        self.pending.remove(incident_id);
        if let Err(e) = self.storage.remove_incident(incident_id) {
            tracing::warn!(incident_id = %incident_id, error = %e, "Failed to remove resolved incident");
        }
    }

    fn dead_letter(&self, incident: &PendingReconciliation, reason: &str) {
        tracing::error!(
            incident_id = %incident.incident_id,
            order_id = %incident.kind.order_id(),
            reason = %reason,
            "Incident needs manual recovery, moving to dead letter queue"
        );
        match self.storage.move_to_dead_letter(incident, reason) {
            Ok(()) => {
                self.pending.remove(&incident.incident_id);
            }
            Err(e) => {
                // Keep it pending; it will be dead-lettered on the next attempt
                tracing::error!(incident_id = %incident.incident_id, error = %e, "Failed to move incident to dead letter queue");
            }
        }
    }

    fn is_due(incident: &PendingReconciliation, now: i64) -> bool {
        match incident.last_attempt_at {
            None => true,
            Some(last) => {
                let delay_ms = retry_delay(incident.retry_count.saturating_sub(1)).as_millis() as i64;
                now >= last + delay_ms
            }
        }
    }

    async fn notified(&self) {
        self.wake.notified().await
    }
}

// =========================================================================
// Worker
// =========================================================================

/// Outcome of one pass over the incident queue
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub resolved: usize,
    pub retried: usize,
    pub dead_lettered: usize,
}

/// Outcome of one cross-check pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CrossCheckReport {
    pub checked: usize,
    pub converged: usize,
    /// Terminal orders whose escrow still holds funds
    pub locked_funds: usize,
    pub failed: usize,
}

enum Attempt {
    Resolved,
    Retry(String),
    DeadLetter(String),
}

/// Background reconciliation worker
pub struct ReconcileWorker {
    coordinator: OrderCoordinator,
    scan_interval: Duration,
    shutdown: CancellationToken,
    /// Orders already reported as holding locked funds (warn once per run)
    warned: DashSet<String>,
}

impl ReconcileWorker {
    pub fn new(
        coordinator: OrderCoordinator,
        scan_interval: Duration,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            coordinator,
            scan_interval,
            shutdown,
            warned: DashSet::new(),
        }
    }

    /// Run until shutdown
    pub async fn run(self) {
        tracing::info!(
            scan_interval_secs = self.scan_interval.as_secs(),
            pending = self.coordinator.incidents().len(),
            "Reconciliation worker started"
        );

        // 启动时先处理遗留事件并做一次全量核对
        self.process_due(self.coordinator.now()).await;
        self.cross_check().await;

        let mut retry_tick = tokio::time::interval(RETRY_TICK);
        let mut scan_tick = tokio::time::interval(self.scan_interval);
        // interval 首次 tick 立即触发，跳过
        retry_tick.tick().await;
        scan_tick.tick().await;

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    tracing::info!("Reconciliation worker received shutdown signal");
                    break;
                }
                _ = self.coordinator.incidents().notified() => {
                    self.process_due(self.coordinator.now()).await;
                }
                _ = retry_tick.tick() => {
                    self.process_due(self.coordinator.now()).await;
                }
                _ = scan_tick.tick() => {
                    self.cross_check().await;
                }
            }
        }

        let remaining = self.coordinator.incidents().len();
        if remaining > 0 {
            tracing::warn!(pending = remaining, "Reconciliation worker stopped with pending incidents");
        }
    }

    /// Attempt every incident whose backoff has elapsed at `now`
    pub async fn process_due(&self, now: i64) -> ReconcileReport {
        let queue = self.coordinator.incidents();
        let mut report = ReconcileReport::default();

        for incident in queue.pending() {
            if !ReconcileQueue::is_due(&incident, now) {
                continue;
            }
            match self.attempt(&incident).await {
                Attempt::Resolved => {
                    tracing::info!(
                        incident_id = %incident.incident_id,
                        order_id = %incident.kind.order_id(),
                        retry_count = incident.retry_count,
                        "Incident resolved"
                    );
                    queue.resolve(&incident.incident_id);
                    report.resolved += 1;
                }
                Attempt::Retry(error) => {
                    tracing::warn!(
                        incident_id = %incident.incident_id,
                        order_id = %incident.kind.order_id(),
                        retry_count = incident.retry_count + 1,
                        next_delay_secs = retry_delay(incident.retry_count).as_secs(),
                        error = %error,
                        "Incident not resolved, will retry"
                    );
                    queue.retry_later(incident, now, error);
                    report.retried += 1;
                }
                Attempt::DeadLetter(reason) => {
                    queue.dead_letter(&incident, &reason);
                    report.dead_lettered += 1;
                }
            }
        }
        report
    }

    async fn attempt(&self, incident: &PendingReconciliation) -> Attempt {
        match &incident.kind {
            IncidentKind::MissingOrder { order, event } => {
                self.restore_missing_order(order, event.as_ref().clone())
            }
            IncidentKind::Settlement { order_id, target, at } => {
                self.converge_settlement(order_id, *target, *at).await
            }
            IncidentKind::OrphanedEscrow {
                escrow_address,
                buyer_id,
                ..
            } => Attempt::DeadLetter(format!(
                "escrow {} holds funds of buyer {} without an order",
                escrow_address, buyer_id
            )),
        }
    }

    fn restore_missing_order(&self, order: &Order, event: shared::order::OrderEvent) -> Attempt {
        let storage = self.coordinator.storage();
        match storage.get_order(&order.order_id) {
            Ok(Some(_)) => return Attempt::Resolved,
            Ok(None) => {}
            Err(e) => return Attempt::Retry(e.to_string()),
        }

        let reserve = ListingUpdate {
            listing_id: order.listing_id.clone(),
            expected: ListingStatus::Active,
            next: ListingStatus::Pending,
        };
        match storage.insert_order(order, &reserve, event) {
            Ok(committed) => {
                self.coordinator.publish(committed);
                Attempt::Resolved
            }
            Err(e) if e.is_conflict() => Attempt::DeadLetter(format!(
                "listing {} no longer available, escrow {} holds buyer funds: {}",
                order.listing_id, order.escrow_address, e
            )),
            Err(e) => Attempt::Retry(e.to_string()),
        }
    }

    async fn converge_settlement(&self, order_id: &str, target: OrderStatus, at: i64) -> Attempt {
        let order = match self.coordinator.storage().get_order(order_id) {
            Ok(Some(order)) => order,
            Ok(None) => return Attempt::DeadLetter(format!("order {} not found", order_id)),
            Err(e) => return Attempt::Retry(e.to_string()),
        };
        if order.status == target {
            return Attempt::Resolved;
        }

        let account = match self.coordinator.ledger().fetch_escrow(&escrow_of(&order)).await {
            Ok(Some(account)) => account,
            Ok(None) => {
                return Attempt::DeadLetter(format!("escrow {} not found", order.escrow_address));
            }
            Err(e) => return Attempt::Retry(e.to_string()),
        };

        match self.converge(&order, account.state, at) {
            Ok(Some(_)) => Attempt::Resolved,
            Ok(None) => {
                tracing::warn!(
                    order_id = %order_id,
                    status = %order.status,
                    target = %target,
                    escrow_state = ?account.state,
                    "Escrow does not support the expected outcome, leaving order as is"
                );
                Attempt::Resolved
            }
            Err(e) => Attempt::Retry(e.to_string()),
        }
    }

    /// Apply `machine::reconcile` and commit; `Ok(None)` if nothing to do
    ///
    /// A listing that moved on is left alone: the order still follows the
    /// ledger.
    fn converge(
        &self,
        order: &Order,
        escrow: EscrowState,
        at: i64,
    ) -> Result<Option<Order>, StorageError> {
        let Some(outcome) = machine::reconcile(order, escrow, at) else {
            return Ok(None);
        };
        let meta = CommandMetadata::system(RECONCILE_ACTOR, at);
        let event = build_event(&meta, Some(order.status), &outcome.order, outcome.payload);
        let update = outcome.listing.map(|effect| listing_update(&outcome.order, effect));
        let storage = self.coordinator.storage();

        let committed = match storage.commit_transition(
            order.version,
            &outcome.order,
            update.as_ref(),
            event.clone(),
        ) {
            Err(StorageError::ListingConflict {
                listing_id, found, ..
            }) => {
                tracing::warn!(
                    order_id = %order.order_id,
                    listing_id = %listing_id,
                    listing_status = ?found,
                    "Listing moved on, converging order without listing update"
                );
                storage.commit_transition(order.version, &outcome.order, None, event)?
            }
            other => other?,
        };

        tracing::info!(
            order_id = %order.order_id,
            from = %order.status,
            to = %outcome.order.status,
            escrow_state = ?escrow,
            "Order converged to ledger state"
        );
        self.coordinator.publish(committed);
        Ok(Some(outcome.order))
    }

    /// Compare open and recently-closed orders with their escrow
    pub async fn cross_check(&self) -> CrossCheckReport {
        let mut report = CrossCheckReport::default();
        let storage = self.coordinator.storage();

        let mut orders = match storage.get_open_orders() {
            Ok(orders) => orders,
            Err(e) => {
                tracing::error!(error = %e, "Cross-check failed to load open orders");
                return report;
            }
        };
        match storage.orders_in_status(&[
            OrderStatus::CancelledBySeller,
            OrderStatus::CancelledMissed,
        ]) {
            Ok(closed) => orders.extend(closed),
            Err(e) => tracing::error!(error = %e, "Cross-check failed to load cancelled orders"),
        }

        let now = self.coordinator.now();
        for order in orders {
            // 待接单订单的托管本来就是 Initialized
            if order.status == OrderStatus::AwaitingAcceptance {
                continue;
            }
            report.checked += 1;

            let state = match self.coordinator.ledger().fetch_escrow(&escrow_of(&order)).await {
                Ok(Some(account)) => account.state,
                Ok(None) => {
                    tracing::warn!(order_id = %order.order_id, escrow = %order.escrow_address, "Escrow missing for order");
                    report.failed += 1;
                    continue;
                }
                Err(e) => {
                    tracing::debug!(order_id = %order.order_id, error = %e, "Escrow query failed during cross-check");
                    report.failed += 1;
                    continue;
                }
            };

            if state == EscrowState::Initialized && order.status.is_terminal() {
                if self.warned.insert(order.order_id.clone()) {
                    tracing::warn!(
                        order_id = %order.order_id,
                        status = %order.status,
                        escrow = %order.escrow_address,
                        buyer_id = %order.buyer_id,
                        "Order closed but escrow still holds buyer funds"
                    );
                }
                report.locked_funds += 1;
                continue;
            }

            match self.converge(&order, state, now) {
                Ok(Some(_)) => report.converged += 1,
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!(order_id = %order.order_id, error = %e, "Cross-check convergence failed");
                    report.failed += 1;
                }
            }
        }

        if report.converged > 0 || report.failed > 0 {
            tracing::info!(
                checked = report.checked,
                converged = report.converged,
                locked_funds = report.locked_funds,
                failed = report.failed,
                "Cross-check finished"
            );
        }
        report
    }
}
