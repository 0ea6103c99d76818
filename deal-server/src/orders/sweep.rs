//! 超时扫描
//!
//! Periodically cancels accepted orders whose seller never started delivery
//! before the guarantee deadline. No ledger call: funds stay locked until the
//! buyer claims them; the sweep only frees the listing.
//!
//! 注册为 `TaskKind::Periodic`。启动时先补扫一次，然后按固定间隔运行。

use super::coordinator::{CoordinatorError, OrderCoordinator};
use shared::order::OrderStatus;
use shared::util::format_millis;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Result of one sweep pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Open orders examined
    pub scanned: usize,
    /// Orders moved to `CancelledMissed` by this pass
    pub cancelled: usize,
    /// Open orders not eligible (not accepted, started, or not yet due)
    pub skipped: usize,
    /// Lost a race with a concurrent buyer/seller action
    pub conflicts: usize,
    pub failed: usize,
}

// ============================================================================
// DeadlineSweeper
// ============================================================================

pub struct DeadlineSweeper {
    coordinator: OrderCoordinator,
    interval: Duration,
    shutdown: CancellationToken,
}

impl DeadlineSweeper {
    pub fn new(coordinator: OrderCoordinator, interval: Duration, shutdown: CancellationToken) -> Self {
        Self {
            coordinator,
            interval,
            shutdown,
        }
    }

    /// 主循环：启动补扫 → 周期触发
    pub async fn run(self) {
        tracing::info!(interval_secs = self.interval.as_secs(), "Deadline sweeper started");

        // 1. 启动补扫（停机期间到期的订单）
        self.sweep_at(self.coordinator.now()).await;

        // 2. 周期循环
        loop {
            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {
                    self.sweep_at(self.coordinator.now()).await;
                }
                _ = self.shutdown.cancelled() => {
                    tracing::info!("Deadline sweeper received shutdown signal");
                    break;
                }
            }
        }

        tracing::info!("Deadline sweeper stopped");
    }

    /// Run one pass as of `now`
    ///
    /// Idempotent: an order already cancelled is no longer open and is not
    /// scanned again.
    pub async fn sweep_at(&self, now: i64) -> SweepReport {
        let mut report = SweepReport::default();

        let open = match self.coordinator.storage().get_open_orders() {
            Ok(orders) => orders,
            Err(e) => {
                tracing::error!(error = %e, "Sweep failed to load open orders");
                report.failed += 1;
                return report;
            }
        };

        for order in open {
            report.scanned += 1;
            let eligible = order.status == OrderStatus::Accepted
                && !order.delivery_started
                && order.is_past_deadline(now);
            if !eligible {
                report.skipped += 1;
                continue;
            }

            match self.coordinator.sweep_order(&order.order_id, now).await {
                Ok(cancelled) => {
                    tracing::info!(
                        order_id = %cancelled.order_id,
                        seller_id = %cancelled.seller_id,
                        deadline = %cancelled.deadline().map(format_millis).unwrap_or_default(),
                        "Delivery never started, order cancelled"
                    );
                    report.cancelled += 1;
                }
                // 并发：买家/卖家先一步改变了订单
                Err(CoordinatorError::Conflict(_)) | Err(CoordinatorError::InvalidTransition(_)) => {
                    tracing::debug!(order_id = %order.order_id, "Order changed during sweep, skipping");
                    report.conflicts += 1;
                }
                Err(e) => {
                    tracing::warn!(order_id = %order.order_id, error = %e, "Sweep failed to cancel order");
                    report.failed += 1;
                }
            }
        }

        if report.cancelled > 0 || report.failed > 0 {
            tracing::info!(
                scanned = report.scanned,
                cancelled = report.cancelled,
                conflicts = report.conflicts,
                failed = report.failed,
                "Sweep pass finished"
            );
        } else {
            tracing::debug!(scanned = report.scanned, "Sweep pass finished, nothing due");
        }
        report
    }
}
