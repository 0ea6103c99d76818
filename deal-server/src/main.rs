use deal_server::orders::OrderEvent;
use deal_server::{
    BackgroundTasks, Config, DeadlineSweeper, ReconcileWorker, ServerState, TaskKind,
    print_banner, setup_environment,
};
use std::time::Duration;
use tokio::sync::broadcast;

const HEALTH_CHECK_INTERVAL: Duration = Duration::from_secs(60);

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 1. 设置环境 (dotenv, 日志)
    let _log_guard = setup_environment();

    // 打印横幅
    print_banner();

    tracing::info!("DealShield deal server starting...");

    // 2. 加载配置
    let config = Config::from_env();
    tracing::info!(
        work_dir = %config.work_dir,
        environment = %config.environment,
        sweep_interval_secs = config.sweep_interval_secs,
        "Configuration loaded"
    );

    // 3. 初始化服务器状态
    let state = ServerState::initialize(&config)?;
    let coordinator = state.coordinator().clone();

    // 4. 注册后台任务（关闭宽限期覆盖一次账本调用）
    let mut tasks = BackgroundTasks::new().with_grace(config.ledger_timeout() + Duration::from_secs(1));

    let sweeper = DeadlineSweeper::new(
        coordinator.clone(),
        config.sweep_interval(),
        tasks.shutdown_token(),
    );
    tasks.spawn("deadline_sweep", TaskKind::Periodic, sweeper.run());

    let reconciler = ReconcileWorker::new(
        coordinator.clone(),
        config.reconcile_interval(),
        tasks.shutdown_token(),
    );
    tasks.spawn("reconciliation", TaskKind::Worker, reconciler.run());

    if let Some(mut notifications) = state.take_notifications() {
        let shutdown = tasks.shutdown_token();
        // 通知投递属于 UI 层；这里只记录出口
        tasks.spawn("notification_log", TaskKind::Listener, async move {
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    next = notifications.recv() => match next {
                        Some(n) => tracing::info!(
                            recipient = %n.recipient_id,
                            kind = ?n.kind,
                            order_id = ?n.order_id,
                            "Notification emitted"
                        ),
                        None => break,
                    },
                }
            }
        });
    }

    let mut events = coordinator.subscribe();
    let shutdown = tasks.shutdown_token();
    tasks.spawn("event_log", TaskKind::Listener, async move {
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                next = events.recv() => match next {
                    Ok(event) => log_event(&event),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "Event log lagged behind");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
            }
        }
    });

    tasks.log_summary();

    // 5. 等待退出信号，期间定期检查任务存活
    let mut health_tick = tokio::time::interval(HEALTH_CHECK_INTERVAL);
    health_tick.tick().await;
    loop {
        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                signal?;
                tracing::info!("Shutdown signal received");
                break;
            }
            _ = health_tick.tick() => {
                let health = tasks.check_health();
                if !health.is_healthy() {
                    tracing::error!(stopped = ?health.stopped, running = health.running, "Background tasks down");
                }
            }
        }
    }

    // 6. 优雅关闭
    tasks.shutdown().await;
    tracing::info!("DealShield deal server stopped");

    Ok(())
}

fn log_event(event: &OrderEvent) {
    tracing::debug!(
        sequence = event.sequence,
        order_id = %event.order_id,
        event_type = %event.event_type,
        actor = %event.actor_id,
        to = %event.to_status,
        "Order event"
    );
}
