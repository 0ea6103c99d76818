use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use parking_lot::Mutex;
use shared::Notification;
use tokio::sync::mpsc;

use crate::core::{Config, ServerResult};
use crate::ledger::{EscrowLedger, LedgerClient, MemoryLedger, RpcEscrowLedger};
use crate::notify::ChannelEmitter;
use crate::orders::{OrderCoordinator, OrderStorage};
use crate::utils::{Clock, SystemClock};

/// 通知通道容量
const NOTIFICATION_CHANNEL_CAPACITY: usize = 256;

/// 服务器状态 - 持有协调器及其依赖
///
/// # 服务组件
///
/// | 字段 | 类型 | 说明 |
/// |------|------|------|
/// | config | Config | 配置项 (不可变) |
/// | coordinator | OrderCoordinator | 订单协调器 (内部共享 redb + 账本) |
/// | notifications | mpsc::Receiver | 通知出口，由监听任务取走 |
///
/// 协调器本身可廉价克隆，后台任务各持一份。
pub struct ServerState {
    pub config: Config,
    pub coordinator: OrderCoordinator,
    notifications: Mutex<Option<mpsc::Receiver<Notification>>>,
}

impl std::fmt::Debug for ServerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerState")
            .field("config", &self.config)
            .field("coordinator", &self.coordinator)
            .finish()
    }
}

impl ServerState {
    /// 初始化服务器状态
    ///
    /// 按顺序初始化：
    /// 1. 工作目录
    /// 2. 数据库 (work_dir/orders.redb)
    /// 3. 账本 (配置了 LEDGER_RPC_URL 则走网关，否则内存账本)
    /// 4. 通知通道 + 协调器 (加载待对账事件)
    pub fn initialize(config: &Config) -> ServerResult<Self> {
        // 1. Work dir
        let work_dir = PathBuf::from(&config.work_dir);
        std::fs::create_dir_all(&work_dir)
            .with_context(|| format!("Failed to create work directory {}", work_dir.display()))?;

        // 2. Storage
        let db_path = config.db_path();
        tracing::info!(path = %db_path.display(), "Opening order database");
        let storage = OrderStorage::open(&db_path)?;

        // 3. Ledger (内存账本与协调器共用同一时钟)
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let ledger: Arc<dyn EscrowLedger> = match &config.ledger_rpc_url {
            Some(url) => {
                tracing::info!(url = %url, "Using escrow ledger gateway");
                let rpc = RpcEscrowLedger::new(url.clone(), config.ledger_timeout())?;
                Arc::new(rpc)
            }
            None => {
                if config.is_production() {
                    tracing::warn!("LEDGER_RPC_URL not set in production, funds are simulated in memory");
                } else {
                    tracing::info!("Using in-memory escrow ledger");
                }
                Arc::new(MemoryLedger::new().with_clock(clock.clone()))
            }
        };
        let ledger = LedgerClient::new(ledger, config.ledger_timeout());

        // 4. Notifications + coordinator
        let (emitter, notifications) = ChannelEmitter::new(NOTIFICATION_CHANNEL_CAPACITY);
        let coordinator = OrderCoordinator::new(storage, ledger, Arc::new(emitter))
            .with_clock(clock)
            .with_platform_fee(config.platform_fee_lamports)
            .with_event_capacity(config.event_channel_capacity);

        let pending = coordinator.incidents().len();
        if pending > 0 {
            tracing::warn!(pending, "Loaded unresolved reconciliation incidents");
        }

        Ok(Self {
            config: config.clone(),
            coordinator,
            notifications: Mutex::new(Some(notifications)),
        })
    }

    pub fn coordinator(&self) -> &OrderCoordinator {
        &self.coordinator
    }

    /// 取走通知接收端（只能取一次）
    pub fn take_notifications(&self) -> Option<mpsc::Receiver<Notification>> {
        self.notifications.lock().take()
    }

    pub fn work_dir(&self) -> PathBuf {
        PathBuf::from(&self.config.work_dir)
    }
}
