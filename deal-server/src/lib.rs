//! DealShield Deal Server - 托管交易订单生命周期协调器
//!
//! # 架构概述
//!
//! 买家下单时资金锁入链上托管账户，卖家接单后在保障时间内发货，
//! 买家确认收货放款；超时未发货则买家可申请退款。本 crate 负责：
//!
//! - **订单** (`orders`): 状态机、协调器（账本 + 存储 saga）、超时扫描、对账
//! - **账本** (`ledger`): 托管程序客户端（JSON-RPC 网关 / 内存实现）
//! - **通知** (`notify`): 对手方通知出口
//! - **核心** (`core`): 配置、状态、后台任务
//!
//! # 模块结构
//!
//! ```text
//! deal-server/src/
//! ├── core/          # 配置、状态、后台任务
//! ├── ledger/        # 托管账本客户端
//! ├── notify/        # 通知发送
//! ├── orders/        # 订单协调 (machine, coordinator, storage, sweep, reconcile)
//! └── utils/         # 日志、时钟
//! ```

pub mod core;
pub mod ledger;
pub mod notify;
pub mod orders;
pub mod utils;

// Re-export 公共类型
pub use core::{
    BackgroundTasks, Config, ServerError, ServerResult, ServerState, TaskHealth, TaskKind,
};
pub use ledger::{EscrowLedger, LedgerClient, LedgerError, MemoryLedger, RpcEscrowLedger};
pub use notify::{ChannelEmitter, NoopEmitter, NotificationEmitter, NotifyError};
pub use orders::{
    CoordinatorError, CoordinatorResult, DeadlineSweeper, OrderCoordinator, OrderStorage,
    ReconcileWorker, ReliabilityFlag, ReliabilityProfile,
};

// Re-export unified error types from shared
pub use shared::{ErrorCategory, ErrorCode};

// Re-export logger functions
pub use utils::logger::{init_logger, init_logger_with_file};
pub use utils::{Clock, ManualClock, SystemClock};

/// 设置运行环境：加载 .env，初始化日志
///
/// 返回的 guard 需要在 main 中持有到退出，否则文件日志不会刷新。
pub fn setup_environment() -> Option<tracing_appender::non_blocking::WorkerGuard> {
    // .env 不存在不是错误
    let _ = dotenv::dotenv();

    let log_level = std::env::var("LOG_LEVEL").ok();
    let log_dir = std::env::var("LOG_DIR").ok().filter(|d| !d.trim().is_empty());
    let json = std::env::var("ENVIRONMENT").is_ok_and(|e| e == "production");

    init_logger_with_file(log_level.as_deref(), json, log_dir.as_deref())
}

pub fn print_banner() {
    println!(
        r#"
    ____             __   _____ __    _      __    __
   / __ \___  ____ _/ /  / ___// /_  (_)__  / /___/ /
  / / / / _ \/ __ `/ /   \__ \/ __ \/ / _ \/ / __  /
 / /_/ /  __/ /_/ / /   ___/ / / / / /  __/ / /_/ /
/_____/\___/\__,_/_/   /____/_/ /_/_/\___/_/\__,_/
    "#
    );
}
