use std::path::PathBuf;
use std::time::Duration;

use crate::ledger::PLATFORM_FEE_LAMPORTS;
use crate::orders::coordinator::DEFAULT_EVENT_CHANNEL_CAPACITY;

/// 服务配置 - 订单协调服务的所有配置项
///
/// # 环境变量
///
/// 所有配置项都可以通过环境变量覆盖（`.env` 由 dotenv 预先加载）：
///
/// | 环境变量 | 默认值 | 说明 |
/// |----------|--------|------|
/// | WORK_DIR | ./data | 工作目录（orders.redb） |
/// | ENVIRONMENT | development | 运行环境 |
/// | LOG_LEVEL | info | 日志级别 |
/// | LOG_DIR | (未设置) | 滚动日志目录 |
/// | SWEEP_INTERVAL_SECS | 300 | 超时扫描间隔 |
/// | RECONCILE_INTERVAL_SECS | 60 | 对账扫描间隔 |
/// | LEDGER_RPC_URL | (未设置) | 账本网关地址，未设置时使用内存账本 |
/// | LEDGER_TIMEOUT_MS | 30000 | 账本调用超时(毫秒) |
/// | PLATFORM_FEE_LAMPORTS | 10000000 | 平台手续费 |
/// | EVENT_CHANNEL_CAPACITY | 1024 | 事件广播容量 |
///
/// 解析失败时回退到默认值。
///
/// # 示例
///
/// ```ignore
/// WORK_DIR=/data/deal LEDGER_RPC_URL=http://127.0.0.1:8899 cargo run
/// ```
#[derive(Debug, Clone)]
pub struct Config {
    /// 工作目录，存放 redb 文件
    pub work_dir: String,
    /// 运行环境: development | staging | production
    pub environment: String,
    pub log_level: String,
    pub log_dir: Option<String>,
    /// 超时扫描间隔 (秒)
    pub sweep_interval_secs: u64,
    /// 对账扫描间隔 (秒)
    pub reconcile_interval_secs: u64,
    /// 账本 JSON-RPC 网关
    pub ledger_rpc_url: Option<String>,
    /// 账本调用超时 (毫秒)
    pub ledger_timeout_ms: u64,
    pub platform_fee_lamports: u64,
    pub event_channel_capacity: usize,
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

fn env_opt(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

impl Config {
    /// 从环境变量加载配置
    ///
    /// 如果环境变量未设置，使用默认值
    pub fn from_env() -> Self {
        Self {
            work_dir: std::env::var("WORK_DIR").unwrap_or_else(|_| "./data".into()),
            environment: std::env::var("ENVIRONMENT").unwrap_or_else(|_| "development".into()),
            log_level: std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".into()),
            log_dir: env_opt("LOG_DIR"),
            sweep_interval_secs: env_parse("SWEEP_INTERVAL_SECS", 300),
            reconcile_interval_secs: env_parse("RECONCILE_INTERVAL_SECS", 60),
            ledger_rpc_url: env_opt("LEDGER_RPC_URL"),
            ledger_timeout_ms: env_parse("LEDGER_TIMEOUT_MS", 30_000),
            platform_fee_lamports: env_parse("PLATFORM_FEE_LAMPORTS", PLATFORM_FEE_LAMPORTS),
            event_channel_capacity: env_parse(
                "EVENT_CHANNEL_CAPACITY",
                DEFAULT_EVENT_CHANNEL_CAPACITY,
            ),
        }
    }

    /// 使用自定义值覆盖部分配置
    ///
    /// 常用于测试场景：内存账本，指定工作目录
    pub fn with_overrides(work_dir: impl Into<String>, sweep_interval_secs: u64) -> Self {
        let mut config = Self::from_env();
        config.work_dir = work_dir.into();
        config.sweep_interval_secs = sweep_interval_secs;
        config.ledger_rpc_url = None;
        config
    }

    /// 是否生产环境
    pub fn is_production(&self) -> bool {
        self.environment == "production"
    }

    /// redb 数据文件路径
    pub fn db_path(&self) -> PathBuf {
        PathBuf::from(&self.work_dir).join("orders.redb")
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }

    pub fn reconcile_interval(&self) -> Duration {
        Duration::from_secs(self.reconcile_interval_secs.max(1))
    }

    pub fn ledger_timeout(&self) -> Duration {
        Duration::from_millis(self.ledger_timeout_ms.max(1))
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::from_env()
    }
}
