use crate::ledger::LedgerError;
use crate::orders::StorageError;
use thiserror::Error;

/// 启动/运行期错误（不面向调用方的命令错误）
#[derive(Error, Debug)]
pub enum ServerError {
    #[error("存储错误: {0}")]
    Storage(#[from] StorageError),

    #[error("账本错误: {0}")]
    Ledger(#[from] LedgerError),

    #[error("内部服务器错误: {0:#}")]
    Internal(#[from] anyhow::Error),
}

pub type ServerResult<T> = Result<T, ServerError>;
