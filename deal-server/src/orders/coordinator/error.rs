use super::super::machine::TransitionError;
use super::super::storage::StorageError;
use crate::ledger::LedgerError;
use shared::error::ErrorCode;
use shared::order::CommandError;
use std::time::Duration;
use thiserror::Error;

/// Coordinator errors
#[derive(Debug, Error)]
pub enum CoordinatorError {
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Seller {0} cannot buy their own listing")]
    SelfPurchase(String),

    #[error("Invalid transition: {0}")]
    InvalidTransition(String),

    /// Lost a conditional write; re-read and retry
    #[error("Concurrent modification: {0}")]
    Conflict(String),

    #[error("Order not found: {0}")]
    OrderNotFound(String),

    #[error("Listing not found: {0}")]
    ListingNotFound(String),

    #[error("Listing {0} is not available")]
    ListingNotAvailable(String),

    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Ledger unavailable: {0}")]
    LedgerUnavailable(String),

    #[error("Ledger timed out after {0:?}")]
    LedgerTimeout(Duration),

    #[error("Ledger rejected: {0}")]
    LedgerRejected(String),

    /// Store write failed; if the ledger already moved funds an incident was recorded
    #[error("Order store unavailable: {message}")]
    StoreUnavailable {
        message: String,
        incident_id: Option<String>,
    },
}

impl CoordinatorError {
    /// Whether the caller may retry the same command
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            CoordinatorError::Conflict(_)
                | CoordinatorError::LedgerUnavailable(_)
                | CoordinatorError::LedgerTimeout(_)
                | CoordinatorError::StoreUnavailable { .. }
        )
    }

    pub fn code(&self) -> ErrorCode {
        match self {
            CoordinatorError::Unauthorized(_) => ErrorCode::PermissionDenied,
            CoordinatorError::SelfPurchase(_) => ErrorCode::SelfPurchase,
            CoordinatorError::InvalidTransition(_) => ErrorCode::InvalidTransition,
            CoordinatorError::Conflict(_) => ErrorCode::OrderConflict,
            CoordinatorError::OrderNotFound(_) => ErrorCode::OrderNotFound,
            CoordinatorError::ListingNotFound(_) => ErrorCode::ListingNotFound,
            CoordinatorError::ListingNotAvailable(_) => ErrorCode::ListingNotAvailable,
            CoordinatorError::InvalidAmount(_) => ErrorCode::InvalidAmount,
            CoordinatorError::Validation(_) => ErrorCode::ValidationFailed,
            CoordinatorError::LedgerUnavailable(_) => ErrorCode::LedgerUnavailable,
            CoordinatorError::LedgerTimeout(_) => ErrorCode::LedgerTimeout,
            CoordinatorError::LedgerRejected(_) => ErrorCode::LedgerRejected,
            CoordinatorError::StoreUnavailable { .. } => ErrorCode::StoreUnavailable,
        }
    }
}

impl From<TransitionError> for CoordinatorError {
    fn from(err: TransitionError) -> Self {
        match err {
            TransitionError::Unauthorized { .. } => CoordinatorError::Unauthorized(err.to_string()),
            TransitionError::InvalidTransition { .. } => {
                CoordinatorError::InvalidTransition(err.to_string())
            }
        }
    }
}

impl From<LedgerError> for CoordinatorError {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::Unavailable(msg) => CoordinatorError::LedgerUnavailable(msg),
            LedgerError::Timeout(after) => CoordinatorError::LedgerTimeout(after),
            LedgerError::Rejected(msg) => CoordinatorError::LedgerRejected(msg),
            // 二次结算：账本拒绝，订单保持原状态
            LedgerError::AlreadySettled(msg) => {
                CoordinatorError::LedgerRejected(format!("already settled: {}", msg))
            }
        }
    }
}

/// Storage failure before any ledger effect
impl From<StorageError> for CoordinatorError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::OrderNotFound(id) => CoordinatorError::OrderNotFound(id),
            StorageError::ListingNotFound(id) => CoordinatorError::ListingNotFound(id),
            e if e.is_conflict() => CoordinatorError::Conflict(e.to_string()),
            e => CoordinatorError::StoreUnavailable {
                message: e.to_string(),
                incident_id: None,
            },
        }
    }
}

impl From<CoordinatorError> for CommandError {
    fn from(err: CoordinatorError) -> Self {
        let code = err.code();
        let category = code.category();
        // 平台侧错误：细节只进日志，调用方只看到通用文案
        let message = if category.is_caller_fault() {
            err.to_string()
        } else {
            match &err {
                CoordinatorError::StoreUnavailable {
                    message,
                    incident_id,
                } => tracing::error!(code = %code, error = %message, incident_id = ?incident_id, "Order store error"),
                other => tracing::warn!(code = %code, category = %category, error = %other, "Command failed"),
            }
            code.message().to_string()
        };
        let error = CommandError::new(code, message);
        if err.is_retryable() { error.retryable() } else { error }
    }
}

pub type CoordinatorResult<T> = Result<T, CoordinatorError>;
