//! Escrow ledger errors

use std::time::Duration;
use thiserror::Error;

/// Custom error codes of the escrow program (Anchor offsets custom errors by 6000)
pub mod program_codes {
    pub const NUMERICAL_OVERFLOW: i64 = 6000;
    pub const INVALID_STATE: i64 = 6001;
    pub const UNAUTHORIZED: i64 = 6002;
    pub const TIMEOUT_NOT_REACHED: i64 = 6003;
}

/// Failure classes of an escrow instruction
///
/// `Unavailable` and `Timeout` say nothing about whether the instruction
/// landed; callers re-query the escrow before treating them as failure.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LedgerError {
    #[error("Ledger unavailable: {0}")]
    Unavailable(String),

    #[error("Ledger call timed out after {0:?}")]
    Timeout(Duration),

    #[error("Ledger rejected instruction: {0}")]
    Rejected(String),

    #[error("Escrow already settled: {0}")]
    AlreadySettled(String),
}

impl LedgerError {
    /// Whether the same instruction may be retried
    pub fn is_retryable(&self) -> bool {
        matches!(self, LedgerError::Unavailable(_) | LedgerError::Timeout(_))
    }

    /// Whether the outcome of the call is unknown and must be re-queried
    pub fn is_indeterminate(&self) -> bool {
        matches!(
            self,
            LedgerError::Unavailable(_) | LedgerError::Timeout(_) | LedgerError::AlreadySettled(_)
        )
    }

    /// Map an escrow program error code to a failure class
    pub fn from_program_code(code: i64, message: impl Into<String>) -> Self {
        let message = message.into();
        match code {
            program_codes::INVALID_STATE => LedgerError::AlreadySettled(message),
            program_codes::NUMERICAL_OVERFLOW
            | program_codes::UNAUTHORIZED
            | program_codes::TIMEOUT_NOT_REACHED => LedgerError::Rejected(message),
            // JSON-RPC server-side errors (-32000..-32099) mean the node could not process
            -32099..=-32000 => LedgerError::Unavailable(message),
            _ => LedgerError::Rejected(format!("code {}: {}", code, message)),
        }
    }
}

pub type LedgerResult<T> = Result<T, LedgerError>;
