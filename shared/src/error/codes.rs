//! Numeric error codes
//!
//! Serialized as a bare `u16`. Codes are never renumbered; retired codes
//! stay reserved.

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "u16", try_from = "u16")]
#[repr(u16)]
pub enum ErrorCode {
    // ==================== 0xxx: General ====================
    Success = 0,
    Unknown = 1,
    ValidationFailed = 2,
    NotFound = 3,
    // 4 reserved
    InvalidRequest = 5,

    // ==================== 2xxx: Permission ====================
    /// Actor is neither the buyer nor the seller the action needs
    PermissionDenied = 2001,
    SelfPurchase = 2002,

    // ==================== 4xxx: Order ====================
    OrderNotFound = 4001,
    InvalidTransition = 4002,
    /// Conditional write lost; reload and retry
    OrderConflict = 4003,

    // ==================== 5xxx: Ledger ====================
    LedgerUnavailable = 5001,
    /// No confirmed outcome within the call timeout
    LedgerTimeout = 5002,
    /// Program refused the instruction (includes double settlement)
    LedgerRejected = 5003,
    /// Price does not fit the ledger's integer units
    InvalidAmount = 5004,

    // ==================== 6xxx: Listing ====================
    ListingNotFound = 6001,
    ListingNotAvailable = 6002,

    // ==================== 9xxx: System ====================
    InternalError = 9001,
    StoreUnavailable = 9002,
}

impl ErrorCode {
    /// Every assigned code, ascending
    pub const ALL: [ErrorCode; 18] = [
        ErrorCode::Success,
        ErrorCode::Unknown,
        ErrorCode::ValidationFailed,
        ErrorCode::NotFound,
        ErrorCode::InvalidRequest,
        ErrorCode::PermissionDenied,
        ErrorCode::SelfPurchase,
        ErrorCode::OrderNotFound,
        ErrorCode::InvalidTransition,
        ErrorCode::OrderConflict,
        ErrorCode::LedgerUnavailable,
        ErrorCode::LedgerTimeout,
        ErrorCode::LedgerRejected,
        ErrorCode::InvalidAmount,
        ErrorCode::ListingNotFound,
        ErrorCode::ListingNotAvailable,
        ErrorCode::InternalError,
        ErrorCode::StoreUnavailable,
    ];

    #[inline]
    pub const fn code(&self) -> u16 {
        *self as u16
    }

    /// Generic text shown when the detailed message must stay server-side
    pub const fn message(&self) -> &'static str {
        match self {
            ErrorCode::Success => "Done",
            ErrorCode::Unknown => "Something went wrong",
            ErrorCode::ValidationFailed => "Some fields are invalid",
            ErrorCode::NotFound => "Not found",
            ErrorCode::InvalidRequest => "Malformed request",
            ErrorCode::PermissionDenied => "You are not a party to this order",
            ErrorCode::SelfPurchase => "You cannot buy your own listing",
            ErrorCode::OrderNotFound => "Order not found",
            ErrorCode::InvalidTransition => "This action is not available for the order right now",
            ErrorCode::OrderConflict => "The order just changed, refresh and try again",
            ErrorCode::LedgerUnavailable => "Escrow service is unreachable, try again shortly",
            ErrorCode::LedgerTimeout => "Escrow service did not confirm in time, try again",
            ErrorCode::LedgerRejected => "The escrow program refused this transaction",
            ErrorCode::InvalidAmount => "Listing price cannot be escrowed",
            ErrorCode::ListingNotFound => "Listing not found",
            ErrorCode::ListingNotAvailable => "This item is no longer available",
            ErrorCode::InternalError => "Internal error",
            ErrorCode::StoreUnavailable => "Order service is temporarily unavailable",
        }
    }
}

impl From<ErrorCode> for u16 {
    fn from(code: ErrorCode) -> Self {
        code.code()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("invalid error code: {0}")]
pub struct InvalidErrorCode(pub u16);

impl TryFrom<u16> for ErrorCode {
    type Error = InvalidErrorCode;

    fn try_from(value: u16) -> Result<Self, Self::Error> {
        ErrorCode::ALL
            .iter()
            .copied()
            .find(|code| code.code() == value)
            .ok_or(InvalidErrorCode(value))
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "E{:04}", self.code())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_all_is_complete_and_ascending() {
        for pair in ErrorCode::ALL.windows(2) {
            assert!(pair[0].code() < pair[1].code());
        }
        for code in ErrorCode::ALL {
            assert_eq!(ErrorCode::try_from(code.code()), Ok(code));
        }
    }

    #[test]
    fn test_wire_form_is_number() {
        assert_eq!(serde_json::to_string(&ErrorCode::OrderConflict).unwrap(), "4003");
        let code: ErrorCode = serde_json::from_str("5002").unwrap();
        assert_eq!(code, ErrorCode::LedgerTimeout);
    }

    #[test]
    fn test_unassigned_codes_rejected() {
        assert!(serde_json::from_str::<ErrorCode>("4999").is_err());
        assert_eq!(ErrorCode::try_from(4), Err(InvalidErrorCode(4)));
    }

    #[test]
    fn test_display() {
        assert_eq!(ErrorCode::Success.to_string(), "E0000");
        assert_eq!(ErrorCode::OrderNotFound.to_string(), "E4001");
    }
}
