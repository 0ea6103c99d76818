//! 错误码分类
//!
//! The thousands digit of an [`ErrorCode`] names its domain. Domains split
//! into two groups: the caller got something wrong (permission, order state,
//! listing, validation) or the platform did (ledger, store).

use super::codes::ErrorCode;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// 0xxx
    General,
    /// 2xxx
    Permission,
    /// 4xxx
    Order,
    /// 5xxx, escrow program and gateway
    Ledger,
    /// 6xxx
    Listing,
    /// 9xxx and unassigned ranges
    System,
}

impl ErrorCategory {
    pub fn from_code(code: u16) -> Self {
        match code / 1000 {
            0 => Self::General,
            2 => Self::Permission,
            4 => Self::Order,
            5 => Self::Ledger,
            6 => Self::Listing,
            _ => Self::System,
        }
    }

    /// Rejections caused by the request itself
    ///
    /// Logged quietly; everything else is an operational problem.
    pub fn is_caller_fault(&self) -> bool {
        matches!(
            self,
            Self::General | Self::Permission | Self::Order | Self::Listing
        )
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::General => "general",
            Self::Permission => "permission",
            Self::Order => "order",
            Self::Ledger => "ledger",
            Self::Listing => "listing",
            Self::System => "system",
        }
    }
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl ErrorCode {
    pub fn category(&self) -> ErrorCategory {
        ErrorCategory::from_code(self.code())
    }
}
