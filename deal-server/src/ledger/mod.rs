//! Escrow Ledger Client
//!
//! Thin adapter over the on-chain escrow program. Three instructions move
//! funds, one query reads escrow state back:
//!
//! ```text
//! InitializeEscrow(amount, fee, order_key) → EscrowRef
//! ConfirmDelivery(escrow)                  → Settlement (funds to seller)
//! RefundTimeout(escrow)                    → Settlement (funds to buyer)
//! FetchEscrow(escrow)                      → Option<EscrowAccount>
//! ```
//!
//! Instructions are idempotent per escrow: a second settlement of the same
//! escrow is rejected by the program, never re-applied.
//!
//! # Implementations
//!
//! - [`RpcEscrowLedger`]: JSON-RPC gateway in front of the program
//! - [`MemoryLedger`]: in-process ledger for development and tests
//!
//! [`LedgerClient`] wraps either one with a bounded timeout and resolves
//! indeterminate outcomes by re-querying the escrow.

pub mod client;
pub mod error;
pub mod keys;
pub mod memory;
pub mod rpc;

pub use client::LedgerClient;
pub use error::{LedgerError, LedgerResult};
pub use keys::{LAMPORTS_PER_SOL, PLATFORM_FEE_LAMPORTS, escrow_address, order_key, to_lamports};
pub use memory::{LedgerFault, MemoryLedger};
pub use rpc::RpcEscrowLedger;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// On-chain escrow account state
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EscrowState {
    Initialized,
    Delivered,
    Completed,
    Refunded,
    Cancelled,
    Disputed,
}

impl EscrowState {
    /// Funds have left the escrow
    pub fn is_settled(&self) -> bool {
        matches!(
            self,
            EscrowState::Completed | EscrowState::Refunded | EscrowState::Cancelled
        )
    }

    /// Funds went back to the buyer
    pub fn is_refunded(&self) -> bool {
        matches!(self, EscrowState::Refunded | EscrowState::Cancelled)
    }
}

/// Reference to one escrow account
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EscrowRef {
    pub address: String,
    pub order_key: String,
    pub buyer_id: String,
    pub seller_id: String,
}

impl EscrowRef {
    /// Derive the escrow of one order
    ///
    /// Keyed by the order id, not the listing: a listing bought again by the
    /// same buyer after a deny or a missed delivery gets a fresh escrow.
    pub fn derive(buyer_id: &str, seller_id: &str, order_id: &str) -> Self {
        let order_key = keys::order_key(order_id);
        Self {
            address: keys::escrow_address(buyer_id, seller_id, order_key),
            order_key: order_key.to_string(),
            buyer_id: buyer_id.to_string(),
            seller_id: seller_id.to_string(),
        }
    }
}

/// `InitializeEscrow` parameters (amounts in lamports)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct InitializeEscrow {
    pub escrow: EscrowRef,
    pub amount: u64,
    pub fee: u64,
}

/// Escrow account as read back from the ledger
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EscrowAccount {
    pub address: String,
    pub state: EscrowState,
    pub amount: u64,
    pub fee: u64,
}

/// Result of a settling instruction
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Settlement {
    pub address: String,
    pub state: EscrowState,
    /// Transaction signature, empty when the outcome was recovered by re-query
    #[serde(default)]
    pub signature: String,
}

/// Escrow program instruction interface
#[async_trait]
pub trait EscrowLedger: Send + Sync {
    /// Lock `amount + fee` from the buyer into a new escrow
    async fn initialize_escrow(&self, request: &InitializeEscrow) -> LedgerResult<EscrowRef>;

    /// Release escrowed funds to the seller
    async fn confirm_delivery(&self, escrow: &EscrowRef) -> LedgerResult<Settlement>;

    /// Return escrowed funds to the buyer
    async fn refund_timeout(&self, escrow: &EscrowRef) -> LedgerResult<Settlement>;

    /// Read the escrow account, `None` if it does not exist
    async fn fetch_escrow(&self, escrow: &EscrowRef) -> LedgerResult<Option<EscrowAccount>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_escrow_ref_uses_truncated_order_id() {
        let order_id = "0123456789abcdef0123456789abcdef-extra";
        let escrow = EscrowRef::derive("buyer", "seller", order_id);
        assert_eq!(escrow.order_key, "0123456789abcdef0123456789abcdef");
        assert_eq!(
            escrow.address,
            escrow_address("buyer", "seller", "0123456789abcdef0123456789abcdef")
        );
    }

    #[test]
    fn test_orders_on_same_listing_get_distinct_escrows() {
        let first = EscrowRef::derive("buyer", "seller", &uuid::Uuid::new_v4().to_string());
        let second = EscrowRef::derive("buyer", "seller", &uuid::Uuid::new_v4().to_string());
        assert_ne!(first.address, second.address);
    }

    #[test]
    fn test_settled_states() {
        assert!(!EscrowState::Initialized.is_settled());
        assert!(!EscrowState::Disputed.is_settled());
        assert!(EscrowState::Completed.is_settled());
        assert!(EscrowState::Cancelled.is_refunded());
        assert!(!EscrowState::Completed.is_refunded());
    }
}
