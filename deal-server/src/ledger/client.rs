//! Bounded ledger calls with outcome recovery
//!
//! A timed-out or dropped call may still land on-chain. Before an
//! indeterminate error reaches the coordinator, the escrow is read back:
//! if it already shows the effect of the instruction, the call counts as
//! landed.

use super::{
    EscrowAccount, EscrowLedger, EscrowRef, EscrowState, InitializeEscrow, LedgerError,
    LedgerResult, Settlement,
};
use std::sync::Arc;
use std::time::Duration;

#[derive(Clone)]
pub struct LedgerClient {
    ledger: Arc<dyn EscrowLedger>,
    timeout: Duration,
}

impl std::fmt::Debug for LedgerClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LedgerClient")
            .field("ledger", &"<dyn EscrowLedger>")
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl LedgerClient {
    pub fn new(ledger: Arc<dyn EscrowLedger>, timeout: Duration) -> Self {
        Self { ledger, timeout }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// `InitializeEscrow`; lands when the escrow exists, is `Initialized`
    /// and holds the requested amounts
    pub async fn initialize_escrow(&self, request: &InitializeEscrow) -> LedgerResult<EscrowRef> {
        let result = self.bounded(self.ledger.initialize_escrow(request)).await;
        match result {
            Err(err) if err.is_indeterminate() => {
                let landed = self
                    .resolve(&request.escrow, "initialize_escrow", &err, |account| {
                        account.state == EscrowState::Initialized
                            && account.amount == request.amount
                            && account.fee == request.fee
                    })
                    .await?;
                Ok(EscrowRef {
                    address: landed.address,
                    ..request.escrow.clone()
                })
            }
            other => other,
        }
    }

    /// `ConfirmDelivery`; lands when the escrow is `Completed`
    pub async fn confirm_delivery(&self, escrow: &EscrowRef) -> LedgerResult<Settlement> {
        let result = self.bounded(self.ledger.confirm_delivery(escrow)).await;
        match result {
            Err(err) if err.is_indeterminate() => {
                let landed = self
                    .resolve(escrow, "confirm_delivery", &err, |account| {
                        account.state == EscrowState::Completed
                    })
                    .await?;
                Ok(recovered(landed))
            }
            other => other,
        }
    }

    /// `RefundTimeout`; lands when the escrow is `Refunded` or `Cancelled`
    pub async fn refund_timeout(&self, escrow: &EscrowRef) -> LedgerResult<Settlement> {
        let result = self.bounded(self.ledger.refund_timeout(escrow)).await;
        match result {
            Err(err) if err.is_indeterminate() => {
                let landed = self
                    .resolve(escrow, "refund_timeout", &err, |account| {
                        account.state.is_refunded()
                    })
                    .await?;
                Ok(recovered(landed))
            }
            other => other,
        }
    }

    /// Read the escrow, bounded by the same timeout
    pub async fn fetch_escrow(&self, escrow: &EscrowRef) -> LedgerResult<Option<EscrowAccount>> {
        self.bounded(self.ledger.fetch_escrow(escrow)).await
    }

    async fn bounded<T>(
        &self,
        call: impl std::future::Future<Output = LedgerResult<T>>,
    ) -> LedgerResult<T> {
        match tokio::time::timeout(self.timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(LedgerError::Timeout(self.timeout)),
        }
    }

    /// Re-query after an indeterminate error; returns the account if the
    /// instruction landed, otherwise the original error
    async fn resolve(
        &self,
        escrow: &EscrowRef,
        op: &'static str,
        err: &LedgerError,
        landed: impl Fn(&EscrowAccount) -> bool,
    ) -> LedgerResult<EscrowAccount> {
        match self.fetch_escrow(escrow).await {
            Ok(Some(account)) if landed(&account) => {
                tracing::info!(
                    op,
                    escrow = %escrow.address,
                    state = ?account.state,
                    error = %err,
                    "Ledger call reported failure but escrow shows it landed"
                );
                Ok(account)
            }
            Ok(account) => {
                tracing::warn!(
                    op,
                    escrow = %escrow.address,
                    state = ?account.map(|a| a.state),
                    error = %err,
                    "Ledger call did not land"
                );
                Err(err.clone())
            }
            Err(query_err) => {
                tracing::warn!(
                    op,
                    escrow = %escrow.address,
                    error = %err,
                    query_error = %query_err,
                    "Escrow re-query failed, outcome unknown"
                );
                Err(err.clone())
            }
        }
    }
}

fn recovered(account: EscrowAccount) -> Settlement {
    Settlement {
        address: account.address,
        state: account.state,
        signature: String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::{LedgerFault, MemoryLedger};

    fn setup(timeout: Duration) -> (Arc<MemoryLedger>, LedgerClient) {
        let ledger = Arc::new(MemoryLedger::new());
        let client = LedgerClient::new(ledger.clone(), timeout);
        (ledger, client)
    }

    fn request() -> InitializeEscrow {
        InitializeEscrow {
            escrow: EscrowRef::derive("buyer", "seller", "order-1"),
            amount: 500_000_000,
            fee: 10_000_000,
        }
    }

    #[tokio::test]
    async fn test_timeout_that_landed_is_success() {
        let (ledger, client) = setup(Duration::from_millis(50));
        let escrow = client.initialize_escrow(&request()).await.unwrap();

        ledger.inject(LedgerFault::LandThenStall(Duration::from_millis(500)));
        let settlement = client.confirm_delivery(&escrow).await.unwrap();
        assert_eq!(settlement.state, EscrowState::Completed);
        assert!(settlement.signature.is_empty());
        assert_eq!(ledger.settlement_count(&escrow.address), 1);
    }

    #[tokio::test]
    async fn test_timeout_that_did_not_land_is_timeout() {
        let (ledger, client) = setup(Duration::from_millis(50));
        let escrow = client.initialize_escrow(&request()).await.unwrap();

        ledger.inject(LedgerFault::Stall(Duration::from_millis(500)));
        let result = client.refund_timeout(&escrow).await;
        assert!(matches!(result, Err(LedgerError::Timeout(_))));
        assert_eq!(ledger.state_of(&escrow.address), Some(EscrowState::Initialized));
    }

    #[tokio::test]
    async fn test_lost_response_on_initialize_recovers() {
        let (ledger, client) = setup(Duration::from_secs(1));
        ledger.inject(LedgerFault::LandThenFail(LedgerError::Unavailable(
            "connection reset".into(),
        )));
        let escrow = client.initialize_escrow(&request()).await.unwrap();
        assert_eq!(escrow, request().escrow);
    }

    #[tokio::test]
    async fn test_already_settled_other_way_is_error() {
        let (ledger, client) = setup(Duration::from_secs(1));
        let escrow = client.initialize_escrow(&request()).await.unwrap();
        client.refund_timeout(&escrow).await.unwrap();

        let result = client.confirm_delivery(&escrow).await;
        assert!(matches!(result, Err(LedgerError::AlreadySettled(_))));
        assert_eq!(ledger.settlement_count(&escrow.address), 1);
    }

    #[tokio::test]
    async fn test_rejected_is_not_requeried() {
        let (ledger, client) = setup(Duration::from_secs(1));
        ledger.inject(LedgerFault::Fail(LedgerError::Rejected(
            "insufficient funds".into(),
        )));
        let result = client.initialize_escrow(&request()).await;
        assert_eq!(
            result,
            Err(LedgerError::Rejected("insufficient funds".into()))
        );
    }
}
