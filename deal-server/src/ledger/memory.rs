//! In-process escrow ledger (同进程账本)
//!
//! Mirrors the escrow program's state rules so the coordinator can run
//! without a chain: development mode, integration tests, fault drills.

use super::{
    EscrowAccount, EscrowLedger, EscrowRef, EscrowState, InitializeEscrow, LedgerError,
    LedgerResult, Settlement,
};
use crate::utils::{Clock, SystemClock};
use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Failure injected into the next instruction
#[derive(Debug, Clone)]
pub enum LedgerFault {
    /// Fail without applying the instruction
    Fail(LedgerError),
    /// Apply the instruction, then report a failure (response lost)
    LandThenFail(LedgerError),
    /// Apply the instruction, then stall before responding
    LandThenStall(Duration),
    /// Stall before applying; the instruction only lands if the caller waits
    Stall(Duration),
}

#[derive(Debug, Clone)]
struct Account {
    state: EscrowState,
    amount: u64,
    fee: u64,
    created_at: i64,
    settlements: u32,
}

/// In-memory escrow ledger
///
/// Fault injection applies to the three instructions only; `fetch_escrow`
/// always answers.
#[derive(Debug)]
pub struct MemoryLedger {
    accounts: DashMap<String, Account>,
    faults: Mutex<VecDeque<LedgerFault>>,
    refund_lockup_ms: i64,
    tx_counter: AtomicU64,
    clock: Arc<dyn Clock>,
}

impl Default for MemoryLedger {
    fn default() -> Self {
        Self {
            accounts: DashMap::new(),
            faults: Mutex::new(VecDeque::new()),
            refund_lockup_ms: 0,
            tx_counter: AtomicU64::new(0),
            clock: Arc::new(SystemClock),
        }
    }
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Require `lockup` to pass since initialization before `RefundTimeout`
    /// succeeds (the program uses 14 days)
    pub fn with_refund_lockup(mut self, lockup: Duration) -> Self {
        self.refund_lockup_ms = i64::try_from(lockup.as_millis()).unwrap_or(i64::MAX);
        self
    }

    /// Share the coordinator's clock so lockup and order deadlines agree
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Queue a fault for the next instruction call
    pub fn inject(&self, fault: LedgerFault) {
        self.faults.lock().push_back(fault);
    }

    pub fn state_of(&self, address: &str) -> Option<EscrowState> {
        self.accounts.get(address).map(|a| a.state)
    }

    /// How many times funds left the escrow (must never exceed 1)
    pub fn settlement_count(&self, address: &str) -> u32 {
        self.accounts.get(address).map(|a| a.settlements).unwrap_or(0)
    }

    pub fn account_count(&self) -> usize {
        self.accounts.len()
    }

    fn next_signature(&self) -> String {
        let n = self.tx_counter.fetch_add(1, Ordering::Relaxed) + 1;
        format!("mem-tx-{:08}", n)
    }

    async fn run<T>(&self, apply: impl FnOnce() -> LedgerResult<T>) -> LedgerResult<T> {
        let fault = self.faults.lock().pop_front();
        match fault {
            None => apply(),
            Some(LedgerFault::Fail(err)) => Err(err),
            Some(LedgerFault::LandThenFail(err)) => {
                let _ = apply();
                Err(err)
            }
            Some(LedgerFault::LandThenStall(delay)) => {
                let result = apply();
                tokio::time::sleep(delay).await;
                result
            }
            Some(LedgerFault::Stall(delay)) => {
                tokio::time::sleep(delay).await;
                apply()
            }
        }
    }

    fn settle(&self, escrow: &EscrowRef, target: EscrowState) -> LedgerResult<Settlement> {
        let mut account = self
            .accounts
            .get_mut(&escrow.address)
            .ok_or_else(|| LedgerError::Rejected(format!("escrow {} not found", escrow.address)))?;

        if account.state != EscrowState::Initialized {
            return Err(LedgerError::AlreadySettled(format!(
                "escrow {} is {:?}",
                escrow.address, account.state
            )));
        }

        if target.is_refunded() && self.refund_lockup_ms > 0 {
            let elapsed = self.clock.now_millis().saturating_sub(account.created_at);
            if elapsed <= self.refund_lockup_ms {
                return Err(LedgerError::Rejected("Timeout Not Reached".to_string()));
            }
        }

        account.state = target;
        account.settlements += 1;
        Ok(Settlement {
            address: escrow.address.clone(),
            state: target,
            signature: self.next_signature(),
        })
    }
}

#[async_trait]
impl EscrowLedger for MemoryLedger {
    async fn initialize_escrow(&self, request: &InitializeEscrow) -> LedgerResult<EscrowRef> {
        self.run(|| {
            if request.amount.checked_add(request.fee).is_none() {
                return Err(LedgerError::Rejected("Numerical Overflow".to_string()));
            }
            let address = request.escrow.address.clone();
            if self.accounts.contains_key(&address) {
                return Err(LedgerError::AlreadySettled(format!(
                    "escrow {} already initialized",
                    address
                )));
            }
            self.accounts.insert(
                address,
                Account {
                    state: EscrowState::Initialized,
                    amount: request.amount,
                    fee: request.fee,
                    created_at: self.clock.now_millis(),
                    settlements: 0,
                },
            );
            Ok(request.escrow.clone())
        })
        .await
    }

    async fn confirm_delivery(&self, escrow: &EscrowRef) -> LedgerResult<Settlement> {
        self.run(|| self.settle(escrow, EscrowState::Completed)).await
    }

    async fn refund_timeout(&self, escrow: &EscrowRef) -> LedgerResult<Settlement> {
        self.run(|| self.settle(escrow, EscrowState::Refunded)).await
    }

    async fn fetch_escrow(&self, escrow: &EscrowRef) -> LedgerResult<Option<EscrowAccount>> {
        Ok(self.accounts.get(&escrow.address).map(|a| EscrowAccount {
            address: escrow.address.clone(),
            state: a.state,
            amount: a.amount,
            fee: a.fee,
        }))
    }
}
