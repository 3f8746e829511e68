//! Transaction context state machine
//!
//! `IDLE → OPEN → {COMMITTED, ROLLED_BACK}`. The terminal states exist so a
//! finished context can be inspected; a new `begin` always starts a fresh
//! cycle. The context also carries the capability flag that makes the
//! no-op transaction behavior of non-transactional backends observable to
//! callers instead of silently pretending atomicity.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{UdomError, UdomResult};

/// Lifecycle state of a transaction context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TxState {
    Idle,
    Open,
    Committed,
    RolledBack,
}

/// Whether the backend actually provides multi-statement atomicity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TxCapability {
    Transactional,
    NonTransactional,
}

/// Per-session unit-of-work tracker.
///
/// Holds no connection itself; the adapter binds a pooled handle while the
/// context is open and releases it on finalization.
#[derive(Debug, Clone)]
pub struct TransactionContext {
    id: Uuid,
    state: TxState,
    capability: TxCapability,
}

impl TransactionContext {
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            state: TxState::Idle,
            capability: TxCapability::Transactional,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn state(&self) -> TxState {
        self.state
    }

    pub fn is_open(&self) -> bool {
        self.state == TxState::Open
    }

    /// True when the open context cannot guarantee atomicity.
    pub fn non_transactional(&self) -> bool {
        self.capability == TxCapability::NonTransactional
    }

    /// `IDLE → OPEN` (or terminal → fresh OPEN). Fails if already open.
    pub fn begin(&mut self, capability: TxCapability) -> UdomResult<()> {
        if self.state == TxState::Open {
            return Err(UdomError::transaction_state(
                "A transaction is already open on this session",
            ));
        }
        self.id = Uuid::new_v4();
        self.state = TxState::Open;
        self.capability = capability;
        Ok(())
    }

    /// `OPEN → COMMITTED`. Fails if not open.
    pub fn mark_committed(&mut self) -> UdomResult<()> {
        if self.state != TxState::Open {
            return Err(UdomError::transaction_state(
                "No open transaction to commit",
            ));
        }
        self.state = TxState::Committed;
        Ok(())
    }

    /// `OPEN → ROLLED_BACK`. Idempotent no-op from a terminal state;
    /// an error when nothing was ever begun.
    pub fn mark_rolled_back(&mut self) -> UdomResult<bool> {
        match self.state {
            TxState::Open => {
                self.state = TxState::RolledBack;
                Ok(true)
            }
            TxState::Committed | TxState::RolledBack => Ok(false),
            TxState::Idle => Err(UdomError::transaction_state(
                "No open transaction to roll back",
            )),
        }
    }

    /// Forced transition used when a commit failure aborts the context.
    pub fn abort(&mut self) {
        self.state = TxState::RolledBack;
    }
}

impl Default for TransactionContext {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn begin_twice_fails_and_stays_open() {
        let mut ctx = TransactionContext::new();
        ctx.begin(TxCapability::Transactional).unwrap();
        assert!(ctx.begin(TxCapability::Transactional).is_err());
        assert_eq!(ctx.state(), TxState::Open);
    }

    #[test]
    fn full_commit_cycle() {
        let mut ctx = TransactionContext::new();
        ctx.begin(TxCapability::Transactional).unwrap();
        ctx.mark_committed().unwrap();
        assert_eq!(ctx.state(), TxState::Committed);

        // A fresh begin restarts the cycle with a new identity.
        let old_id = ctx.id();
        ctx.begin(TxCapability::Transactional).unwrap();
        assert_ne!(ctx.id(), old_id);
        assert_eq!(ctx.state(), TxState::Open);
    }

    #[test]
    fn commit_requires_open() {
        let mut ctx = TransactionContext::new();
        assert!(ctx.mark_committed().is_err());
        ctx.begin(TxCapability::Transactional).unwrap();
        ctx.mark_rolled_back().unwrap();
        assert!(ctx.mark_committed().is_err());
    }

    #[test]
    fn rollback_is_idempotent_once_terminal() {
        let mut ctx = TransactionContext::new();
        ctx.begin(TxCapability::Transactional).unwrap();
        assert!(ctx.mark_rolled_back().unwrap());
        // Second rollback is a successful no-op.
        assert!(!ctx.mark_rolled_back().unwrap());
        assert_eq!(ctx.state(), TxState::RolledBack);
    }

    #[test]
    fn rollback_from_idle_is_an_error() {
        let mut ctx = TransactionContext::new();
        assert!(ctx.mark_rolled_back().is_err());
    }

    #[test]
    fn capability_flag_is_observable() {
        let mut ctx = TransactionContext::new();
        ctx.begin(TxCapability::NonTransactional).unwrap();
        assert!(ctx.non_transactional());
    }
}
