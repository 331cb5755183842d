//! Transaction state machine (C5).
//!
//! Each [`crate::manager::ConnectionManager`] implementation owns one (or,
//! for the Pooled variant, one per named pool) [`TransactionCoordinator`]
//! and delegates its `begin_transaction`/`commit`/`rollback`/`in_transaction`
//! verbs to it. The coordinator only tracks the flag and enforces
//! at-most-one; acquiring/releasing the backing connection remains the
//! manager's job.

use crate::error::{DbError, DbErrorKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TxState {
    Idle,
    Active,
}

/// `IDLE --begin--> ACTIVE --commit|rollback--> IDLE`, matching §4.5.
#[derive(Debug)]
pub struct TransactionCoordinator {
    state: TxState,
}

impl Default for TransactionCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

impl TransactionCoordinator {
    pub fn new() -> Self {
        Self {
            state: TxState::Idle,
        }
    }

    pub fn in_transaction(&self) -> bool {
        self.state == TxState::Active
    }

    /// Transitions `IDLE -> ACTIVE`. Fails if already active.
    pub fn begin(&mut self) -> Result<(), DbError> {
        match self.state {
            TxState::Idle => {
                self.state = TxState::Active;
                Ok(())
            }
            TxState::Active => Err(DbError::new(
                DbErrorKind::AlreadyInTransaction,
                "Already in transaction",
            )),
        }
    }

    /// Transitions `ACTIVE -> IDLE`. Fails if not active.
    pub fn commit(&mut self) -> Result<(), DbError> {
        self.terminate()
    }

    /// Transitions `ACTIVE -> IDLE`. Fails if not active.
    pub fn rollback(&mut self) -> Result<(), DbError> {
        self.terminate()
    }

    /// Forces the flag back to `IDLE` unconditionally; used on abnormal
    /// teardown, where there is no "no active transaction" error to report.
    pub fn force_rollback(&mut self) {
        self.state = TxState::Idle;
    }

    fn terminate(&mut self) -> Result<(), DbError> {
        match self.state {
            TxState::Active => {
                self.state = TxState::Idle;
                Ok(())
            }
            TxState::Idle => Err(DbError::new(
                DbErrorKind::NoActiveTransaction,
                "No active transaction",
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn happy_path() {
        let mut tx = TransactionCoordinator::new();
        assert!(!tx.in_transaction());
        tx.begin().unwrap();
        assert!(tx.in_transaction());
        tx.commit().unwrap();
        assert!(!tx.in_transaction());
    }

    #[test]
    fn commit_without_begin_fails() {
        let mut tx = TransactionCoordinator::new();
        let err = tx.commit().unwrap_err();
        assert_eq!(err.message, "No active transaction");
    }

    #[test]
    fn double_begin_fails() {
        let mut tx = TransactionCoordinator::new();
        tx.begin().unwrap();
        let err = tx.begin().unwrap_err();
        assert_eq!(err.message, "Already in transaction");
        // state is unaffected by the failed attempt
        assert!(tx.in_transaction());
    }

    #[test]
    fn force_rollback_is_idempotent() {
        let mut tx = TransactionCoordinator::new();
        tx.force_rollback();
        tx.begin().unwrap();
        tx.force_rollback();
        assert!(!tx.in_transaction());
    }
}
