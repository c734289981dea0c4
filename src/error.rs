//! Error handling module
//!
//! Centralized error taxonomy for the ledger engine.

use std::time::Duration;

use crate::domain::{AccountId, GroupId, Money, MoneyError};

/// Ledger-wide Result type
pub type LedgerResult<T> = Result<T, LedgerError>;

/// Ledger error types
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LedgerError {
    // Validation errors (detected before any mutation)
    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Insufficient funds in account {account_id}: required {required}, available {available}")]
    InsufficientFunds {
        account_id: AccountId,
        required: Money,
        available: Money,
    },

    #[error("Currency mismatch: {from} vs {to}")]
    CurrencyMismatch { from: String, to: String },

    #[error("Already exists: {0}")]
    AlreadyExists(String),

    #[error("Operation group {0} has already been reversed")]
    AlreadyReversed(GroupId),

    #[error("Account {account_id} still holds a balance of {balance}")]
    HasNonZeroBalance { account_id: AccountId, balance: Money },

    // Idempotency
    #[error("Idempotency conflict: key {0} was used for a different operation")]
    IdempotencyConflict(String),

    #[error("Operation with idempotency key {0} is still in progress")]
    OperationInProgress(String),

    // Runtime errors
    #[error("Amount is outside the representable range")]
    Overflow,

    #[error("Timed out after {waited:?} waiting for the lock on account {account_id}")]
    LockTimeout {
        account_id: AccountId,
        waited: Duration,
    },

    #[error("Storage failure: {0}")]
    StorageFailure(String),
}

impl LedgerError {
    pub fn account_not_found(account_id: AccountId) -> Self {
        Self::NotFound(format!("account {account_id}"))
    }

    pub fn group_not_found(group_id: GroupId) -> Self {
        Self::NotFound(format!("operation group {group_id}"))
    }

    /// Stable machine-readable code for the request layer
    pub fn code(&self) -> &'static str {
        match self {
            LedgerError::InvalidAmount(_) => "invalid_amount",
            LedgerError::InvalidRequest(_) => "invalid_request",
            LedgerError::NotFound(_) => "not_found",
            LedgerError::InsufficientFunds { .. } => "insufficient_funds",
            LedgerError::CurrencyMismatch { .. } => "currency_mismatch",
            LedgerError::AlreadyExists(_) => "already_exists",
            LedgerError::AlreadyReversed(_) => "already_reversed",
            LedgerError::HasNonZeroBalance { .. } => "has_non_zero_balance",
            LedgerError::IdempotencyConflict(_) => "idempotency_conflict",
            LedgerError::OperationInProgress(_) => "operation_in_progress",
            LedgerError::Overflow => "overflow",
            LedgerError::LockTimeout { .. } => "lock_timeout",
            LedgerError::StorageFailure(_) => "storage_failure",
        }
    }

    /// Check if the caller may retry with the same idempotency key
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            LedgerError::LockTimeout { .. } | LedgerError::OperationInProgress(_)
        )
    }

    /// Check if this is a client error (user's fault)
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            LedgerError::InvalidAmount(_)
                | LedgerError::InvalidRequest(_)
                | LedgerError::NotFound(_)
                | LedgerError::InsufficientFunds { .. }
                | LedgerError::CurrencyMismatch { .. }
                | LedgerError::AlreadyExists(_)
                | LedgerError::AlreadyReversed(_)
                | LedgerError::HasNonZeroBalance { .. }
                | LedgerError::IdempotencyConflict(_)
        )
    }
}

impl From<MoneyError> for LedgerError {
    fn from(err: MoneyError) -> Self {
        match err {
            MoneyError::Overflow => LedgerError::Overflow,
            other => LedgerError::InvalidAmount(other.to_string()),
        }
    }
}

impl From<sqlx::Error> for LedgerError {
    fn from(err: sqlx::Error) -> Self {
        tracing::error!(error = ?err, "Database error");
        LedgerError::StorageFailure(err.to_string())
    }
}

impl From<serde_json::Error> for LedgerError {
    fn from(err: serde_json::Error) -> Self {
        LedgerError::StorageFailure(format!("serialization error: {err}"))
    }
}
