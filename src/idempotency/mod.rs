//! Idempotency module
//!
//! Remembers the outcome of each (caller, key) so a retried operation is
//! applied at most once. Records are a cache with their own retention
//! window, separate from the ledger log.

mod memory;
mod postgres;

use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::coordinator::OperationOutcome;
use crate::domain::OwnerId;
use crate::error::LedgerResult;

pub use memory::MemoryIdempotencyStore;
pub use postgres::{IdempotencyStatus, PgIdempotencyStore};

/// Idempotency keys are only unique per caller
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IdempotencyScope {
    pub caller_id: OwnerId,
    pub key: String,
}

impl IdempotencyScope {
    pub fn new(caller_id: OwnerId, key: impl Into<String>) -> Self {
        Self {
            caller_id,
            key: key.into(),
        }
    }
}

/// Result of claiming a key
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Claim {
    /// The caller owns the key now and must `complete` or `fail` it
    Started,
    /// The operation already committed; replay this outcome
    Completed(OperationOutcome),
}

/// Retention and abandonment windows
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdempotencyPolicy {
    /// How long a completed record is kept
    pub ttl: Duration,
    /// After this long an in-flight claim is treated as abandoned
    pub stale_after: Duration,
}

impl Default for IdempotencyPolicy {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(24 * 60 * 60),
            stale_after: Duration::from_secs(5 * 60),
        }
    }
}

/// Storage contract for idempotency records
pub trait IdempotencyStore: Send + Sync + 'static {
    /// Claim `scope` for an operation with the given fingerprint.
    ///
    /// Fails with `IdempotencyConflict` when the key was used for a different
    /// operation and `OperationInProgress` while another attempt holds it.
    fn begin(
        &self,
        scope: &IdempotencyScope,
        fingerprint: &str,
    ) -> impl Future<Output = LedgerResult<Claim>> + Send;

    /// Record the committed outcome
    fn complete(
        &self,
        scope: &IdempotencyScope,
        outcome: &OperationOutcome,
    ) -> impl Future<Output = LedgerResult<()>> + Send;

    /// Release the key after a failed attempt so it may be retried
    fn fail(&self, scope: &IdempotencyScope) -> impl Future<Output = LedgerResult<()>> + Send;

    /// Release claims held longer than the stale window; returns how many
    fn reset_stale(&self) -> impl Future<Output = LedgerResult<u64>> + Send;

    /// Drop records past their retention window; returns how many
    fn purge_expired(&self) -> impl Future<Output = LedgerResult<u64>> + Send;
}

/// SHA-256 hex digest of a value's JSON form
pub fn fingerprint<T: Serialize>(value: &T) -> LedgerResult<String> {
    let body = serde_json::to_vec(value)?;
    Ok(compute_hash(&body))
}

/// SHA-256 hex digest of raw bytes
pub fn compute_hash(body: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(body);
    hex::encode(hasher.finalize())
}
