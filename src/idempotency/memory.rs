//! In-memory idempotency store
//!
//! Intended for tests/dev. Records are lost on restart.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::Instant;

use super::{Claim, IdempotencyPolicy, IdempotencyScope, IdempotencyStore};
use crate::coordinator::OperationOutcome;
use crate::error::{LedgerError, LedgerResult};

#[derive(Debug, Clone)]
enum State {
    Processing { started_at: Instant },
    Completed { outcome: OperationOutcome, expires_at: Instant },
}

#[derive(Debug, Clone)]
struct Record {
    fingerprint: String,
    state: State,
}

#[derive(Debug, Default)]
pub struct MemoryIdempotencyStore {
    records: Mutex<HashMap<IdempotencyScope, Record>>,
    policy: IdempotencyPolicy,
}

impl MemoryIdempotencyStore {
    pub fn new(policy: IdempotencyPolicy) -> Self {
        Self {
            records: Mutex::default(),
            policy,
        }
    }

    fn records(&self) -> LedgerResult<MutexGuard<'_, HashMap<IdempotencyScope, Record>>> {
        self.records
            .lock()
            .map_err(|_| LedgerError::StorageFailure("idempotency store lock poisoned".to_string()))
    }
}

impl IdempotencyStore for MemoryIdempotencyStore {
    async fn begin(&self, scope: &IdempotencyScope, fingerprint: &str) -> LedgerResult<Claim> {
        let now = Instant::now();
        let mut records = self.records()?;

        if let Some(existing) = records.get(scope) {
            let expired = matches!(existing.state, State::Completed { expires_at, .. } if expires_at <= now);
            if !expired {
                if existing.fingerprint != fingerprint {
                    return Err(LedgerError::IdempotencyConflict(scope.key.clone()));
                }
                match &existing.state {
                    State::Completed { outcome, .. } => return Ok(Claim::Completed(outcome.clone())),
                    State::Processing { started_at }
                        if now.duration_since(*started_at) < self.policy.stale_after =>
                    {
                        return Err(LedgerError::OperationInProgress(scope.key.clone()));
                    }
                    // Abandoned claim, take it over below
                    State::Processing { .. } => {}
                }
            }
        }

        records.insert(
            scope.clone(),
            Record {
                fingerprint: fingerprint.to_string(),
                state: State::Processing { started_at: now },
            },
        );
        Ok(Claim::Started)
    }

    async fn complete(&self, scope: &IdempotencyScope, outcome: &OperationOutcome) -> LedgerResult<()> {
        let mut records = self.records()?;
        let record = records.get_mut(scope).ok_or_else(|| {
            LedgerError::StorageFailure(format!("idempotency key {} was not claimed", scope.key))
        })?;

        record.state = State::Completed {
            outcome: outcome.clone(),
            expires_at: Instant::now() + self.policy.ttl,
        };
        Ok(())
    }

    async fn fail(&self, scope: &IdempotencyScope) -> LedgerResult<()> {
        let mut records = self.records()?;
        if matches!(records.get(scope), Some(r) if matches!(r.state, State::Processing { .. })) {
            records.remove(scope);
        }
        Ok(())
    }

    async fn reset_stale(&self) -> LedgerResult<u64> {
        let now = Instant::now();
        let stale_after = self.policy.stale_after;
        let mut records = self.records()?;

        let before = records.len();
        records.retain(|_, record| match record.state {
            State::Processing { started_at } => now.duration_since(started_at) < stale_after,
            State::Completed { .. } => true,
        });
        Ok((before - records.len()) as u64)
    }

    async fn purge_expired(&self) -> LedgerResult<u64> {
        let now = Instant::now();
        let mut records = self.records()?;

        let before = records.len();
        records.retain(|_, record| match record.state {
            State::Completed { expires_at, .. } => expires_at > now,
            State::Processing { .. } => true,
        });
        Ok((before - records.len()) as u64)
    }
}
