//! PostgreSQL idempotency store
//!
//! Records live in `idempotency_keys`, keyed by (caller_id, key). A claim
//! is decided under a row lock so two processes cannot both start the same
//! operation.

use chrono::{DateTime, Utc};
use sqlx::PgPool;
use std::fmt;
use std::str::FromStr;

use super::{Claim, IdempotencyPolicy, IdempotencyScope, IdempotencyStore};
use crate::coordinator::OperationOutcome;
use crate::error::{LedgerError, LedgerResult};

/// Processing state of a stored key
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdempotencyStatus {
    Processing,
    Completed,
    /// Released after a failed attempt; the next claim starts over
    Failed,
}

impl FromStr for IdempotencyStatus {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "processing" => Ok(IdempotencyStatus::Processing),
            "completed" => Ok(IdempotencyStatus::Completed),
            "failed" => Ok(IdempotencyStatus::Failed),
            other => Err(LedgerError::StorageFailure(format!(
                "unknown idempotency status: {other}"
            ))),
        }
    }
}

impl fmt::Display for IdempotencyStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IdempotencyStatus::Processing => write!(f, "processing"),
            IdempotencyStatus::Completed => write!(f, "completed"),
            IdempotencyStatus::Failed => write!(f, "failed"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PgIdempotencyStore {
    pool: PgPool,
    policy: IdempotencyPolicy,
}

impl PgIdempotencyStore {
    pub fn new(pool: PgPool, policy: IdempotencyPolicy) -> Self {
        Self { pool, policy }
    }

    fn ttl_secs(&self) -> f64 {
        self.policy.ttl.as_secs_f64()
    }

    fn is_stale(&self, started_at: Option<DateTime<Utc>>) -> bool {
        match started_at {
            Some(started) => (Utc::now() - started)
                .to_std()
                .map_or(false, |age| age >= self.policy.stale_after),
            None => true,
        }
    }
}

impl IdempotencyStore for PgIdempotencyStore {
    async fn begin(&self, scope: &IdempotencyScope, fingerprint: &str) -> LedgerResult<Claim> {
        let mut tx = self.pool.begin().await?;

        let inserted = sqlx::query(
            r#"
            INSERT INTO idempotency_keys (
                caller_id, key, request_hash, processing_status,
                processing_started_at, expires_at
            )
            VALUES ($1, $2, $3, 'processing', NOW(), NOW() + make_interval(secs => $4))
            ON CONFLICT (caller_id, key) DO NOTHING
            "#,
        )
        .bind(scope.caller_id.as_uuid())
        .bind(&scope.key)
        .bind(fingerprint)
        .bind(self.ttl_secs())
        .execute(&mut *tx)
        .await?
        .rows_affected();

        if inserted == 1 {
            tx.commit().await?;
            return Ok(Claim::Started);
        }

        let (request_hash, status, outcome, started_at, expires_at): (
            String,
            String,
            Option<serde_json::Value>,
            Option<DateTime<Utc>>,
            DateTime<Utc>,
        ) = sqlx::query_as(
            r#"
            SELECT request_hash, processing_status, outcome, processing_started_at, expires_at
            FROM idempotency_keys
            WHERE caller_id = $1 AND key = $2
            FOR UPDATE
            "#,
        )
        .bind(scope.caller_id.as_uuid())
        .bind(&scope.key)
        .fetch_one(&mut *tx)
        .await?;

        let status: IdempotencyStatus = status.parse()?;
        let reusable = status == IdempotencyStatus::Failed || expires_at <= Utc::now();

        if !reusable {
            if request_hash != fingerprint {
                return Err(LedgerError::IdempotencyConflict(scope.key.clone()));
            }
            match status {
                IdempotencyStatus::Completed => {
                    let outcome = outcome.ok_or_else(|| {
                        LedgerError::StorageFailure(format!(
                            "completed idempotency key {} has no outcome",
                            scope.key
                        ))
                    })?;
                    let outcome: OperationOutcome = serde_json::from_value(outcome)?;
                    return Ok(Claim::Completed(outcome));
                }
                IdempotencyStatus::Processing if !self.is_stale(started_at) => {
                    return Err(LedgerError::OperationInProgress(scope.key.clone()));
                }
                _ => {}
            }
        }

        // Failed, expired or abandoned: start over
        sqlx::query(
            r#"
            UPDATE idempotency_keys
            SET request_hash = $3,
                processing_status = 'processing',
                processing_started_at = NOW(),
                outcome = NULL,
                expires_at = NOW() + make_interval(secs => $4)
            WHERE caller_id = $1 AND key = $2
            "#,
        )
        .bind(scope.caller_id.as_uuid())
        .bind(&scope.key)
        .bind(fingerprint)
        .bind(self.ttl_secs())
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;

        Ok(Claim::Started)
    }

    async fn complete(&self, scope: &IdempotencyScope, outcome: &OperationOutcome) -> LedgerResult<()> {
        let body = serde_json::to_value(outcome)?;
        let rows = sqlx::query(
            r#"
            UPDATE idempotency_keys
            SET processing_status = 'completed',
                outcome = $3,
                expires_at = NOW() + make_interval(secs => $4)
            WHERE caller_id = $1 AND key = $2
            "#,
        )
        .bind(scope.caller_id.as_uuid())
        .bind(&scope.key)
        .bind(body)
        .bind(self.ttl_secs())
        .execute(&self.pool)
        .await?
        .rows_affected();

        if rows == 0 {
            return Err(LedgerError::StorageFailure(format!(
                "idempotency key {} was not claimed",
                scope.key
            )));
        }
        Ok(())
    }

    async fn fail(&self, scope: &IdempotencyScope) -> LedgerResult<()> {
        sqlx::query(
            r#"
            UPDATE idempotency_keys
            SET processing_status = 'failed', outcome = NULL
            WHERE caller_id = $1 AND key = $2 AND processing_status = 'processing'
            "#,
        )
        .bind(scope.caller_id.as_uuid())
        .bind(&scope.key)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn reset_stale(&self) -> LedgerResult<u64> {
        let rows = sqlx::query(
            r#"
            UPDATE idempotency_keys
            SET processing_status = 'failed'
            WHERE processing_status = 'processing'
              AND processing_started_at < NOW() - make_interval(secs => $1)
            "#,
        )
        .bind(self.policy.stale_after.as_secs_f64())
        .execute(&self.pool)
        .await?
        .rows_affected();
        Ok(rows)
    }

    async fn purge_expired(&self) -> LedgerResult<u64> {
        let rows = sqlx::query(
            r#"
            DELETE FROM idempotency_keys
            WHERE expires_at < NOW() AND processing_status <> 'processing'
            "#,
        )
        .execute(&self.pool)
        .await?
        .rows_affected();
        Ok(rows)
    }
}
