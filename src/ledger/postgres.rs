//! PostgreSQL ledger log
//!
//! Appends bump the single `ledger_head` row inside the same transaction as
//! the inserts. The row lock serializes appenders, so commit sequences are
//! handed out in commit order and `ledger_head.seq` is a valid snapshot mark.
//!
//! When the account store shares the database, `post` runs the row-locked
//! balance updates and the append in one transaction, so a balance is never
//! visible without its entries.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::postgres::PgRow;
use sqlx::{PgConnection, PgPool, Row};
use uuid::Uuid;

use super::posting::record_balance;
use super::{post_split, EntryCursor, EntryQuery, LedgerLog, OperationReceipt, Posting};
use crate::accounts::{apply_delta_in, AccountStore};
use crate::domain::{AccountId, Category, EntryId, GroupId, LedgerEntry, Money, OwnerId};
use crate::error::{LedgerError, LedgerResult};

const ENTRY_COLUMNS: &str = r#"
    id, account_id, group_id, amount, category, kind, memo, reverses,
    occurred_at, created_at
"#;

/// Ledger log backed by the `ledger_entries` table
#[derive(Debug, Clone)]
pub struct PgLedgerLog {
    pool: PgPool,
}

impl PgLedgerLog {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn decode(row: &PgRow) -> LedgerResult<LedgerEntry> {
        let amount: Decimal = row.try_get("amount")?;
        let category: String = row.try_get("category")?;
        let kind: String = row.try_get("kind")?;
        let reverses: Option<Uuid> = row.try_get("reverses")?;

        Ok(LedgerEntry {
            id: EntryId::from_uuid(row.try_get::<Uuid, _>("id")?),
            account_id: AccountId::from_uuid(row.try_get::<Uuid, _>("account_id")?),
            group_id: GroupId::from_uuid(row.try_get::<Uuid, _>("group_id")?),
            amount: Money::from_decimal(amount)?,
            category: Category::new(category)
                .map_err(|e| LedgerError::StorageFailure(e.to_string()))?,
            kind: kind.parse()?,
            memo: row.try_get("memo")?,
            reverses: reverses.map(GroupId::from_uuid),
            occurred_at: row.try_get::<DateTime<Utc>, _>("occurred_at")?,
            created_at: row.try_get::<DateTime<Utc>, _>("created_at")?,
        })
    }
}

/// Insert one batch, its reversal record and its receipt on an open
/// transaction. Returns the new head sequence.
async fn append_in(
    conn: &mut PgConnection,
    entries: &[LedgerEntry],
    receipt: Option<&OperationReceipt>,
) -> LedgerResult<i64> {
    let head: i64 = sqlx::query_scalar(
        r#"
        UPDATE ledger_head SET seq = seq + $1 WHERE id = 1 RETURNING seq
        "#,
    )
    .bind(entries.len() as i64)
    .fetch_one(&mut *conn)
    .await?;
    let first_seq = head - entries.len() as i64 + 1;

    // One reversal record per reversed group; the primary key keeps a
    // group from being reversed twice even across processes.
    let reversals: BTreeMap<GroupId, GroupId> = entries
        .iter()
        .filter_map(|e| e.reverses.map(|reversed| (reversed, e.group_id)))
        .collect();
    for (reversed, reversal) in &reversals {
        let inserted = sqlx::query(
            r#"
            INSERT INTO ledger_reversals (reversed_group_id, reversal_group_id)
            VALUES ($1, $2)
            ON CONFLICT (reversed_group_id) DO NOTHING
            "#,
        )
        .bind(reversed.as_uuid())
        .bind(reversal.as_uuid())
        .execute(&mut *conn)
        .await?
        .rows_affected();

        if inserted == 0 {
            return Err(LedgerError::AlreadyReversed(*reversed));
        }
    }

    if let Some(receipt) = receipt {
        let inserted = sqlx::query(
            r#"
            INSERT INTO ledger_receipts (caller_id, key, request_hash, group_id, outcome)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (caller_id, key, request_hash) DO NOTHING
            "#,
        )
        .bind(receipt.caller_id.as_uuid())
        .bind(&receipt.key)
        .bind(&receipt.fingerprint)
        .bind(receipt.group_id.as_uuid())
        .bind(&receipt.outcome)
        .execute(&mut *conn)
        .await?
        .rows_affected();

        if inserted == 0 {
            return Err(LedgerError::OperationInProgress(receipt.key.clone()));
        }
    }

    for (offset, entry) in entries.iter().enumerate() {
        sqlx::query(
            r#"
            INSERT INTO ledger_entries (
                id, seq, account_id, group_id, amount, category, kind,
                memo, reverses, occurred_at, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(entry.id.as_uuid())
        .bind(first_seq + offset as i64)
        .bind(entry.account_id.as_uuid())
        .bind(entry.group_id.as_uuid())
        .bind(entry.amount.to_decimal())
        .bind(entry.category.as_str())
        .bind(entry.kind.as_str())
        .bind(entry.memo.as_deref())
        .bind(entry.reverses.map(|g| g.as_uuid()))
        .bind(entry.occurred_at)
        .bind(entry.created_at)
        .execute(&mut *conn)
        .await?;
    }

    Ok(head)
}

impl LedgerLog for PgLedgerLog {
    async fn append_with_receipt(
        &self,
        entries: &[LedgerEntry],
        receipt: Option<&OperationReceipt>,
    ) -> LedgerResult<()> {
        if entries.is_empty() {
            return Ok(());
        }

        let mut tx = self.pool.begin().await?;
        let head = append_in(&mut *tx, entries, receipt).await?;
        tx.commit().await?;

        tracing::debug!(
            count = entries.len(),
            head = head,
            "Ledger entries appended"
        );
        Ok(())
    }

    async fn find_receipt(
        &self,
        caller_id: OwnerId,
        key: &str,
        fingerprint: &str,
    ) -> LedgerResult<Option<OperationReceipt>> {
        let row = sqlx::query(
            r#"
            SELECT group_id, outcome FROM ledger_receipts
            WHERE caller_id = $1 AND key = $2 AND request_hash = $3
            "#,
        )
        .bind(caller_id.as_uuid())
        .bind(key)
        .bind(fingerprint)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|row| {
            Ok(OperationReceipt {
                caller_id,
                key: key.to_string(),
                fingerprint: fingerprint.to_string(),
                group_id: GroupId::from_uuid(row.try_get::<Uuid, _>("group_id")?),
                outcome: row.try_get("outcome")?,
            })
        })
        .transpose()
    }

    /// Balance updates and the append share one transaction when the account
    /// store lives in a PostgreSQL database; other stores get the split path.
    async fn post<A: AccountStore>(&self, accounts: &A, posting: &Posting) -> LedgerResult<()> {
        let Some(pool) = accounts.pg_pool() else {
            return post_split(accounts, self, posting).await;
        };
        if posting.entries.is_empty() {
            return Ok(());
        }

        let mut tx = pool.begin().await?;

        let mut balances = Vec::with_capacity(posting.entries.len());
        for entry in &posting.entries {
            let balance = apply_delta_in(&mut *tx, entry.account_id, entry.amount).await?;
            record_balance(&mut balances, entry.account_id, balance);
        }
        posting.verify(&balances)?;

        let head = append_in(&mut *tx, &posting.entries, posting.receipt.as_ref()).await?;
        tx.commit().await?;

        tracing::debug!(
            group_id = ?posting.group_id(),
            count = posting.entries.len(),
            head = head,
            "Posting committed"
        );
        Ok(())
    }

    async fn high_water_mark(&self) -> LedgerResult<u64> {
        let seq: i64 = sqlx::query_scalar("SELECT seq FROM ledger_head WHERE id = 1")
            .fetch_one(&self.pool)
            .await?;
        Ok(seq.max(0) as u64)
    }

    async fn query_page(
        &self,
        query: &EntryQuery,
        snapshot: u64,
        after: Option<&EntryCursor>,
        limit: usize,
    ) -> LedgerResult<Vec<LedgerEntry>> {
        let account_ids: Option<Vec<Uuid>> = query
            .scope
            .account_ids()
            .map(|ids| ids.into_iter().map(|id| id.as_uuid()).collect());

        let sql = format!(
            r#"
            SELECT {ENTRY_COLUMNS} FROM ledger_entries
            WHERE seq <= $1
              AND ($2::uuid[] IS NULL OR account_id = ANY($2))
              AND ($3::timestamptz IS NULL OR occurred_at >= $3)
              AND ($4::timestamptz IS NULL OR occurred_at < $4)
              AND ($5::timestamptz IS NULL OR (occurred_at, id) > ($5, $6::uuid))
            ORDER BY occurred_at, id
            LIMIT $7
            "#
        );

        let rows = sqlx::query(&sql)
            .bind(i64::try_from(snapshot).unwrap_or(i64::MAX))
            .bind(account_ids)
            .bind(query.range.start)
            .bind(query.range.end)
            .bind(after.map(|c| c.occurred_at))
            .bind(after.map(|c| c.id.as_uuid()))
            .bind(i64::try_from(limit).unwrap_or(i64::MAX))
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(Self::decode).collect()
    }

    async fn query_by_group(&self, group_id: GroupId) -> LedgerResult<Vec<LedgerEntry>> {
        let sql = format!("SELECT {ENTRY_COLUMNS} FROM ledger_entries WHERE group_id = $1 ORDER BY seq");
        let rows = sqlx::query(&sql)
            .bind(group_id.as_uuid())
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(Self::decode).collect()
    }

    async fn find_reversal(&self, group_id: GroupId) -> LedgerResult<Option<GroupId>> {
        let reversal: Option<Uuid> = sqlx::query_scalar(
            r#"
            SELECT reversal_group_id FROM ledger_reversals WHERE reversed_group_id = $1
            "#,
        )
        .bind(group_id.as_uuid())
        .fetch_optional(&self.pool)
        .await?;
        Ok(reversal.map(GroupId::from_uuid))
    }
}
