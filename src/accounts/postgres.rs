//! PostgreSQL account store
//!
//! `apply_delta` takes a row lock (`SELECT ... FOR UPDATE`) so the
//! read-modify-write is serialized per account inside the database. The same
//! update runs inside the ledger's posting transaction via [`apply_delta_in`].

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::postgres::PgRow;
use sqlx::{PgConnection, PgPool, Row};
use uuid::Uuid;

use super::AccountStore;
use crate::domain::{Account, AccountId, AccountStatus, Money, NewAccount, OwnerId};
use crate::error::{LedgerError, LedgerResult};

const ACCOUNT_COLUMNS: &str = r#"
    id, owner_id, name, currency, balance, permits_overdraft,
    is_active, created_at, deactivated_at
"#;

/// Account store backed by the `accounts` table
#[derive(Debug, Clone)]
pub struct PgAccountStore {
    pool: PgPool,
}

impl PgAccountStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn decode(row: &PgRow) -> LedgerResult<Account> {
        let balance: Decimal = row.try_get("balance")?;
        let is_active: bool = row.try_get("is_active")?;
        Ok(Account {
            id: AccountId::from_uuid(row.try_get::<Uuid, _>("id")?),
            owner_id: OwnerId::from_uuid(row.try_get::<Uuid, _>("owner_id")?),
            name: row.try_get("name")?,
            currency: row.try_get("currency")?,
            balance: Money::from_decimal(balance)?,
            permits_overdraft: row.try_get("permits_overdraft")?,
            status: if is_active {
                AccountStatus::Active
            } else {
                AccountStatus::Deactivated
            },
            created_at: row.try_get::<DateTime<Utc>, _>("created_at")?,
            deactivated_at: row.try_get("deactivated_at")?,
        })
    }
}

/// Row-locked balance update on an open transaction.
///
/// Nothing is visible to other sessions until the caller commits.
pub(crate) async fn apply_delta_in(
    conn: &mut PgConnection,
    id: AccountId,
    delta: Money,
) -> LedgerResult<Money> {
    let current: Option<Decimal> = sqlx::query_scalar(
        r#"
        SELECT balance FROM accounts WHERE id = $1 AND is_active FOR UPDATE
        "#,
    )
    .bind(id.as_uuid())
    .fetch_optional(&mut *conn)
    .await?;

    let current = current.ok_or_else(|| LedgerError::account_not_found(id))?;
    let updated = Money::from_decimal(current)?.checked_add(delta)?;

    sqlx::query(
        r#"
        UPDATE accounts SET balance = $2 WHERE id = $1
        "#,
    )
    .bind(id.as_uuid())
    .bind(updated.to_decimal())
    .execute(&mut *conn)
    .await?;

    Ok(updated)
}

impl AccountStore for PgAccountStore {
    async fn get(&self, id: AccountId) -> LedgerResult<Account> {
        let sql = format!("SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE id = $1");
        let row = sqlx::query(&sql)
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| LedgerError::account_not_found(id))?;
        Self::decode(&row)
    }

    async fn create(&self, new: NewAccount) -> LedgerResult<Account> {
        let account = new.into_account(Utc::now())?;

        let inserted = sqlx::query(
            r#"
            INSERT INTO accounts (
                id, owner_id, name, currency, balance, permits_overdraft,
                is_active, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, TRUE, $7)
            ON CONFLICT (owner_id, name) DO NOTHING
            "#,
        )
        .bind(account.id.as_uuid())
        .bind(account.owner_id.as_uuid())
        .bind(&account.name)
        .bind(&account.currency)
        .bind(account.balance.to_decimal())
        .bind(account.permits_overdraft)
        .bind(account.created_at)
        .execute(&self.pool)
        .await?
        .rows_affected();

        if inserted == 0 {
            return Err(LedgerError::AlreadyExists(format!(
                "account named {:?}",
                account.name
            )));
        }

        tracing::debug!(account_id = %account.id, owner_id = %account.owner_id, "Account created");
        Ok(account)
    }

    async fn deactivate(&self, id: AccountId) -> LedgerResult<Account> {
        let mut tx = self.pool.begin().await?;

        let current: Option<(Decimal, bool)> = sqlx::query_as(
            r#"
            SELECT balance, is_active FROM accounts WHERE id = $1 FOR UPDATE
            "#,
        )
        .bind(id.as_uuid())
        .fetch_optional(&mut *tx)
        .await?;

        let balance = match current {
            Some((balance, true)) => Money::from_decimal(balance)?,
            _ => return Err(LedgerError::account_not_found(id)),
        };
        if !balance.is_zero() {
            return Err(LedgerError::HasNonZeroBalance {
                account_id: id,
                balance,
            });
        }

        let sql = format!(
            "UPDATE accounts SET is_active = FALSE, deactivated_at = NOW() \
             WHERE id = $1 RETURNING {ACCOUNT_COLUMNS}"
        );
        let row = sqlx::query(&sql)
            .bind(id.as_uuid())
            .fetch_one(&mut *tx)
            .await?;
        tx.commit().await?;

        Self::decode(&row)
    }

    async fn apply_delta(&self, id: AccountId, delta: Money) -> LedgerResult<Money> {
        let mut tx = self.pool.begin().await?;
        let updated = apply_delta_in(&mut *tx, id, delta).await?;
        tx.commit().await?;

        Ok(updated)
    }

    fn pg_pool(&self) -> Option<&PgPool> {
        Some(&self.pool)
    }

    async fn list_by_owner(&self, owner_id: OwnerId) -> LedgerResult<Vec<Account>> {
        let sql = format!("SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE owner_id = $1 ORDER BY name");
        let rows = sqlx::query(&sql)
            .bind(owner_id.as_uuid())
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(Self::decode).collect()
    }

    async fn list_all(&self) -> LedgerResult<Vec<Account>> {
        let sql = format!("SELECT {ACCOUNT_COLUMNS} FROM accounts ORDER BY id");
        let rows = sqlx::query(&sql).fetch_all(&self.pool).await?;
        rows.iter().map(Self::decode).collect()
    }
}
