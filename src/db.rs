//! Database module
//!
//! Connection pool and schema verification for the PostgreSQL backend.
//! The schema itself lives in `migrations/`.

use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

/// Tables the PostgreSQL stores read and write
pub const REQUIRED_TABLES: &[&str] = &[
    "accounts",
    "ledger_head",
    "ledger_entries",
    "ledger_reversals",
    "ledger_receipts",
    "idempotency_keys",
];

/// Open a connection pool
pub async fn connect(database_url: &str, max_connections: u32) -> Result<PgPool, sqlx::Error> {
    let pool = PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(database_url)
        .await?;

    verify_connection(&pool).await?;
    Ok(pool)
}

/// Simple connectivity check
pub async fn verify_connection(pool: &PgPool) -> Result<(), sqlx::Error> {
    sqlx::query("SELECT 1").execute(pool).await?;
    Ok(())
}

/// Check that every required table exists and the ledger head row is seeded
pub async fn check_schema(pool: &PgPool) -> Result<bool, sqlx::Error> {
    for &table in REQUIRED_TABLES {
        let exists: bool = sqlx::query_scalar(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM information_schema.tables
                WHERE table_schema = 'public' AND table_name = $1
            )
            "#,
        )
        .bind(table)
        .fetch_one(pool)
        .await?;

        if !exists {
            tracing::error!("Required table '{}' does not exist", table);
            return Ok(false);
        }
    }

    let head_seeded: bool =
        sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM ledger_head WHERE id = 1)")
            .fetch_one(pool)
            .await?;
    if !head_seeded {
        tracing::error!("Ledger head row is missing. Please run migrations.");
        return Ok(false);
    }

    tracing::info!("Database schema verified");
    Ok(true)
}
