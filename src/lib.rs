//! pocket-ledger Library
//!
//! Ledger engine for personal finances. Balances change only through the
//! [`Coordinator`], which keeps the account store and the append-only ledger
//! log consistent; summaries are computed from the log.

pub mod accounts;
pub mod config;
pub mod coordinator;
pub mod db;
pub mod domain;
pub mod idempotency;
pub mod jobs;
pub mod ledger;
pub mod summary;

mod error;

pub use config::{Backend, Config, ConfigError};
pub use coordinator::{
    Coordinator, CoordinatorConfig, Operation, OperationKind, OperationOutcome, OperationRequest,
    OperationState,
};
pub use domain::{
    Account, AccountId, Category, EntryKind, GroupId, LedgerEntry, Money, MoneyError, NewAccount,
    OperationContext, OwnerId,
};
pub use error::{LedgerError, LedgerResult};
pub use summary::{GroupBy, GroupKey, GroupTotals, Summary};

use std::sync::Arc;

/// Coordinator wired to the in-memory stores (tests, development, load tests)
pub type MemoryCoordinator = Coordinator<
    accounts::MemoryAccountStore,
    ledger::MemoryLedgerLog,
    idempotency::MemoryIdempotencyStore,
>;

/// Coordinator wired to the PostgreSQL stores
pub type PgCoordinator =
    Coordinator<accounts::PgAccountStore, ledger::PgLedgerLog, idempotency::PgIdempotencyStore>;

/// Build a coordinator over fresh in-memory stores
pub fn memory_coordinator(config: &Config) -> MemoryCoordinator {
    Coordinator::new(
        Arc::new(accounts::MemoryAccountStore::new()),
        Arc::new(ledger::MemoryLedgerLog::new()),
        Arc::new(idempotency::MemoryIdempotencyStore::new(config.idempotency())),
        config.coordinator(),
    )
}

/// Build a coordinator over a PostgreSQL pool
pub fn pg_coordinator(pool: sqlx::PgPool, config: &Config) -> PgCoordinator {
    Coordinator::new(
        Arc::new(accounts::PgAccountStore::new(pool.clone())),
        Arc::new(ledger::PgLedgerLog::new(pool.clone())),
        Arc::new(idempotency::PgIdempotencyStore::new(pool, config.idempotency())),
        config.coordinator(),
    )
}
