//! PostgreSQL store tests
//!
//! Need a database: `DATABASE_URL=... cargo test -- --ignored`

use pocket_ledger::idempotency::{Claim, IdempotencyScope, IdempotencyStore, PgIdempotencyStore};
use pocket_ledger::domain::EntryId;
use pocket_ledger::ledger::{LedgerLog, Posting, TimeRange};
use pocket_ledger::{
    db, pg_coordinator, Config, EntryKind, LedgerEntry, LedgerError, NewAccount, OperationContext,
    OperationRequest, OwnerId,
};
use sqlx::PgPool;

mod common;

use common::{category, money};

const MIGRATION: &str = include_str!("../migrations/0001_ledger.sql");

/// Connect, apply the schema and start from empty tables
async fn setup_test_db() -> PgPool {
    dotenvy::dotenv().ok();
    let database_url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set for tests");
    let pool = db::connect(&database_url, 5).await.expect("Failed to connect to DB");

    for statement in MIGRATION.split(';').filter(|s| !s.trim().is_empty()) {
        sqlx::query(statement)
            .execute(&pool)
            .await
            .expect("Failed to apply schema");
    }

    sqlx::query(
        "TRUNCATE TABLE ledger_entries, ledger_reversals, ledger_receipts, idempotency_keys, accounts CASCADE",
    )
    .execute(&pool)
    .await
    .expect("Failed to clean up DB");
    sqlx::query("UPDATE ledger_head SET seq = 0 WHERE id = 1")
        .execute(&pool)
        .await
        .expect("Failed to reset ledger head");

    assert!(db::check_schema(&pool).await.unwrap());
    pool
}

fn config() -> Config {
    Config::from_lookup(|key| match key {
        "LEDGER_BACKEND" => Some("postgres".to_string()),
        "DATABASE_URL" => std::env::var("DATABASE_URL").ok(),
        _ => None,
    })
    .unwrap()
}

#[tokio::test]
#[ignore]
async fn test_pg_transfer_commits_both_legs() {
    let pool = setup_test_db().await;
    let coordinator = pg_coordinator(pool, &config());
    let ctx = OperationContext::new(OwnerId::new());

    let x = coordinator
        .open_account(&ctx, NewAccount::new(ctx.caller_id, "Checking", "EUR"))
        .await
        .unwrap();
    let y = coordinator
        .open_account(&ctx, NewAccount::new(ctx.caller_id, "Savings", "EUR"))
        .await
        .unwrap();

    let duplicate = coordinator
        .open_account(&ctx, NewAccount::new(ctx.caller_id, "Checking", "EUR"))
        .await
        .unwrap_err();
    assert!(matches!(duplicate, LedgerError::AlreadyExists(_)));

    coordinator
        .execute(OperationRequest::income(ctx.clone(), "i1", x.id, money("100.00"), category("salary")))
        .await
        .unwrap();
    let request = OperationRequest::transfer(ctx.clone(), "t1", x.id, y.id, money("30.00"), category("rent"));
    let first = coordinator.execute(request.clone()).await.unwrap();
    let replay = coordinator.execute(request).await.unwrap();
    assert_eq!(first.group_id, replay.group_id);

    assert_eq!(coordinator.account(&ctx, x.id).await.unwrap().balance, money("70.00"));
    assert_eq!(coordinator.account(&ctx, y.id).await.unwrap().balance, money("30.00"));
    assert_eq!(coordinator.ledger().high_water_mark().await.unwrap(), 3);

    let history = coordinator
        .ledger()
        .query_by_account(x.id, TimeRange::unbounded())
        .collect_all()
        .await
        .unwrap();
    assert_eq!(history.len(), 2);

    let err = coordinator
        .execute(OperationRequest::expense(ctx.clone(), "e1", y.id, money("31.00"), category("food")))
        .await
        .unwrap_err();
    assert!(matches!(err, LedgerError::InsufficientFunds { .. }));

    for id in [x.id, y.id] {
        assert!(coordinator.reconcile(id).await.unwrap().is_consistent());
    }
}

#[tokio::test]
#[ignore]
async fn test_pg_reversal_is_recorded_once() {
    let pool = setup_test_db().await;
    let coordinator = pg_coordinator(pool, &config());
    let ctx = OperationContext::new(OwnerId::new());
    let x = coordinator
        .open_account(&ctx, NewAccount::new(ctx.caller_id, "Checking", "EUR"))
        .await
        .unwrap();

    let income = coordinator
        .execute(OperationRequest::income(ctx.clone(), "i1", x.id, money("12.50"), category("gift")))
        .await
        .unwrap();
    let reversal = coordinator
        .execute(OperationRequest::reversal(ctx.clone(), "r1", income.group_id))
        .await
        .unwrap();

    assert_eq!(
        coordinator.ledger().find_reversal(income.group_id).await.unwrap(),
        Some(reversal.group_id)
    );
    let again = coordinator
        .execute(OperationRequest::reversal(ctx.clone(), "r2", income.group_id))
        .await
        .unwrap_err();
    assert!(matches!(again, LedgerError::AlreadyReversed(_)));
    assert!(coordinator.account(&ctx, x.id).await.unwrap().balance.is_zero());
}

#[tokio::test]
#[ignore]
async fn test_pg_idempotency_claims() {
    let pool = setup_test_db().await;
    let store = PgIdempotencyStore::new(pool, config().idempotency());
    let scope = IdempotencyScope::new(OwnerId::new(), "k1");

    assert!(matches!(store.begin(&scope, "hash-a").await.unwrap(), Claim::Started));
    assert!(matches!(
        store.begin(&scope, "hash-a").await,
        Err(LedgerError::OperationInProgress(_))
    ));
    assert!(matches!(
        store.begin(&scope, "hash-b").await,
        Err(LedgerError::IdempotencyConflict(_))
    ));

    store.fail(&scope).await.unwrap();
    assert!(matches!(store.begin(&scope, "hash-a").await.unwrap(), Claim::Started));
}

#[tokio::test]
#[ignore]
async fn test_pg_rejected_posting_leaves_balance_untouched() {
    let pool = setup_test_db().await;
    let coordinator = pg_coordinator(pool, &config());
    let ctx = OperationContext::new(OwnerId::new());
    let x = coordinator
        .open_account(&ctx, NewAccount::new(ctx.caller_id, "Checking", "EUR"))
        .await
        .unwrap();

    let request = OperationRequest::income(ctx.clone(), "i1", x.id, money("50.00"), category("gift"));
    let income = coordinator.execute(request.clone()).await.unwrap();

    let receipt = coordinator
        .ledger()
        .find_receipt(ctx.caller_id, "i1", &request.fingerprint().unwrap())
        .await
        .unwrap()
        .expect("receipt written with the entries");
    assert_eq!(receipt.group_id, income.group_id);

    // Same receipt again: the balance update must roll back with the insert
    let now = chrono::Utc::now();
    let posting = Posting {
        entries: vec![LedgerEntry {
            id: EntryId::new(),
            account_id: x.id,
            group_id: pocket_ledger::GroupId::new(),
            amount: money("10.00"),
            category: category("gift"),
            kind: EntryKind::Income,
            memo: None,
            reverses: None,
            occurred_at: now,
            created_at: now,
        }],
        balances: vec![(x.id, money("60.00"))],
        receipt: Some(receipt),
    };
    let err = coordinator
        .ledger()
        .post(coordinator.accounts().as_ref(), &posting)
        .await
        .unwrap_err();
    assert!(matches!(err, LedgerError::OperationInProgress(_)));

    assert_eq!(coordinator.account(&ctx, x.id).await.unwrap().balance, money("50.00"));
    let entries = coordinator
        .ledger()
        .query_by_account(x.id, TimeRange::unbounded())
        .collect_all()
        .await
        .unwrap();
    assert_eq!(entries.len(), 1);
}
