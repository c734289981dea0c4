//! Integration tests for the write path: balances, ledger entries and idempotency

use chrono::{TimeZone, Utc};
use pocket_ledger::ledger::{LedgerLog, TimeRange};
use pocket_ledger::{EntryKind, LedgerError, OperationRequest};

mod common;

use common::{category, money, TestEngine};

#[tokio::test]
async fn test_personal_finance_scenario() {
    let engine = TestEngine::new();
    let x = engine.open("Checking").await;
    let y = engine.open("Savings").await;
    engine.fund(x.id, "100.00").await;

    let ctx = engine.ctx.clone();
    let expense = engine
        .coordinator
        .execute(OperationRequest::expense(ctx.clone(), "e1", x.id, money("30.00"), category("food")))
        .await
        .unwrap();
    assert_eq!(expense.balance_of(x.id), Some(money("70.00")));
    assert_eq!(expense.entries.len(), 1);
    assert_eq!(expense.entries[0].amount, money("-30.00"));

    engine
        .coordinator
        .execute(OperationRequest::income(ctx.clone(), "i1", x.id, money("50.00"), category("salary")))
        .await
        .unwrap();
    assert_eq!(engine.balance(x.id).await, money("120.00"));

    let transfer = engine
        .coordinator
        .execute(OperationRequest::transfer(
            ctx.clone(),
            "t1",
            x.id,
            y.id,
            money("120.00"),
            category("rent"),
        ))
        .await
        .unwrap();
    assert_eq!(engine.balance(x.id).await, money("0.00"));
    assert_eq!(engine.balance(y.id).await, money("120.00"));

    let group = engine.ledger.query_by_group(transfer.group_id).await.unwrap();
    assert_eq!(group.len(), 2);
    assert!(group.iter().all(|e| e.group_id == transfer.group_id));
    assert_eq!(group[0].kind, EntryKind::TransferOut);
    assert_eq!(group[1].kind, EntryKind::TransferIn);

    let err = engine
        .coordinator
        .execute(OperationRequest::expense(ctx, "e2", x.id, money("10.00"), category("food")))
        .await
        .unwrap_err();
    assert!(matches!(err, LedgerError::InsufficientFunds { .. }));
    assert_eq!(engine.balance(x.id).await, money("0.00"));

    // seed + expense + income + transfer-out
    let history = engine
        .ledger
        .query_by_account(x.id, TimeRange::unbounded())
        .collect_all()
        .await
        .unwrap();
    assert_eq!(history.len(), 4);
}

#[tokio::test]
async fn test_retry_after_timeout_does_not_double_move_money() {
    let engine = TestEngine::new();
    let x = engine.open("Checking").await;
    let y = engine.open("Savings").await;
    engine.fund(x.id, "80.00").await;

    let request = OperationRequest::transfer(
        engine.ctx.clone(),
        "transfer-42",
        x.id,
        y.id,
        money("25.00"),
        category("savings"),
    );

    let first = engine.coordinator.execute(request.clone()).await.unwrap();
    let second = engine.coordinator.execute(request).await.unwrap();

    assert_eq!(first.group_id, second.group_id);
    assert_eq!(first.balances, second.balances);
    assert_eq!(engine.balance(x.id).await, money("55.00"));
    assert_eq!(engine.balance(y.id).await, money("25.00"));
    assert_eq!(engine.ledger.high_water_mark().await.unwrap(), 3);
}

#[tokio::test]
async fn test_same_key_from_different_callers_is_independent() {
    let engine = TestEngine::new();
    let other = TestEngine {
        coordinator: engine.coordinator.clone(),
        ledger: engine.ledger.clone(),
        ctx: pocket_ledger::OperationContext::new(pocket_ledger::OwnerId::new()),
    };
    let mine = engine.open("Wallet").await;
    let theirs = other.open("Wallet").await;

    for (e, account) in [(&engine, &mine), (&other, &theirs)] {
        e.coordinator
            .execute(OperationRequest::income(
                e.ctx.clone(),
                "shared-key",
                account.id,
                money("5.00"),
                category("gift"),
            ))
            .await
            .unwrap();
    }

    assert_eq!(engine.balance(mine.id).await, money("5.00"));
    assert_eq!(other.balance(theirs.id).await, money("5.00"));
}

#[tokio::test]
async fn test_failed_append_leaves_no_trace() {
    let engine = TestEngine::new();
    let x = engine.open("Checking").await;
    let y = engine.open("Savings").await;
    engine.fund(x.id, "100.00").await;

    let mark_before = engine.ledger.high_water_mark().await.unwrap();
    let request = OperationRequest::transfer(
        engine.ctx.clone(),
        "t-fail",
        x.id,
        y.id,
        money("40.00"),
        category("rent"),
    );

    engine.ledger.set_failing(true);
    let err = engine.coordinator.execute(request.clone()).await.unwrap_err();
    assert!(matches!(err, LedgerError::StorageFailure(_)));

    // Neither leg is visible: balances restored, log untouched
    assert_eq!(engine.balance(x.id).await, money("100.00"));
    assert_eq!(engine.balance(y.id).await, money("0.00"));
    assert_eq!(engine.ledger.high_water_mark().await.unwrap(), mark_before);
    for id in [x.id, y.id] {
        assert!(engine.coordinator.reconcile(id).await.unwrap().is_consistent());
    }

    // The key was released, so the retry commits
    engine.ledger.set_failing(false);
    let outcome = engine.coordinator.execute(request).await.unwrap();
    assert_eq!(outcome.balance_of(x.id), Some(money("60.00")));
    assert_eq!(outcome.balance_of(y.id), Some(money("40.00")));
}

#[tokio::test]
async fn test_account_history_is_ordered_by_occurrence() {
    let engine = TestEngine::new();
    let x = engine.open("Checking").await;

    for (key, day) in [("late", 20), ("early", 3), ("middle", 11)] {
        engine
            .coordinator
            .execute(
                OperationRequest::income(engine.ctx.clone(), key, x.id, money("1.00"), category("misc"))
                    .with_occurred_at(Utc.with_ymd_and_hms(2026, 5, day, 12, 0, 0).unwrap())
                    .with_memo(key),
            )
            .await
            .unwrap();
    }

    let may = engine
        .ledger
        .query_by_account(x.id, TimeRange::month(2026, 5).unwrap())
        .collect_all()
        .await
        .unwrap();
    let memos: Vec<_> = may.iter().filter_map(|e| e.memo.as_deref()).collect();
    assert_eq!(memos, vec!["early", "middle", "late"]);

    let june = engine
        .ledger
        .query_by_account(x.id, TimeRange::month(2026, 6).unwrap())
        .collect_all()
        .await
        .unwrap();
    assert!(june.is_empty());
}

#[tokio::test]
async fn test_reversal_round_trip_through_the_log() {
    let engine = TestEngine::new();
    let x = engine.open("Checking").await;
    engine.fund(x.id, "50.00").await;

    let expense = engine
        .coordinator
        .execute(OperationRequest::expense(
            engine.ctx.clone(),
            "typo",
            x.id,
            money("45.00"),
            category("food"),
        ))
        .await
        .unwrap();
    let reversal = engine
        .coordinator
        .execute(OperationRequest::reversal(engine.ctx.clone(), "fix-typo", expense.group_id))
        .await
        .unwrap();

    assert_eq!(engine.balance(x.id).await, money("50.00"));
    assert_eq!(
        engine.ledger.find_reversal(expense.group_id).await.unwrap(),
        Some(reversal.group_id)
    );
    let entries = engine.ledger.query_by_group(reversal.group_id).await.unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].kind, EntryKind::Reversal);
    assert_eq!(entries[0].amount, money("45.00"));
    assert_eq!(entries[0].reverses, Some(expense.group_id));
}
