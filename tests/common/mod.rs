//! Common test utilities

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use pocket_ledger::accounts::MemoryAccountStore;
use pocket_ledger::coordinator::CoordinatorConfig;
use pocket_ledger::idempotency::{IdempotencyPolicy, MemoryIdempotencyStore};
use pocket_ledger::ledger::{EntryCursor, EntryQuery, LedgerLog, MemoryLedgerLog, OperationReceipt};
use pocket_ledger::{
    Account, AccountId, Category, Coordinator, GroupId, LedgerEntry, LedgerError, LedgerResult,
    Money, NewAccount, OperationContext, OperationRequest, OwnerId,
};

/// Ledger log that can be told to reject appends
#[derive(Debug, Default)]
pub struct FailingLedgerLog {
    inner: MemoryLedgerLog,
    fail_appends: AtomicBool,
}

impl FailingLedgerLog {
    pub fn set_failing(&self, failing: bool) {
        self.fail_appends.store(failing, Ordering::SeqCst);
    }
}

impl LedgerLog for FailingLedgerLog {
    async fn append_with_receipt(
        &self,
        entries: &[LedgerEntry],
        receipt: Option<&OperationReceipt>,
    ) -> LedgerResult<()> {
        if self.fail_appends.load(Ordering::SeqCst) {
            return Err(LedgerError::StorageFailure("injected append failure".to_string()));
        }
        self.inner.append_with_receipt(entries, receipt).await
    }

    async fn find_receipt(
        &self,
        caller_id: OwnerId,
        key: &str,
        fingerprint: &str,
    ) -> LedgerResult<Option<OperationReceipt>> {
        self.inner.find_receipt(caller_id, key, fingerprint).await
    }

    async fn high_water_mark(&self) -> LedgerResult<u64> {
        self.inner.high_water_mark().await
    }

    async fn query_page(
        &self,
        query: &EntryQuery,
        snapshot: u64,
        after: Option<&EntryCursor>,
        limit: usize,
    ) -> LedgerResult<Vec<LedgerEntry>> {
        self.inner.query_page(query, snapshot, after, limit).await
    }

    async fn query_by_group(&self, group_id: GroupId) -> LedgerResult<Vec<LedgerEntry>> {
        self.inner.query_by_group(group_id).await
    }

    async fn find_reversal(&self, group_id: GroupId) -> LedgerResult<Option<GroupId>> {
        self.inner.find_reversal(group_id).await
    }
}

pub type TestCoordinator = Coordinator<MemoryAccountStore, FailingLedgerLog, MemoryIdempotencyStore>;

/// In-memory engine with one authenticated caller
pub struct TestEngine {
    pub coordinator: TestCoordinator,
    pub ledger: Arc<FailingLedgerLog>,
    pub ctx: OperationContext,
}

impl TestEngine {
    pub fn new() -> Self {
        Self::with_config(CoordinatorConfig::default())
    }

    pub fn with_config(config: CoordinatorConfig) -> Self {
        let ledger = Arc::new(FailingLedgerLog::default());
        let coordinator = Coordinator::new(
            Arc::new(MemoryAccountStore::new()),
            ledger.clone(),
            Arc::new(MemoryIdempotencyStore::new(IdempotencyPolicy::default())),
            config,
        );
        Self {
            coordinator,
            ledger,
            ctx: OperationContext::new(OwnerId::new()),
        }
    }

    pub async fn open(&self, name: &str) -> Account {
        self.coordinator
            .open_account(&self.ctx, NewAccount::new(self.ctx.caller_id, name, "EUR"))
            .await
            .unwrap()
    }

    pub async fn balance(&self, account_id: AccountId) -> Money {
        self.coordinator
            .account(&self.ctx, account_id)
            .await
            .unwrap()
            .balance
    }

    pub async fn fund(&self, account_id: AccountId, amount: &str) {
        self.coordinator
            .execute(OperationRequest::income(
                self.ctx.clone(),
                format!("fund-{}", uuid::Uuid::new_v4()),
                account_id,
                money(amount),
                category("seed"),
            ))
            .await
            .unwrap();
    }
}

pub fn money(amount: &str) -> Money {
    Money::parse(amount).unwrap()
}

pub fn category(name: &str) -> Category {
    Category::new(name).unwrap()
}
