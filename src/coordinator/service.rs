//! Transaction Coordinator
//!
//! Turns one operation into balance changes plus ledger entries, atomically:
//!
//! ```text
//! Validated -> Locked -> Applied -> Logged -> Committed
//!     |          |          |         |
//!  Rejected   Aborted    Aborted   Aborted   (partial effects compensated)
//! ```
//!
//! Once an operation has claimed its idempotency key the body runs on its
//! own task. Dropping the caller's future cannot interrupt it half-way; the
//! outcome is recorded and a retry with the same key returns it.
//!
//! Every committed group also carries a receipt in the ledger log, written in
//! the same atomic step as its entries. A retry that takes over a stale or
//! failed claim finds the receipt and replays it instead of running again.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};

use super::commands::{AccountBalance, Operation, OperationKind, OperationOutcome, OperationRequest};
use super::locks::AccountLocks;
use crate::accounts::AccountStore;
use crate::domain::{
    Account, AccountId, Category, EntryId, EntryKind, GroupId, LedgerEntry, Money, NewAccount,
    OperationContext,
};
use crate::error::{LedgerError, LedgerResult};
use crate::idempotency::{Claim, IdempotencyScope, IdempotencyStore};
use crate::ledger::{LedgerLog, OperationReceipt, Posting, DEFAULT_PAGE_SIZE};
use crate::summary::{reconcile_account, ReconciliationReport, SummaryAggregator};

/// Attempts at recording a committed outcome before giving up
const COMPLETE_RETRIES: u32 = 3;

// =========================================================================
// Configuration
// =========================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoordinatorConfig {
    /// Bounded wait for all account locks of one operation
    pub lock_timeout: Duration,
    /// Page size for ledger scans (reconciliation)
    pub page_size: usize,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            lock_timeout: Duration::from_millis(5000),
            page_size: DEFAULT_PAGE_SIZE,
        }
    }
}

impl CoordinatorConfig {
    pub fn with_lock_timeout(mut self, lock_timeout: Duration) -> Self {
        self.lock_timeout = lock_timeout;
        self
    }
}

// =========================================================================
// OperationState
// =========================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationState {
    Validated,
    Locked,
    Applied,
    Logged,
    Committed,
    Rejected,
    Aborted,
}

impl fmt::Display for OperationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            OperationState::Validated => "validated",
            OperationState::Locked => "locked",
            OperationState::Applied => "applied",
            OperationState::Logged => "logged",
            OperationState::Committed => "committed",
            OperationState::Rejected => "rejected",
            OperationState::Aborted => "aborted",
        };
        f.write_str(name)
    }
}

fn transition(group_id: GroupId, kind: OperationKind, state: OperationState) {
    tracing::debug!(group_id = %group_id, kind = %kind, state = %state, "Operation state changed");
}

// =========================================================================
// Plan
// =========================================================================

/// One balance change and the entry that records it
#[derive(Debug, Clone)]
struct Leg {
    account_id: AccountId,
    delta: Money,
    category: Category,
    kind: EntryKind,
}

#[derive(Debug)]
struct Plan {
    group_id: GroupId,
    kind: OperationKind,
    legs: Vec<Leg>,
    reverses: Option<GroupId>,
    memo: Option<String>,
    occurred_at: Option<DateTime<Utc>>,
}

impl Plan {
    fn account_ids(&self) -> Vec<AccountId> {
        self.legs.iter().map(|leg| leg.account_id).collect()
    }
}

// =========================================================================
// Coordinator
// =========================================================================

struct Inner<A, L, I> {
    accounts: Arc<A>,
    ledger: Arc<L>,
    idempotency: Arc<I>,
    locks: AccountLocks,
    config: CoordinatorConfig,
}

/// Applies operations atomically across the account store and ledger log
pub struct Coordinator<A, L, I> {
    inner: Arc<Inner<A, L, I>>,
}

impl<A, L, I> Clone for Coordinator<A, L, I> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<A, L, I> Coordinator<A, L, I>
where
    A: AccountStore,
    L: LedgerLog,
    I: IdempotencyStore,
{
    pub fn new(accounts: Arc<A>, ledger: Arc<L>, idempotency: Arc<I>, config: CoordinatorConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                accounts,
                ledger,
                idempotency,
                locks: AccountLocks::new(),
                config,
            }),
        }
    }

    pub fn accounts(&self) -> &Arc<A> {
        &self.inner.accounts
    }

    pub fn ledger(&self) -> &Arc<L> {
        &self.inner.ledger
    }

    pub fn idempotency(&self) -> &Arc<I> {
        &self.inner.idempotency
    }

    pub fn locks(&self) -> &AccountLocks {
        &self.inner.locks
    }

    pub fn config(&self) -> CoordinatorConfig {
        self.inner.config
    }

    /// Read-only aggregator over the same stores
    pub fn summary(&self) -> SummaryAggregator<L, A> {
        SummaryAggregator::new(self.inner.ledger.clone(), self.inner.accounts.clone())
            .with_page_size(self.inner.config.page_size)
    }

    // =========================================================================
    // execute
    // =========================================================================

    /// Run one operation at most once per (caller, idempotency key)
    pub async fn execute(&self, request: OperationRequest) -> LedgerResult<OperationOutcome> {
        let kind = request.operation.kind();

        if let Err(err) = request.operation.validate() {
            tracing::debug!(kind = %kind, state = %OperationState::Rejected, error = %err, "Operation rejected");
            return Err(err);
        }

        let scope = IdempotencyScope::new(request.context.caller_id, request.idempotency_key.clone());
        let fingerprint = request.fingerprint()?;

        match self.inner.idempotency.begin(&scope, &fingerprint).await? {
            Claim::Completed(outcome) => {
                tracing::debug!(
                    group_id = %outcome.group_id,
                    key = %scope.key,
                    "Replaying committed outcome"
                );
                return Ok(outcome);
            }
            Claim::Started => {}
        }

        let inner = self.inner.clone();
        let task = tokio::spawn(async move {
            let result = inner.run(&request, &fingerprint).await;
            match &result {
                Ok(outcome) => inner.record_outcome(&scope, outcome).await,
                Err(err) => {
                    if let Err(release_err) = inner.idempotency.fail(&scope).await {
                        tracing::warn!(
                            key = %scope.key,
                            error = %release_err,
                            cause = %err,
                            "Failed to release idempotency key"
                        );
                    }
                }
            }
            result
        });

        task.await
            .map_err(|e| LedgerError::StorageFailure(format!("operation task failed: {e}")))?
    }

    // =========================================================================
    // Account lifecycle
    // =========================================================================

    /// Open an account for the calling user
    pub async fn open_account(
        &self,
        context: &OperationContext,
        new: NewAccount,
    ) -> LedgerResult<Account> {
        if new.owner_id != context.caller_id {
            return Err(LedgerError::InvalidRequest(
                "accounts can only be opened for the caller".to_string(),
            ));
        }

        let account = self.inner.accounts.create(new).await?;
        tracing::info!(
            account_id = %account.id,
            owner_id = %account.owner_id,
            currency = %account.currency,
            "Account opened"
        );
        Ok(account)
    }

    /// Fetch one of the caller's accounts.
    ///
    /// Reads under the account lock, so an operation in flight is either
    /// fully visible or not at all.
    pub async fn account(&self, context: &OperationContext, account_id: AccountId) -> LedgerResult<Account> {
        let _locks = self
            .inner
            .locks
            .acquire(&[account_id], self.inner.config.lock_timeout)
            .await?;
        self.inner.owned_account(context, account_id, false).await
    }

    /// Deactivate one of the caller's accounts; the balance must be zero
    pub async fn deactivate_account(
        &self,
        context: &OperationContext,
        account_id: AccountId,
    ) -> LedgerResult<Account> {
        self.inner.owned_account(context, account_id, true).await?;

        let _locks = self
            .inner
            .locks
            .acquire(&[account_id], self.inner.config.lock_timeout)
            .await?;
        let account = self.inner.accounts.deactivate(account_id).await?;

        tracing::info!(account_id = %account_id, "Account deactivated");
        Ok(account)
    }

    /// Recompute an account balance from the log and compare it to the stored one
    pub async fn reconcile(&self, account_id: AccountId) -> LedgerResult<ReconciliationReport> {
        let _locks = self
            .inner
            .locks
            .acquire(&[account_id], self.inner.config.lock_timeout)
            .await?;
        reconcile_account(
            self.inner.accounts.as_ref(),
            self.inner.ledger.as_ref(),
            account_id,
            self.inner.config.page_size,
        )
        .await
    }
}

impl<A, L, I> Inner<A, L, I>
where
    A: AccountStore,
    L: LedgerLog,
    I: IdempotencyStore,
{
    /// Account owned by the caller, otherwise `NotFound`.
    ///
    /// Other users' accounts are indistinguishable from missing ones.
    async fn owned_account(
        &self,
        context: &OperationContext,
        account_id: AccountId,
        require_active: bool,
    ) -> LedgerResult<Account> {
        let account = self.accounts.get(account_id).await?;
        if account.owner_id != context.caller_id || (require_active && !account.is_active()) {
            return Err(LedgerError::account_not_found(account_id));
        }
        Ok(account)
    }

    async fn record_outcome(&self, scope: &IdempotencyScope, outcome: &OperationOutcome) {
        for attempt in 0..COMPLETE_RETRIES {
            match self.idempotency.complete(scope, outcome).await {
                Ok(()) => return,
                Err(err) if attempt + 1 < COMPLETE_RETRIES => {
                    tracing::warn!(
                        key = %scope.key,
                        error = %err,
                        "Recording outcome failed, retrying (attempt {}/{})",
                        attempt + 1,
                        COMPLETE_RETRIES
                    );
                    tokio::time::sleep(Duration::from_millis(50 * (attempt as u64 + 1))).await;
                }
                Err(err) => {
                    tracing::error!(
                        key = %scope.key,
                        group_id = %outcome.group_id,
                        error = %err,
                        "Committed outcome could not be recorded"
                    );
                }
            }
        }
    }

    // =========================================================================
    // Operation body
    // =========================================================================

    /// Outcome of a request whose group is already in the ledger
    async fn committed_outcome(
        &self,
        request: &OperationRequest,
        fingerprint: &str,
    ) -> LedgerResult<Option<OperationOutcome>> {
        let receipt = self
            .ledger
            .find_receipt(request.context.caller_id, &request.idempotency_key, fingerprint)
            .await?;

        match receipt {
            Some(receipt) => {
                tracing::info!(
                    group_id = %receipt.group_id,
                    key = %receipt.key,
                    "Operation already committed, replaying receipt"
                );
                Ok(Some(serde_json::from_value(receipt.outcome)?))
            }
            None => Ok(None),
        }
    }

    async fn run(&self, request: &OperationRequest, fingerprint: &str) -> LedgerResult<OperationOutcome> {
        if let Some(outcome) = self.committed_outcome(request, fingerprint).await? {
            return Ok(outcome);
        }

        let plan = match &request.operation {
            Operation::Reversal { group_id } => self.plan_reversal(request, *group_id).await?,
            _ => self.plan_operation(request).await?,
        };
        transition(plan.group_id, plan.kind, OperationState::Validated);

        let _locks = match self
            .locks
            .acquire(&plan.account_ids(), self.config.lock_timeout)
            .await
        {
            Ok(locks) => locks,
            Err(err) => {
                transition(plan.group_id, plan.kind, OperationState::Rejected);
                return Err(err);
            }
        };
        transition(plan.group_id, plan.kind, OperationState::Locked);

        let result = self.run_locked(request, fingerprint, &plan).await;
        if result.is_err() {
            transition(plan.group_id, plan.kind, OperationState::Aborted);
        }
        result
        // locks released here, in reverse acquisition order
    }

    /// Resolve and validate the legs of an expense, income or transfer
    async fn plan_operation(&self, request: &OperationRequest) -> LedgerResult<Plan> {
        let context = &request.context;
        let legs = match &request.operation {
            Operation::Expense {
                account_id,
                amount,
                category,
            } => {
                self.owned_account(context, *account_id, true).await?;
                vec![Leg {
                    account_id: *account_id,
                    delta: amount.checked_neg()?,
                    category: category.clone(),
                    kind: EntryKind::Expense,
                }]
            }
            Operation::Income {
                account_id,
                amount,
                category,
            } => {
                self.owned_account(context, *account_id, true).await?;
                vec![Leg {
                    account_id: *account_id,
                    delta: *amount,
                    category: category.clone(),
                    kind: EntryKind::Income,
                }]
            }
            Operation::Transfer {
                from_account_id,
                to_account_id,
                amount,
                category,
            } => {
                let from = self.owned_account(context, *from_account_id, true).await?;
                let to = self.owned_account(context, *to_account_id, true).await?;
                if from.currency != to.currency {
                    return Err(LedgerError::CurrencyMismatch {
                        from: from.currency,
                        to: to.currency,
                    });
                }
                vec![
                    Leg {
                        account_id: from.id,
                        delta: amount.checked_neg()?,
                        category: category.clone(),
                        kind: EntryKind::TransferOut,
                    },
                    Leg {
                        account_id: to.id,
                        delta: *amount,
                        category: category.clone(),
                        kind: EntryKind::TransferIn,
                    },
                ]
            }
            Operation::Reversal { group_id } => {
                return Err(LedgerError::InvalidRequest(format!(
                    "reversal of {group_id} needs its own plan"
                )));
            }
        };

        Ok(Plan {
            group_id: GroupId::new(),
            kind: request.operation.kind(),
            legs,
            reverses: None,
            memo: request.memo.clone(),
            occurred_at: request.occurred_at,
        })
    }

    /// Build the inverse of a committed group
    async fn plan_reversal(&self, request: &OperationRequest, original: GroupId) -> LedgerResult<Plan> {
        let entries = self.ledger.query_by_group(original).await?;
        if entries.is_empty() {
            return Err(LedgerError::group_not_found(original));
        }

        for entry in &entries {
            let account = self.accounts.get(entry.account_id).await?;
            if account.owner_id != request.context.caller_id {
                return Err(LedgerError::group_not_found(original));
            }
        }
        if entries.iter().any(|e| e.kind == EntryKind::Reversal) {
            return Err(LedgerError::InvalidRequest(format!(
                "group {original} is itself a reversal"
            )));
        }

        let legs = entries
            .iter()
            .map(|entry| {
                Ok(Leg {
                    account_id: entry.account_id,
                    delta: entry.amount.checked_neg()?,
                    category: entry.category.clone(),
                    kind: EntryKind::Reversal,
                })
            })
            .collect::<LedgerResult<Vec<_>>>()?;

        Ok(Plan {
            group_id: GroupId::new(),
            kind: OperationKind::Reversal,
            legs,
            reverses: Some(original),
            memo: request.memo.clone(),
            occurred_at: request.occurred_at,
        })
    }

    async fn run_locked(
        &self,
        request: &OperationRequest,
        fingerprint: &str,
        plan: &Plan,
    ) -> LedgerResult<OperationOutcome> {
        // A takeover may race the original run; look again under the lock
        if let Some(outcome) = self.committed_outcome(request, fingerprint).await? {
            return Ok(outcome);
        }

        if let Some(original) = plan.reverses {
            if self.ledger.find_reversal(original).await?.is_some() {
                return Err(LedgerError::AlreadyReversed(original));
            }
        }

        // Re-read under the lock and check every leg before touching anything
        let mut projected: HashMap<AccountId, Account> = HashMap::new();
        let mut balances: Vec<AccountBalance> = Vec::with_capacity(plan.legs.len());
        for leg in &plan.legs {
            if !projected.contains_key(&leg.account_id) {
                let account = self
                    .owned_account(&request.context, leg.account_id, true)
                    .await?;
                projected.insert(leg.account_id, account);
            }
            if let Some(account) = projected.get_mut(&leg.account_id) {
                account.balance = account.check_delta(leg.delta)?;
                balances.retain(|b| b.account_id != leg.account_id);
                balances.push(AccountBalance {
                    account_id: leg.account_id,
                    balance: account.balance,
                });
            }
        }

        let committed_at = Utc::now();
        let occurred_at = plan.occurred_at.unwrap_or(committed_at);
        let entries: Vec<LedgerEntry> = plan
            .legs
            .iter()
            .map(|leg| LedgerEntry {
                id: EntryId::new(),
                account_id: leg.account_id,
                group_id: plan.group_id,
                amount: leg.delta,
                category: leg.category.clone(),
                kind: leg.kind,
                memo: plan.memo.clone(),
                reverses: plan.reverses,
                occurred_at,
                created_at: committed_at,
            })
            .collect();

        let outcome = OperationOutcome {
            group_id: plan.group_id,
            kind: plan.kind,
            entries,
            balances,
            committed_at,
        };
        let posting = Posting {
            entries: outcome.entries.clone(),
            balances: outcome
                .balances
                .iter()
                .map(|b| (b.account_id, b.balance))
                .collect(),
            receipt: Some(OperationReceipt {
                caller_id: request.context.caller_id,
                key: request.idempotency_key.clone(),
                fingerprint: fingerprint.to_string(),
                group_id: plan.group_id,
                outcome: serde_json::to_value(&outcome)?,
            }),
        };

        self.ledger.post(self.accounts.as_ref(), &posting).await?;
        transition(plan.group_id, plan.kind, OperationState::Applied);
        transition(plan.group_id, plan.kind, OperationState::Logged);

        transition(plan.group_id, plan.kind, OperationState::Committed);
        tracing::info!(
            group_id = %plan.group_id,
            kind = %plan.kind,
            legs = outcome.entries.len(),
            caller_id = %request.context.caller_id,
            correlation_id = ?request.context.correlation_id,
            "Operation committed"
        );

        Ok(outcome)
    }
}
