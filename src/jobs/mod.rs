//! Scheduled Jobs
//!
//! Background jobs for periodic maintenance: idempotency record upkeep,
//! pruning of idle lock slots and a reconciliation sweep that compares
//! every stored balance with its ledger entries.

use chrono::{DateTime, Utc};
use std::time::Duration;
use tokio::time::interval;

use crate::accounts::AccountStore;
use crate::coordinator::{AccountLocks, Coordinator};
use crate::error::{LedgerError, LedgerResult};
use crate::idempotency::IdempotencyStore;
use crate::ledger::LedgerLog;
use crate::summary::ReconciliationReport;

// =========================================================================
// Idempotency maintenance
// =========================================================================

/// Release claims stuck in processing so their keys can be retried
pub async fn reset_stale_claims<I: IdempotencyStore>(store: &I) -> LedgerResult<u64> {
    let rows_affected = store.reset_stale().await?;

    if rows_affected > 0 {
        tracing::warn!(
            rows_affected = rows_affected,
            "Reset stale processing idempotency keys"
        );
    }

    Ok(rows_affected)
}

/// Delete idempotency records past their retention window
pub async fn purge_expired_claims<I: IdempotencyStore>(store: &I) -> LedgerResult<u64> {
    let rows_deleted = store.purge_expired().await?;

    if rows_deleted > 0 {
        tracing::info!(rows_deleted = rows_deleted, "Deleted expired idempotency keys");
    }

    Ok(rows_deleted)
}

// =========================================================================
// Lock registry maintenance
// =========================================================================

/// Drop lock slots of accounts nobody is operating on
pub fn prune_idle_locks(locks: &AccountLocks) -> usize {
    let pruned = locks.prune();
    if pruned > 0 {
        tracing::debug!(pruned = pruned, "Pruned idle account lock slots");
    }
    pruned
}

// =========================================================================
// Reconciliation sweep
// =========================================================================

/// Result of reconciling every active account
#[derive(Debug, Clone, Default)]
pub struct SweepResult {
    pub checked: u64,
    /// Accounts skipped because their lock was busy
    pub skipped: u64,
    pub drifted: Vec<ReconciliationReport>,
}

/// Reconcile every active account, one lock at a time
pub async fn reconciliation_sweep<A, L, I>(coordinator: &Coordinator<A, L, I>) -> LedgerResult<SweepResult>
where
    A: AccountStore,
    L: LedgerLog,
    I: IdempotencyStore,
{
    let accounts = coordinator.accounts().list_all().await?;
    let mut result = SweepResult::default();

    for account in accounts.iter().filter(|a| a.is_active()) {
        match coordinator.reconcile(account.id).await {
            Ok(report) => {
                result.checked += 1;
                if !report.is_consistent() {
                    result.drifted.push(report);
                }
            }
            Err(LedgerError::LockTimeout { account_id, .. }) => {
                tracing::debug!(account_id = %account_id, "Account busy, skipped reconciliation");
                result.skipped += 1;
            }
            Err(e) => return Err(e),
        }
    }

    if result.drifted.is_empty() {
        tracing::info!(checked = result.checked, skipped = result.skipped, "Reconciliation sweep clean");
    } else {
        tracing::error!(
            checked = result.checked,
            drifted = result.drifted.len(),
            "Reconciliation sweep found drift"
        );
    }

    Ok(result)
}

// =========================================================================
// Maintenance Scheduler
// =========================================================================

/// Configuration for the maintenance scheduler
#[derive(Debug, Clone)]
pub struct MaintenanceConfig {
    /// Interval for idempotency and lock upkeep (default: 1 minute)
    pub maintenance_interval: Duration,
    /// Interval for the reconciliation sweep (default: 1 hour)
    pub reconciliation_interval: Duration,
}

impl Default for MaintenanceConfig {
    fn default() -> Self {
        Self {
            maintenance_interval: Duration::from_secs(60),
            reconciliation_interval: Duration::from_secs(3600),
        }
    }
}

/// Runs periodic maintenance against one coordinator's stores
pub struct MaintenanceScheduler<A, L, I> {
    coordinator: Coordinator<A, L, I>,
    config: MaintenanceConfig,
}

impl<A, L, I> MaintenanceScheduler<A, L, I>
where
    A: AccountStore,
    L: LedgerLog,
    I: IdempotencyStore,
{
    pub fn new(coordinator: Coordinator<A, L, I>) -> Self {
        Self {
            coordinator,
            config: MaintenanceConfig::default(),
        }
    }

    /// Create with custom configuration
    pub fn with_config(coordinator: Coordinator<A, L, I>, config: MaintenanceConfig) -> Self {
        Self { coordinator, config }
    }

    /// Start the scheduler in the background.
    /// Returns a handle that can be used to abort it.
    pub fn start(self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            self.run().await;
        })
    }

    async fn run(&self) {
        tracing::info!(
            maintenance_interval_secs = self.config.maintenance_interval.as_secs(),
            reconciliation_interval_secs = self.config.reconciliation_interval.as_secs(),
            "Maintenance scheduler started"
        );

        let mut maintenance = interval(self.config.maintenance_interval);
        let mut reconciliation = interval(self.config.reconciliation_interval);

        loop {
            tokio::select! {
                _ = maintenance.tick() => {
                    let idempotency = self.coordinator.idempotency().as_ref();
                    if let Err(e) = reset_stale_claims(idempotency).await {
                        tracing::error!(error = %e, "Idempotency key reset failed");
                    }
                    if let Err(e) = purge_expired_claims(idempotency).await {
                        tracing::error!(error = %e, "Idempotency key deletion failed");
                    }
                    prune_idle_locks(self.coordinator.locks());
                }
                _ = reconciliation.tick() => {
                    if let Err(e) = reconciliation_sweep(&self.coordinator).await {
                        tracing::error!(error = %e, "Reconciliation sweep failed");
                    }
                }
            }
        }
    }

    /// Run all maintenance jobs once (for manual trigger or testing)
    pub async fn run_all_once(&self) -> MaintenanceReport {
        let mut report = MaintenanceReport::default();
        let idempotency = self.coordinator.idempotency().as_ref();

        match reset_stale_claims(idempotency).await {
            Ok(count) => report.idempotency_keys_reset = count,
            Err(e) => report.errors.push(format!("Idempotency reset: {e}")),
        }

        match purge_expired_claims(idempotency).await {
            Ok(count) => report.idempotency_keys_deleted = count,
            Err(e) => report.errors.push(format!("Idempotency deletion: {e}")),
        }

        report.lock_slots_pruned = prune_idle_locks(self.coordinator.locks());

        match reconciliation_sweep(&self.coordinator).await {
            Ok(sweep) => {
                report.accounts_reconciled = sweep.checked;
                report.drifted = sweep.drifted;
            }
            Err(e) => report.errors.push(format!("Reconciliation: {e}")),
        }

        report.completed_at = Utc::now();
        report
    }
}

/// Report from running maintenance jobs
#[derive(Debug, Clone, Default)]
pub struct MaintenanceReport {
    pub idempotency_keys_reset: u64,
    pub idempotency_keys_deleted: u64,
    pub lock_slots_pruned: usize,
    pub accounts_reconciled: u64,
    pub drifted: Vec<ReconciliationReport>,
    pub errors: Vec<String>,
    pub completed_at: DateTime<Utc>,
}

impl MaintenanceReport {
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty() && self.drifted.is_empty()
    }
}

// =========================================================================
// Tests
// =========================================================================
