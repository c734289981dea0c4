//! Balance reconciliation
//!
//! Recomputes an account balance from its ledger entries and compares it to
//! the stored running balance. Run under the account lock so no operation
//! can commit in between the two reads.

use serde::Serialize;

use crate::accounts::AccountStore;
use crate::domain::{AccountId, Money};
use crate::error::LedgerResult;
use crate::ledger::{AccountScope, EntryQuery, EntryStream, LedgerLog, TimeRange};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ReconciliationReport {
    pub account_id: AccountId,
    /// Balance held by the account store
    pub stored: Money,
    /// Sum of the account's ledger entries
    pub computed: Money,
    /// `stored - computed`
    pub drift: Money,
    pub entry_count: u64,
}

impl ReconciliationReport {
    pub fn is_consistent(&self) -> bool {
        self.drift.is_zero()
    }
}

/// Compare stored and recomputed balance of one account.
///
/// The caller is responsible for holding the account lock.
pub async fn reconcile_account<A: AccountStore, L: LedgerLog>(
    accounts: &A,
    ledger: &L,
    account_id: AccountId,
    page_size: usize,
) -> LedgerResult<ReconciliationReport> {
    let account = accounts.get(account_id).await?;

    let query = EntryQuery::new(AccountScope::Account(account_id), TimeRange::unbounded());
    let mut stream = EntryStream::new(ledger, query, page_size);

    let mut computed = Money::ZERO;
    let mut entry_count = 0u64;
    while let Some(batch) = stream.next_batch().await? {
        for entry in &batch {
            computed = computed.checked_add(entry.amount)?;
        }
        entry_count += batch.len() as u64;
    }

    let report = ReconciliationReport {
        account_id,
        stored: account.balance,
        computed,
        drift: account.balance.checked_sub(computed)?,
        entry_count,
    };

    if !report.is_consistent() {
        tracing::error!(
            account_id = %account_id,
            stored = %report.stored,
            computed = %report.computed,
            drift = %report.drift,
            "Balance drift detected"
        );
    }
    Ok(report)
}
