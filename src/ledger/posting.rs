//! Posting: the balance changes and entries of one operation group
//!
//! A posting carries everything that must become durable together: the
//! entries, the balance each touched account ends at, and the receipt that
//! ties the group to the caller's idempotency key. Backends that can share a
//! transaction with the account store post in one step. Everything else
//! falls back to [`post_split`], which applies the deltas first and undoes
//! them if the append fails.

use serde::{Deserialize, Serialize};

use super::LedgerLog;
use crate::accounts::AccountStore;
use crate::domain::{AccountId, GroupId, LedgerEntry, Money, OwnerId};
use crate::error::{LedgerError, LedgerResult};

/// Durable record of which (caller, key, request) produced a committed group.
///
/// Written atomically with the group's entries, so a committed operation can
/// be found again even when its idempotency record was never completed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationReceipt {
    pub caller_id: OwnerId,
    pub key: String,
    pub fingerprint: String,
    pub group_id: GroupId,
    /// Serialized outcome returned to the caller
    pub outcome: serde_json::Value,
}

#[derive(Debug, Clone)]
pub struct Posting {
    pub entries: Vec<LedgerEntry>,
    /// Balance each touched account must end at
    pub balances: Vec<(AccountId, Money)>,
    pub receipt: Option<OperationReceipt>,
}

impl Posting {
    pub fn group_id(&self) -> Option<GroupId> {
        self.entries.first().map(|e| e.group_id)
    }

    fn expected_balance(&self, account_id: AccountId) -> Option<Money> {
        self.balances
            .iter()
            .find(|(id, _)| *id == account_id)
            .map(|(_, balance)| *balance)
    }

    /// Fail if an account ended somewhere other than where the plan put it
    pub(crate) fn verify(&self, actual: &[(AccountId, Money)]) -> LedgerResult<()> {
        for (account_id, balance) in actual {
            if let Some(expected) = self.expected_balance(*account_id) {
                if expected != *balance {
                    return Err(LedgerError::StorageFailure(format!(
                        "balance of account {account_id} moved concurrently: expected {expected}, found {balance}"
                    )));
                }
            }
        }
        Ok(())
    }
}

/// Last reported balance per account, in first-touch order
pub(crate) fn record_balance(balances: &mut Vec<(AccountId, Money)>, account_id: AccountId, balance: Money) {
    match balances.iter_mut().find(|(id, _)| *id == account_id) {
        Some(slot) => slot.1 = balance,
        None => balances.push((account_id, balance)),
    }
}

/// Apply every delta through the account store, then append.
///
/// Applied deltas are undone in reverse order when a later delta, the
/// balance check or the append fails.
pub async fn post_split<A, L>(accounts: &A, ledger: &L, posting: &Posting) -> LedgerResult<()>
where
    A: AccountStore,
    L: LedgerLog + ?Sized,
{
    let mut applied: Vec<&LedgerEntry> = Vec::with_capacity(posting.entries.len());
    let mut balances: Vec<(AccountId, Money)> = Vec::with_capacity(posting.entries.len());

    for entry in &posting.entries {
        match accounts.apply_delta(entry.account_id, entry.amount).await {
            Ok(balance) => {
                applied.push(entry);
                record_balance(&mut balances, entry.account_id, balance);
            }
            Err(err) => {
                compensate(accounts, &applied, &err).await;
                return Err(err);
            }
        }
    }

    let result = match posting.verify(&balances) {
        Ok(()) => {
            ledger
                .append_with_receipt(&posting.entries, posting.receipt.as_ref())
                .await
        }
        Err(err) => Err(err),
    };

    if let Err(err) = result {
        compensate(accounts, &applied, &err).await;
        return Err(err);
    }
    Ok(())
}

async fn compensate<A: AccountStore>(accounts: &A, applied: &[&LedgerEntry], cause: &LedgerError) {
    let Some(first) = applied.first() else {
        return;
    };

    tracing::warn!(
        group_id = %first.group_id,
        legs = applied.len(),
        cause = %cause,
        "Compensating applied legs"
    );

    for entry in applied.iter().rev() {
        let undo = match entry.amount.checked_neg() {
            Ok(undo) => undo,
            Err(err) => {
                tracing::error!(account_id = %entry.account_id, error = %err, "Compensation overflow");
                continue;
            }
        };
        if let Err(err) = accounts.apply_delta(entry.account_id, undo).await {
            tracing::error!(
                group_id = %entry.group_id,
                account_id = %entry.account_id,
                delta = %undo,
                error = %err,
                "Compensation failed, account needs reconciliation"
            );
        }
    }
}
