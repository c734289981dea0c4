//! Operation definitions
//!
//! An operation is one logical unit of work: it produces one ledger entry
//! (expense, income), two (transfer) or one per original leg (reversal).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::domain::{AccountId, Category, GroupId, LedgerEntry, Money, OperationContext};
use crate::error::{LedgerError, LedgerResult};

// =========================================================================
// Operation
// =========================================================================

/// What the caller wants to happen
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Operation {
    Expense {
        account_id: AccountId,
        amount: Money,
        category: Category,
    },
    Income {
        account_id: AccountId,
        amount: Money,
        category: Category,
    },
    Transfer {
        from_account_id: AccountId,
        to_account_id: AccountId,
        amount: Money,
        category: Category,
    },
    /// Undo a committed group by writing its inverse
    Reversal { group_id: GroupId },
}

impl Operation {
    pub fn kind(&self) -> OperationKind {
        match self {
            Operation::Expense { .. } => OperationKind::Expense,
            Operation::Income { .. } => OperationKind::Income,
            Operation::Transfer { .. } => OperationKind::Transfer,
            Operation::Reversal { .. } => OperationKind::Reversal,
        }
    }

    /// Checks that need no stored state
    pub fn validate(&self) -> LedgerResult<()> {
        match self {
            Operation::Expense { amount, .. } | Operation::Income { amount, .. } => {
                ensure_positive(*amount)
            }
            Operation::Transfer {
                from_account_id,
                to_account_id,
                amount,
                ..
            } => {
                ensure_positive(*amount)?;
                if from_account_id == to_account_id {
                    return Err(LedgerError::InvalidAmount(
                        "cannot transfer to the same account".to_string(),
                    ));
                }
                Ok(())
            }
            Operation::Reversal { .. } => Ok(()),
        }
    }
}

fn ensure_positive(amount: Money) -> LedgerResult<()> {
    if !amount.is_positive() {
        return Err(LedgerError::InvalidAmount(format!(
            "amount must be positive, got {amount}"
        )));
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    Expense,
    Income,
    Transfer,
    Reversal,
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            OperationKind::Expense => "expense",
            OperationKind::Income => "income",
            OperationKind::Transfer => "transfer",
            OperationKind::Reversal => "reversal",
        };
        f.write_str(name)
    }
}

// =========================================================================
// OperationRequest
// =========================================================================

/// An operation plus everything the coordinator needs to run it once
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperationRequest {
    pub context: OperationContext,
    /// Caller-supplied token; retries with the same key return the first outcome
    pub idempotency_key: String,
    pub operation: Operation,
    /// Defaults to the commit time
    pub occurred_at: Option<DateTime<Utc>>,
    pub memo: Option<String>,
}

impl OperationRequest {
    pub fn new(
        context: OperationContext,
        idempotency_key: impl Into<String>,
        operation: Operation,
    ) -> Self {
        Self {
            context,
            idempotency_key: idempotency_key.into(),
            operation,
            occurred_at: None,
            memo: None,
        }
    }

    pub fn expense(
        context: OperationContext,
        idempotency_key: impl Into<String>,
        account_id: AccountId,
        amount: Money,
        category: Category,
    ) -> Self {
        Self::new(
            context,
            idempotency_key,
            Operation::Expense {
                account_id,
                amount,
                category,
            },
        )
    }

    pub fn income(
        context: OperationContext,
        idempotency_key: impl Into<String>,
        account_id: AccountId,
        amount: Money,
        category: Category,
    ) -> Self {
        Self::new(
            context,
            idempotency_key,
            Operation::Income {
                account_id,
                amount,
                category,
            },
        )
    }

    pub fn transfer(
        context: OperationContext,
        idempotency_key: impl Into<String>,
        from_account_id: AccountId,
        to_account_id: AccountId,
        amount: Money,
        category: Category,
    ) -> Self {
        Self::new(
            context,
            idempotency_key,
            Operation::Transfer {
                from_account_id,
                to_account_id,
                amount,
                category,
            },
        )
    }

    pub fn reversal(
        context: OperationContext,
        idempotency_key: impl Into<String>,
        group_id: GroupId,
    ) -> Self {
        Self::new(context, idempotency_key, Operation::Reversal { group_id })
    }

    pub fn with_occurred_at(mut self, occurred_at: DateTime<Utc>) -> Self {
        self.occurred_at = Some(occurred_at);
        self
    }

    pub fn with_memo(mut self, memo: impl Into<String>) -> Self {
        self.memo = Some(memo.into());
        self
    }

    /// Digest of everything that defines the operation's effect.
    ///
    /// Two requests under one idempotency key must share a fingerprint.
    pub fn fingerprint(&self) -> LedgerResult<String> {
        #[derive(Serialize)]
        struct Canonical<'a> {
            operation: &'a Operation,
            occurred_at: Option<DateTime<Utc>>,
            memo: Option<&'a str>,
        }

        crate::idempotency::fingerprint(&Canonical {
            operation: &self.operation,
            occurred_at: self.occurred_at,
            memo: self.memo.as_deref(),
        })
    }
}

// =========================================================================
// OperationOutcome
// =========================================================================

/// Balance of one touched account right after commit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountBalance {
    pub account_id: AccountId,
    pub balance: Money,
}

/// Result of a committed operation, replayed verbatim on idempotent retries
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationOutcome {
    pub group_id: GroupId,
    pub kind: OperationKind,
    pub entries: Vec<LedgerEntry>,
    pub balances: Vec<AccountBalance>,
    pub committed_at: DateTime<Utc>,
}

impl OperationOutcome {
    pub fn balance_of(&self, account_id: AccountId) -> Option<Money> {
        self.balances
            .iter()
            .find(|b| b.account_id == account_id)
            .map(|b| b.balance)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::OwnerId;

    fn food() -> Category {
        Category::new("food").unwrap()
    }

    #[test]
    fn test_validate_rejects_non_positive_amounts() {
        let account_id = AccountId::new();
        for amount in [Money::ZERO, Money::from_minor(-100)] {
            let op = Operation::Expense {
                account_id,
                amount,
                category: food(),
            };
            assert!(matches!(op.validate(), Err(LedgerError::InvalidAmount(_))));
        }
    }

    #[test]
    fn test_validate_rejects_self_transfer() {
        let account_id = AccountId::new();
        let op = Operation::Transfer {
            from_account_id: account_id,
            to_account_id: account_id,
            amount: Money::from_minor(100),
            category: food(),
        };
        assert!(matches!(op.validate(), Err(LedgerError::InvalidAmount(_))));
    }

    #[test]
    fn test_fingerprint_tracks_operation_content() {
        let context = OperationContext::new(OwnerId::new());
        let account_id = AccountId::new();
        let a = OperationRequest::expense(
            context.clone(),
            "k1",
            account_id,
            Money::from_minor(3000),
            food(),
        );
        let same = OperationRequest::expense(
            context.clone(),
            "k2",
            account_id,
            Money::from_minor(3000),
            food(),
        );
        let different = OperationRequest::expense(
            context,
            "k1",
            account_id,
            Money::from_minor(3001),
            food(),
        );

        // The key itself is not part of the fingerprint
        assert_eq!(a.fingerprint().unwrap(), same.fingerprint().unwrap());
        assert_ne!(a.fingerprint().unwrap(), different.fingerprint().unwrap());
        assert_ne!(
            a.fingerprint().unwrap(),
            a.clone().with_memo("lunch").fingerprint().unwrap()
        );
    }

    #[test]
    fn test_operation_serializes_with_type_tag() {
        let op = Operation::Reversal {
            group_id: GroupId::new(),
        };
        let json = serde_json::to_value(&op).unwrap();
        assert_eq!(json["type"], "reversal");
    }
}
