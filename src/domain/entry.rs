//! Ledger entries
//!
//! Immutable, signed records of every balance change. Positive amounts are
//! credits, negative amounts are debits. Entries are never edited; a
//! correction is a new group of reversing entries.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::{AccountId, EntryId, GroupId, Money};
use crate::error::{LedgerError, LedgerResult};

/// Maximum length of a category tag
pub const MAX_CATEGORY_LEN: usize = 64;

/// Category tag attached to every entry ("food", "salary", ...)
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Category(String);

impl Category {
    pub fn new(name: impl Into<String>) -> LedgerResult<Self> {
        let name = name.into();
        let trimmed = name.trim();
        if trimmed.is_empty() || trimmed.chars().count() > MAX_CATEGORY_LEN {
            return Err(LedgerError::InvalidRequest(format!(
                "category must be 1-{MAX_CATEGORY_LEN} characters"
            )));
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for Category {
    type Error = LedgerError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Category::new(value)
    }
}

impl From<Category> for String {
    fn from(category: Category) -> Self {
        category.0
    }
}

/// What produced an entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryKind {
    Expense,
    Income,
    TransferOut,
    TransferIn,
    Reversal,
}

impl EntryKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryKind::Expense => "expense",
            EntryKind::Income => "income",
            EntryKind::TransferOut => "transfer_out",
            EntryKind::TransferIn => "transfer_in",
            EntryKind::Reversal => "reversal",
        }
    }
}

impl fmt::Display for EntryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntryKind {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "expense" => Ok(EntryKind::Expense),
            "income" => Ok(EntryKind::Income),
            "transfer_out" => Ok(EntryKind::TransferOut),
            "transfer_in" => Ok(EntryKind::TransferIn),
            "reversal" => Ok(EntryKind::Reversal),
            other => Err(LedgerError::StorageFailure(format!(
                "unknown entry kind: {other}"
            ))),
        }
    }
}

/// A committed ledger entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub id: EntryId,
    pub account_id: AccountId,
    pub group_id: GroupId,
    /// Signed: positive credits, negative debits
    pub amount: Money,
    pub category: Category,
    pub kind: EntryKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub memo: Option<String>,
    /// Group this entry reverses, for correction entries
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reverses: Option<GroupId>,
    pub occurred_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl LedgerEntry {
    pub fn is_credit(&self) -> bool {
        self.amount.is_positive()
    }

    pub fn is_debit(&self) -> bool {
        self.amount.is_negative()
    }

    /// Ordering key used by every ledger scan
    pub fn sort_key(&self) -> (DateTime<Utc>, EntryId) {
        (self.occurred_at, self.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_category_trims_and_validates() {
        assert_eq!(Category::new("  food ").unwrap().as_str(), "food");
        assert!(Category::new("").is_err());
        assert!(Category::new("c".repeat(65)).is_err());
    }

    #[test]
    fn test_entry_kind_round_trips_through_text() {
        for kind in [
            EntryKind::Expense,
            EntryKind::Income,
            EntryKind::TransferOut,
            EntryKind::TransferIn,
            EntryKind::Reversal,
        ] {
            assert_eq!(kind.as_str().parse::<EntryKind>().unwrap(), kind);
        }
        assert!("refund".parse::<EntryKind>().is_err());
    }

    #[test]
    fn test_entry_direction() {
        let now = Utc::now();
        let entry = LedgerEntry {
            id: EntryId::new(),
            account_id: AccountId::new(),
            group_id: GroupId::new(),
            amount: "-30.00".parse().unwrap(),
            category: Category::new("food").unwrap(),
            kind: EntryKind::Expense,
            memo: None,
            reverses: None,
            occurred_at: now,
            created_at: now,
        };

        assert!(entry.is_debit());
        assert!(!entry.is_credit());
        assert_eq!(entry.sort_key(), (now, entry.id));
    }
}
