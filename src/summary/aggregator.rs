//! Summary Aggregator
//!
//! Time-windowed totals streamed from the ledger log. Pure reads: no
//! account locks are taken and the write path is never blocked.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use chrono::{Datelike, NaiveDate};
use serde::{Serialize, Serializer};

use crate::accounts::AccountStore;
use crate::domain::{AccountId, Category, EntryKind, LedgerEntry, Money, OwnerId};
use crate::error::LedgerResult;
use crate::ledger::{AccountScope, EntryQuery, EntryStream, LedgerLog, TimeRange, DEFAULT_PAGE_SIZE};

/// Grouping dimension of a summary
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GroupBy {
    Category,
    Account,
    /// Calendar day, UTC
    Day,
    /// Calendar month, UTC
    Month,
    Kind,
}

/// One bucket of a summary
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum GroupKey {
    Category(Category),
    Account(AccountId),
    Day(NaiveDate),
    Month { year: i32, month: u32 },
    Kind(EntryKind),
}

impl GroupKey {
    pub fn for_entry(entry: &LedgerEntry, group_by: GroupBy) -> Self {
        match group_by {
            GroupBy::Category => GroupKey::Category(entry.category.clone()),
            GroupBy::Account => GroupKey::Account(entry.account_id),
            GroupBy::Day => GroupKey::Day(entry.occurred_at.date_naive()),
            GroupBy::Month => GroupKey::Month {
                year: entry.occurred_at.year(),
                month: entry.occurred_at.month(),
            },
            GroupBy::Kind => GroupKey::Kind(entry.kind),
        }
    }

    /// Shorthand for category lookups
    pub fn category(name: &str) -> LedgerResult<Self> {
        Ok(GroupKey::Category(Category::new(name)?))
    }
}

impl fmt::Display for GroupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GroupKey::Category(category) => write!(f, "{category}"),
            GroupKey::Account(id) => write!(f, "{id}"),
            GroupKey::Day(date) => write!(f, "{}", date.format("%Y-%m-%d")),
            GroupKey::Month { year, month } => write!(f, "{year:04}-{month:02}"),
            GroupKey::Kind(kind) => write!(f, "{kind}"),
        }
    }
}

// Keys are serialized as their label so a summary maps to a JSON object
impl Serialize for GroupKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Totals of one bucket. Debits are a non-negative magnitude.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct GroupTotals {
    pub total_credits: Money,
    pub total_debits: Money,
    /// `total_credits - total_debits`
    pub net: Money,
}

impl GroupTotals {
    pub fn record(&mut self, amount: Money) -> LedgerResult<()> {
        if amount.is_negative() {
            self.total_debits = self.total_debits.checked_sub(amount)?;
        } else {
            self.total_credits = self.total_credits.checked_add(amount)?;
        }
        self.net = self.net.checked_add(amount)?;
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Summary {
    pub groups: BTreeMap<GroupKey, GroupTotals>,
    pub overall: GroupTotals,
}

impl Summary {
    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    pub fn get(&self, key: &GroupKey) -> Option<&GroupTotals> {
        self.groups.get(key)
    }

    fn record(&mut self, entry: &LedgerEntry, group_by: GroupBy) -> LedgerResult<()> {
        self.groups
            .entry(GroupKey::for_entry(entry, group_by))
            .or_default()
            .record(entry.amount)?;
        self.overall.record(entry.amount)
    }
}

/// Read-only summaries over the ledger log
pub struct SummaryAggregator<L, A> {
    ledger: Arc<L>,
    accounts: Arc<A>,
    page_size: usize,
}

impl<L, A> Clone for SummaryAggregator<L, A> {
    fn clone(&self) -> Self {
        Self {
            ledger: self.ledger.clone(),
            accounts: self.accounts.clone(),
            page_size: self.page_size,
        }
    }
}

impl<L: LedgerLog, A: AccountStore> SummaryAggregator<L, A> {
    pub fn new(ledger: Arc<L>, accounts: Arc<A>) -> Self {
        Self {
            ledger,
            accounts,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size;
        self
    }

    /// Totals per group for every entry in `scope` within `range`.
    ///
    /// An empty range yields an empty summary, not an error.
    pub async fn summarize(
        &self,
        scope: AccountScope,
        range: TimeRange,
        group_by: GroupBy,
    ) -> LedgerResult<Summary> {
        let mut stream = EntryStream::new(
            self.ledger.as_ref(),
            EntryQuery::new(scope, range),
            self.page_size,
        );

        let mut summary = Summary::default();
        let mut scanned = 0usize;
        while let Some(batch) = stream.next_batch().await? {
            scanned += batch.len();
            for entry in &batch {
                summary.record(entry, group_by)?;
            }
        }

        tracing::debug!(
            scanned = scanned,
            groups = summary.groups.len(),
            group_by = ?group_by,
            "Summary computed"
        );
        Ok(summary)
    }

    /// Summary across every account of one owner
    pub async fn summarize_owner(
        &self,
        owner_id: OwnerId,
        range: TimeRange,
        group_by: GroupBy,
    ) -> LedgerResult<Summary> {
        let accounts = self.accounts.list_by_owner(owner_id).await?;
        if accounts.is_empty() {
            return Ok(Summary::default());
        }

        let ids = accounts.iter().map(|a| a.id).collect();
        self.summarize(AccountScope::Accounts(ids), range, group_by)
            .await
    }
}
