//! Ledger queries
//!
//! Scopes, time ranges and the lazy, restartable entry scan.

use std::collections::BTreeSet;

use chrono::{DateTime, Datelike, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use super::LedgerLog;
use crate::domain::{AccountId, EntryId, LedgerEntry};
use crate::error::{LedgerError, LedgerResult};

/// Entries fetched per page by [`EntryStream`] unless configured otherwise
pub const DEFAULT_PAGE_SIZE: usize = 500;

/// Which accounts a query covers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AccountScope {
    Account(AccountId),
    Accounts(BTreeSet<AccountId>),
    All,
}

impl AccountScope {
    pub fn matches(&self, account_id: AccountId) -> bool {
        match self {
            AccountScope::Account(id) => *id == account_id,
            AccountScope::Accounts(ids) => ids.contains(&account_id),
            AccountScope::All => true,
        }
    }

    /// Account ids to filter on, `None` meaning no filter
    pub fn account_ids(&self) -> Option<Vec<AccountId>> {
        match self {
            AccountScope::Account(id) => Some(vec![*id]),
            AccountScope::Accounts(ids) => Some(ids.iter().copied().collect()),
            AccountScope::All => None,
        }
    }
}

/// Half-open time window `[start, end)`; a missing bound is unbounded
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
}

impl TimeRange {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self {
            start: Some(start),
            end: Some(end),
        }
    }

    pub fn unbounded() -> Self {
        Self::default()
    }

    /// One calendar month (UTC)
    pub fn month(year: i32, month: u32) -> LedgerResult<Self> {
        let first = NaiveDate::from_ymd_opt(year, month, 1)
            .ok_or_else(|| LedgerError::InvalidRequest(format!("invalid month {year}-{month}")))?;
        Ok(Self::new(start_of(first), start_of(next_month(first)?)))
    }

    /// One calendar day (UTC)
    pub fn day(date: NaiveDate) -> Self {
        Self::new(start_of(date), start_of(date) + Duration::days(1))
    }

    /// Build a range from `YYYY-MM` or `YYYY-MM-DD` bounds.
    ///
    /// The start is the first instant of its month/day; the end covers the
    /// whole of its month/day.
    pub fn parse_bounds(start: Option<&str>, end: Option<&str>) -> LedgerResult<Self> {
        let start = start
            .map(|s| parse_period(s).map(|(first, _)| start_of(first)))
            .transpose()?;
        let end = end
            .map(|s| parse_period(s).map(|(_, after)| start_of(after)))
            .transpose()?;
        Ok(Self { start, end })
    }

    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        self.start.map_or(true, |start| at >= start) && self.end.map_or(true, |end| at < end)
    }
}

fn start_of(date: NaiveDate) -> DateTime<Utc> {
    date.and_hms_opt(0, 0, 0)
        .unwrap_or_default()
        .and_utc()
}

fn next_month(first: NaiveDate) -> LedgerResult<NaiveDate> {
    let (year, month) = if first.month() == 12 {
        (first.year() + 1, 1)
    } else {
        (first.year(), first.month() + 1)
    };
    NaiveDate::from_ymd_opt(year, month, 1)
        .ok_or_else(|| LedgerError::InvalidRequest(format!("month out of range: {first}")))
}

/// Parse `YYYY-MM` or `YYYY-MM-DD` into (first day, first day after the period)
fn parse_period(input: &str) -> LedgerResult<(NaiveDate, NaiveDate)> {
    let invalid = || LedgerError::InvalidRequest(format!("invalid date: {input:?}"));
    let parts: Vec<&str> = input.trim().split('-').collect();

    let number = |s: &str| s.parse::<u32>().map_err(|_| invalid());
    match parts.as_slice() {
        [year, month] => {
            let year = year.parse::<i32>().map_err(|_| invalid())?;
            let first = NaiveDate::from_ymd_opt(year, number(month)?, 1).ok_or_else(invalid)?;
            Ok((first, next_month(first)?))
        }
        [year, month, day] => {
            let year = year.parse::<i32>().map_err(|_| invalid())?;
            let date =
                NaiveDate::from_ymd_opt(year, number(month)?, number(day)?).ok_or_else(invalid)?;
            let after = date.succ_opt().ok_or_else(invalid)?;
            Ok((date, after))
        }
        _ => Err(invalid()),
    }
}

/// What a ledger scan selects
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryQuery {
    pub scope: AccountScope,
    pub range: TimeRange,
}

impl EntryQuery {
    pub fn new(scope: AccountScope, range: TimeRange) -> Self {
        Self { scope, range }
    }

    pub fn matches(&self, entry: &LedgerEntry) -> bool {
        self.scope.matches(entry.account_id) && self.range.contains(entry.occurred_at)
    }
}

/// Keyset position inside a scan
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryCursor {
    pub occurred_at: DateTime<Utc>,
    pub id: EntryId,
}

impl EntryCursor {
    pub fn after(entry: &LedgerEntry) -> Self {
        Self {
            occurred_at: entry.occurred_at,
            id: entry.id,
        }
    }
}

/// Lazy, finite, restartable scan over the ledger.
///
/// Pages are fetched on demand. The first fetch pins the log's high-water
/// mark, so entries committed while the scan runs are never mixed in.
pub struct EntryStream<'a, L> {
    log: &'a L,
    query: EntryQuery,
    page_size: usize,
    snapshot: Option<u64>,
    cursor: Option<EntryCursor>,
    exhausted: bool,
}

impl<'a, L: LedgerLog> EntryStream<'a, L> {
    pub fn new(log: &'a L, query: EntryQuery, page_size: usize) -> Self {
        Self {
            log,
            query,
            page_size: page_size.max(1),
            snapshot: None,
            cursor: None,
            exhausted: false,
        }
    }

    pub fn query(&self) -> &EntryQuery {
        &self.query
    }

    /// Fetch the next page, `None` once the scan is finished
    pub async fn next_batch(&mut self) -> LedgerResult<Option<Vec<LedgerEntry>>> {
        if self.exhausted {
            return Ok(None);
        }

        let snapshot = match self.snapshot {
            Some(snapshot) => snapshot,
            None => {
                let snapshot = self.log.high_water_mark().await?;
                self.snapshot = Some(snapshot);
                snapshot
            }
        };

        let page = self
            .log
            .query_page(&self.query, snapshot, self.cursor.as_ref(), self.page_size)
            .await?;

        if page.len() < self.page_size {
            self.exhausted = true;
        }
        match page.last() {
            Some(last) => {
                self.cursor = Some(EntryCursor::after(last));
                Ok(Some(page))
            }
            None => Ok(None),
        }
    }

    /// Rewind to the beginning; the next fetch takes a fresh snapshot
    pub fn restart(&mut self) {
        self.snapshot = None;
        self.cursor = None;
        self.exhausted = false;
    }

    /// Drain the remaining pages into one vector
    pub async fn collect_all(mut self) -> LedgerResult<Vec<LedgerEntry>> {
        let mut entries = Vec::new();
        while let Some(page) = self.next_batch().await? {
            entries.extend(page);
        }
        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_month_range() {
        let range = TimeRange::month(2026, 12).unwrap();
        assert_eq!(range.start, Some(Utc.with_ymd_and_hms(2026, 12, 1, 0, 0, 0).unwrap()));
        assert_eq!(range.end, Some(Utc.with_ymd_and_hms(2027, 1, 1, 0, 0, 0).unwrap()));
        assert!(TimeRange::month(2026, 13).is_err());
    }

    #[test]
    fn test_range_is_half_open() {
        let range = TimeRange::month(2026, 2).unwrap();
        assert!(range.contains(Utc.with_ymd_and_hms(2026, 2, 1, 0, 0, 0).unwrap()));
        assert!(range.contains(Utc.with_ymd_and_hms(2026, 2, 28, 23, 59, 59).unwrap()));
        assert!(!range.contains(Utc.with_ymd_and_hms(2026, 3, 1, 0, 0, 0).unwrap()));
        assert!(TimeRange::unbounded().contains(Utc::now()));
    }

    #[test]
    fn test_parse_bounds() {
        let range = TimeRange::parse_bounds(Some("2026-01"), Some("2026-02")).unwrap();
        assert_eq!(range.start, Some(Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap()));
        assert_eq!(range.end, Some(Utc.with_ymd_and_hms(2026, 3, 1, 0, 0, 0).unwrap()));

        let range = TimeRange::parse_bounds(None, Some("2024-02-29")).unwrap();
        assert_eq!(range.start, None);
        assert_eq!(range.end, Some(Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap()));

        assert!(TimeRange::parse_bounds(Some("2026"), None).is_err());
        assert!(TimeRange::parse_bounds(Some("2026-02-30"), None).is_err());
        assert!(TimeRange::parse_bounds(None, Some("jan")).is_err());
    }

    #[test]
    fn test_day_range() {
        let date = NaiveDate::from_ymd_opt(2026, 3, 31).unwrap();
        let range = TimeRange::day(date);
        assert_eq!(range.end, Some(Utc.with_ymd_and_hms(2026, 4, 1, 0, 0, 0).unwrap()));
    }

    #[test]
    fn test_scope_matching() {
        let a = AccountId::new();
        let b = AccountId::new();

        assert!(AccountScope::Account(a).matches(a));
        assert!(!AccountScope::Account(a).matches(b));
        assert!(AccountScope::Accounts([a, b].into_iter().collect()).matches(b));
        assert!(AccountScope::All.matches(b));
        assert_eq!(AccountScope::All.account_ids(), None);
    }
}
