//! Ledger Entry Log
//!
//! Append-only record of every balance-affecting event. Batches are atomic:
//! all entries of one `append` become visible together or not at all.
//! There is no update or delete.
//!
//! A batch may carry an [`OperationReceipt`]; it is stored in the same atomic
//! step, and a second receipt for the same (caller, key, request) is refused.

mod memory;
mod posting;
mod postgres;
mod query;

use std::future::Future;

use crate::accounts::AccountStore;
use crate::domain::{AccountId, GroupId, LedgerEntry, OwnerId};
use crate::error::LedgerResult;

pub use memory::MemoryLedgerLog;
pub use posting::{post_split, OperationReceipt, Posting};
pub use postgres::PgLedgerLog;
pub use query::{AccountScope, EntryCursor, EntryQuery, EntryStream, TimeRange, DEFAULT_PAGE_SIZE};

/// Storage contract for ledger entries
pub trait LedgerLog: Send + Sync + 'static {
    /// Persist `entries` and `receipt` as one atomic batch, in order.
    ///
    /// Fails with `OperationInProgress` if a receipt for the same caller, key
    /// and fingerprint was already stored; nothing is written then.
    fn append_with_receipt(
        &self,
        entries: &[LedgerEntry],
        receipt: Option<&OperationReceipt>,
    ) -> impl Future<Output = LedgerResult<()>> + Send;

    /// Persist `entries` as one atomic batch, in order.
    fn append(&self, entries: &[LedgerEntry]) -> impl Future<Output = LedgerResult<()>> + Send {
        self.append_with_receipt(entries, None)
    }

    /// Receipt stored for a committed request, if any
    fn find_receipt(
        &self,
        caller_id: OwnerId,
        key: &str,
        fingerprint: &str,
    ) -> impl Future<Output = LedgerResult<Option<OperationReceipt>>> + Send;

    /// Apply the posting's balance changes and append its entries.
    ///
    /// The default applies through `accounts` and compensates on failure;
    /// backends sharing a database with the account store override it with a
    /// single transaction.
    fn post<A: AccountStore>(
        &self,
        accounts: &A,
        posting: &Posting,
    ) -> impl Future<Output = LedgerResult<()>> + Send {
        post_split(accounts, self, posting)
    }

    /// Commit sequence of the most recently committed entry (0 when empty).
    ///
    /// Every entry of a batch is at or below the mark, or every entry is above it.
    fn high_water_mark(&self) -> impl Future<Output = LedgerResult<u64>> + Send;

    /// One page of entries matching `query`, committed at or below `snapshot`,
    /// strictly after `after`, ordered by occurred-at then id.
    fn query_page(
        &self,
        query: &EntryQuery,
        snapshot: u64,
        after: Option<&EntryCursor>,
        limit: usize,
    ) -> impl Future<Output = LedgerResult<Vec<LedgerEntry>>> + Send;

    /// Every entry of one operation group, in append order
    fn query_by_group(
        &self,
        group_id: GroupId,
    ) -> impl Future<Output = LedgerResult<Vec<LedgerEntry>>> + Send;

    /// The group that reversed `group_id`, if any
    fn find_reversal(
        &self,
        group_id: GroupId,
    ) -> impl Future<Output = LedgerResult<Option<GroupId>>> + Send;

    /// Lazy scan of one account's entries within `range`
    fn query_by_account(&self, account_id: AccountId, range: TimeRange) -> EntryStream<'_, Self>
    where
        Self: Sized,
    {
        EntryStream::new(
            self,
            EntryQuery::new(AccountScope::Account(account_id), range),
            DEFAULT_PAGE_SIZE,
        )
    }
}
