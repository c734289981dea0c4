//! In-memory ledger log
//!
//! Intended for tests/dev. A batch is pushed under one write lock, so a
//! reader either sees all of it or none of it. Entries are kept ordered by
//! `(occurred_at, id)`, so a page is a range scan from the cursor.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::ops::Bound;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::{EntryCursor, EntryQuery, LedgerLog, OperationReceipt};
use crate::domain::{EntryId, GroupId, LedgerEntry, OwnerId};
use crate::error::{LedgerError, LedgerResult};

type SortKey = (DateTime<Utc>, EntryId);
type ReceiptKey = (OwnerId, String, String);

#[derive(Debug, Default)]
struct Inner {
    /// (commit sequence, entry) by sort key
    entries: BTreeMap<SortKey, (u64, LedgerEntry)>,
    ids: HashSet<EntryId>,
    /// Sort keys of each group, in append order
    by_group: HashMap<GroupId, Vec<SortKey>>,
    /// reversed group -> reversing group
    reversals: HashMap<GroupId, GroupId>,
    receipts: HashMap<ReceiptKey, OperationReceipt>,
    head: u64,
}

#[derive(Debug, Default)]
pub struct MemoryLedgerLog {
    inner: RwLock<Inner>,
}

impl MemoryLedgerLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of committed entries
    pub fn len(&self) -> usize {
        self.inner.read().map(|inner| inner.entries.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn read(&self) -> LedgerResult<RwLockReadGuard<'_, Inner>> {
        self.inner
            .read()
            .map_err(|_| LedgerError::StorageFailure("ledger log lock poisoned".to_string()))
    }

    fn write(&self) -> LedgerResult<RwLockWriteGuard<'_, Inner>> {
        self.inner
            .write()
            .map_err(|_| LedgerError::StorageFailure("ledger log lock poisoned".to_string()))
    }
}

fn receipt_key(receipt: &OperationReceipt) -> ReceiptKey {
    (receipt.caller_id, receipt.key.clone(), receipt.fingerprint.clone())
}

impl LedgerLog for MemoryLedgerLog {
    async fn append_with_receipt(
        &self,
        entries: &[LedgerEntry],
        receipt: Option<&OperationReceipt>,
    ) -> LedgerResult<()> {
        let mut inner = self.write()?;

        // Validate the whole batch before touching anything
        if let Some(receipt) = receipt {
            if inner.receipts.contains_key(&receipt_key(receipt)) {
                return Err(LedgerError::OperationInProgress(receipt.key.clone()));
            }
        }

        let mut batch_ids = HashSet::with_capacity(entries.len());
        for entry in entries {
            if inner.ids.contains(&entry.id) || !batch_ids.insert(entry.id) {
                return Err(LedgerError::StorageFailure(format!(
                    "duplicate ledger entry id {}",
                    entry.id
                )));
            }
            if let Some(reversed) = entry.reverses {
                if matches!(inner.reversals.get(&reversed), Some(g) if *g != entry.group_id) {
                    return Err(LedgerError::AlreadyReversed(reversed));
                }
            }
        }

        for entry in entries {
            inner.head += 1;
            let seq = inner.head;
            let key = entry.sort_key();

            inner.ids.insert(entry.id);
            inner.by_group.entry(entry.group_id).or_default().push(key);
            if let Some(reversed) = entry.reverses {
                inner.reversals.entry(reversed).or_insert(entry.group_id);
            }
            inner.entries.insert(key, (seq, entry.clone()));
        }

        if let Some(receipt) = receipt {
            inner.receipts.insert(receipt_key(receipt), receipt.clone());
        }

        Ok(())
    }

    async fn find_receipt(
        &self,
        caller_id: OwnerId,
        key: &str,
        fingerprint: &str,
    ) -> LedgerResult<Option<OperationReceipt>> {
        let inner = self.read()?;
        Ok(inner
            .receipts
            .get(&(caller_id, key.to_string(), fingerprint.to_string()))
            .cloned())
    }

    async fn high_water_mark(&self) -> LedgerResult<u64> {
        Ok(self.read()?.head)
    }

    async fn query_page(
        &self,
        query: &EntryQuery,
        snapshot: u64,
        after: Option<&EntryCursor>,
        limit: usize,
    ) -> LedgerResult<Vec<LedgerEntry>> {
        let inner = self.read()?;

        let lower: Bound<SortKey> = match (after, query.range.start) {
            (Some(cursor), _) => Bound::Excluded((cursor.occurred_at, cursor.id)),
            (None, Some(start)) => Bound::Included((start, EntryId::from_uuid(Uuid::nil()))),
            (None, None) => Bound::Unbounded,
        };

        let page = inner
            .entries
            .range((lower, Bound::Unbounded))
            .take_while(|((occurred_at, _), _)| query.range.end.map_or(true, |end| *occurred_at < end))
            .filter(|(_, (seq, entry))| *seq <= snapshot && query.matches(entry))
            .map(|(_, (_, entry))| entry.clone())
            .take(limit)
            .collect();
        Ok(page)
    }

    async fn query_by_group(&self, group_id: GroupId) -> LedgerResult<Vec<LedgerEntry>> {
        let inner = self.read()?;
        Ok(inner
            .by_group
            .get(&group_id)
            .map(|keys| {
                keys.iter()
                    .filter_map(|key| inner.entries.get(key).map(|(_, entry)| entry.clone()))
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn find_reversal(&self, group_id: GroupId) -> LedgerResult<Option<GroupId>> {
        Ok(self.read()?.reversals.get(&group_id).copied())
    }
}
