//! Per-account exclusive locks
//!
//! Every caller acquires in ascending `AccountId` order and releases in
//! reverse. With one total order there is no wait-for cycle, so two
//! transfers moving money in opposite directions cannot deadlock.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tokio::time::Instant;

use crate::domain::AccountId;
use crate::error::{LedgerError, LedgerResult};

type Slot = Arc<AsyncMutex<()>>;

/// Registry of account lock slots, created on first use
#[derive(Debug, Default)]
pub struct AccountLocks {
    slots: Mutex<HashMap<AccountId, Slot>>,
}

impl AccountLocks {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, account_id: AccountId) -> LedgerResult<Slot> {
        let mut slots = self
            .slots
            .lock()
            .map_err(|_| LedgerError::StorageFailure("lock registry poisoned".to_string()))?;
        Ok(slots.entry(account_id).or_default().clone())
    }

    /// Lock every account in `ids`, waiting at most `timeout` in total.
    ///
    /// Duplicates are ignored. On timeout the locks already taken are
    /// released and `LockTimeout` names the account that could not be locked.
    pub async fn acquire(&self, ids: &[AccountId], timeout: Duration) -> LedgerResult<LockSet> {
        let mut ordered = ids.to_vec();
        ordered.sort_unstable();
        ordered.dedup();

        let started = Instant::now();
        let deadline = started + timeout;
        let mut set = LockSet {
            guards: Vec::with_capacity(ordered.len()),
        };

        for account_id in ordered {
            let slot = self.slot(account_id)?;
            match tokio::time::timeout_at(deadline, slot.lock_owned()).await {
                Ok(guard) => set.guards.push((account_id, guard)),
                Err(_) => {
                    tracing::warn!(
                        account_id = %account_id,
                        waited_ms = started.elapsed().as_millis() as u64,
                        "Account lock timed out"
                    );
                    return Err(LedgerError::LockTimeout {
                        account_id,
                        waited: started.elapsed(),
                    });
                }
            }
        }

        Ok(set)
    }

    /// Drop slots nobody holds or waits on; returns how many were removed
    pub fn prune(&self) -> usize {
        let Ok(mut slots) = self.slots.lock() else {
            return 0;
        };
        let before = slots.len();
        slots.retain(|_, slot| Arc::strong_count(slot) > 1);
        before - slots.len()
    }

    /// Number of registered slots
    pub fn len(&self) -> usize {
        self.slots.lock().map(|slots| slots.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Held account locks, released in reverse acquisition order on drop
#[derive(Debug)]
pub struct LockSet {
    guards: Vec<(AccountId, OwnedMutexGuard<()>)>,
}

impl LockSet {
    /// Locked accounts in acquisition order
    pub fn accounts(&self) -> Vec<AccountId> {
        self.guards.iter().map(|(id, _)| *id).collect()
    }
}

impl Drop for LockSet {
    fn drop(&mut self) {
        while let Some((_account_id, guard)) = self.guards.pop() {
            drop(guard);
        }
    }
}
