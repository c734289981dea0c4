//! Account Store
//!
//! Holds account identity, owner and current balance. The only mutation
//! primitive is [`AccountStore::apply_delta`], which is atomic per account.
//! No ledger entries are written here; keeping balance and log consistent is
//! the coordinator's job.

mod memory;
mod postgres;

use std::future::Future;

use sqlx::PgPool;

use crate::domain::{Account, AccountId, Money, NewAccount, OwnerId};
use crate::error::LedgerResult;

pub use memory::MemoryAccountStore;
pub use postgres::PgAccountStore;
pub(crate) use postgres::apply_delta_in;

/// Storage contract for accounts
pub trait AccountStore: Send + Sync + 'static {
    /// Fetch an account, active or not. `NotFound` if it never existed.
    fn get(&self, id: AccountId) -> impl Future<Output = LedgerResult<Account>> + Send;

    /// Open a new account with a zero balance.
    ///
    /// Fails with `AlreadyExists` if the owner already has an account of that name.
    fn create(&self, new: NewAccount) -> impl Future<Output = LedgerResult<Account>> + Send;

    /// Deactivate an account with a zero balance.
    ///
    /// Fails with `HasNonZeroBalance` otherwise, and `NotFound` for unknown or
    /// already deactivated accounts.
    fn deactivate(&self, id: AccountId) -> impl Future<Output = LedgerResult<Account>> + Send;

    /// Atomically add a signed delta to the balance and return the new balance.
    ///
    /// Concurrent calls on the same account never lose an update. Fails with
    /// `NotFound` for unknown or deactivated accounts and `Overflow` when the
    /// result leaves the Money range (the balance is left untouched).
    fn apply_delta(
        &self,
        id: AccountId,
        delta: Money,
    ) -> impl Future<Output = LedgerResult<Money>> + Send;

    /// All accounts of one owner, ordered by name
    fn list_by_owner(
        &self,
        owner_id: OwnerId,
    ) -> impl Future<Output = LedgerResult<Vec<Account>>> + Send;

    /// Every account, ordered by id
    fn list_all(&self) -> impl Future<Output = LedgerResult<Vec<Account>>> + Send;

    /// Pool of the PostgreSQL database holding the balances, for stores whose
    /// updates can join a ledger transaction
    fn pg_pool(&self) -> Option<&PgPool> {
        None
    }
}
