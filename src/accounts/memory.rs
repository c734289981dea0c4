//! In-memory account store
//!
//! Intended for tests/dev. All state sits behind one `RwLock`, so every
//! `apply_delta` is a single read-modify-write under the write lock.

use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::Utc;

use super::AccountStore;
use crate::domain::{Account, AccountId, AccountStatus, Money, NewAccount, OwnerId};
use crate::error::{LedgerError, LedgerResult};

#[derive(Debug, Default)]
pub struct MemoryAccountStore {
    accounts: RwLock<HashMap<AccountId, Account>>,
}

impl MemoryAccountStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> LedgerResult<RwLockReadGuard<'_, HashMap<AccountId, Account>>> {
        self.accounts
            .read()
            .map_err(|_| LedgerError::StorageFailure("account store lock poisoned".to_string()))
    }

    fn write(&self) -> LedgerResult<RwLockWriteGuard<'_, HashMap<AccountId, Account>>> {
        self.accounts
            .write()
            .map_err(|_| LedgerError::StorageFailure("account store lock poisoned".to_string()))
    }
}

impl AccountStore for MemoryAccountStore {
    async fn get(&self, id: AccountId) -> LedgerResult<Account> {
        self.read()?
            .get(&id)
            .cloned()
            .ok_or_else(|| LedgerError::account_not_found(id))
    }

    async fn create(&self, new: NewAccount) -> LedgerResult<Account> {
        let account = new.into_account(Utc::now())?;
        let mut accounts = self.write()?;

        let duplicate = accounts
            .values()
            .any(|a| a.owner_id == account.owner_id && a.name == account.name);
        if duplicate {
            return Err(LedgerError::AlreadyExists(format!(
                "account named {:?}",
                account.name
            )));
        }

        accounts.insert(account.id, account.clone());
        Ok(account)
    }

    async fn deactivate(&self, id: AccountId) -> LedgerResult<Account> {
        let mut accounts = self.write()?;
        let account = accounts
            .get_mut(&id)
            .filter(|a| a.is_active())
            .ok_or_else(|| LedgerError::account_not_found(id))?;

        if !account.balance.is_zero() {
            return Err(LedgerError::HasNonZeroBalance {
                account_id: id,
                balance: account.balance,
            });
        }

        account.status = AccountStatus::Deactivated;
        account.deactivated_at = Some(Utc::now());
        Ok(account.clone())
    }

    async fn apply_delta(&self, id: AccountId, delta: Money) -> LedgerResult<Money> {
        let mut accounts = self.write()?;
        let account = accounts
            .get_mut(&id)
            .filter(|a| a.is_active())
            .ok_or_else(|| LedgerError::account_not_found(id))?;

        account.balance = account.balance.checked_add(delta)?;
        Ok(account.balance)
    }

    async fn list_by_owner(&self, owner_id: OwnerId) -> LedgerResult<Vec<Account>> {
        let mut owned: Vec<Account> = self
            .read()?
            .values()
            .filter(|a| a.owner_id == owner_id)
            .cloned()
            .collect();
        owned.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(owned)
    }

    async fn list_all(&self) -> LedgerResult<Vec<Account>> {
        let mut all: Vec<Account> = self.read()?.values().cloned().collect();
        all.sort_by_key(|a| a.id);
        Ok(all)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    async fn open(store: &MemoryAccountStore, owner: OwnerId, name: &str) -> Account {
        store.create(NewAccount::new(owner, name, "EUR")).await.unwrap()
    }

    #[tokio::test]
    async fn test_create_and_get() {
        let store = MemoryAccountStore::new();
        let owner = OwnerId::new();
        let account = open(&store, owner, "Wallet").await;

        let fetched = store.get(account.id).await.unwrap();
        assert_eq!(fetched, account);
        assert!(matches!(
            store.get(AccountId::new()).await,
            Err(LedgerError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_duplicate_name_per_owner() {
        let store = MemoryAccountStore::new();
        let owner = OwnerId::new();
        open(&store, owner, "Wallet").await;

        let dup = store.create(NewAccount::new(owner, "Wallet", "EUR")).await;
        assert!(matches!(dup, Err(LedgerError::AlreadyExists(_))));

        // Another owner may reuse the name
        open(&store, OwnerId::new(), "Wallet").await;
    }

    #[tokio::test]
    async fn test_apply_delta_and_overflow() {
        let store = MemoryAccountStore::new();
        let account = open(&store, OwnerId::new(), "Wallet").await;

        let balance = store
            .apply_delta(account.id, "12.50".parse().unwrap())
            .await
            .unwrap();
        assert_eq!(balance.to_string(), "12.50");

        let overflow = store.apply_delta(account.id, Money::from_minor(i64::MAX)).await;
        assert_eq!(overflow, Err(LedgerError::Overflow));
        assert_eq!(store.get(account.id).await.unwrap().balance, balance);
    }

    #[tokio::test]
    async fn test_deactivate_requires_zero_balance() {
        let store = MemoryAccountStore::new();
        let account = open(&store, OwnerId::new(), "Wallet").await;
        store
            .apply_delta(account.id, "1.00".parse().unwrap())
            .await
            .unwrap();

        let err = store.deactivate(account.id).await.unwrap_err();
        assert!(matches!(err, LedgerError::HasNonZeroBalance { .. }));

        store
            .apply_delta(account.id, "-1.00".parse().unwrap())
            .await
            .unwrap();
        let deactivated = store.deactivate(account.id).await.unwrap();
        assert!(!deactivated.is_active());
        assert!(deactivated.deactivated_at.is_some());

        // Deactivated accounts no longer accept deltas or a second deactivation
        assert!(matches!(
            store.apply_delta(account.id, "1.00".parse().unwrap()).await,
            Err(LedgerError::NotFound(_))
        ));
        assert!(matches!(
            store.deactivate(account.id).await,
            Err(LedgerError::NotFound(_))
        ));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_deltas_are_not_lost() {
        let store = Arc::new(MemoryAccountStore::new());
        let account = open(&store, OwnerId::new(), "Wallet").await;

        let mut handles = Vec::new();
        for _ in 0..100 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store
                    .apply_delta(account.id, "0.01".parse().unwrap())
                    .await
                    .unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(store.get(account.id).await.unwrap().balance.to_string(), "1.00");
    }

    #[tokio::test]
    async fn test_listings() {
        let store = MemoryAccountStore::new();
        let owner = OwnerId::new();
        open(&store, owner, "Savings").await;
        open(&store, owner, "Checking").await;
        open(&store, OwnerId::new(), "Other").await;

        let names: Vec<String> = store
            .list_by_owner(owner)
            .await
            .unwrap()
            .into_iter()
            .map(|a| a.name)
            .collect();
        assert_eq!(names, vec!["Checking", "Savings"]);
        assert_eq!(store.list_all().await.unwrap().len(), 3);
    }
}
