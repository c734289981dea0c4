//! Account
//!
//! An account holds a running balance that is a materialized projection of
//! its ledger entries. Accounts are never deleted, only deactivated.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{AccountId, Money, OwnerId};
use crate::error::{LedgerError, LedgerResult};

/// Maximum length of an account display name
pub const MAX_NAME_LEN: usize = 64;

/// Maximum length of a currency tag
pub const MAX_CURRENCY_LEN: usize = 16;

/// Account status
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccountStatus {
    #[default]
    Active,
    Deactivated,
}

/// Account record as held by the account store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub id: AccountId,
    pub owner_id: OwnerId,
    pub name: String,
    /// Currency tag (e.g. "EUR"); amounts are never converted between tags
    pub currency: String,
    pub balance: Money,
    /// Whether debits may drive the balance below zero
    pub permits_overdraft: bool,
    pub status: AccountStatus,
    pub created_at: DateTime<Utc>,
    pub deactivated_at: Option<DateTime<Utc>>,
}

impl Account {
    pub fn is_active(&self) -> bool {
        self.status == AccountStatus::Active
    }

    /// Check whether applying `delta` keeps the account within its overdraft policy.
    ///
    /// Credits are always allowed; the arithmetic itself may still overflow.
    pub fn check_delta(&self, delta: Money) -> LedgerResult<Money> {
        let projected = self.balance.checked_add(delta)?;
        if delta.is_negative() && projected.is_negative() && !self.permits_overdraft {
            return Err(LedgerError::InsufficientFunds {
                account_id: self.id,
                required: delta.checked_neg()?,
                available: self.balance,
            });
        }
        Ok(projected)
    }
}

/// Request to open a new account
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewAccount {
    pub owner_id: OwnerId,
    pub name: String,
    pub currency: String,
    pub permits_overdraft: bool,
}

impl NewAccount {
    pub fn new(owner_id: OwnerId, name: impl Into<String>, currency: impl Into<String>) -> Self {
        Self {
            owner_id,
            name: name.into(),
            currency: currency.into(),
            permits_overdraft: false,
        }
    }

    pub fn with_overdraft(mut self, permits_overdraft: bool) -> Self {
        self.permits_overdraft = permits_overdraft;
        self
    }

    /// Normalize and validate, producing the account the store should insert.
    pub fn into_account(self, now: DateTime<Utc>) -> LedgerResult<Account> {
        let name = self.name.trim().to_string();
        if name.is_empty() || name.chars().count() > MAX_NAME_LEN {
            return Err(LedgerError::InvalidRequest(format!(
                "account name must be 1-{MAX_NAME_LEN} characters"
            )));
        }

        let currency = self.currency.trim().to_ascii_uppercase();
        if currency.is_empty()
            || currency.len() > MAX_CURRENCY_LEN
            || !currency.chars().all(|c| c.is_ascii_alphanumeric())
        {
            return Err(LedgerError::InvalidRequest(format!(
                "invalid currency tag: {:?}",
                self.currency
            )));
        }

        Ok(Account {
            id: AccountId::new(),
            owner_id: self.owner_id,
            name,
            currency,
            balance: Money::ZERO,
            permits_overdraft: self.permits_overdraft,
            status: AccountStatus::Active,
            created_at: now,
            deactivated_at: None,
        })
    }
}
