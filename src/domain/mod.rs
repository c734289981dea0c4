//! Domain module
//!
//! Core domain types shared by every component of the ledger engine.

pub mod account;
pub mod context;
pub mod entry;
pub mod ids;
pub mod money;

pub use account::{Account, AccountStatus, NewAccount};
pub use context::OperationContext;
pub use entry::{Category, EntryKind, LedgerEntry};
pub use ids::{AccountId, EntryId, GroupId, OwnerId};
pub use money::{Money, MoneyError};
