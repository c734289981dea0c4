//! Transaction Coordinator module
//!
//! The write path of the ledger engine: operation descriptors, account
//! locks and the coordinator state machine.

mod commands;
mod locks;
mod service;


pub use commands::{AccountBalance, Operation, OperationKind, OperationOutcome, OperationRequest};
pub use locks::{AccountLocks, LockSet};
pub use service::{Coordinator, CoordinatorConfig, OperationState};
