//! Summary module
//!
//! Read side of the ledger: grouped totals and balance reconciliation.

mod aggregator;
mod reconcile;

pub use aggregator::{GroupBy, GroupKey, GroupTotals, Summary, SummaryAggregator};
pub use reconcile::{reconcile_account, ReconciliationReport};
