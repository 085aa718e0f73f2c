//! Ledger module for persisting per-item outcomes
//!
//! This module handles all durable bookkeeping for a harvest, including:
//! - Appending successful records to the success store
//! - Appending and removing entries in the failure store
//! - Recovering the set of already attempted ids on restart

mod persistent;
mod store;
mod traits;

pub use persistent::PersistentLedger;
pub use traits::{Ledger, LedgerError, LedgerResult, LedgerStats};
