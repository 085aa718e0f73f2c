//! Ledger trait and error types
//!
//! This module defines the interface the workers and the coordinator use to
//! record outcomes, and the errors a ledger backend can report.

use crate::state::{ItemId, Record, WorkItem};
use async_trait::async_trait;
use std::collections::HashSet;
use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur during ledger operations
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("IO error on {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("CSV error on {path}: {source}")]
    Csv { path: PathBuf, source: csv::Error },

    #[error("Existing header of {path} does not match the configured schema (expected {expected:?}, found {found:?})")]
    SchemaMismatch {
        path: PathBuf,
        expected: Vec<String>,
        found: Vec<String>,
    },
}

/// Result type for ledger operations
pub type LedgerResult<T> = Result<T, LedgerError>;

/// Distinct-id counts read back from the stores
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LedgerStats {
    /// Ids with a row in the success store
    pub succeeded: usize,

    /// Ids with a row in the failure store
    pub failed: usize,

    /// Ids present in both stores
    pub double_booked: usize,
}

/// Durable bookkeeping of attempted work
///
/// Implementations must be safe for concurrent use from many workers. Each
/// store is guarded independently so success and failure writers never
/// contend, and no lock is held across anything but the store's own I/O.
#[async_trait]
pub trait Ledger: Send + Sync {
    /// Appends one record to the success store
    async fn record_success(&self, id: &ItemId, record: &Record) -> LedgerResult<()>;

    /// Appends one (id, locator) row to the failure store
    async fn record_failure(&self, item: &WorkItem) -> LedgerResult<()>;

    /// Rewrites the failure store without any row for `id`
    ///
    /// A missing store is a no-op.
    async fn remove_failure(&self, id: &ItemId) -> LedgerResult<()>;

    /// Union of ids found in both stores
    ///
    /// Missing files, malformed rows and unparseable id cells are skipped
    /// with a warning.
    async fn load_attempted_ids(&self) -> LedgerResult<HashSet<ItemId>>;

    /// Ids in the success store
    async fn load_success_ids(&self) -> LedgerResult<HashSet<ItemId>>;

    /// Ids in the failure store, first occurrence order, without duplicates
    async fn load_failures(&self) -> LedgerResult<Vec<ItemId>>;

    /// Distinct-id counts for reporting
    async fn stats(&self) -> LedgerResult<LedgerStats> {
        let succeeded = self.load_success_ids().await?;
        let failed: HashSet<ItemId> = self.load_failures().await?.into_iter().collect();
        Ok(LedgerStats {
            succeeded: succeeded.len(),
            failed: failed.len(),
            double_booked: failed.intersection(&succeeded).count(),
        })
    }

    /// Drops failure rows whose id already has a success row
    ///
    /// Such rows are left behind when a process dies between a retry's
    /// success write and its failure removal. Returns the number of ids removed.
    async fn reconcile(&self) -> LedgerResult<usize> {
        let succeeded = self.load_success_ids().await?;
        let mut removed = 0;
        for id in self.load_failures().await? {
            if succeeded.contains(&id) {
                self.remove_failure(&id).await?;
                removed += 1;
            }
        }
        Ok(removed)
    }
}
