//! CSV-backed ledger with independent success and failure stores

use crate::config::Config;
use crate::ledger::store::CsvStore;
use crate::ledger::traits::{Ledger, LedgerResult};
use crate::state::{IdKind, ItemId, Record, Schema, WorkItem};
use async_trait::async_trait;
use std::collections::HashSet;
use std::path::{Path, PathBuf};

/// Column holding the record URL in the failure store
const LOCATOR_COLUMN: &str = "locator";

/// Durable success/failure bookkeeping backed by two CSV files
///
/// Each store carries its own lock, so success writers never wait on
/// failure writers and vice versa.
pub struct PersistentLedger {
    schema: Schema,
    success: CsvStore,
    failures: CsvStore,
}

impl PersistentLedger {
    /// Opens the ledger at the given paths
    ///
    /// Existing stores must carry the header the schema implies; appending
    /// to a store with a different layout would misalign its columns.
    pub async fn open(
        success_path: impl Into<PathBuf>,
        failure_path: impl Into<PathBuf>,
        schema: Schema,
        id_kind: IdKind,
    ) -> LedgerResult<Self> {
        let success_header = schema.columns().into_iter().map(String::from).collect();
        let failure_header = vec![schema.id_column().to_string(), LOCATOR_COLUMN.to_string()];

        let ledger = Self {
            success: CsvStore::new(success_path, success_header, id_kind),
            failures: CsvStore::new(failure_path, failure_header, id_kind),
            schema,
        };
        ledger.success.verify_header().await?;
        ledger.failures.verify_header().await?;
        Ok(ledger)
    }

    /// Opens the ledger described by a configuration
    pub async fn from_config(config: &Config) -> LedgerResult<Self> {
        Self::open(
            &config.output.success_path,
            &config.output.failure_path,
            Schema::from_config(config),
            config.run.id_kind,
        )
        .await
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn success_path(&self) -> &Path {
        self.success.path()
    }

    pub fn failure_path(&self) -> &Path {
        self.failures.path()
    }
}

#[async_trait]
impl Ledger for PersistentLedger {
    async fn record_success(&self, id: &ItemId, record: &Record) -> LedgerResult<()> {
        for field in record.undeclared(&self.schema) {
            tracing::debug!(item = %id, "Dropping undeclared field '{}'", field);
        }
        let row = record.to_row(id, &self.schema);
        self.success.append(&row).await
    }

    async fn record_failure(&self, item: &WorkItem) -> LedgerResult<()> {
        let row = [item.id().to_string(), item.locator().to_string()];
        self.failures.append(&row).await
    }

    async fn remove_failure(&self, id: &ItemId) -> LedgerResult<()> {
        let removed = self.failures.remove_id(id).await?;
        tracing::debug!(item = %id, "Removed {} failure entries", removed);
        Ok(())
    }

    async fn load_attempted_ids(&self) -> LedgerResult<HashSet<ItemId>> {
        let mut attempted: HashSet<ItemId> = self.success.read_ids().await?.into_iter().collect();
        attempted.extend(self.failures.read_ids().await?);
        Ok(attempted)
    }

    async fn load_success_ids(&self) -> LedgerResult<HashSet<ItemId>> {
        Ok(self.success.read_ids().await?.into_iter().collect())
    }

    async fn load_failures(&self) -> LedgerResult<Vec<ItemId>> {
        let mut seen = HashSet::new();
        Ok(self
            .failures
            .read_ids()
            .await?
            .into_iter()
            .filter(|id| seen.insert(id.clone()))
            .collect())
    }
}
