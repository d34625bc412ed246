//! Destinations for parsed batches.
//!
//! A [`BulkSink`] receives whole batches from the workers. Every call is
//! atomic: either all rows of the batch become visible or none do. Sinks do
//! not retry; a failed batch fails its dataset.
//!
//! After loading, the orchestrator asks a [`SummaryStore`] for the totals of
//! the run and optionally hands it the final report for auditing.

pub mod memory;
pub mod postgres;

pub use memory::MemorySink;
pub use postgres::PgStore;

use crate::catalog::{DatasetCatalog, DatasetDescriptor, SqlType};
use crate::error::LoadError;
use crate::report::ImportReport;
use crate::row::{FieldValue, Row};
use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};

#[async_trait]
pub trait BulkSink: Send + Sync {
    /// Stores `rows` into the dataset's table, honouring its conflict policy.
    async fn load_batch(&self, dataset: &DatasetDescriptor, rows: Vec<Row>)
        -> Result<(), LoadError>;
}

#[async_trait]
pub trait SummaryStore: Send + Sync {
    async fn total_records(&self, catalog: &DatasetCatalog) -> Result<u64, LoadError>;

    async fn total_postal_codes(&self, catalog: &DatasetCatalog) -> Result<u64, LoadError>;

    /// Persists the audit record of a finished import.
    async fn record_report(&self, report: &ImportReport) -> Result<(), LoadError>;
}

/// Rejects rows whose shape does not match the descriptor, before anything
/// is written. Shared by every sink so a bad batch fails the same way
/// everywhere.
pub fn check_rows(dataset: &DatasetDescriptor, rows: &[Row]) -> Result<(), LoadError> {
    for (index, row) in rows.iter().enumerate() {
        if row.len() != dataset.columns.len() {
            return Err(LoadError::RowShape {
                table: dataset.table,
                row: index,
                reason: format!(
                    "{} values for {} columns",
                    row.len(),
                    dataset.columns.len()
                ),
            });
        }

        for (column, value) in dataset.columns.iter().zip(row) {
            let reason = match value {
                FieldValue::Null if !column.nullable => {
                    format!("null value in NOT NULL column '{}'", column.name)
                },
                FieldValue::Text(_) if column.sql_type == SqlType::Numeric => {
                    format!("text value in numeric column '{}'", column.name)
                },
                _ => continue,
            };
            return Err(LoadError::RowShape {
                table: dataset.table,
                row: index,
                reason,
            });
        }
    }
    Ok(())
}

/// Counts rows and drops them. Drives `cep-import validate`.
#[derive(Debug, Default)]
pub struct DiscardSink {
    rows: AtomicU64,
    batches: AtomicU64,
}

impl DiscardSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rows(&self) -> u64 {
        self.rows.load(Ordering::Relaxed)
    }

    pub fn batches(&self) -> u64 {
        self.batches.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl BulkSink for DiscardSink {
    async fn load_batch(
        &self,
        dataset: &DatasetDescriptor,
        rows: Vec<Row>,
    ) -> Result<(), LoadError> {
        check_rows(dataset, &rows)?;
        self.rows.fetch_add(rows.len() as u64, Ordering::Relaxed);
        self.batches.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}
