use super::{check_rows, BulkSink, SummaryStore};
use crate::catalog::{ConflictPolicy, DatasetCatalog, DatasetDescriptor};
use crate::error::LoadError;
use crate::report::ImportReport;
use crate::row::{FieldValue, Row};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};

#[derive(Debug, Default)]
struct MemoryTable {
    rows: Vec<Row>,
    by_key: HashMap<Vec<FieldValue>, usize>,
    batches: usize,
}

#[derive(Debug, Default)]
struct MemoryState {
    tables: HashMap<&'static str, MemoryTable>,
    failing: HashSet<&'static str>,
    reports: Vec<ImportReport>,
}

/// In-process tables with the same conflict semantics as the database store.
///
/// Append datasets keep every row, so a second import of the same files
/// doubles the table. Upsert datasets replace rows by primary key.
#[derive(Debug, Default)]
pub struct MemorySink {
    state: Mutex<MemoryState>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every later batch for `table` is rejected.
    pub fn fail_table(&self, table: &'static str) {
        self.lock().failing.insert(table);
    }

    pub fn rows(&self, table: &str) -> Vec<Row> {
        self.lock()
            .tables
            .get(table)
            .map(|t| t.rows.clone())
            .unwrap_or_default()
    }

    pub fn row_count(&self, table: &str) -> usize {
        self.lock().tables.get(table).map_or(0, |t| t.rows.len())
    }

    pub fn batch_count(&self, table: &str) -> usize {
        self.lock().tables.get(table).map_or(0, |t| t.batches)
    }

    pub fn reports(&self) -> Vec<ImportReport> {
        self.lock().reports.clone()
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl BulkSink for MemorySink {
    async fn load_batch(
        &self,
        dataset: &DatasetDescriptor,
        rows: Vec<Row>,
    ) -> Result<(), LoadError> {
        check_rows(dataset, &rows)?;

        let mut state = self.lock();
        if state.failing.contains(dataset.table) {
            return Err(LoadError::Rejected(format!(
                "table {} is configured to fail",
                dataset.table
            )));
        }

        let table = state.tables.entry(dataset.table).or_default();
        table.batches += 1;

        match dataset.conflict {
            ConflictPolicy::Append => table.rows.extend(rows),
            ConflictPolicy::Upsert => {
                let keys = dataset.key_indices();
                for row in rows {
                    let key: Vec<FieldValue> = keys.iter().map(|&i| row[i].clone()).collect();
                    match table.by_key.get(&key) {
                        Some(&slot) => table.rows[slot] = row,
                        None => {
                            table.by_key.insert(key, table.rows.len());
                            table.rows.push(row);
                        },
                    }
                }
            },
        }
        Ok(())
    }
}

#[async_trait]
impl SummaryStore for MemorySink {
    async fn total_records(&self, catalog: &DatasetCatalog) -> Result<u64, LoadError> {
        let state = self.lock();
        Ok(catalog
            .iter()
            .filter_map(|d| state.tables.get(d.table))
            .map(|t| t.rows.len() as u64)
            .sum())
    }

    async fn total_postal_codes(&self, catalog: &DatasetCatalog) -> Result<u64, LoadError> {
        let state = self.lock();
        let mut ceps = HashSet::new();

        for dataset in catalog.iter() {
            let (Some(index), Some(table)) =
                (dataset.column_index("cep"), state.tables.get(dataset.table))
            else {
                continue;
            };
            ceps.extend(table.rows.iter().filter_map(|row| row[index].as_text()));
        }
        Ok(ceps.len() as u64)
    }

    async fn record_report(&self, report: &ImportReport) -> Result<(), LoadError> {
        self.lock().reports.push(report.clone());
        Ok(())
    }
}
