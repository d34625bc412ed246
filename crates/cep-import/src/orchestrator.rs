//! Runs every catalog dataset concurrently and folds their progress into
//! one outcome.
//!
//! One task per dataset, all started at once. Workers report over a single
//! bounded channel that the orchestrator drains until the last sender is
//! gone, so no worker ever blocks on a full channel while the orchestrator
//! waits on something else. The first failure becomes the run's fatal
//! error; later failures are logged. Siblings of a failed dataset are not
//! cancelled, and every task is joined before the run returns.

use crate::catalog::DatasetCatalog;
use crate::error::{ImportError, Result};
use crate::progress::{NoopProgress, ProgressObserver};
use crate::report::{DatasetSummary, ImportReport};
use crate::sink::{BulkSink, SummaryStore};
use crate::worker::{DatasetWorker, ProgressEvent, ProgressReporter, WorkerContext, WorkerState};
use chrono::Utc;
use serde::Serialize;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, info_span, warn, Instrument};
use uuid::Uuid;

/// Lower bound on the progress channel; raised to the dataset count when larger.
pub const DEFAULT_EVENT_BUFFER: usize = 256;

#[derive(Debug, Clone)]
pub struct ImportOptions {
    pub base_path: PathBuf,
    pub batch_size: usize,
    pub dataset_version: Option<String>,
    pub notes: Option<String>,
    pub persist_report: bool,
}

impl Default for ImportOptions {
    fn default() -> Self {
        Self {
            base_path: PathBuf::from(crate::config::DEFAULT_BASE_PATH),
            batch_size: crate::batch::DEFAULT_BATCH_SIZE,
            dataset_version: None,
            notes: None,
            persist_report: false,
        }
    }
}

impl From<&crate::config::ImportConfig> for ImportOptions {
    fn from(config: &crate::config::ImportConfig) -> Self {
        Self {
            base_path: config.base_path.clone(),
            batch_size: config.batch_size,
            dataset_version: config.dataset_version.clone(),
            notes: config.notes.clone(),
            persist_report: config.persist_report,
        }
    }
}

/// Terminal result of one dataset task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DatasetOutcome {
    pub dataset: &'static str,
    pub table: &'static str,
    pub state: WorkerState,
    pub files: usize,
    /// Lines reported through progress events, including those of a dataset
    /// that failed part way.
    pub lines: u64,
}

/// Everything observed while running the workers, success or not.
#[derive(Debug)]
pub struct ImportOutcome {
    pub datasets: Vec<DatasetOutcome>,
    pub total_lines: u64,
    pub elapsed: Duration,
    pub first_error: Option<ImportError>,
}

impl ImportOutcome {
    pub fn is_success(&self) -> bool {
        self.first_error.is_none()
    }

    pub fn failed(&self) -> impl Iterator<Item = &DatasetOutcome> {
        self.datasets.iter().filter(|d| d.state == WorkerState::Failed)
    }
}

pub struct ImportOrchestrator {
    catalog: DatasetCatalog,
    sink: Arc<dyn BulkSink>,
    options: ImportOptions,
    cancel: CancellationToken,
    observer: Arc<dyn ProgressObserver>,
}

impl ImportOrchestrator {
    pub fn new(catalog: DatasetCatalog, sink: Arc<dyn BulkSink>, options: ImportOptions) -> Self {
        Self {
            catalog,
            sink,
            options,
            cancel: CancellationToken::new(),
            observer: Arc::new(NoopProgress),
        }
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_observer(mut self, observer: Arc<dyn ProgressObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn catalog(&self) -> &DatasetCatalog {
        &self.catalog
    }

    /// Stops every worker at its next line boundary.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Runs all datasets to a terminal state and reports what happened.
    pub async fn execute(&self) -> ImportOutcome {
        let started = Instant::now();
        let capacity = DEFAULT_EVENT_BUFFER.max(self.catalog.len());
        let (tx, mut rx) = mpsc::channel::<ProgressEvent>(capacity);

        let ctx = WorkerContext {
            base_path: self.options.base_path.clone(),
            batch_size: self.options.batch_size,
            sink: Arc::clone(&self.sink),
            cancel: self.cancel.clone(),
        };

        info!(
            datasets = self.catalog.len(),
            base_path = %self.options.base_path.display(),
            batch_size = self.options.batch_size,
            "Starting dataset workers"
        );

        let mut handles = Vec::with_capacity(self.catalog.len());
        for descriptor in self.catalog.iter().copied() {
            self.observer.on_start(&descriptor);

            let reporter = ProgressReporter::new(descriptor.id, tx.clone());
            let worker = DatasetWorker::new(descriptor, ctx.clone());
            let span = info_span!("dataset", id = descriptor.id);

            let handle = tokio::spawn(
                async move {
                    match worker.run(reporter.clone()).await {
                        Ok(stats) => Some(stats),
                        Err(e) => {
                            reporter.fail(e).await;
                            None
                        },
                    }
                }
                .instrument(span),
            );
            handles.push((descriptor, handle));
        }
        drop(tx);

        let mut lines: HashMap<&'static str, u64> = HashMap::new();
        let mut total_lines: u64 = 0;
        let mut first_error: Option<ImportError> = None;

        while let Some(event) = rx.recv().await {
            if event.increment > 0 {
                *lines.entry(event.dataset).or_default() += event.increment;
                total_lines += event.increment;
                self.observer.on_progress(event.dataset, event.increment);
            }

            if let Some(e) = event.error {
                record_failure(&mut first_error, event.dataset, e);
            }
        }

        let mut datasets = Vec::with_capacity(handles.len());
        for (descriptor, handle) in handles {
            let (state, files) = match handle.await {
                Ok(Some(stats)) => (WorkerState::Done, stats.files),
                Ok(None) => (WorkerState::Failed, 0),
                Err(join_error) => {
                    record_failure(
                        &mut first_error,
                        descriptor.id,
                        ImportError::TaskPanicked {
                            dataset: descriptor.id,
                            message: join_error.to_string(),
                        },
                    );
                    (WorkerState::Failed, 0)
                },
            };

            let dataset_lines = lines.get(descriptor.id).copied().unwrap_or_default();
            self.observer.on_finish(descriptor.id, state, dataset_lines);

            datasets.push(DatasetOutcome {
                dataset: descriptor.id,
                table: descriptor.table,
                state,
                files,
                lines: dataset_lines,
            });
        }

        let outcome = ImportOutcome {
            datasets,
            total_lines,
            elapsed: started.elapsed(),
            first_error,
        };

        info!(
            succeeded = outcome.datasets.len() - outcome.failed().count(),
            failed = outcome.failed().count(),
            lines = outcome.total_lines,
            elapsed_ms = outcome.elapsed.as_millis() as u64,
            "Dataset workers finished"
        );
        outcome
    }

    /// Runs the import and, if every dataset succeeded, builds the report
    /// from the store's totals. Persists the report when configured to.
    pub async fn run(&self, store: &dyn SummaryStore) -> Result<ImportReport> {
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();

        let outcome = self.execute().await;
        if let Some(e) = outcome.first_error {
            return Err(e);
        }

        let total_records = store
            .total_records(&self.catalog)
            .await
            .map_err(ImportError::Summary)?;
        let total_postal_codes = store
            .total_postal_codes(&self.catalog)
            .await
            .map_err(ImportError::Summary)?;

        let report = ImportReport {
            run_id,
            started_at,
            finished_at: Utc::now(),
            total_records,
            total_postal_codes,
            total_lines_processed: outcome.total_lines,
            duration: outcome.elapsed,
            dataset_version: self.options.dataset_version.clone(),
            notes: self.options.notes.clone(),
            datasets: outcome
                .datasets
                .iter()
                .map(|d| DatasetSummary {
                    dataset: d.dataset,
                    table: d.table,
                    files: d.files,
                    lines: d.lines,
                })
                .collect(),
        };

        if self.options.persist_report {
            // Audit persistence failures are logged only.
            if let Err(e) = store.record_report(&report).await {
                warn!(run_id = %report.run_id, error = %e, "Failed to persist import report");
            }
        }

        info!(
            run_id = %report.run_id,
            total_records = report.total_records,
            total_postal_codes = report.total_postal_codes,
            "Import finished"
        );
        Ok(report)
    }
}

fn record_failure(first: &mut Option<ImportError>, dataset: &'static str, e: ImportError) {
    if first.is_none() {
        error!(dataset, error = %e, "Dataset failed; the import will be reported as failed");
        *first = Some(ImportError::fatal(dataset, e));
    } else {
        warn!(dataset, error = %e, "Dataset failed");
    }
}
