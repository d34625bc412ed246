//! Per-dataset import worker.
//!
//! A worker resolves its dataset's files, then streams each file line by
//! line into a [`BatchAccumulator`], flushing full batches to the sink. A
//! file pattern fans out into one sub-worker per matching file; they share
//! the dataset's table and progress channel, and the worker finishes once
//! every sub-worker has.
//!
//! State progression: `Init -> FileDiscovery -> Streaming <-> Flushing ->
//! Done`, with `Failed` reachable from any state.

use crate::batch::BatchAccumulator;
use crate::catalog::{ArityPolicy, DatasetDescriptor, DatasetSource};
use crate::error::{ImportError, LoadError, Result};
use crate::parser;
use crate::sink::BulkSink;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, trace, warn, Instrument};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerState {
    Init,
    FileDiscovery,
    Streaming,
    Flushing,
    Done,
    Failed,
}

impl WorkerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkerState::Init => "init",
            WorkerState::FileDiscovery => "file_discovery",
            WorkerState::Streaming => "streaming",
            WorkerState::Flushing => "flushing",
            WorkerState::Done => "done",
            WorkerState::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, WorkerState::Done | WorkerState::Failed)
    }
}

/// Message from a worker to the orchestrator: lines consumed since the last
/// event, or the dataset's terminal error.
#[derive(Debug)]
pub struct ProgressEvent {
    pub dataset: &'static str,
    pub increment: u64,
    pub error: Option<ImportError>,
}

/// A dataset's handle on the shared progress channel.
#[derive(Debug, Clone)]
pub struct ProgressReporter {
    dataset: &'static str,
    tx: mpsc::Sender<ProgressEvent>,
}

impl ProgressReporter {
    pub fn new(dataset: &'static str, tx: mpsc::Sender<ProgressEvent>) -> Self {
        Self { dataset, tx }
    }

    pub async fn advance(&self, increment: u64) {
        if increment == 0 {
            return;
        }
        self.send(ProgressEvent {
            dataset: self.dataset,
            increment,
            error: None,
        })
        .await;
    }

    pub async fn fail(&self, error: ImportError) {
        self.send(ProgressEvent {
            dataset: self.dataset,
            increment: 0,
            error: Some(error),
        })
        .await;
    }

    async fn send(&self, event: ProgressEvent) {
        if self.tx.send(event).await.is_err() {
            debug!(dataset = self.dataset, "Progress receiver closed");
        }
    }
}

/// Everything a worker needs besides its descriptor.
#[derive(Clone)]
pub struct WorkerContext {
    pub base_path: PathBuf,
    pub batch_size: usize,
    pub sink: Arc<dyn BulkSink>,
    pub cancel: CancellationToken,
}

/// Totals of a finished worker or sub-worker.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct WorkerStats {
    pub files: usize,
    pub lines: u64,
    pub rows: u64,
    pub skipped: u64,
    pub batches: u64,
}

impl WorkerStats {
    fn absorb(&mut self, other: WorkerStats) {
        self.files += other.files;
        self.lines += other.lines;
        self.rows += other.rows;
        self.skipped += other.skipped;
        self.batches += other.batches;
    }
}

pub struct DatasetWorker {
    descriptor: DatasetDescriptor,
    ctx: WorkerContext,
    state: WorkerState,
}

impl DatasetWorker {
    pub fn new(descriptor: DatasetDescriptor, ctx: WorkerContext) -> Self {
        Self {
            descriptor,
            ctx,
            state: WorkerState::Init,
        }
    }

    pub fn state(&self) -> WorkerState {
        self.state
    }

    fn transition(&mut self, next: WorkerState) {
        trace!(
            dataset = self.descriptor.id,
            from = self.state.as_str(),
            to = next.as_str(),
            "Worker state change"
        );
        self.state = next;
    }

    /// Imports every file of the dataset. The error, if any, is the first
    /// sub-worker failure; the remaining sub-workers still run to the end.
    pub async fn run(mut self, progress: ProgressReporter) -> Result<WorkerStats> {
        let result = self.run_inner(progress).await;
        self.transition(match result {
            Ok(_) => WorkerState::Done,
            Err(_) => WorkerState::Failed,
        });
        result
    }

    async fn run_inner(&mut self, progress: ProgressReporter) -> Result<WorkerStats> {
        self.transition(WorkerState::FileDiscovery);
        let files = discover_files(&self.descriptor.source, &self.ctx.base_path)?;
        debug!(dataset = self.descriptor.id, files = files.len(), "Files resolved");

        self.transition(WorkerState::Streaming);
        let stats = match files.as_slice() {
            [single] => {
                FileImport::new(self.descriptor, single.clone(), self.ctx.clone(), progress)
                    .run()
                    .await?
            },
            _ => self.fan_out(files, progress).await?,
        };

        info!(
            dataset = self.descriptor.id,
            table = self.descriptor.table,
            files = stats.files,
            lines = stats.lines,
            rows = stats.rows,
            skipped = stats.skipped,
            "Dataset imported"
        );
        Ok(stats)
    }

    async fn fan_out(&self, files: Vec<PathBuf>, progress: ProgressReporter) -> Result<WorkerStats> {
        let mut handles = Vec::with_capacity(files.len());

        for path in files {
            let span = info_span!("file", name = %file_name(&path));
            let import = FileImport::new(self.descriptor, path.clone(), self.ctx.clone(), progress.clone());
            handles.push((path, tokio::spawn(import.run().instrument(span))));
        }

        let mut total = WorkerStats::default();
        let mut first_error: Option<ImportError> = None;

        for (path, handle) in handles {
            let outcome = match handle.await {
                Ok(outcome) => outcome,
                Err(join_error) => Err(ImportError::TaskPanicked {
                    dataset: self.descriptor.id,
                    message: format!("{}: {}", path.display(), join_error),
                }),
            };

            match outcome {
                Ok(stats) => total.absorb(stats),
                Err(e) if first_error.is_none() => first_error = Some(e),
                Err(e) => warn!(
                    dataset = self.descriptor.id,
                    file = %path.display(),
                    error = %e,
                    "Additional file failure"
                ),
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(total),
        }
    }
}

/// One file streamed into one table. The unit a pattern fans out to.
struct FileImport {
    descriptor: DatasetDescriptor,
    path: PathBuf,
    ctx: WorkerContext,
    progress: ProgressReporter,
    state: WorkerState,
}

impl FileImport {
    fn new(
        descriptor: DatasetDescriptor,
        path: PathBuf,
        ctx: WorkerContext,
        progress: ProgressReporter,
    ) -> Self {
        Self {
            descriptor,
            path,
            ctx,
            progress,
            state: WorkerState::Init,
        }
    }

    async fn run(mut self) -> Result<WorkerStats> {
        let dataset = self.descriptor.id;
        let file = File::open(&self.path)
            .await
            .map_err(|source| ImportError::FileOpen {
                path: self.path.clone(),
                source,
            })?;

        let mut reader = BufReader::new(file);
        let mut line = Vec::with_capacity(256);
        let mut batch = BatchAccumulator::new(self.ctx.batch_size);
        let mut stats = WorkerStats {
            files: 1,
            ..WorkerStats::default()
        };
        let mut line_no: u64 = 0;
        let mut unreported: u64 = 0;

        self.state = WorkerState::Streaming;

        loop {
            if self.ctx.cancel.is_cancelled() {
                return Err(ImportError::Cancelled { dataset });
            }

            line.clear();
            let read = reader
                .read_until(b'\n', &mut line)
                .await
                .map_err(|source| ImportError::Read {
                    path: self.path.clone(),
                    line: line_no + 1,
                    source,
                })?;
            if read == 0 {
                break;
            }
            line_no += 1;

            if parser::is_blank(&line) {
                continue;
            }
            stats.lines += 1;
            unreported += 1;

            let row = match parser::parse_line(&line, &self.descriptor) {
                Ok(row) => row,
                Err(e) if e.is_arity() && self.descriptor.arity == ArityPolicy::Skip => {
                    warn!(dataset, file = %self.path.display(), line = line_no, error = %e, "Skipping line");
                    stats.skipped += 1;
                    continue;
                },
                Err(source) => {
                    return Err(ImportError::Parse {
                        dataset,
                        path: self.path.clone(),
                        line: line_no,
                        source,
                    });
                },
            };

            if batch.is_full() {
                self.flush(&mut batch, &mut stats).await?;
                self.progress.advance(unreported).await;
                unreported = 0;
            }
            batch
                .append(row)
                .map_err(|full| ImportError::Load {
                    dataset,
                    source: LoadError::Rejected(full.to_string()),
                })?;
        }

        if !batch.is_empty() {
            self.flush(&mut batch, &mut stats).await?;
        }
        self.progress.advance(unreported).await;
        self.state = WorkerState::Done;

        debug!(
            dataset,
            file = %file_name(&self.path),
            lines = stats.lines,
            state = self.state.as_str(),
            "File finished"
        );
        Ok(stats)
    }

    async fn flush(&mut self, batch: &mut BatchAccumulator, stats: &mut WorkerStats) -> Result<()> {
        self.state = WorkerState::Flushing;
        let rows = batch.drain();
        let count = rows.len() as u64;

        self.ctx
            .sink
            .load_batch(&self.descriptor, rows)
            .await
            .map_err(|source| ImportError::Load {
                dataset: self.descriptor.id,
                source,
            })?;

        stats.rows += count;
        stats.batches += 1;
        self.state = WorkerState::Streaming;

        debug!(dataset = self.descriptor.id, rows = count, "Batch flushed");
        Ok(())
    }
}

/// Resolves a dataset source to concrete files, sorted by name.
pub fn discover_files(source: &DatasetSource, base: &Path) -> Result<Vec<PathBuf>> {
    match source {
        DatasetSource::File(name) => Ok(vec![base.join(name)]),
        DatasetSource::Pattern(pattern) => {
            let base_str = base.to_str().ok_or_else(|| {
                ImportError::config(format!("base path {} is not valid UTF-8", base.display()))
            })?;
            let full = Path::new(&glob::Pattern::escape(base_str)).join(pattern);
            let full = full.to_string_lossy();

            let entries = glob::glob(&full).map_err(|e| ImportError::Pattern {
                pattern: pattern.to_string(),
                message: e.to_string(),
            })?;

            let mut files = Vec::new();
            for entry in entries {
                let path = entry.map_err(|e| ImportError::FileOpen {
                    path: e.path().to_path_buf(),
                    source: e.into_error(),
                })?;
                if path.is_file() {
                    files.push(path);
                }
            }

            if files.is_empty() {
                return Err(ImportError::NoFilesFound {
                    pattern: pattern.to_string(),
                    base: base.to_path_buf(),
                });
            }

            files.sort();
            Ok(files)
        },
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}
