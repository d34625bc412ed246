//! Human-facing progress display.
//!
//! The orchestrator reports every progress increment and dataset completion
//! to a [`ProgressObserver`]. The console implementation draws one
//! `indicatif` line per dataset; [`NoopProgress`] is used for JSON output,
//! tests and non-interactive runs.

use crate::catalog::DatasetDescriptor;
use crate::worker::WorkerState;
use cep_common::format_count;
use indicatif::{MultiProgress, ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

pub trait ProgressObserver: Send + Sync {
    fn on_start(&self, _dataset: &DatasetDescriptor) {}

    fn on_progress(&self, dataset: &'static str, increment: u64);

    fn on_finish(&self, _dataset: &'static str, _state: WorkerState, _lines: u64) {}
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopProgress;

impl ProgressObserver for NoopProgress {
    fn on_progress(&self, _dataset: &'static str, _increment: u64) {}
}

/// One spinner line per dataset with a running line count.
pub struct ConsoleProgress {
    multi: MultiProgress,
    bars: Mutex<HashMap<&'static str, ProgressBar>>,
    style: ProgressStyle,
}

impl ConsoleProgress {
    pub fn new() -> Self {
        Self::with_target(ProgressDrawTarget::stderr())
    }

    pub fn hidden() -> Self {
        Self::with_target(ProgressDrawTarget::hidden())
    }

    fn with_target(target: ProgressDrawTarget) -> Self {
        let style = ProgressStyle::with_template(
            "{spinner:.green} [{elapsed_precise}] {prefix:<22.bold} {human_pos:>12} lines {msg}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_spinner());

        Self {
            multi: MultiProgress::with_draw_target(target),
            bars: Mutex::new(HashMap::new()),
            style,
        }
    }

    fn bar(&self, dataset: &'static str) -> Option<ProgressBar> {
        self.bars
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(dataset)
            .cloned()
    }
}

impl Default for ConsoleProgress {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressObserver for ConsoleProgress {
    fn on_start(&self, dataset: &DatasetDescriptor) {
        let bar = self.multi.add(ProgressBar::new_spinner());
        bar.set_style(self.style.clone());
        bar.set_prefix(dataset.id);
        bar.set_message(format!("-> {}", dataset.table));
        bar.enable_steady_tick(Duration::from_millis(120));

        self.bars
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(dataset.id, bar);
    }

    fn on_progress(&self, dataset: &'static str, increment: u64) {
        if let Some(bar) = self.bar(dataset) {
            bar.inc(increment);
        }
    }

    fn on_finish(&self, dataset: &'static str, state: WorkerState, lines: u64) {
        if let Some(bar) = self.bar(dataset) {
            match state {
                WorkerState::Done => {
                    bar.finish_with_message(format!("done ({} lines)", format_count(lines)))
                },
                _ => bar.abandon_with_message(state.as_str().to_string()),
            }
        }
    }
}
