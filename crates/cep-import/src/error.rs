//! Error types for the import pipeline.
//!
//! Three layers, innermost first: [`ParseError`] for one input line,
//! [`LoadError`] for one batch handed to a sink, and [`ImportError`] for a
//! dataset or a whole run.

use std::path::PathBuf;
use thiserror::Error;

/// A single line could not be turned into a row.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    /// Too few or too many `@`-separated fields.
    #[error("expected between {expected_min} and {expected_max} fields, found {found}")]
    Arity {
        expected_min: usize,
        expected_max: usize,
        found: usize,
    },

    /// A numeric column held something other than an integer.
    #[error("column '{column}' expects an integer, found '{value}'")]
    InvalidNumber { column: &'static str, value: String },
}

impl ParseError {
    pub fn is_arity(&self) -> bool {
        matches!(self, ParseError::Arity { .. })
    }
}

/// A sink refused or failed to store a batch. The batch is never partially applied.
#[derive(Error, Debug)]
pub enum LoadError {
    #[error("database rejected batch: {0}")]
    Database(#[from] sqlx::Error),

    /// A row does not match the column layout of its table.
    #[error("row {row} does not fit table '{table}': {reason}")]
    RowShape {
        table: &'static str,
        row: usize,
        reason: String,
    },

    #[error("{0}")]
    Rejected(String),
}

/// Dataset-level and run-level failures.
#[derive(Error, Debug)]
pub enum ImportError {
    #[error("Unknown dataset '{0}'. Run `cep-import datasets` to list the catalog.")]
    UnknownDataset(String),

    #[error("No files match '{pattern}' in {}", .base.display())]
    NoFilesFound { pattern: String, base: PathBuf },

    #[error("Invalid file pattern '{pattern}': {message}")]
    Pattern { pattern: String, message: String },

    #[error("Failed to open {}: {source}", .path.display())]
    FileOpen {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to read {} at line {line}: {source}", .path.display())]
    Read {
        path: PathBuf,
        line: u64,
        #[source]
        source: std::io::Error,
    },

    #[error("{dataset}: {} line {line}: {source}", .path.display())]
    Parse {
        dataset: &'static str,
        path: PathBuf,
        line: u64,
        #[source]
        source: ParseError,
    },

    #[error("{dataset}: failed to load batch: {source}")]
    Load {
        dataset: &'static str,
        #[source]
        source: LoadError,
    },

    /// The first dataset failure of a run, as surfaced by the orchestrator.
    #[error("Import aborted by dataset {dataset}: {source}")]
    Fatal {
        dataset: &'static str,
        #[source]
        source: Box<ImportError>,
    },

    #[error("{dataset}: import cancelled")]
    Cancelled { dataset: &'static str },

    #[error("{dataset}: worker task panicked: {message}")]
    TaskPanicked {
        dataset: &'static str,
        message: String,
    },

    #[error("Failed to compute import summary: {0}")]
    Summary(#[source] LoadError),

    #[error("'{0}' is not a CEP; expected 8 digits")]
    InvalidCep(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl ImportError {
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Wraps a dataset failure as the run's fatal error.
    pub fn fatal(dataset: &'static str, source: ImportError) -> Self {
        match source {
            already @ ImportError::Fatal { .. } => already,
            other => Self::Fatal {
                dataset,
                source: Box::new(other),
            },
        }
    }

    /// The innermost error, looking through [`ImportError::Fatal`].
    pub fn root(&self) -> &ImportError {
        match self {
            ImportError::Fatal { source, .. } => source.root(),
            other => other,
        }
    }
}

pub type Result<T> = std::result::Result<T, ImportError>;
