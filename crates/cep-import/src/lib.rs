//! CEP Import Library
//!
//! Loads the Correios eDNE "basico" distribution, sixteen `@`-separated
//! Latin-1 text files, into PostgreSQL tables, one concurrent worker per
//! dataset.
//!
//! # Pipeline
//!
//! - [`catalog`]: the datasets, their files and their table layouts
//! - [`parser`]: raw line to typed [`row::Row`]
//! - [`batch`]: bounded row buffer flushed to a sink
//! - [`sink`]: the [`sink::BulkSink`] seam, PostgreSQL and in-memory stores
//! - [`worker`]: streams one dataset's files into its table
//! - [`orchestrator`]: runs all workers and builds the [`report::ImportReport`]
//!
//! # Example
//!
//! ```no_run
//! use cep_import::catalog::DatasetCatalog;
//! use cep_import::orchestrator::{ImportOptions, ImportOrchestrator};
//! use cep_import::sink::MemorySink;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let sink = Arc::new(MemorySink::new());
//!     let orchestrator = ImportOrchestrator::new(
//!         DatasetCatalog::standard(),
//!         sink.clone(),
//!         ImportOptions::default(),
//!     );
//!     let report = orchestrator.run(sink.as_ref()).await?;
//!     println!("{report}");
//!     Ok(())
//! }
//! ```

#![deny(clippy::unwrap_used, clippy::expect_used)]

pub mod batch;
pub mod catalog;
pub mod config;
pub mod db;
pub mod error;
pub mod lookup;
pub mod orchestrator;
pub mod parser;
pub mod progress;
pub mod report;
pub mod row;
pub mod schema;
pub mod sink;
pub mod worker;

pub use error::{ImportError, LoadError, ParseError, Result};
