//! Shared plumbing for the CEP import tools: tracing setup and the number and
//! duration formatting used by console reports.

#![deny(clippy::unwrap_used, clippy::expect_used)]

pub mod format;
pub mod logging;

pub use format::{format_count, format_elapsed};
pub use logging::{init_logging, LogConfig, LogFormat, LogLevel, LogOutput};
