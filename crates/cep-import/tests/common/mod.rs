//! Shared fixtures for the import integration tests.
//!
//! Writes eDNE-shaped files into a temporary directory, Latin-1 encoded and
//! `\r\n` terminated like the real distribution, and wires an orchestrator
//! to an in-memory sink.

#![allow(dead_code)]

use cep_import::catalog::{DatasetCatalog, DatasetDescriptor};
use cep_import::orchestrator::{ImportOptions, ImportOrchestrator};
use cep_import::sink::MemorySink;
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;

pub fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let _ = fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("cep_import=debug")),
        )
        .with_test_writer()
        .try_init();
}

/// Latin-1 bytes of `text`. Panics on characters outside U+0000..U+00FF.
pub fn latin1(text: &str) -> Vec<u8> {
    text.chars()
        .map(|c| u8::try_from(u32::from(c)).expect("character outside Latin-1"))
        .collect()
}

/// Writes `lines` to `dir/name`, Latin-1 encoded, one `\r\n` per line.
pub fn write_dataset(dir: &Path, name: &str, lines: &[String]) {
    let mut bytes = Vec::new();
    for line in lines {
        bytes.extend(latin1(line));
        bytes.extend_from_slice(b"\r\n");
    }
    std::fs::write(dir.join(name), bytes).expect("write dataset file");
}

pub fn country_lines() -> Vec<String> {
    vec![
        "AD@AND@Andorra@Andorra@Andorre@AD".to_string(),
        "AR@ARG@Argentina@Argentina@Argentine@AR".to_string(),
        "BR@BRA@Brasil@Brazil@Brésil@BR".to_string(),
    ]
}

pub fn locality_lines() -> Vec<String> {
    vec![
        "1@PR@Maringá@@1@M@@Maringá@4115200".to_string(),
        "2@SP@São Paulo@@1@M@@S Paulo@3550308".to_string(),
        "3@AC@Acrelândia@69945000@0@M@@Acrelândia@1200013".to_string(),
    ]
}

/// `count` street lines with keys `first..first + count` and one CEP each.
pub fn street_lines(first: u64, count: u64) -> Vec<String> {
    (first..first + count)
        .map(|n| {
            format!(
                "{n}@PR@1@{bairro}@@Avenida Brasil {n}@@{cep:08}@Avenida@S@Av Brasil {n}",
                bairro = n % 7 + 1,
                cep = 87_000_000 + n
            )
        })
        .collect()
}

pub fn neighbourhood_lines(count: u64) -> Vec<String> {
    (1..=count)
        .map(|n| format!("{n}@PR@1@Zona {n}@Z {n}"))
        .collect()
}

pub fn range_lines(count: u64) -> Vec<String> {
    (1..=count)
        .map(|n| format!("{n}@{:08}@{:08}", 87_000_000 + n * 10, 87_000_000 + n * 10 + 9))
        .collect()
}

pub fn catalog_of(descriptors: &[DatasetDescriptor]) -> DatasetCatalog {
    DatasetCatalog::new(descriptors.to_vec()).expect("valid catalog")
}

pub fn options(dir: &TempDir, batch_size: usize) -> ImportOptions {
    ImportOptions {
        base_path: dir.path().to_path_buf(),
        batch_size,
        ..ImportOptions::default()
    }
}

pub fn orchestrator(
    dir: &TempDir,
    descriptors: &[DatasetDescriptor],
    batch_size: usize,
) -> (ImportOrchestrator, Arc<MemorySink>) {
    let sink = Arc::new(MemorySink::new());
    let orchestrator = ImportOrchestrator::new(
        catalog_of(descriptors),
        sink.clone(),
        options(dir, batch_size),
    );
    (orchestrator, sink)
}
