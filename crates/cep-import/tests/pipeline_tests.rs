//! End-to-end pipeline tests against the in-memory sink.
//!
//! Each test writes a small eDNE directory into a tempdir and runs the
//! orchestrator over it, checking the rows that reach the sink and the line
//! totals the workers report.

mod common;

use anyhow::Result;
use cep_import::catalog::{ArityPolicy, ECT_PAIS, LOG_BAIRRO, LOG_FAIXA_BAIRRO, LOG_LOCALIDADE, LOG_LOGRADOURO};
use cep_import::error::ImportError;
use cep_import::orchestrator::ImportOrchestrator;
use cep_import::row::FieldValue;
use cep_import::worker::WorkerState;
use common::*;
use tempfile::TempDir;

// ============================================================================
// Single datasets
// ============================================================================

#[tokio::test]
async fn test_country_file_loads_every_line() -> Result<()> {
    init_tracing();
    let dir = TempDir::new()?;
    write_dataset(dir.path(), "ECT_PAIS.TXT", &country_lines());

    let (orchestrator, sink) = orchestrator(&dir, &[ECT_PAIS], 1000);
    let outcome = orchestrator.execute().await;

    assert!(outcome.is_success(), "{:?}", outcome.first_error);
    assert_eq!(outcome.total_lines, 3);
    assert_eq!(sink.row_count("ect_pais"), 3);

    let rows = sink.rows("ect_pais");
    let brazil = rows
        .iter()
        .find(|r| r[0] == FieldValue::from("BR"))
        .expect("BR row");
    assert_eq!(brazil[4], FieldValue::from("Brésil"));
    assert_eq!(brazil[5], FieldValue::from("BR"));
    Ok(())
}

#[tokio::test]
async fn test_empty_required_field_fails_dataset() -> Result<()> {
    let dir = TempDir::new()?;
    let mut lines = country_lines();
    lines.push("UY@URY@Uruguai@Uruguay@Uruguay@".to_string());
    write_dataset(dir.path(), "ECT_PAIS.TXT", &lines);

    let (orchestrator, sink) = orchestrator(&dir, &[ECT_PAIS], 1000);
    let outcome = orchestrator.execute().await;

    match outcome.first_error.as_ref().map(ImportError::root) {
        Some(ImportError::Load { dataset, source }) => {
            assert_eq!(*dataset, "ECT_PAIS");
            assert!(source.to_string().contains("pai_abreviatura"));
        },
        other => panic!("expected load error, got {other:?}"),
    }
    assert_eq!(sink.row_count("ect_pais"), 0);
    Ok(())
}

#[tokio::test]
async fn test_locality_empty_cep_is_null() -> Result<()> {
    let dir = TempDir::new()?;
    write_dataset(dir.path(), "LOG_LOCALIDADE.TXT", &locality_lines());

    let (orchestrator, sink) = orchestrator(&dir, &[LOG_LOCALIDADE], 1000);
    let outcome = orchestrator.execute().await;
    assert!(outcome.is_success());

    let rows = sink.rows("log_localidade");
    assert_eq!(rows.len(), 3);

    let maringa = &rows[0];
    assert_eq!(maringa[0], FieldValue::Integer(1));
    assert_eq!(maringa[2], FieldValue::from("Maringá"));
    assert_eq!(maringa[3], FieldValue::Null);
    assert_eq!(maringa[6], FieldValue::Null);
    assert_eq!(maringa[8], FieldValue::from("4115200"));

    assert_eq!(rows[2][3], FieldValue::from("69945000"));
    Ok(())
}

#[tokio::test]
async fn test_short_file_is_flushed_at_end() -> Result<()> {
    let dir = TempDir::new()?;
    write_dataset(dir.path(), "LOG_BAIRRO.TXT", &neighbourhood_lines(5));

    let (orchestrator, sink) = orchestrator(&dir, &[LOG_BAIRRO], 1000);
    let outcome = orchestrator.execute().await;

    assert!(outcome.is_success());
    assert_eq!(sink.row_count("log_bairro"), 5);
    assert_eq!(sink.batch_count("log_bairro"), 1);
    assert_eq!(outcome.datasets[0].lines, 5);
    Ok(())
}

#[tokio::test]
async fn test_batches_split_at_capacity() -> Result<()> {
    let dir = TempDir::new()?;
    write_dataset(dir.path(), "LOG_BAIRRO.TXT", &neighbourhood_lines(2500));

    let (orchestrator, sink) = orchestrator(&dir, &[LOG_BAIRRO], 1000);
    let outcome = orchestrator.execute().await;

    assert!(outcome.is_success());
    assert_eq!(sink.row_count("log_bairro"), 2500);
    assert_eq!(sink.batch_count("log_bairro"), 3);
    assert_eq!(outcome.total_lines, 2500);
    Ok(())
}

#[tokio::test]
async fn test_blank_lines_are_not_counted() -> Result<()> {
    let dir = TempDir::new()?;
    let mut lines = neighbourhood_lines(3);
    lines.insert(1, String::new());
    lines.push(String::new());
    write_dataset(dir.path(), "LOG_BAIRRO.TXT", &lines);

    let (orchestrator, sink) = orchestrator(&dir, &[LOG_BAIRRO], 1000);
    let outcome = orchestrator.execute().await;

    assert!(outcome.is_success());
    assert_eq!(outcome.total_lines, 3);
    assert_eq!(sink.row_count("log_bairro"), 3);
    Ok(())
}

// ============================================================================
// Patterns
// ============================================================================

#[tokio::test]
async fn test_street_pattern_fans_out_over_files() -> Result<()> {
    init_tracing();
    let dir = TempDir::new()?;
    write_dataset(dir.path(), "LOG_LOGRADOURO_AC.TXT", &street_lines(1, 100));
    write_dataset(dir.path(), "LOG_LOGRADOURO_PR.TXT", &street_lines(101, 150));
    write_dataset(dir.path(), "LOG_LOGRADOURO_SP.TXT", &street_lines(251, 80));
    write_dataset(dir.path(), "LOG_BAIRRO.TXT", &neighbourhood_lines(2));

    let (orchestrator, sink) = orchestrator(&dir, &[LOG_LOGRADOURO], 64);
    let outcome = orchestrator.execute().await;

    assert!(outcome.is_success(), "{:?}", outcome.first_error);
    assert_eq!(outcome.total_lines, 330);
    assert_eq!(sink.row_count("log_logradouro"), 330);
    assert_eq!(sink.row_count("log_bairro"), 0);

    let streets = &outcome.datasets[0];
    assert_eq!(streets.files, 3);
    assert_eq!(streets.lines, 330);
    assert_eq!(streets.state, WorkerState::Done);
    Ok(())
}

#[tokio::test]
async fn test_street_pattern_without_files_fails() -> Result<()> {
    let dir = TempDir::new()?;

    let (orchestrator, _sink) = orchestrator(&dir, &[LOG_LOGRADOURO], 64);
    let outcome = orchestrator.execute().await;

    let error = outcome.first_error.expect("missing files must fail the run");
    assert!(matches!(error.root(), ImportError::NoFilesFound { .. }));
    assert_eq!(outcome.datasets[0].state, WorkerState::Failed);
    Ok(())
}

// ============================================================================
// Bad input
// ============================================================================

#[tokio::test]
async fn test_short_line_fails_dataset() -> Result<()> {
    let dir = TempDir::new()?;
    let mut lines = neighbourhood_lines(4);
    lines[2] = "3@PR".to_string();
    write_dataset(dir.path(), "LOG_BAIRRO.TXT", &lines);

    let (orchestrator, _sink) = orchestrator(&dir, &[LOG_BAIRRO], 1000);
    let outcome = orchestrator.execute().await;

    match outcome.first_error.as_ref().map(ImportError::root) {
        Some(ImportError::Parse { line, source, .. }) => {
            assert_eq!(*line, 3);
            assert!(source.is_arity());
        },
        other => panic!("expected parse error, got {other:?}"),
    }
    Ok(())
}

#[tokio::test]
async fn test_skip_policy_drops_bad_lines() -> Result<()> {
    let dir = TempDir::new()?;
    let mut lines = neighbourhood_lines(4);
    lines[1] = "2@PR".to_string();
    lines.push("9@PR@1@Centro@Ctr@extra".to_string());
    write_dataset(dir.path(), "LOG_BAIRRO.TXT", &lines);

    let (orchestrator, sink) = orchestrator(&dir, &[LOG_BAIRRO.with_arity(ArityPolicy::Skip)], 1000);
    let outcome = orchestrator.execute().await;

    assert!(outcome.is_success(), "{:?}", outcome.first_error);
    assert_eq!(sink.row_count("log_bairro"), 3);
    assert_eq!(outcome.total_lines, 5);
    Ok(())
}

#[tokio::test]
async fn test_invalid_number_fails_dataset() -> Result<()> {
    let dir = TempDir::new()?;
    write_dataset(dir.path(), "LOG_FAIXA_BAIRRO.TXT", &["x1@87000000@87000999".to_string()]);

    let (orchestrator, sink) = orchestrator(&dir, &[LOG_FAIXA_BAIRRO], 1000);
    let outcome = orchestrator.execute().await;

    assert!(matches!(
        outcome.first_error.as_ref().map(ImportError::root),
        Some(ImportError::Parse { .. })
    ));
    assert_eq!(sink.row_count("log_faixa_bairro"), 0);
    Ok(())
}

// ============================================================================
// Re-runs and cancellation
// ============================================================================

#[tokio::test]
async fn test_rerun_keeps_upserts_and_doubles_appends() -> Result<()> {
    let dir = TempDir::new()?;
    write_dataset(dir.path(), "ECT_PAIS.TXT", &country_lines());
    write_dataset(dir.path(), "LOG_LOCALIDADE.TXT", &locality_lines());
    write_dataset(dir.path(), "LOG_FAIXA_BAIRRO.TXT", &range_lines(10));

    let (orchestrator, sink) = orchestrator(&dir, &[ECT_PAIS, LOG_LOCALIDADE, LOG_FAIXA_BAIRRO], 4);

    assert!(orchestrator.execute().await.is_success());
    assert!(orchestrator.execute().await.is_success());

    assert_eq!(sink.row_count("ect_pais"), 3);
    assert_eq!(sink.row_count("log_localidade"), 3);
    assert_eq!(sink.row_count("log_faixa_bairro"), 20);
    Ok(())
}

#[tokio::test]
async fn test_cancelled_run_fails_every_dataset() -> Result<()> {
    let dir = TempDir::new()?;
    write_dataset(dir.path(), "ECT_PAIS.TXT", &country_lines());
    write_dataset(dir.path(), "LOG_BAIRRO.TXT", &neighbourhood_lines(50));

    let (orchestrator, sink) = orchestrator(&dir, &[ECT_PAIS, LOG_BAIRRO], 10);
    orchestrator.cancellation_token().cancel();
    let outcome = orchestrator.execute().await;

    assert!(matches!(
        outcome.first_error.as_ref().map(ImportError::root),
        Some(ImportError::Cancelled { .. })
    ));
    assert_eq!(outcome.failed().count(), 2);
    assert_eq!(sink.row_count("log_bairro"), 0);
    Ok(())
}

// ============================================================================
// Reports
// ============================================================================

#[tokio::test]
async fn test_report_totals_come_from_store() -> Result<()> {
    let dir = TempDir::new()?;
    write_dataset(dir.path(), "LOG_LOCALIDADE.TXT", &locality_lines());
    write_dataset(dir.path(), "LOG_LOGRADOURO_PR.TXT", &street_lines(1, 40));
    write_dataset(dir.path(), "LOG_LOGRADOURO_SP.TXT", &street_lines(41, 10));

    let sink = std::sync::Arc::new(cep_import::sink::MemorySink::new());
    let mut options = options(&dir, 16);
    options.persist_report = true;
    options.dataset_version = Some("2411".to_string());

    let orchestrator = ImportOrchestrator::new(
        catalog_of(&[LOG_LOCALIDADE, LOG_LOGRADOURO]),
        sink.clone(),
        options,
    );
    let report = orchestrator.run(sink.as_ref()).await?;

    assert_eq!(report.total_records, 53);
    assert_eq!(report.total_lines_processed, 53);
    // 50 street CEPs plus the one locality carrying its own
    assert_eq!(report.total_postal_codes, 51);
    assert_eq!(report.dataset_version.as_deref(), Some("2411"));
    assert_eq!(report.datasets.len(), 2);
    assert!(report.finished_at >= report.started_at);

    let stored = sink.reports();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].run_id, report.run_id);
    Ok(())
}
