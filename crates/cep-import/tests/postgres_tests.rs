//! PostgreSQL store tests.
//!
//! These use `#[sqlx::test]`, which needs `DATABASE_URL` pointing at a server
//! where test databases can be created. Run them with
//! `cargo test -p cep-import --test postgres_tests -- --ignored`.

mod common;

use anyhow::Result;
use cep_import::catalog::{
    DatasetCatalog, DatasetDescriptor, ECT_PAIS, LOG_FAIXA_BAIRRO, LOG_LOCALIDADE, LOG_LOGRADOURO,
};
use cep_import::lookup::lookup_cep;
use cep_import::orchestrator::ImportOrchestrator;
use cep_import::parser::parse_fields;
use cep_import::row::Row;
use cep_import::schema::{create_schema, REPORT_TABLE};
use cep_import::sink::{BulkSink, PgStore, SummaryStore};
use common::*;
use sqlx::PgPool;
use std::sync::Arc;
use tempfile::TempDir;

const SCHEMA: &str = "correios";

fn rows(dataset: &DatasetDescriptor, lines: &[&str]) -> Vec<Row> {
    lines
        .iter()
        .map(|line| parse_fields(line, dataset).expect("valid test line"))
        .collect()
}

async fn count(pool: &PgPool, table: &str) -> Result<i64> {
    let n = sqlx::query_scalar(&format!("SELECT count(*) FROM {SCHEMA}.{table}"))
        .fetch_one(pool)
        .await?;
    Ok(n)
}

#[sqlx::test(migrations = false)]
#[ignore = "requires DATABASE_URL"]
async fn test_create_schema_is_repeatable(pool: PgPool) -> Result<()> {
    let catalog = DatasetCatalog::standard();
    create_schema(&pool, SCHEMA, &catalog).await?;
    create_schema(&pool, SCHEMA, &catalog).await?;

    let tables: i64 = sqlx::query_scalar(
        "SELECT count(*) FROM information_schema.tables WHERE table_schema = $1",
    )
    .bind(SCHEMA)
    .fetch_one(&pool)
    .await?;
    assert_eq!(tables, 17);
    assert_eq!(count(&pool, REPORT_TABLE).await?, 0);
    Ok(())
}

#[sqlx::test(migrations = false)]
#[ignore = "requires DATABASE_URL"]
async fn test_upsert_is_idempotent(pool: PgPool) -> Result<()> {
    create_schema(&pool, SCHEMA, &common::catalog_of(&[ECT_PAIS])).await?;
    let store = PgStore::new(pool.clone(), SCHEMA);

    let batch = rows(
        &ECT_PAIS,
        &["AR@ARG@Argentina@Argentina@Argentine@AR", "BR@BRA@Brasil@Brazil@Brésil@BR"],
    );
    store.load_batch(&ECT_PAIS, batch.clone()).await?;
    store.load_batch(&ECT_PAIS, batch).await?;
    assert_eq!(count(&pool, "ect_pais").await?, 2);

    let renamed = rows(&ECT_PAIS, &["BR@BRA@Brasil@Brazil@Brésil@BRA"]);
    store.load_batch(&ECT_PAIS, renamed).await?;

    let abbreviation: String =
        sqlx::query_scalar("SELECT pai_abreviatura FROM correios.ect_pais WHERE pai_sg = 'BR'")
            .fetch_one(&pool)
            .await?;
    assert_eq!(abbreviation, "BRA");
    Ok(())
}

#[sqlx::test(migrations = false)]
#[ignore = "requires DATABASE_URL"]
async fn test_upsert_keeps_last_duplicate_in_batch(pool: PgPool) -> Result<()> {
    create_schema(&pool, SCHEMA, &common::catalog_of(&[LOG_LOCALIDADE])).await?;
    let store = PgStore::new(pool.clone(), SCHEMA);

    let batch = rows(
        &LOG_LOCALIDADE,
        &["1@PR@Maringa@@1@M@@@4115200", "1@PR@Maringá@@1@M@@@4115200"],
    );
    store.load_batch(&LOG_LOCALIDADE, batch).await?;

    let name: String =
        sqlx::query_scalar("SELECT loc_no FROM correios.log_localidade WHERE loc_nu = 1")
            .fetch_one(&pool)
            .await?;
    assert_eq!(name, "Maringá");
    Ok(())
}

#[sqlx::test(migrations = false)]
#[ignore = "requires DATABASE_URL"]
async fn test_append_copies_and_rejects_duplicates(pool: PgPool) -> Result<()> {
    create_schema(&pool, SCHEMA, &common::catalog_of(&[LOG_FAIXA_BAIRRO])).await?;
    let store = PgStore::new(pool.clone(), SCHEMA);

    let lines = range_lines(300);
    let lines: Vec<&str> = lines.iter().map(String::as_str).collect();
    let batch = rows(&LOG_FAIXA_BAIRRO, &lines);

    store.load_batch(&LOG_FAIXA_BAIRRO, batch.clone()).await?;
    assert_eq!(count(&pool, "log_faixa_bairro").await?, 300);

    // The whole batch is rejected, nothing of it is kept
    assert!(store.load_batch(&LOG_FAIXA_BAIRRO, batch).await.is_err());
    assert_eq!(count(&pool, "log_faixa_bairro").await?, 300);
    Ok(())
}

#[sqlx::test(migrations = false)]
#[ignore = "requires DATABASE_URL"]
async fn test_full_run_reports_and_looks_up(pool: PgPool) -> Result<()> {
    let dir = TempDir::new()?;
    write_dataset(dir.path(), "LOG_LOCALIDADE.TXT", &locality_lines());
    write_dataset(dir.path(), "LOG_LOGRADOURO_PR.TXT", &street_lines(1, 25));

    create_schema(&pool, SCHEMA, &DatasetCatalog::standard()).await?;
    let catalog = common::catalog_of(&[LOG_LOCALIDADE, LOG_LOGRADOURO]);

    let store = Arc::new(PgStore::new(pool.clone(), SCHEMA));
    let mut options = options(&dir, 10);
    options.persist_report = true;

    let report = ImportOrchestrator::new(catalog.clone(), store.clone(), options)
        .run(store.as_ref())
        .await?;

    assert_eq!(report.total_records, 28);
    assert_eq!(report.total_postal_codes, 26);
    assert_eq!(store.total_records(&catalog).await?, 28);
    assert_eq!(count(&pool, REPORT_TABLE).await?, 1);

    let found = lookup_cep(&pool, SCHEMA, "87000-005").await?;
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].localidade, "Maringá");
    assert_eq!(found[0].origem, "log_logradouro");

    let uncoded = lookup_cep(&pool, SCHEMA, "69945-000").await?;
    assert_eq!(uncoded[0].origem, "log_localidade");
    Ok(())
}
