//! Target schema setup, generated from the catalog.
//!
//! Runs once before any worker starts. Every statement is idempotent
//! (`IF NOT EXISTS`), so an existing schema is left as it is.

use crate::catalog::{DatasetCatalog, DatasetDescriptor};
use crate::error::Result;
use sqlx::PgPool;
use tracing::info;

/// Audit table holding one row per finished import.
pub const REPORT_TABLE: &str = "importacao_relatorio";

pub fn create_table_sql(schema: &str, dataset: &DatasetDescriptor) -> String {
    let mut lines: Vec<String> = dataset
        .columns
        .iter()
        .map(|c| {
            format!(
                "    {} {} {}",
                c.name,
                c.sql_type,
                if c.nullable { "NULL" } else { "NOT NULL" }
            )
        })
        .collect();

    if !dataset.primary_key.is_empty() {
        lines.push(format!("    PRIMARY KEY ({})", dataset.primary_key.join(", ")));
    }

    format!(
        "CREATE TABLE IF NOT EXISTS {}.{} (\n{}\n)",
        schema,
        dataset.table,
        lines.join(",\n")
    )
}

pub fn column_comments_sql(schema: &str, dataset: &DatasetDescriptor) -> Vec<String> {
    dataset
        .columns
        .iter()
        .filter(|c| !c.description.is_empty())
        .map(|c| {
            format!(
                "COMMENT ON COLUMN {}.{}.{} IS '{}'",
                schema,
                dataset.table,
                c.name,
                c.description.replace('\'', "''")
            )
        })
        .collect()
}

pub fn report_table_sql(schema: &str) -> String {
    format!(
        "CREATE TABLE IF NOT EXISTS {}.{} (
    id bigserial PRIMARY KEY,
    run_id uuid NOT NULL UNIQUE,
    total_registros bigint NOT NULL,
    total_ceps bigint NOT NULL,
    total_linhas bigint NOT NULL,
    versao_edne varchar(32) NULL,
    duracao_ms bigint NOT NULL,
    observacoes text NULL,
    iniciado_em timestamptz NOT NULL,
    finalizado_em timestamptz NOT NULL
)",
        schema, REPORT_TABLE
    )
}

/// All statements for `catalog`, in execution order.
pub fn schema_statements(schema: &str, catalog: &DatasetCatalog) -> Vec<String> {
    let mut statements = vec![format!("CREATE SCHEMA IF NOT EXISTS {}", schema)];
    for dataset in catalog.iter() {
        statements.push(create_table_sql(schema, dataset));
        statements.extend(column_comments_sql(schema, dataset));
    }
    statements.push(report_table_sql(schema));
    statements
}

/// Creates the schema, one table per dataset and the audit table, in one
/// transaction.
pub async fn create_schema(pool: &PgPool, schema: &str, catalog: &DatasetCatalog) -> Result<()> {
    let statements = schema_statements(schema, catalog);
    let mut tx = pool.begin().await?;

    for statement in &statements {
        sqlx::query(statement).execute(&mut *tx).await?;
    }

    tx.commit().await?;

    info!(
        schema,
        tables = catalog.len() + 1,
        statements = statements.len(),
        "Schema ready"
    );
    Ok(())
}
