//! PostgreSQL store.
//!
//! Append datasets stream each batch through one `COPY ... FROM STDIN`
//! statement. Upsert datasets run multi-row `INSERT ... ON CONFLICT` inside
//! one transaction per batch, split so no statement exceeds the protocol's
//! bind parameter limit.

use super::{check_rows, BulkSink, SummaryStore};
use crate::catalog::{ConflictPolicy, DatasetCatalog, DatasetDescriptor, SqlType};
use crate::error::LoadError;
use crate::report::ImportReport;
use crate::row::{FieldValue, Row};
use crate::schema::REPORT_TABLE;
use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolCopyExt};
use sqlx::{Postgres, QueryBuilder};
use std::collections::HashMap;
use tracing::debug;

/// Upper bound on bind parameters in one statement.
const MAX_BIND_PARAMS: usize = 65_535;

#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
    schema: String,
}

impl PgStore {
    /// `schema` must already be a validated identifier.
    pub fn new(pool: PgPool, schema: impl Into<String>) -> Self {
        Self {
            pool,
            schema: schema.into(),
        }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    fn qualified(&self, table: &str) -> String {
        format!("{}.{}", self.schema, table)
    }

    async fn copy_rows(&self, dataset: &DatasetDescriptor, rows: &[Row]) -> Result<(), LoadError> {
        let statement = format!(
            "COPY {} ({}) FROM STDIN",
            self.qualified(dataset.table),
            column_list(dataset)
        );

        let mut payload = Vec::with_capacity(rows.len() * 96);
        for row in rows {
            encode_copy_row(row, &mut payload);
        }

        let mut copy = self.pool.copy_in_raw(&statement).await?;
        let sent = copy.send(payload).await.map(|_| ());
        if let Err(e) = sent {
            copy.abort(e.to_string()).await?;
            return Err(e.into());
        }
        let copied = copy.finish().await?;

        debug!(table = dataset.table, rows = copied, "Batch copied");
        Ok(())
    }

    async fn upsert_rows(&self, dataset: &DatasetDescriptor, rows: Vec<Row>) -> Result<(), LoadError> {
        let rows = dedupe_by_key(dataset, rows);
        let rows_per_statement = (MAX_BIND_PARAMS / dataset.columns.len()).max(1);
        let insert = format!(
            "INSERT INTO {} ({}) ",
            self.qualified(dataset.table),
            column_list(dataset)
        );
        let on_conflict = conflict_clause(dataset);

        let mut tx = self.pool.begin().await?;

        for chunk in rows.chunks(rows_per_statement) {
            let mut builder: QueryBuilder<Postgres> = QueryBuilder::new(&insert);

            builder.push_values(chunk, |mut b, row| {
                for (column, value) in dataset.columns.iter().zip(row) {
                    match (column.sql_type, value) {
                        (SqlType::Numeric, value) => {
                            b.push_bind(value.as_integer());
                        },
                        (_, FieldValue::Null) => {
                            b.push_bind(None::<String>);
                        },
                        (_, value) => {
                            b.push_bind(value.to_string());
                        },
                    }
                }
            });
            builder.push(&on_conflict);

            builder.build().execute(&mut *tx).await?;
        }

        tx.commit().await?;

        debug!(table = dataset.table, rows = rows.len(), "Batch upserted");
        Ok(())
    }
}

#[async_trait]
impl BulkSink for PgStore {
    async fn load_batch(
        &self,
        dataset: &DatasetDescriptor,
        rows: Vec<Row>,
    ) -> Result<(), LoadError> {
        if rows.is_empty() {
            return Ok(());
        }
        check_rows(dataset, &rows)?;

        match dataset.conflict {
            ConflictPolicy::Append => self.copy_rows(dataset, &rows).await,
            ConflictPolicy::Upsert => self.upsert_rows(dataset, rows).await,
        }
    }
}

#[async_trait]
impl SummaryStore for PgStore {
    async fn total_records(&self, catalog: &DatasetCatalog) -> Result<u64, LoadError> {
        if catalog.is_empty() {
            return Ok(0);
        }

        let counts = catalog
            .iter()
            .map(|d| format!("SELECT count(*) AS n FROM {}", self.qualified(d.table)))
            .collect::<Vec<_>>()
            .join(" UNION ALL ");
        let query = format!("SELECT COALESCE(SUM(n), 0)::bigint FROM ({}) AS counts", counts);

        let total: i64 = sqlx::query_scalar(&query).fetch_one(&self.pool).await?;
        Ok(u64::try_from(total).unwrap_or_default())
    }

    async fn total_postal_codes(&self, catalog: &DatasetCatalog) -> Result<u64, LoadError> {
        let tables = catalog.postal_code_tables();
        if tables.is_empty() {
            return Ok(0);
        }

        let ceps = tables
            .iter()
            .map(|table| format!("SELECT cep FROM {}", self.qualified(table)))
            .collect::<Vec<_>>()
            .join(" UNION ALL ");
        let query = format!("SELECT count(DISTINCT cep) FROM ({}) AS ceps", ceps);

        let total: i64 = sqlx::query_scalar(&query).fetch_one(&self.pool).await?;
        Ok(u64::try_from(total).unwrap_or_default())
    }

    async fn record_report(&self, report: &ImportReport) -> Result<(), LoadError> {
        let query = format!(
            "INSERT INTO {} (run_id, total_registros, total_ceps, total_linhas, versao_edne, \
             duracao_ms, observacoes, iniciado_em, finalizado_em) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
            self.qualified(REPORT_TABLE)
        );

        sqlx::query(&query)
            .bind(report.run_id)
            .bind(to_i64(report.total_records))
            .bind(to_i64(report.total_postal_codes))
            .bind(to_i64(report.total_lines_processed))
            .bind(report.dataset_version.as_deref())
            .bind(to_i64(report.duration_ms()))
            .bind(report.notes.as_deref())
            .bind(report.started_at)
            .bind(report.finished_at)
            .execute(&self.pool)
            .await?;

        Ok(())
    }
}

fn to_i64(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

fn column_list(dataset: &DatasetDescriptor) -> String {
    dataset
        .columns
        .iter()
        .map(|c| c.name)
        .collect::<Vec<_>>()
        .join(", ")
}

/// `ON CONFLICT` tail for an upsert. Tables made only of key columns have
/// nothing to update.
fn conflict_clause(dataset: &DatasetDescriptor) -> String {
    let updates = dataset
        .columns
        .iter()
        .filter(|c| !dataset.primary_key.contains(&c.name))
        .map(|c| format!("{0} = EXCLUDED.{0}", c.name))
        .collect::<Vec<_>>();

    let target = dataset.primary_key.join(", ");
    if updates.is_empty() {
        format!(" ON CONFLICT ({}) DO NOTHING", target)
    } else {
        format!(" ON CONFLICT ({}) DO UPDATE SET {}", target, updates.join(", "))
    }
}

/// Postgres refuses to touch the same row twice in one `ON CONFLICT DO
/// UPDATE`. Later rows win, at the position of the first occurrence.
fn dedupe_by_key(dataset: &DatasetDescriptor, rows: Vec<Row>) -> Vec<Row> {
    let keys = dataset.key_indices();
    let mut slots: HashMap<Vec<FieldValue>, usize> = HashMap::with_capacity(rows.len());
    let mut unique: Vec<Row> = Vec::with_capacity(rows.len());

    for row in rows {
        let key: Vec<FieldValue> = keys.iter().map(|&i| row[i].clone()).collect();
        match slots.get(&key) {
            Some(&slot) => unique[slot] = row,
            None => {
                slots.insert(key, unique.len());
                unique.push(row);
            },
        }
    }
    unique
}

/// Appends one row in COPY text format: tab separated, `\N` for null,
/// backslash escapes for the characters the format reserves.
fn encode_copy_row(row: &Row, out: &mut Vec<u8>) {
    for (i, value) in row.iter().enumerate() {
        if i > 0 {
            out.push(b'\t');
        }
        match value {
            FieldValue::Null => out.extend_from_slice(b"\\N"),
            FieldValue::Integer(n) => out.extend_from_slice(n.to_string().as_bytes()),
            FieldValue::Text(s) => {
                for byte in s.bytes() {
                    match byte {
                        b'\\' => out.extend_from_slice(b"\\\\"),
                        b'\t' => out.extend_from_slice(b"\\t"),
                        b'\n' => out.extend_from_slice(b"\\n"),
                        b'\r' => out.extend_from_slice(b"\\r"),
                        other => out.push(other),
                    }
                }
            },
        }
    }
    out.push(b'\n');
}
