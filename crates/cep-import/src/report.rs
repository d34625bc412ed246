//! Final run summary.

use cep_common::{format_count, format_elapsed};
use chrono::{DateTime, Utc};
use serde::{Serialize, Serializer};
use std::fmt;
use std::time::Duration;
use uuid::Uuid;

/// Per-dataset line count of a successful run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DatasetSummary {
    pub dataset: &'static str,
    pub table: &'static str,
    pub files: usize,
    pub lines: u64,
}

/// What a completed import produced. Built only when every dataset succeeded.
#[derive(Debug, Clone, Serialize)]
pub struct ImportReport {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,

    /// Rows across every catalog table, as counted by the store after loading.
    pub total_records: u64,

    /// Distinct CEPs across every table with a `cep` column.
    pub total_postal_codes: u64,

    /// Sum of the progress increments reported by the workers.
    pub total_lines_processed: u64,

    #[serde(rename = "duration_ms", serialize_with = "serialize_millis")]
    pub duration: Duration,

    pub dataset_version: Option<String>,
    pub notes: Option<String>,
    pub datasets: Vec<DatasetSummary>,
}

fn serialize_millis<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_u64(duration_millis(duration))
}

pub(crate) fn duration_millis(duration: &Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

impl ImportReport {
    pub fn duration_ms(&self) -> u64 {
        duration_millis(&self.duration)
    }
}

impl fmt::Display for ImportReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Import {} finished", self.run_id)?;
        if let Some(version) = &self.dataset_version {
            writeln!(f, "  eDNE version:     {}", version)?;
        }
        writeln!(f, "  Total records:    {}", format_count(self.total_records))?;
        writeln!(f, "  Distinct CEPs:    {}", format_count(self.total_postal_codes))?;
        writeln!(f, "  Lines processed:  {}", format_count(self.total_lines_processed))?;
        writeln!(f, "  Elapsed:          {}", format_elapsed(self.duration))?;

        if !self.datasets.is_empty() {
            writeln!(f)?;
            for summary in &self.datasets {
                writeln!(
                    f,
                    "  {:<22} {:>12} lines  {:>3} file(s)  -> {}",
                    summary.dataset,
                    format_count(summary.lines),
                    summary.files,
                    summary.table
                )?;
            }
        }

        if let Some(notes) = &self.notes {
            writeln!(f)?;
            writeln!(f, "  Notes: {}", notes)?;
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn sample() -> ImportReport {
        let now = Utc::now();
        ImportReport {
            run_id: Uuid::nil(),
            started_at: now,
            finished_at: now,
            total_records: 1_234_567,
            total_postal_codes: 987_654,
            total_lines_processed: 1_234_567,
            duration: Duration::from_millis(83_456),
            dataset_version: Some("2411".to_string()),
            notes: None,
            datasets: vec![DatasetSummary {
                dataset: "LOG_LOGRADOURO",
                table: "log_logradouro",
                files: 27,
                lines: 1_100_000,
            }],
        }
    }

    #[test]
    fn test_summary_uses_grouped_numbers() {
        let text = sample().to_string();
        assert!(text.contains("1.234.567"));
        assert!(text.contains("987.654"));
        assert!(text.contains("1m23.456s"));
        assert!(text.contains("LOG_LOGRADOURO"));
        assert!(!text.contains("Notes"));
    }

    #[test]
    fn test_json_carries_millis() {
        let value = serde_json::to_value(sample()).unwrap();
        assert_eq!(value["duration_ms"], 83_456);
        assert_eq!(value["total_postal_codes"], 987_654);
        assert_eq!(value["datasets"][0]["files"], 27);
    }
}
