use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// How severe a validation rule failure is.
///
/// Errors block the row and count toward thresholds; warnings are recorded
/// on the result but never block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
}

/// A single rule or coercion failure on one column of one row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationFailure {
    pub column: String,
    pub rule: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub actual: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expected: Option<String>,
    pub message: String,
    pub severity: Severity,
}

impl ValidationFailure {
    pub fn error(column: &str, rule: &str, message: String) -> Self {
        Self {
            column: column.to_string(),
            rule: rule.to_string(),
            actual: None,
            expected: None,
            message,
            severity: Severity::Error,
        }
    }

    pub fn with_actual(mut self, actual: String) -> Self {
        self.actual = Some(actual);
        self
    }

    pub fn with_expected(mut self, expected: String) -> Self {
        self.expected = Some(expected);
        self
    }
}

/// A row diverted to the rejection audit trail instead of staging
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RejectedRow {
    pub load_run_id: Uuid,
    pub extract_type: String,
    pub row_number: Option<i64>,
    pub source_row_id: Option<String>,
    pub reason: String,
    pub failures: Vec<ValidationFailure>,
    pub raw_data: serde_json::Value,
    pub rejected_at: DateTime<Utc>,
}

/// Outcome of one multi-row INSERT/UPSERT statement
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchResult {
    pub batch_number: usize,
    pub success: bool,
    pub rows_inserted: u64,
    pub duration_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Whether a retry with backoff could succeed (transient failure)
    #[serde(default)]
    pub retryable: bool,
}

impl BatchResult {
    pub fn success(batch_number: usize, rows_inserted: u64, duration_ms: u64) -> Self {
        Self {
            batch_number,
            success: true,
            rows_inserted,
            duration_ms,
            error: None,
            retryable: false,
        }
    }

    pub fn failure(batch_number: usize, error: String, retryable: bool) -> Self {
        Self {
            batch_number,
            success: false,
            rows_inserted: 0,
            duration_ms: 0,
            error: Some(error),
            retryable,
        }
    }
}

/// Outcome of loading one file into its raw table
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoadResult {
    pub total_rows: u64,
    pub successful_batches: usize,
    pub failed_batches: usize,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    pub duration_ms: u64,
    pub bytes_processed: u64,
    /// Peak rows buffered between parser and executor - the backpressure bound
    pub peak_buffered_rows: usize,
}

impl LoadResult {
    /// Empty result for a file skipped by the idempotency gate
    pub fn skipped(warning: String) -> Self {
        Self {
            warnings: vec![warning],
            ..Default::default()
        }
    }

    pub fn rows_per_second(&self) -> f64 {
        if self.duration_ms == 0 {
            return 0.0;
        }
        self.total_rows as f64 / (self.duration_ms as f64 / 1000.0)
    }
}

/// Outcome of one raw→staging transformation run for an extract.
///
/// Serialised in full into `etl.staging_runs.result_json` so a completed run
/// can be replayed without touching the staging tables again.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TransformResult {
    pub staging_run_id: Option<Uuid>,
    pub rows_read: u64,
    pub rows_transformed: u64,
    pub rows_rejected: u64,
    pub rows_deduplicated: u64,
    pub successful_batches: usize,
    pub failed_batches: usize,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    pub duration_ms: u64,
}

impl TransformResult {
    pub fn rows_per_second(&self) -> f64 {
        if self.duration_ms == 0 {
            return 0.0;
        }
        self.rows_read as f64 / (self.duration_ms as f64 / 1000.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_result_rate() {
        let result = LoadResult {
            total_rows: 5_000,
            duration_ms: 2_000,
            ..Default::default()
        };
        assert_eq!(result.rows_per_second(), 2_500.0);

        let empty = LoadResult::default();
        assert_eq!(empty.rows_per_second(), 0.0);
    }

    #[test]
    fn test_skipped_result_is_empty_with_warning() {
        let result = LoadResult::skipped("already processed".to_string());
        assert_eq!(result.total_rows, 0);
        assert_eq!(result.successful_batches, 0);
        assert_eq!(result.warnings, vec!["already processed".to_string()]);
    }

    #[test]
    fn test_transform_result_round_trips_through_json() {
        let result = TransformResult {
            staging_run_id: Some(Uuid::new_v4()),
            rows_read: 100,
            rows_transformed: 90,
            rows_rejected: 8,
            rows_deduplicated: 2,
            successful_batches: 1,
            failed_batches: 0,
            errors: vec![],
            warnings: vec!["field truncated".to_string()],
            duration_ms: 1234,
        };

        let json = serde_json::to_string(&result).unwrap();
        let back: TransformResult = serde_json::from_str(&json).unwrap();
        assert_eq!(back.rows_read, result.rows_read);
        assert_eq!(back.rows_deduplicated, result.rows_deduplicated);
        assert_eq!(back.staging_run_id, result.staging_run_id);
        assert_eq!(back.warnings, result.warnings);
    }

    #[test]
    fn test_validation_failure_builder() {
        let failure = ValidationFailure::error("nhi", "pattern", "does not match".to_string())
            .with_actual("zzz1".to_string())
            .with_expected("^[A-Z]{3}\\d{4}$".to_string());
        assert_eq!(failure.severity, Severity::Error);
        assert_eq!(failure.actual.as_deref(), Some("zzz1"));
    }
}
