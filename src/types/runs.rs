use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle states for a load run: running → completed | failed | cancelled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoadRunStatus {
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl LoadRunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LoadRunStatus::Running => "running",
            LoadRunStatus::Completed => "completed",
            LoadRunStatus::Failed => "failed",
            LoadRunStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "running" => Some(LoadRunStatus::Running),
            "completed" => Some(LoadRunStatus::Completed),
            "failed" => Some(LoadRunStatus::Failed),
            "cancelled" => Some(LoadRunStatus::Cancelled),
            _ => None,
        }
    }
}

/// Lifecycle states for a staging run: running → completed | failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StagingRunStatus {
    Running,
    Completed,
    Failed,
}

impl StagingRunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            StagingRunStatus::Running => "running",
            StagingRunStatus::Completed => "completed",
            StagingRunStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "running" => Some(StagingRunStatus::Running),
            "completed" => Some(StagingRunStatus::Completed),
            "failed" => Some(StagingRunStatus::Failed),
            _ => None,
        }
    }
}

/// What initiated a load run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunTrigger {
    Scheduled,
    Manual,
    Backfill,
}

impl RunTrigger {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunTrigger::Scheduled => "scheduled",
            RunTrigger::Manual => "manual",
            RunTrigger::Backfill => "backfill",
        }
    }
}

/// One row of `etl.load_runs`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoadRun {
    pub load_run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub status: LoadRunStatus,
    pub trigger: RunTrigger,
    pub total_files: i64,
    pub total_rows: i64,
    pub notes: Option<String>,
}

/// One row of `etl.staging_runs`, keyed uniquely by (load_run_id, extract_type)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StagingRun {
    pub staging_run_id: Uuid,
    pub load_run_id: Uuid,
    pub extract_type: String,
    pub source_table: String,
    pub target_table: String,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub status: StagingRunStatus,
    pub rows_read: i64,
    pub rows_transformed: i64,
    pub rows_rejected: i64,
    pub error: Option<String>,
    pub result_json: Option<serde_json::Value>,
}

/// One row of the `etl.load_run_files` ledger.
///
/// Doubles as the idempotency record: the unique key
/// `(bucket, key, version_id, content_hash)` decides whether a file has
/// already been ingested, and `id` is the lineage FK stamped onto raw rows.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileIngestRecord {
    pub id: i64,
    pub load_run_id: Uuid,
    pub bucket: String,
    pub key: String,
    pub version_id: String,
    pub content_hash: String,
    pub extract_type: String,
    pub extracted_date: chrono::NaiveDate,
    pub is_processed: bool,
    pub processed_at: Option<DateTime<Utc>>,
    pub row_count: Option<i64>,
    pub last_error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_string_round_trip() {
        for status in [
            LoadRunStatus::Running,
            LoadRunStatus::Completed,
            LoadRunStatus::Failed,
            LoadRunStatus::Cancelled,
        ] {
            assert_eq!(LoadRunStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(LoadRunStatus::parse("unknown"), None);

        for status in [
            StagingRunStatus::Running,
            StagingRunStatus::Completed,
            StagingRunStatus::Failed,
        ] {
            assert_eq!(StagingRunStatus::parse(status.as_str()), Some(status));
        }
    }
}
