//! Run bookkeeping and idempotency.
//!
//! Load runs and staging runs follow the lifecycles in the run records;
//! the `load_run_files` ledger doubles as the idempotency store. A file is
//! "already ingested" when any ledger row with the same
//! (bucket, key, version_id, content_hash) is marked processed.

use chrono::Utc;
use sqlx::Row;
use tracing::{debug, info};
use uuid::Uuid;

use crate::errors::{EtlError, EtlResult};
use crate::types::{
    DiscoveredFile, FileIngestRecord, LoadRun, LoadRunStatus, RunTrigger, StagingRun,
    StagingRunStatus, TransformResult,
};

use super::DbPool;

#[derive(Clone)]
pub struct RunStore {
    pool: DbPool,
}

impl RunStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    // ------------------------------------------------------------------
    // Load runs
    // ------------------------------------------------------------------

    pub async fn create_load_run(
        &self,
        trigger: RunTrigger,
        notes: Option<&str>,
    ) -> EtlResult<LoadRun> {
        let run = LoadRun {
            load_run_id: Uuid::new_v4(),
            started_at: Utc::now(),
            completed_at: None,
            status: LoadRunStatus::Running,
            trigger,
            total_files: 0,
            total_rows: 0,
            notes: notes.map(str::to_string),
        };

        sqlx::query(
            "INSERT INTO etl.load_runs \
             (load_run_id, started_at, status, run_trigger, total_files, total_rows, notes) \
             VALUES ($1, $2, $3, $4, $5, $6, $7)",
        )
        .bind(run.load_run_id)
        .bind(run.started_at)
        .bind(run.status.as_str())
        .bind(run.trigger.as_str())
        .bind(run.total_files)
        .bind(run.total_rows)
        .bind(run.notes.as_deref())
        .execute(self.pool.inner())
        .await?;

        info!(load_run_id = %run.load_run_id, trigger = run.trigger.as_str(), "load run created");
        Ok(run)
    }

    /// Terminal transition for a load run; totals are recorded alongside.
    pub async fn finish_load_run(
        &self,
        load_run_id: Uuid,
        status: LoadRunStatus,
        total_files: i64,
        total_rows: i64,
        notes: Option<&str>,
    ) -> EtlResult<()> {
        if status == LoadRunStatus::Running {
            return Err(EtlError::RunState(
                "finish_load_run cannot transition to running".to_string(),
            ));
        }
        sqlx::query(
            "UPDATE etl.load_runs SET status = $2, completed_at = $3, total_files = $4, \
             total_rows = $5, notes = COALESCE($6, notes) WHERE load_run_id = $1",
        )
        .bind(load_run_id)
        .bind(status.as_str())
        .bind(Utc::now())
        .bind(total_files)
        .bind(total_rows)
        .bind(notes)
        .execute(self.pool.inner())
        .await?;

        info!(load_run_id = %load_run_id, status = status.as_str(), "load run finished");
        Ok(())
    }

    pub async fn get_load_run(&self, load_run_id: Uuid) -> EtlResult<Option<LoadRun>> {
        let row = sqlx::query(
            "SELECT load_run_id, started_at, completed_at, status, run_trigger, \
             total_files, total_rows, notes FROM etl.load_runs WHERE load_run_id = $1",
        )
        .bind(load_run_id)
        .fetch_optional(self.pool.inner())
        .await?;

        row.map(|row| {
            let status: String = row.try_get("status")?;
            let trigger: String = row.try_get("run_trigger")?;
            Ok(LoadRun {
                load_run_id: row.try_get("load_run_id")?,
                started_at: row.try_get("started_at")?,
                completed_at: row.try_get("completed_at")?,
                status: LoadRunStatus::parse(&status)
                    .ok_or_else(|| EtlError::RunState(format!("unknown status {}", status)))?,
                trigger: match trigger.as_str() {
                    "scheduled" => RunTrigger::Scheduled,
                    "backfill" => RunTrigger::Backfill,
                    _ => RunTrigger::Manual,
                },
                total_files: row.try_get("total_files")?,
                total_rows: row.try_get("total_rows")?,
                notes: row.try_get("notes")?,
            })
        })
        .transpose()
    }

    // ------------------------------------------------------------------
    // File ledger / idempotency
    // ------------------------------------------------------------------

    /// Is this exact file content already fully ingested?
    pub async fn is_file_processed(&self, file: &DiscoveredFile) -> EtlResult<bool> {
        let processed: Option<bool> = sqlx::query_scalar(
            "SELECT TRUE FROM etl.load_run_files \
             WHERE bucket = $1 AND key = $2 AND version_id = $3 AND content_hash = $4 \
             AND is_processed LIMIT 1",
        )
        .bind(&file.bucket)
        .bind(&file.key)
        .bind(&file.version_id)
        .bind(&file.content_hash)
        .fetch_optional(self.pool.inner())
        .await?;
        Ok(processed.unwrap_or(false))
    }

    /// Open a ledger row for this file under the run; the returned id is the
    /// lineage FK stamped onto every raw row of the file.
    pub async fn begin_file(&self, load_run_id: Uuid, file: &DiscoveredFile) -> EtlResult<i64> {
        let id: i64 = sqlx::query_scalar(
            "INSERT INTO etl.load_run_files \
             (load_run_id, bucket, key, version_id, content_hash, extract_type, extracted_date) \
             VALUES ($1, $2, $3, $4, $5, $6, $7) RETURNING id",
        )
        .bind(load_run_id)
        .bind(&file.bucket)
        .bind(&file.key)
        .bind(&file.version_id)
        .bind(&file.content_hash)
        .bind(&file.extract_type)
        .bind(file.extracted_date)
        .fetch_one(self.pool.inner())
        .await?;

        debug!(load_run_file_id = id, key = %file.key, "file ledger row opened");
        Ok(id)
    }

    pub async fn mark_file_completed(&self, load_run_file_id: i64, row_count: i64) -> EtlResult<()> {
        sqlx::query(
            "UPDATE etl.load_run_files SET is_processed = TRUE, processed_at = $2, \
             row_count = $3, last_error = NULL WHERE id = $1",
        )
        .bind(load_run_file_id)
        .bind(Utc::now())
        .bind(row_count)
        .execute(self.pool.inner())
        .await?;
        Ok(())
    }

    /// Record a per-file fatal error; the row stays unprocessed so a
    /// restart re-ingests the whole file under a new ledger row.
    pub async fn mark_file_error(&self, load_run_file_id: i64, error: &str) -> EtlResult<()> {
        sqlx::query("UPDATE etl.load_run_files SET last_error = $2 WHERE id = $1")
            .bind(load_run_file_id)
            .bind(error)
            .execute(self.pool.inner())
            .await?;
        Ok(())
    }

    /// Lineage FKs of all processed files for an extract under a load run -
    /// the raw-table filter for the staging transform.
    pub async fn processed_file_ids(
        &self,
        load_run_id: Uuid,
        extract_type: &str,
    ) -> EtlResult<Vec<i64>> {
        let ids: Vec<i64> = sqlx::query_scalar(
            "SELECT id FROM etl.load_run_files \
             WHERE load_run_id = $1 AND extract_type = $2 AND is_processed ORDER BY id",
        )
        .bind(load_run_id)
        .bind(extract_type)
        .fetch_all(self.pool.inner())
        .await?;
        Ok(ids)
    }

    pub async fn files_for_run(&self, load_run_id: Uuid) -> EtlResult<Vec<FileIngestRecord>> {
        let rows = sqlx::query(
            "SELECT id, load_run_id, bucket, key, version_id, content_hash, extract_type, \
             extracted_date, is_processed, processed_at, row_count, last_error \
             FROM etl.load_run_files WHERE load_run_id = $1 ORDER BY id",
        )
        .bind(load_run_id)
        .fetch_all(self.pool.inner())
        .await?;

        rows.into_iter()
            .map(|row| {
                Ok(FileIngestRecord {
                    id: row.try_get("id")?,
                    load_run_id: row.try_get("load_run_id")?,
                    bucket: row.try_get("bucket")?,
                    key: row.try_get("key")?,
                    version_id: row.try_get("version_id")?,
                    content_hash: row.try_get("content_hash")?,
                    extract_type: row.try_get("extract_type")?,
                    extracted_date: row.try_get("extracted_date")?,
                    is_processed: row.try_get("is_processed")?,
                    processed_at: row.try_get("processed_at")?,
                    row_count: row.try_get("row_count")?,
                    last_error: row.try_get("last_error")?,
                })
            })
            .collect()
    }

    // ------------------------------------------------------------------
    // Staging runs
    // ------------------------------------------------------------------

    /// The completed staging run for (load_run_id, extract_type), if one
    /// exists - the replay gate for idempotent transforms.
    pub async fn find_completed_staging_run(
        &self,
        load_run_id: Uuid,
        extract_type: &str,
    ) -> EtlResult<Option<StagingRun>> {
        let row = sqlx::query(
            "SELECT staging_run_id, load_run_id, extract_type, source_table, target_table, \
             started_at, completed_at, status, rows_read, rows_transformed, rows_rejected, \
             error, result_json \
             FROM etl.staging_runs WHERE load_run_id = $1 AND extract_type = $2 AND status = $3",
        )
        .bind(load_run_id)
        .bind(extract_type)
        .bind(StagingRunStatus::Completed.as_str())
        .fetch_optional(self.pool.inner())
        .await?;

        row.map(|row| {
            let status: String = row.try_get("status")?;
            Ok(StagingRun {
                staging_run_id: row.try_get("staging_run_id")?,
                load_run_id: row.try_get("load_run_id")?,
                extract_type: row.try_get("extract_type")?,
                source_table: row.try_get("source_table")?,
                target_table: row.try_get("target_table")?,
                started_at: row.try_get("started_at")?,
                completed_at: row.try_get("completed_at")?,
                status: StagingRunStatus::parse(&status)
                    .ok_or_else(|| EtlError::RunState(format!("unknown status {}", status)))?,
                rows_read: row.try_get("rows_read")?,
                rows_transformed: row.try_get("rows_transformed")?,
                rows_rejected: row.try_get("rows_rejected")?,
                error: row.try_get("error")?,
                result_json: row.try_get("result_json")?,
            })
        })
        .transpose()
    }

    /// Insert (or reset, after a failure) the staging run row for this
    /// (load_run_id, extract_type) and mark it running.
    pub async fn begin_staging_run(
        &self,
        load_run_id: Uuid,
        extract_type: &str,
        source_table: &str,
        target_table: &str,
    ) -> EtlResult<Uuid> {
        let staging_run_id: Uuid = sqlx::query_scalar(
            "INSERT INTO etl.staging_runs \
             (staging_run_id, load_run_id, extract_type, source_table, target_table, \
              started_at, status) \
             VALUES ($1, $2, $3, $4, $5, $6, $7) \
             ON CONFLICT (load_run_id, extract_type) DO UPDATE SET \
               started_at = EXCLUDED.started_at, status = EXCLUDED.status, \
               completed_at = NULL, error = NULL, result_json = NULL \
             RETURNING staging_run_id",
        )
        .bind(Uuid::new_v4())
        .bind(load_run_id)
        .bind(extract_type)
        .bind(source_table)
        .bind(target_table)
        .bind(Utc::now())
        .bind(StagingRunStatus::Running.as_str())
        .fetch_one(self.pool.inner())
        .await?;

        info!(%staging_run_id, extract_type, "staging run started");
        Ok(staging_run_id)
    }

    /// Mark completed, storing the full result for replay.
    pub async fn complete_staging_run(
        &self,
        staging_run_id: Uuid,
        result: &TransformResult,
    ) -> EtlResult<()> {
        let result_json = serde_json::to_value(result)?;
        sqlx::query(
            "UPDATE etl.staging_runs SET status = $2, completed_at = $3, rows_read = $4, \
             rows_transformed = $5, rows_rejected = $6, result_json = $7 \
             WHERE staging_run_id = $1",
        )
        .bind(staging_run_id)
        .bind(StagingRunStatus::Completed.as_str())
        .bind(Utc::now())
        .bind(result.rows_read as i64)
        .bind(result.rows_transformed as i64)
        .bind(result.rows_rejected as i64)
        .bind(result_json)
        .execute(self.pool.inner())
        .await?;
        Ok(())
    }

    pub async fn fail_staging_run(&self, staging_run_id: Uuid, error: &str) -> EtlResult<()> {
        sqlx::query(
            "UPDATE etl.staging_runs SET status = $2, completed_at = $3, error = $4 \
             WHERE staging_run_id = $1",
        )
        .bind(staging_run_id)
        .bind(StagingRunStatus::Failed.as_str())
        .bind(Utc::now())
        .bind(error)
        .execute(self.pool.inner())
        .await?;
        Ok(())
    }
}
