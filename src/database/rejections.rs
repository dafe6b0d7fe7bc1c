//! Rejection audit trail: every row that fails transformation or validation
//! lands in `etl.staging_rejections` with its reason, failure detail and the
//! raw data it came from. Nothing here is ever deleted by the pipeline.

use std::collections::HashMap;

use tracing::{debug, info};

use crate::errors::EtlResult;
use crate::types::RejectedRow;

use super::batch::max_rows_per_statement;
use super::DbPool;

const REJECTION_COLUMNS: usize = 8;

const REJECTION_TABLE_SQL: &[&str] = &[
    "CREATE SCHEMA IF NOT EXISTS etl",
    r#"
    CREATE TABLE IF NOT EXISTS etl.staging_rejections (
        rejection_id        BIGSERIAL PRIMARY KEY,
        load_run_id         UUID NOT NULL,
        extract_type        TEXT NOT NULL,
        row_number          INTEGER,
        source_row_id       TEXT,
        rejection_reason    TEXT NOT NULL,
        validation_failures JSONB,
        raw_data            JSONB,
        rejected_at         TIMESTAMPTZ NOT NULL,
        created_at          TIMESTAMPTZ NOT NULL DEFAULT now()
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_staging_rejections_load_run ON etl.staging_rejections (load_run_id)",
    "CREATE INDEX IF NOT EXISTS idx_staging_rejections_extract ON etl.staging_rejections (extract_type)",
    "CREATE INDEX IF NOT EXISTS idx_staging_rejections_time ON etl.staging_rejections (rejected_at)",
];

/// Aggregated view of a run's rejections
#[derive(Debug, Default)]
pub struct RejectionSummary {
    pub total: usize,
    /// Reason -> count, descending by count
    pub by_reason: Vec<(String, usize)>,
    /// Failing column -> count, descending by count
    pub by_column: Vec<(String, usize)>,
}

impl RejectionSummary {
    /// Build from the in-memory rejection list of one run
    pub fn from_rejections(rejections: &[RejectedRow]) -> Self {
        let mut reasons: HashMap<&str, usize> = HashMap::new();
        let mut columns: HashMap<&str, usize> = HashMap::new();
        for rejection in rejections {
            *reasons.entry(rejection.reason.as_str()).or_default() += 1;
            for failure in &rejection.failures {
                *columns.entry(failure.column.as_str()).or_default() += 1;
            }
        }

        let mut by_reason: Vec<(String, usize)> = reasons
            .into_iter()
            .map(|(r, c)| (r.to_string(), c))
            .collect();
        by_reason.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));

        let mut by_column: Vec<(String, usize)> = columns
            .into_iter()
            .map(|(r, c)| (r.to_string(), c))
            .collect();
        by_column.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));

        Self {
            total: rejections.len(),
            by_reason,
            by_column,
        }
    }

    pub fn top_reasons(&self, n: usize) -> &[(String, usize)] {
        &self.by_reason[..n.min(self.by_reason.len())]
    }
}

/// Stop check used by callers watching the rejection rate climb
pub fn should_stop_on_rejection_rate(total: u64, rejected: u64, max_percent: f64) -> bool {
    if total == 0 {
        return false;
    }
    (rejected as f64 / total as f64) * 100.0 > max_percent
}

/// Writes rejected rows in bulk and owns the rejection table's DDL
#[derive(Clone)]
pub struct RejectionHandler {
    pool: DbPool,
}

impl RejectionHandler {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Create the rejection table and its indexes if missing
    pub async fn ensure_table(&self) -> EtlResult<()> {
        for statement in REJECTION_TABLE_SQL {
            sqlx::query(statement).execute(self.pool.inner()).await?;
        }
        debug!("rejection table ensured");
        Ok(())
    }

    /// Insert rejections in multi-row statements, chunked under the
    /// parameter budget. Each chunk is one transaction.
    pub async fn insert_rejections(&self, rejections: &[RejectedRow]) -> EtlResult<u64> {
        if rejections.is_empty() {
            return Ok(0);
        }

        let chunk_size = max_rows_per_statement(REJECTION_COLUMNS);
        let mut written = 0u64;

        for chunk in rejections.chunks(chunk_size) {
            let mut sql = String::from(
                "INSERT INTO etl.staging_rejections \
                 (load_run_id, extract_type, row_number, source_row_id, \
                  rejection_reason, validation_failures, raw_data, rejected_at) VALUES ",
            );
            let mut param = 1usize;
            for i in 0..chunk.len() {
                if i > 0 {
                    sql.push_str(", ");
                }
                let placeholders: Vec<String> = (0..REJECTION_COLUMNS)
                    .map(|j| format!("${}", param + j))
                    .collect();
                sql.push('(');
                sql.push_str(&placeholders.join(", "));
                sql.push(')');
                param += REJECTION_COLUMNS;
            }

            let mut tx = self.pool.begin().await?;
            let mut query = sqlx::query(&sql);
            for rejection in chunk {
                let failures = serde_json::to_value(&rejection.failures)?;
                query = query
                    .bind(rejection.load_run_id)
                    .bind(rejection.extract_type.as_str())
                    .bind(rejection.row_number.map(|n| n as i32))
                    .bind(rejection.source_row_id.as_deref())
                    .bind(rejection.reason.as_str())
                    .bind(failures)
                    .bind(rejection.raw_data.clone())
                    .bind(rejection.rejected_at);
            }
            let done = query.execute(&mut *tx).await?;
            tx.commit().await?;
            written += done.rows_affected();
        }

        info!(count = written, "rejections written");
        Ok(written)
    }
}
