//! Multi-row INSERT building under PostgreSQL's parameter ceiling.
//!
//! PostgreSQL caps bind parameters at 65,535 per statement. Batches are
//! sized against a 60,000 budget so a batch can never be rejected by the
//! server for parameter count, whatever the column count.

use std::time::Instant;

use tracing::{debug, warn};

use crate::errors::{EtlError, EtlResult};
use crate::types::BatchResult;

use super::DbPool;

/// Hard server-side limit on bind parameters per statement
pub const PG_PARAM_LIMIT: usize = 65_535;

/// Working budget, kept below the hard limit
pub const PARAM_BUDGET: usize = 60_000;

/// Most rows a single statement can carry for a given column count
pub fn max_rows_per_statement(column_count: usize) -> usize {
    if column_count == 0 {
        return 0;
    }
    PARAM_BUDGET / column_count
}

/// Requested batch size capped to what one statement can hold
pub fn calculate_optimal_batch_size(column_count: usize, requested_batch_size: usize) -> usize {
    requested_batch_size.min(max_rows_per_statement(column_count))
}

/// `INSERT INTO table (cols) VALUES ($1,..),($n,..)` with one placeholder
/// group per row, numbered row-major.
pub fn build_insert_sql(table: &str, columns: &[String], row_count: usize) -> String {
    let column_list = columns.join(", ");
    let mut sql = format!("INSERT INTO {} ({}) VALUES ", table, column_list);
    let mut param = 1usize;
    for row in 0..row_count {
        if row > 0 {
            sql.push_str(", ");
        }
        sql.push('(');
        for col in 0..columns.len() {
            if col > 0 {
                sql.push_str(", ");
            }
            sql.push('$');
            sql.push_str(&param.to_string());
            param += 1;
        }
        sql.push(')');
    }
    sql
}

/// Reject malformed batches before any SQL is built.
///
/// `column_count` is the full statement width (lineage FK included); each
/// value row must carry exactly `column_count - fixed_columns` entries.
pub fn validate_batch_shape(
    column_count: usize,
    fixed_columns: usize,
    rows: &[Vec<String>],
) -> EtlResult<()> {
    if rows.is_empty() {
        return Err(EtlError::InvalidBatch("batch has no rows".to_string()));
    }
    if column_count == 0 {
        return Err(EtlError::InvalidBatch("batch has no columns".to_string()));
    }
    let expected = column_count - fixed_columns;
    for (i, row) in rows.iter().enumerate() {
        if row.len() != expected {
            return Err(EtlError::InvalidBatch(format!(
                "row {} has {} values, expected {}",
                i,
                row.len(),
                expected
            )));
        }
    }
    let params = column_count * rows.len();
    if params > PARAM_BUDGET {
        return Err(EtlError::InvalidBatch(format!(
            "batch needs {} parameters, budget is {} ({} columns x {} rows)",
            params,
            PARAM_BUDGET,
            column_count,
            rows.len()
        )));
    }
    Ok(())
}

/// Executes raw-layer batches: verbatim text values behind a lineage FK
#[derive(Clone)]
pub struct BatchLoader {
    pool: DbPool,
}

impl BatchLoader {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Insert one batch of raw rows in a single transaction.
    ///
    /// `columns` is the full raw column list starting with the lineage FK;
    /// `rows` carry only the text values, the FK is bound per row from
    /// `lineage_fk`. Never retries internally - the caller owns retry policy.
    pub async fn insert_raw_batch(
        &self,
        table: &str,
        columns: &[String],
        lineage_fk: i64,
        rows: &[Vec<String>],
        batch_number: usize,
    ) -> BatchResult {
        if let Err(e) = validate_batch_shape(columns.len(), 1, rows) {
            return BatchResult::failure(batch_number, e.to_string(), false);
        }

        let started = Instant::now();
        let sql = build_insert_sql(table, columns, rows.len());

        // Parameter-count invariant: placeholders == rows x columns
        let expected_params = rows.len() * columns.len();
        debug_assert_eq!(sql.matches('$').count(), expected_params);

        let result: EtlResult<u64> = async {
            let mut tx = self.pool.begin().await?;
            let mut query = sqlx::query(&sql);
            for row in rows {
                query = query.bind(lineage_fk);
                for value in row {
                    query = query.bind(value.as_str());
                }
            }
            let done = query.execute(&mut *tx).await?;
            tx.commit().await?;
            Ok(done.rows_affected())
        }
        .await;

        let duration_ms = started.elapsed().as_millis() as u64;
        match result {
            Ok(rows_inserted) => {
                debug!(
                    table,
                    batch_number, rows_inserted, duration_ms, "raw batch inserted"
                );
                BatchResult::success(batch_number, rows_inserted, duration_ms)
            }
            Err(e) => {
                let retryable = e.is_retryable();
                warn!(
                    table,
                    batch_number,
                    retryable,
                    error = %e,
                    "raw batch insert failed"
                );
                BatchResult::failure(batch_number, e.to_string(), retryable)
            }
        }
    }
}
