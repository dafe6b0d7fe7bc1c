//! Typed upserts into staging tables.
//!
//! Staging rows carry the lineage FK and a fresh `load_ts` ahead of the
//! transformed columns. Conflict target is the extract's natural key; every
//! other column updates from EXCLUDED so re-runs converge on the newest data.

use std::time::Instant;

use chrono::{DateTime, Utc};
use sqlx::postgres::PgArguments;
use sqlx::query::Query;
use sqlx::Postgres;
use tracing::{debug, warn};

use crate::errors::EtlError;
use crate::staging::transform::{TargetType, TypedValue};
use crate::types::BatchResult;

use super::batch::{build_insert_sql, PARAM_BUDGET};
use super::DbPool;

/// Build the upsert statement:
/// `INSERT ... VALUES ... ON CONFLICT (<keys>) DO UPDATE SET col = EXCLUDED.col`
/// for every non-conflict column. With no updatable columns it degrades to
/// DO NOTHING.
pub fn build_upsert_sql(
    table: &str,
    columns: &[String],
    conflict_columns: &[String],
    row_count: usize,
) -> String {
    let mut sql = build_insert_sql(table, columns, row_count);

    if conflict_columns.is_empty() {
        return sql;
    }

    let updatable: Vec<&String> = columns
        .iter()
        .filter(|c| !conflict_columns.contains(c))
        .collect();

    sql.push_str(" ON CONFLICT (");
    sql.push_str(&conflict_columns.join(", "));
    sql.push(')');

    if updatable.is_empty() {
        sql.push_str(" DO NOTHING");
    } else {
        sql.push_str(" DO UPDATE SET ");
        let assignments: Vec<String> = updatable
            .iter()
            .map(|c| format!("{} = EXCLUDED.{}", c, c))
            .collect();
        sql.push_str(&assignments.join(", "));
    }
    sql
}

/// Bind one typed value. NULLs bind with the column's SQL type so the
/// server never has to cast a text NULL into a typed column.
fn bind_value<'q>(
    query: Query<'q, Postgres, PgArguments>,
    value: TypedValue,
    target_type: TargetType,
) -> Query<'q, Postgres, PgArguments> {
    match value {
        TypedValue::Null => match target_type {
            TargetType::Text => query.bind(Option::<String>::None),
            TargetType::Integer => query.bind(Option::<i64>::None),
            TargetType::Decimal => query.bind(Option::<f64>::None),
            TargetType::Boolean => query.bind(Option::<bool>::None),
            TargetType::Date => query.bind(Option::<chrono::NaiveDate>::None),
            TargetType::Timestamp => query.bind(Option::<DateTime<Utc>>::None),
            TargetType::Uuid => query.bind(Option::<uuid::Uuid>::None),
            TargetType::Json => query.bind(Option::<serde_json::Value>::None),
        },
        TypedValue::Text(s) => query.bind(s),
        TypedValue::Integer(i) => query.bind(i),
        TypedValue::Decimal(d) => query.bind(d),
        TypedValue::Boolean(b) => query.bind(b),
        TypedValue::Date(d) => query.bind(d),
        TypedValue::Timestamp(t) => query.bind(t),
        TypedValue::Uuid(u) => query.bind(u),
        TypedValue::Json(j) => query.bind(j),
    }
}

/// Executes staging upserts with lineage embedded per row
#[derive(Clone)]
pub struct StagingLoader {
    pool: DbPool,
}

impl StagingLoader {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Upsert one batch of transformed rows in a single transaction.
    ///
    /// `data_columns` pairs each target column with its SQL type, in the
    /// same order as every row's values. Each row carries its own lineage
    /// FK (a batch can span source files). `conflict_columns` must be
    /// covered by a unique constraint on the target table.
    pub async fn upsert_batch(
        &self,
        table: &str,
        data_columns: &[(String, TargetType)],
        conflict_columns: &[String],
        rows: Vec<(i64, Vec<TypedValue>)>,
        batch_number: usize,
    ) -> BatchResult {
        if rows.is_empty() {
            return BatchResult::success(batch_number, 0, 0);
        }
        for (i, (_, row)) in rows.iter().enumerate() {
            if row.len() != data_columns.len() {
                return BatchResult::failure(
                    batch_number,
                    format!(
                        "row {} has {} values, expected {}",
                        i,
                        row.len(),
                        data_columns.len()
                    ),
                    false,
                );
            }
        }

        // Lineage FK and load_ts lead every row
        let mut columns: Vec<String> = vec!["load_run_file_id".to_string(), "load_ts".to_string()];
        columns.extend(data_columns.iter().map(|(c, _)| c.clone()));

        let param_count = columns.len() * rows.len();
        if param_count > PARAM_BUDGET {
            return BatchResult::failure(
                batch_number,
                EtlError::InvalidBatch(format!(
                    "upsert needs {} parameters, budget is {}",
                    param_count, PARAM_BUDGET
                ))
                .to_string(),
                false,
            );
        }

        let sql = build_upsert_sql(table, &columns, conflict_columns, rows.len());
        let load_ts = Utc::now();
        let started = Instant::now();

        let result: Result<u64, EtlError> = async {
            let mut tx = self.pool.begin().await?;
            let mut query = sqlx::query(&sql);
            for (lineage_fk, row) in rows {
                query = query.bind(lineage_fk).bind(load_ts);
                for (value, (_, target_type)) in row.into_iter().zip(data_columns.iter()) {
                    query = bind_value(query, value, *target_type);
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
                debug!(table, batch_number, rows_inserted, "staging batch upserted");
                BatchResult::success(batch_number, rows_inserted, duration_ms)
            }
            Err(e) => {
                let retryable = e.is_retryable();
                warn!(table, batch_number, retryable, error = %e, "staging upsert failed");
                BatchResult::failure(batch_number, e.to_string(), retryable)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cols(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_upsert_sql_shape() {
        let columns = cols(&["load_run_file_id", "load_ts", "patient_id", "practice_id", "name"]);
        let conflict = cols(&["patient_id", "practice_id"]);
        let sql = build_upsert_sql("stg.patients", &columns, &conflict, 2);

        assert!(sql.starts_with(
            "INSERT INTO stg.patients (load_run_file_id, load_ts, patient_id, practice_id, name) VALUES "
        ));
        assert!(sql.contains("($1, $2, $3, $4, $5), ($6, $7, $8, $9, $10)"));
        assert!(sql.contains("ON CONFLICT (patient_id, practice_id) DO UPDATE SET"));
        // Conflict columns never appear on the update side
        assert!(sql.contains("load_run_file_id = EXCLUDED.load_run_file_id"));
        assert!(sql.contains("load_ts = EXCLUDED.load_ts"));
        assert!(sql.contains("name = EXCLUDED.name"));
        assert!(!sql.contains("patient_id = EXCLUDED.patient_id"));
    }

    #[test]
    fn test_upsert_without_conflict_is_plain_insert() {
        let columns = cols(&["a", "b"]);
        let sql = build_upsert_sql("stg.t", &columns, &[], 1);
        assert_eq!(sql, "INSERT INTO stg.t (a, b) VALUES ($1, $2)");
    }

    #[test]
    fn test_upsert_all_conflict_columns_does_nothing() {
        let columns = cols(&["a", "b"]);
        let sql = build_upsert_sql("stg.t", &columns, &cols(&["a", "b"]), 1);
        assert!(sql.ends_with("ON CONFLICT (a, b) DO NOTHING"));
    }
}
