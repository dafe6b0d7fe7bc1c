//! Parameterised queries over raw landing tables.
//!
//! All filtering is by lineage FK (`load_run_file_id`), singular or IN-list,
//! with positional parameters counted deterministically: file ids first,
//! then LIMIT, then OFFSET. Pagination is LIMIT/OFFSET over the surrogate
//! key; the scan is only stable while the raw table is quiescent, which the
//! staging transform assumes for the duration of a run.

use sqlx::Row;

use crate::errors::{EtlError, EtlResult};
use crate::types::RawRecord;

use super::DbPool;

/// Builds and executes SELECT / COUNT / cursor statements for one raw table
#[derive(Clone)]
pub struct RawQueryBuilder {
    table: String,
    /// Data columns in handler-declared order (surrogate key excluded)
    columns: Vec<String>,
}

impl RawQueryBuilder {
    pub fn new(table: &str, columns: &[String]) -> Self {
        Self {
            table: table.to_string(),
            columns: columns.to_vec(),
        }
    }

    fn file_id_predicate(file_id_count: usize) -> EtlResult<String> {
        if file_id_count == 0 {
            return Err(EtlError::InvalidBatch(
                "raw query needs at least one load_run_file_id".to_string(),
            ));
        }
        if file_id_count == 1 {
            return Ok("load_run_file_id = $1".to_string());
        }
        let placeholders: Vec<String> = (1..=file_id_count).map(|i| format!("${}", i)).collect();
        Ok(format!("load_run_file_id IN ({})", placeholders.join(", ")))
    }

    /// Paged SELECT. Parameters: file ids, then LIMIT, then OFFSET.
    /// `where_fragment` is an optional parameter-free SQL condition ANDed on.
    pub fn select_page_sql(
        &self,
        file_id_count: usize,
        where_fragment: Option<&str>,
        order_by: Option<&str>,
    ) -> EtlResult<String> {
        let predicate = Self::file_id_predicate(file_id_count)?;
        let mut sql = format!(
            "SELECT raw_id, load_run_file_id, {} FROM {} WHERE {}",
            self.columns.join(", "),
            self.table,
            predicate
        );
        if let Some(fragment) = where_fragment {
            sql.push_str(" AND (");
            sql.push_str(fragment);
            sql.push(')');
        }
        sql.push_str(" ORDER BY ");
        sql.push_str(order_by.unwrap_or("raw_id"));
        sql.push_str(&format!(
            " LIMIT ${} OFFSET ${}",
            file_id_count + 1,
            file_id_count + 2
        ));
        Ok(sql)
    }

    pub fn count_sql(&self, file_id_count: usize) -> EtlResult<String> {
        let predicate = Self::file_id_predicate(file_id_count)?;
        Ok(format!(
            "SELECT COUNT(*) FROM {} WHERE {}",
            self.table, predicate
        ))
    }

    /// DECLARE/FETCH/CLOSE triple for large scans on one connection
    pub fn declare_cursor_sql(&self, cursor: &str, file_id_count: usize) -> EtlResult<String> {
        let predicate = Self::file_id_predicate(file_id_count)?;
        Ok(format!(
            "DECLARE {} NO SCROLL CURSOR FOR SELECT raw_id, load_run_file_id, {} FROM {} WHERE {} ORDER BY raw_id",
            cursor,
            self.columns.join(", "),
            self.table,
            predicate
        ))
    }

    pub fn fetch_cursor_sql(cursor: &str, fetch_size: usize) -> String {
        format!("FETCH {} FROM {}", fetch_size, cursor)
    }

    pub fn close_cursor_sql(cursor: &str) -> String {
        format!("CLOSE {}", cursor)
    }

    /// Count rows landed under the given lineage FKs
    pub async fn count_rows(&self, pool: &DbPool, file_ids: &[i64]) -> EtlResult<i64> {
        let sql = self.count_sql(file_ids.len())?;
        let mut query = sqlx::query_scalar::<_, i64>(&sql);
        for id in file_ids {
            query = query.bind(id);
        }
        Ok(query.fetch_one(pool.inner()).await?)
    }

    /// Fetch one page of raw records in declared column order
    pub async fn fetch_page(
        &self,
        pool: &DbPool,
        file_ids: &[i64],
        limit: i64,
        offset: i64,
    ) -> EtlResult<Vec<RawRecord>> {
        let sql = self.select_page_sql(file_ids.len(), None, None)?;
        let mut query = sqlx::query(&sql);
        for id in file_ids {
            query = query.bind(id);
        }
        query = query.bind(limit).bind(offset);

        let rows = query.fetch_all(pool.inner()).await?;
        let mut records = Vec::with_capacity(rows.len());
        for row in rows {
            let id: i64 = row.try_get(0)?;
            let file_id: i64 = row.try_get(1)?;
            let mut fields = Vec::with_capacity(self.columns.len());
            for i in 0..self.columns.len() {
                fields.push(row.try_get::<Option<String>, _>(i + 2)?);
            }
            records.push(RawRecord { id, file_id, fields });
        }
        Ok(records)
    }
}
