//! DDL for the pipeline's own bookkeeping tables.
//!
//! Per-extract raw and staging tables are owned by the warehouse schema
//! project, not by the loader; the loader only requires that they exist with
//! the handler-declared columns. The `etl.*` tables here are the loader's.

use tracing::info;

use crate::errors::EtlResult;

use super::DbPool;

/// Bookkeeping DDL, idempotent
const ETL_SCHEMA_SQL: &[&str] = &[
    "CREATE SCHEMA IF NOT EXISTS etl",
    r#"
    CREATE TABLE IF NOT EXISTS etl.load_runs (
        load_run_id   UUID PRIMARY KEY,
        started_at    TIMESTAMPTZ NOT NULL,
        completed_at  TIMESTAMPTZ,
        status        TEXT NOT NULL,
        run_trigger   TEXT NOT NULL,
        total_files   BIGINT NOT NULL DEFAULT 0,
        total_rows    BIGINT NOT NULL DEFAULT 0,
        notes         TEXT
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS etl.load_run_files (
        id             BIGSERIAL PRIMARY KEY,
        load_run_id    UUID NOT NULL REFERENCES etl.load_runs (load_run_id),
        bucket         TEXT NOT NULL,
        key            TEXT NOT NULL,
        version_id     TEXT NOT NULL,
        content_hash   TEXT NOT NULL,
        extract_type   TEXT NOT NULL,
        extracted_date DATE NOT NULL,
        is_processed   BOOLEAN NOT NULL DEFAULT FALSE,
        processed_at   TIMESTAMPTZ,
        row_count      BIGINT,
        last_error     TEXT
    )
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS idx_load_run_files_identity
        ON etl.load_run_files (bucket, key, version_id, content_hash)
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS etl.staging_runs (
        staging_run_id   UUID PRIMARY KEY,
        load_run_id      UUID NOT NULL,
        extract_type     TEXT NOT NULL,
        source_table     TEXT NOT NULL,
        target_table     TEXT NOT NULL,
        started_at       TIMESTAMPTZ NOT NULL,
        completed_at     TIMESTAMPTZ,
        status           TEXT NOT NULL,
        rows_read        BIGINT NOT NULL DEFAULT 0,
        rows_transformed BIGINT NOT NULL DEFAULT 0,
        rows_rejected    BIGINT NOT NULL DEFAULT 0,
        error            TEXT,
        result_json      JSONB,
        UNIQUE (load_run_id, extract_type)
    )
    "#,
];

/// Create the `etl` schema and bookkeeping tables if missing.
pub async fn ensure_etl_schema(pool: &DbPool) -> EtlResult<()> {
    for statement in ETL_SCHEMA_SQL {
        sqlx::query(statement).execute(pool.inner()).await?;
    }
    info!("etl bookkeeping schema ensured");
    Ok(())
}
