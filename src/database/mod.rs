//! Warehouse database access, organised by concern.
//!
//! Everything talks PostgreSQL through one bounded pool. Multi-statement
//! sequences that must be atomic run on a single pooled connection inside
//! a transaction; cross-batch atomicity is deliberately not provided.

pub mod batch;
pub mod raw_queries;
pub mod rejections;
pub mod runs;
pub mod schema;
pub mod staging;

pub use batch::{calculate_optimal_batch_size, max_rows_per_statement, BatchLoader};
pub use raw_queries::RawQueryBuilder;
pub use rejections::{RejectionHandler, RejectionSummary};
pub use runs::RunStore;
pub use schema::ensure_etl_schema;
pub use staging::StagingLoader;

use std::time::Duration;

use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Postgres, Transaction};
use tracing::info;

use crate::config::DatabaseConfig;
use crate::errors::{EtlError, EtlResult};

/// Bounded connection pool with a transaction helper
#[derive(Clone)]
pub struct DbPool {
    pool: PgPool,
}

impl DbPool {
    /// Connect with the configured bounds. Acquisition beyond
    /// `timeout_ms` surfaces as a retryable database error.
    pub async fn connect(config: &DatabaseConfig) -> EtlResult<Self> {
        if config.url.is_empty() {
            return Err(EtlError::Config(
                "database.url is not configured (set DATABASE_URL or database.url)".to_string(),
            ));
        }

        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(Duration::from_millis(config.timeout_ms))
            .connect(&config.url)
            .await?;

        info!(
            max_connections = config.max_connections,
            "database pool established"
        );
        Ok(Self { pool })
    }

    /// Wrap an existing pool (tests)
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn inner(&self) -> &PgPool {
        &self.pool
    }

    /// Begin a transaction on one pooled connection.
    /// Dropping the returned transaction without commit rolls back.
    pub async fn begin(&self) -> EtlResult<Transaction<'static, Postgres>> {
        Ok(self.pool.begin().await?)
    }
}
