use std::path::PathBuf;
use std::sync::Arc;

use chrono::{NaiveDate, Utc};
use clap::Args;
use tracing::info;

use crate::config::AppConfig;
use crate::database::{ensure_etl_schema, DbPool};
use crate::errors::{EtlError, EtlResult};
use crate::handlers::HandlerRegistry;
use crate::raw::{LoadOptions, RawLoaderService};
use crate::storage::{describe_local_file, LocalFileStore};
use crate::types::RunTrigger;

/// Load one or more extract files into their raw tables
#[derive(Args)]
pub struct LoadRawCommand {
    /// Root directory the file keys resolve against
    #[arg(long)]
    pub root: PathBuf,

    /// Extract type for every file in this invocation
    #[arg(long)]
    pub extract_type: String,

    /// Extraction date stamped into lineage (defaults to today)
    #[arg(long)]
    pub extracted_date: Option<NaiveDate>,

    /// Load files even when the idempotency store says they are done
    #[arg(long)]
    pub force: bool,

    /// Mark this run as a backfill
    #[arg(long)]
    pub backfill: bool,

    /// File keys relative to the root directory
    #[arg(required = true)]
    pub files: Vec<String>,
}

impl LoadRawCommand {
    pub async fn run(self) -> EtlResult<()> {
        let config = AppConfig::load()?;
        let pool = DbPool::connect(&config.database).await?;
        ensure_etl_schema(&pool).await?;

        let registry = Arc::new(HandlerRegistry::builtin());
        if registry.get(&self.extract_type).is_none() {
            return Err(EtlError::HandlerMissing(self.extract_type.clone()));
        }

        let extracted_date = self
            .extracted_date
            .unwrap_or_else(|| Utc::now().date_naive());

        info!(
            extract_type = %self.extract_type,
            files = self.files.len(),
            "describing local files"
        );
        let mut described = Vec::with_capacity(self.files.len());
        for key in &self.files {
            described.push(
                describe_local_file(&self.root, key, &self.extract_type, extracted_date).await?,
            );
        }

        let store = Arc::new(LocalFileStore::new(&self.root));
        let service = RawLoaderService::new(pool, store, registry, config);
        let options = LoadOptions {
            force_reload: self.force,
        };
        let trigger = if self.backfill {
            RunTrigger::Backfill
        } else {
            RunTrigger::Manual
        };
        let cancel = super::cancel_on_ctrl_c();

        let (load_run_id, results) = service
            .execute_run(&described, trigger, &options, &cancel)
            .await?;

        println!("\n=== RAW LOAD COMPLETE ===");
        println!("Load run: {}", load_run_id);
        for (file, result) in &results {
            match result {
                Ok(result) => {
                    println!(
                        "{}: {} rows, {} batches ok, {} failed, {:.0} rows/sec",
                        file.key,
                        result.total_rows,
                        result.successful_batches,
                        result.failed_batches,
                        result.rows_per_second()
                    );
                    for warning in &result.warnings {
                        println!("  warning: {}", warning);
                    }
                    for error in &result.errors {
                        println!("  error: {}", error);
                    }
                }
                Err(e) => println!("{}: FAILED - {}", file.key, e),
            }
        }
        Ok(())
    }
}
