use std::sync::Arc;

use clap::Args;
use uuid::Uuid;

use crate::config::AppConfig;
use crate::database::{ensure_etl_schema, DbPool};
use crate::errors::EtlResult;
use crate::handlers::HandlerRegistry;
use crate::staging::{StagingTransformerService, TransformOptions};

/// Transform a load run's raw rows into typed staging tables
#[derive(Args)]
pub struct TransformCommand {
    /// Load run whose files should be transformed
    #[arg(long)]
    pub load_run_id: Uuid,

    /// Extract types to transform; all registered types when omitted
    #[arg(long)]
    pub extract_type: Vec<String>,

    /// Transform again even when a completed staging run exists
    #[arg(long)]
    pub force_reprocess: bool,
}

impl TransformCommand {
    pub async fn run(self) -> EtlResult<()> {
        let config = AppConfig::load()?;
        let pool = DbPool::connect(&config.database).await?;
        ensure_etl_schema(&pool).await?;

        let registry = Arc::new(HandlerRegistry::builtin());
        let extract_types: Vec<String> = if self.extract_type.is_empty() {
            registry
                .extract_types()
                .into_iter()
                .map(str::to_string)
                .collect()
        } else {
            self.extract_type.clone()
        };

        let service = StagingTransformerService::new(pool, registry, config);
        let options = TransformOptions {
            force_reprocess: self.force_reprocess,
        };
        let cancel = super::cancel_on_ctrl_c();

        println!("=== STAGING TRANSFORM ===");
        println!("Load run: {}", self.load_run_id);
        for extract_type in &extract_types {
            let result = service
                .transform_extract(extract_type, self.load_run_id, &options, &cancel)
                .await?;
            println!(
                "{}: read {}, staged {}, rejected {}, deduplicated {}, {:.0} rows/sec",
                extract_type,
                result.rows_read,
                result.rows_transformed,
                result.rows_rejected,
                result.rows_deduplicated,
                result.rows_per_second()
            );
            for error in &result.errors {
                println!("  error: {}", error);
            }
            if cancel.is_cancelled() {
                break;
            }
        }
        Ok(())
    }
}
