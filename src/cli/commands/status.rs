use clap::Args;
use uuid::Uuid;

use crate::config::AppConfig;
use crate::database::{ensure_etl_schema, DbPool, RunStore};
use crate::errors::{EtlError, EtlResult};

/// Show run bookkeeping for a load run
#[derive(Args)]
pub struct StatusCommand {
    /// Load run to inspect
    #[arg(long)]
    pub load_run_id: Uuid,
}

impl StatusCommand {
    pub async fn run(self) -> EtlResult<()> {
        let config = AppConfig::load()?;
        let pool = DbPool::connect(&config.database).await?;
        ensure_etl_schema(&pool).await?;
        let runs = RunStore::new(pool);

        let run = runs
            .get_load_run(self.load_run_id)
            .await?
            .ok_or_else(|| EtlError::RunState(format!("no load run {}", self.load_run_id)))?;

        println!("Load run {}", run.load_run_id);
        println!("  status: {}", run.status.as_str());
        println!("  trigger: {}", run.trigger.as_str());
        println!("  started: {}", run.started_at);
        if let Some(completed) = run.completed_at {
            println!("  completed: {}", completed);
        }
        println!("  files: {}, rows: {}", run.total_files, run.total_rows);

        let files = runs.files_for_run(self.load_run_id).await?;
        for file in files {
            println!(
                "  [{}] {} ({}) processed={} rows={}{}",
                file.id,
                file.key,
                file.extract_type,
                file.is_processed,
                file.row_count.unwrap_or(0),
                file.last_error
                    .map(|e| format!(" last_error={}", e))
                    .unwrap_or_default()
            );
        }
        Ok(())
    }
}
