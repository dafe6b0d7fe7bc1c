use crate::errors::EtlResult;
use clap::{Parser, Subcommand};

pub mod commands;

/// Healthcare extract ETL pipeline
#[derive(Parser)]
#[command(name = "health-etl")]
#[command(about = "Stream vendor extract files into raw and staging warehouse tables")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands
#[derive(Subcommand)]
pub enum Commands {
    /// Load extract files verbatim into their raw tables
    LoadRaw(commands::load_raw::LoadRawCommand),
    /// Transform a load run's raw rows into typed staging tables
    Transform(commands::transform::TransformCommand),
    /// Show run bookkeeping for recent or specific load runs
    Status(commands::status::StatusCommand),
}

pub async fn run() -> EtlResult<()> {
    // Initialise tracing from RUST_LOG (defaults to info for the pipeline)
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("health_etl=info")),
        )
        .try_init();

    let cli = Cli::parse();

    match cli.command {
        Commands::LoadRaw(command) => command.run().await,
        Commands::Transform(command) => command.run().await,
        Commands::Status(command) => command.run().await,
    }
}
