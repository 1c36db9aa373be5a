//! ETL command line - Runs warehouse stages individually or as a full pipeline
//!
//! Usage:
//!   # Create schemas and tables:
//!   cargo run --bin etl -- init-schema
//!
//!   # One stage at a time:
//!   cargo run --bin etl -- extract
//!   cargo run --bin etl -- dimensions
//!   cargo run --bin etl -- facts
//!   cargo run --bin etl -- validate
//!
//!   # Full pipeline, or a rehearsal against an in-memory warehouse:
//!   cargo run --bin etl -- run
//!   cargo run --bin etl -- run --dry-run

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use etl::validate::quality_report;
use etl::{
    run_all, run_stage, MemoryWarehouse, PgWarehouse, PipelineOptions, Settings, Stage,
};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "etl", about = "Loads mining extracts into the warehouse star schema")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create warehouse schemas and tables if missing
    InitSchema,
    /// Refresh staging tables from the CSV extracts
    Extract,
    /// Append new dimension members from staging
    Dimensions,
    /// Resolve staging rows to surrogate keys and append new facts
    Facts,
    /// Grade the warehouse and write the quality report
    Validate,
    /// Run extract, dimensions, facts and validate in order
    Run {
        /// Use an in-memory warehouse - no database needed, nothing persisted
        #[arg(long, default_value = "false")]
        dry_run: bool,
    },
}

async fn connect(settings: &Settings) -> Result<PgWarehouse> {
    let db_url = settings.require_db_url()?;
    PgWarehouse::connect(db_url, settings.db_max_connections, settings.insert_chunk_size)
        .await
        .context("Failed to connect to database")
}

async fn dry_run(options: PipelineOptions) -> Result<()> {
    let options = PipelineOptions {
        report_path: None,
        ..options
    };
    let warehouse = MemoryWarehouse::new();

    let outcome = run_all(&warehouse, &options).await;
    let report = quality_report(&warehouse, options.null_threshold).await?;
    println!("{}", serde_json::to_string_pretty(&report)?);

    outcome.context("Dry run failed")?;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let settings = Settings::from_env().context("Invalid configuration")?;
    let options = PipelineOptions::from_settings(&settings);

    let stage = match args.command {
        Command::Run { dry_run: true } => {
            info!("Dry run against in-memory warehouse");
            return dry_run(options).await;
        }
        Command::Run { dry_run: false } => {
            let warehouse = connect(&settings).await?;
            let summary = run_all(&warehouse, &options)
                .await
                .context("Pipeline run failed")?;
            println!("{}", serde_json::to_string_pretty(&summary)?);
            return Ok(());
        }
        Command::InitSchema => {
            let warehouse = connect(&settings).await?;
            warehouse
                .init_schema()
                .await
                .context("Failed to apply warehouse schema")?;
            return Ok(());
        }
        Command::Extract => Stage::Extract,
        Command::Dimensions => Stage::Dimensions,
        Command::Facts => Stage::Facts,
        Command::Validate => Stage::Validate,
    };

    let warehouse = connect(&settings).await?;
    let output = run_stage(&warehouse, stage, &options)
        .await
        .with_context(|| format!("Stage {} failed", stage.as_str()))?;
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}
