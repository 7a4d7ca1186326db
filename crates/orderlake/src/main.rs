use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use orderlake_core::{
    analysis, checkpoint, config::PipelineConfig, db, object_store::ObjectStore, sync,
};
use tracing::info;
use tracing_subscriber::EnvFilter;

mod report;

#[derive(Parser, Debug)]
#[command(author, version, about = "Order analytics pipelines", long_about = None)]
struct Cli {
    /// TOML configuration file; environment variables override its values
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Print reports as JSON instead of a table
    #[arg(long, global = true)]
    json: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Aggregate the full purchases export into the daily, state, category and cube views
    Analyze,
    /// Append orders created since the last checkpoint to the incremental dataset
    Sync(SyncArgs),
    /// Show the stored incremental checkpoint
    Checkpoint,
}

#[derive(Args, Debug, Default)]
struct SyncArgs {
    /// Extract and transform only; write nothing and keep the checkpoint
    #[arg(long)]
    dry_run: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .json()
        .init();

    let cli = Cli::parse();
    let config =
        PipelineConfig::load(cli.config.as_deref()).context("failed to load configuration")?;
    let store = ObjectStore::from_config(&config.storage)
        .await
        .context("failed to configure object store")?;

    match cli.command {
        Command::Analyze => {
            let report = analysis::run_analysis(&store, &config)
                .await
                .context("full-history analysis failed")?;
            info!(views = report.views.len(), "analysis complete");
            report::print_analysis(&report, cli.json)
        }
        Command::Sync(args) => {
            let pool = db::connect(&config.database)
                .await
                .context("failed to connect to the order database")?;
            let report = sync::execute_sync(
                &pool,
                &store,
                &config,
                sync::SyncOptions {
                    dry_run: args.dry_run,
                },
            )
            .await
            .context("incremental sync failed")?;
            info!(status = ?report.status, rows = report.rows_written, "sync complete");
            report::print_sync(&report, cli.json)
        }
        Command::Checkpoint => {
            let loaded = checkpoint::load_checkpoint(
                &store,
                &config.outputs.checkpoint,
                config.sync.checkpoint_policy,
            )
            .await
            .context("failed to read checkpoint")?;
            report::print_checkpoint(&loaded, cli.json)
        }
    }
}
