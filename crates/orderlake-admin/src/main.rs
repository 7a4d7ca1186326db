use std::path::PathBuf;

use anyhow::{anyhow, bail, Context, Result};
use chrono::Utc;
use clap::{Args, Parser, Subcommand};
use comfy_table::{presets::UTF8_FULL, Table};
use orderlake_core::{
    checkpoint::{self, Checkpoint, DEFAULT_LAST_SYNCED_DATE},
    config::PipelineConfig,
    object_store::ObjectStore,
    partitioned,
};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about = "Orderlake administrative tooling", long_about = None)]
struct Cli {
    /// TOML configuration file; environment variables override its values
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Print output as JSON
    #[arg(long, global = true)]
    json: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Show the stored checkpoint and the objects it was read from
    CheckpointShow,
    /// Overwrite the checkpoint with an explicit cursor
    CheckpointReset(CheckpointResetArgs),
    /// List partitions of a dataset (a view name, incremental_orders or checkpoint)
    Partitions(DatasetArgs),
    /// Plan (and optionally apply) deletion of every object in a dataset
    Purge(PurgeArgs),
}

#[derive(Args, Debug)]
struct CheckpointResetArgs {
    /// Highest order id considered synced
    #[arg(long)]
    order_id: i64,
    /// Last synced creation timestamp recorded alongside the id
    #[arg(long, default_value = DEFAULT_LAST_SYNCED_DATE)]
    date: String,
}

#[derive(Args, Debug)]
struct DatasetArgs {
    dataset: String,
}

#[derive(Args, Debug)]
struct PurgeArgs {
    dataset: String,
    /// Apply deletions instead of running in dry-run mode
    #[arg(long)]
    apply: bool,
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
        Command::CheckpointShow => handle_checkpoint_show(&store, &config, cli.json).await,
        Command::CheckpointReset(args) => {
            handle_checkpoint_reset(&store, &config, args, cli.json).await
        }
        Command::Partitions(args) => handle_partitions(&store, &config, args, cli.json).await,
        Command::Purge(args) => handle_purge(&store, &config, args, cli.json).await,
    }
}

fn dataset_location(config: &PipelineConfig, name: &str) -> Result<String> {
    config
        .outputs
        .dataset_location(name)
        .ok_or_else(|| anyhow!("unknown dataset '{name}'"))
}

async fn handle_checkpoint_show(
    store: &ObjectStore,
    config: &PipelineConfig,
    json: bool,
) -> Result<()> {
    let loaded = checkpoint::load_checkpoint(
        store,
        &config.outputs.checkpoint,
        config.sync.checkpoint_policy,
    )
    .await
    .context("failed to read checkpoint")?;

    if json {
        println!("{}", serde_json::to_string_pretty(&loaded)?);
        return Ok(());
    }

    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_header(vec!["last_order_id", "last_synced_date", "etl_run_time", "source"]);
    table.add_row(vec![
        loaded.checkpoint.last_order_id.to_string(),
        loaded.checkpoint.last_synced_date.clone(),
        loaded.checkpoint.etl_run_time.clone().unwrap_or_default(),
        format!("{:?}", loaded.source),
    ]);
    println!("{table}");
    for key in &loaded.keys {
        println!("  {}", store.uri(key));
    }
    Ok(())
}

async fn handle_checkpoint_reset(
    store: &ObjectStore,
    config: &PipelineConfig,
    args: CheckpointResetArgs,
    json: bool,
) -> Result<()> {
    if args.order_id < 0 {
        bail!("order id must not be negative");
    }

    let checkpoint = Checkpoint::new(args.order_id, args.date, Utc::now());
    let key = checkpoint::write_checkpoint(store, &config.outputs.checkpoint, &checkpoint)
        .await
        .context("failed to write checkpoint")?;
    info!(key = %key, cursor = %checkpoint, "checkpoint reset");

    if json {
        println!("{}", serde_json::to_string_pretty(&checkpoint)?);
    } else {
        println!("Checkpoint reset to {checkpoint} at {}", store.uri(&key));
    }
    Ok(())
}

async fn handle_partitions(
    store: &ObjectStore,
    config: &PipelineConfig,
    args: DatasetArgs,
    json: bool,
) -> Result<()> {
    let location = dataset_location(config, &args.dataset)?;
    let partitions = partitioned::list_partitions(store, &location).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&partitions)?);
        return Ok(());
    }

    if partitions.is_empty() {
        println!("No objects under {}", store.uri(&location));
        return Ok(());
    }

    let mut table = Table::new();
    table.load_preset(UTF8_FULL).set_header(vec!["partition", "files"]);
    for partition in &partitions {
        let name = if partition.partition.is_empty() {
            "(root)".to_string()
        } else {
            partition.partition.clone()
        };
        table.add_row(vec![name, partition.files.to_string()]);
    }
    println!("{table}");
    Ok(())
}

async fn handle_purge(
    store: &ObjectStore,
    config: &PipelineConfig,
    args: PurgeArgs,
    json: bool,
) -> Result<()> {
    let location = dataset_location(config, &args.dataset)?;

    let keys = if args.apply {
        store
            .delete_prefix(&location)
            .await
            .with_context(|| format!("failed to purge '{location}'"))?
    } else {
        store.list_prefix(&location).await?
    };

    if json {
        println!(
            "{}",
            serde_json::json!({ "location": location, "applied": args.apply, "objects": keys })
        );
        return Ok(());
    }

    if keys.is_empty() {
        println!("No objects under {}", store.uri(&location));
        return Ok(());
    }

    let verb = if args.apply { "Deleted" } else { "Found" };
    println!("{verb} {} objects under {}:", keys.len(), store.uri(&location));
    for key in &keys {
        println!("  {key}");
    }
    if args.apply {
        info!(location = %location, objects = keys.len(), "dataset purged");
    } else {
        println!("Run again with --apply to delete them.");
    }
    Ok(())
}
