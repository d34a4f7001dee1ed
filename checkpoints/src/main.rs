use checkpoints::{CheckpointConfig, CheckpointStore, SharedCheckpointStore};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::PathBuf;
use tracing::info;

#[derive(Parser)]
#[command(name = "checkpoints")]
#[command(about = "Git-backed document checkpoints")]
struct Cli {
    /// TOML configuration file; the deployment environment is read otherwise
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,
    /// Override the documents root directory
    #[arg(long, global = true)]
    root: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Bootstrap the repository and print the report
    Init,
    /// Checkpoint the current content of a document
    Create { path: String },
    /// Restore a document to a checkpoint
    Restore { id: String, path: String },
    /// Move a document's checkpoints to a new path
    Rename { old_path: String, new_path: String },
    /// Mark a document as deleted
    Delete {
        path: String,
        /// Checkpoint id, accepted for compatibility
        #[arg(long, default_value = "")]
        id: String,
    },
    /// List the most recent checkpoints of a document
    List {
        path: String,
        /// Maximum number of checkpoints (defaults to the configured bound)
        #[arg(short = 'n', long)]
        limit: Option<usize>,
    },
    /// Show the most recent recorded events for a document
    History {
        path: String,
        /// Maximum number of events (defaults to the configured bound)
        #[arg(short = 'n', long)]
        limit: Option<usize>,
    },
}

fn print_json<T: Serialize>(value: &T) -> Result<(), Box<dyn std::error::Error>> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn load_config(cli: &Cli) -> Result<CheckpointConfig, Box<dyn std::error::Error>> {
    let config = match &cli.config {
        Some(path) => CheckpointConfig::from_toml_file(path)?,
        None => CheckpointConfig::from_env()?,
    };
    Ok(match &cli.root {
        Some(root) => config.with_root_dir(root.clone()),
        None => config,
    })
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config = load_config(&cli)?;

    let (store, report) =
        tokio::task::spawn_blocking(move || CheckpointStore::open(config)).await??;
    info!("Using branch {}", report.branch);
    let store = SharedCheckpointStore::new(store);

    match cli.command {
        Commands::Init => print_json(&report)?,
        Commands::Create { path } => {
            let checkpoint = store.create_checkpoint(path).await?;
            print_json(&checkpoint)?;
        }
        Commands::Restore { id, path } => {
            store.restore_checkpoint(id, path).await?;
        }
        Commands::Rename { old_path, new_path } => {
            store.rename_checkpoint(old_path, new_path).await?;
        }
        Commands::Delete { path, id } => {
            store.delete_checkpoint(id, path).await?;
        }
        Commands::List { path, limit } => {
            let checkpoints = match limit {
                Some(limit) => store.list_checkpoints_limited(path, limit).await,
                None => store.list_checkpoints(path).await,
            };
            print_json(&checkpoints)?;
        }
        Commands::History { path, limit } => {
            let history = match limit {
                Some(limit) => store.history_limited(path, limit).await,
                None => store.history(path).await,
            };
            print_json(&history)?;
        }
    }

    Ok(())
}
