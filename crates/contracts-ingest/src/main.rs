//! Contracts Ingest - incremental public contract sync

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use contracts_common::logging::{init_logging, LogConfig, LogLevel};
use contracts_ingest::checkpoint::CheckpointFile;
use contracts_ingest::config::{DatabaseConfig, SyncConfig};
use contracts_ingest::discovery::SnapshotDirectory;
use contracts_ingest::http::HttpFetcher;
use contracts_ingest::lock::FileRunLock;
use contracts_ingest::store::PgContractStore;
use contracts_ingest::{SyncOrchestrator, SyncOutcome};
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "contracts-ingest")]
#[command(author, version, about = "Public contract snapshot ingestion")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Load every snapshot newer than the checkpoint
    Sync {
        /// Postgres connection string
        #[arg(long, env = "DATABASE_URL")]
        database_url: Option<String>,

        /// Snapshot mirror
        #[arg(long)]
        base_url: Option<String>,

        #[arg(long)]
        checkpoint_file: Option<PathBuf>,

        #[arg(long)]
        lock_file: Option<PathBuf>,

        /// Rows per bulk insert
        #[arg(long)]
        batch_size: Option<usize>,
    },

    /// List the snapshots the next sync would load
    Pending {
        #[arg(long)]
        base_url: Option<String>,

        #[arg(long)]
        checkpoint_file: Option<PathBuf>,
    },

    /// Show the current checkpoint
    Checkpoint {
        #[arg(long)]
        checkpoint_file: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = if cli.verbose {
        LogLevel::Debug
    } else {
        LogLevel::Info
    };

    let log_config = LogConfig::builder()
        .level(log_level)
        .log_file_prefix("contracts-ingest")
        .filter_directives("sqlx=warn,hyper=info,reqwest=info")
        .build()
        .merge_env()?;

    let _logging = init_logging(&log_config)?;

    let mut config = SyncConfig::from_env()?;

    match cli.command {
        Command::Sync {
            database_url,
            base_url,
            checkpoint_file,
            lock_file,
            batch_size,
        } => {
            if let Some(base_url) = base_url {
                config = config.with_base_url(base_url);
            }
            if let Some(path) = checkpoint_file {
                config = config.with_checkpoint_path(path);
            }
            if let Some(path) = lock_file {
                config = config.with_lock_path(path);
            }
            if let Some(batch_size) = batch_size {
                config = config.with_batch_size(batch_size);
            }

            let mut db_config = DatabaseConfig::from_env()?;
            if let Some(url) = database_url {
                db_config.url = url;
            }

            let store = PgContractStore::connect(&db_config).await?;
            let lock = FileRunLock::new(config.lock_path.clone());
            let report = SyncOrchestrator::new(config, store, lock)?.run().await?;

            match report.outcome {
                SyncOutcome::LockContended => info!("Sync skipped, another run is active"),
                SyncOutcome::Completed => info!(
                    snapshots = report.snapshots.len(),
                    contracts_inserted = report.contracts_inserted(),
                    items_inserted = report.items_inserted(),
                    checkpoint = %report.checkpoint_after,
                    "Sync finished"
                ),
            }
        },
        Command::Pending {
            base_url,
            checkpoint_file,
        } => {
            if let Some(base_url) = base_url {
                config = config.with_base_url(base_url);
            }
            if let Some(path) = checkpoint_file {
                config = config.with_checkpoint_path(path);
            }

            config.validate()?;
            let checkpoint = CheckpointFile::from_config(&config).read();
            let directory = SnapshotDirectory::new(&config, HttpFetcher::new(&config)?)?;
            let pending = directory.list_snapshots_since(checkpoint).collect_all().await?;

            for snapshot in &pending {
                info!(
                    file_name = %snapshot.file_name,
                    created_at = %snapshot.created_at,
                    url = %snapshot.url,
                    "Pending snapshot"
                );
            }
            info!(count = pending.len(), "Pending snapshots listed");
        },
        Command::Checkpoint { checkpoint_file } => {
            if let Some(path) = checkpoint_file {
                config = config.with_checkpoint_path(path);
            }

            let checkpoint = CheckpointFile::from_config(&config);
            info!(
                path = %checkpoint.path().display(),
                checkpoint = %checkpoint.read(),
                "Current checkpoint"
            );
        },
    }

    Ok(())
}
