//! Mediastore CLI: operator commands against the configured storage backend.
//!
//! Configuration comes from the environment (and `.env`): STORAGE_PROVIDER, S3_BUCKET,
//! LOCAL_STORAGE_PATH and friends.

use anyhow::Context;
use chrono::Utc;
use clap::{Parser, Subcommand};
use mediastore_cli::{cutoff_before, human_size, print_json};
use mediastore_core::StorageConfig;
use mediastore_infra::{init_telemetry, shutdown_telemetry, LogFormat};
use mediastore_storage::{cleanup_expired_files, create_storage, SweepError};

#[derive(Parser)]
#[command(name = "mediastore", about = "Mediastore storage CLI")]
struct Cli {
    /// Log output format: pretty or json
    #[arg(long, global = true, default_value = "pretty")]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the active backend
    Info,
    /// List stored files under a prefix
    Ls {
        /// Key prefix (plain string prefix)
        #[arg(long, default_value = "")]
        prefix: String,
        /// Maximum number of entries, 0 for no limit
        #[arg(long, default_value = "100")]
        limit: usize,
    },
    /// Delete files under a prefix older than the given age
    Sweep {
        /// Key prefix to sweep
        #[arg(long)]
        prefix: String,
        /// Minimum age in hours
        #[arg(long, default_value = "24")]
        older_than_hours: u64,
        /// Only report what would be deleted
        #[arg(long)]
        dry_run: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_telemetry(cli.log_format)
        .map_err(|e| anyhow::anyhow!("Failed to initialize telemetry: {}", e))?;

    let result = run(cli.command).await;

    shutdown_telemetry().await;
    result
}

async fn run(command: Commands) -> anyhow::Result<()> {
    let config = StorageConfig::from_env().context("Failed to load storage configuration")?;
    let storage = create_storage(&config)
        .await
        .context("Failed to create storage backend")?;

    match command {
        Commands::Info => {
            print_json(&storage.storage_info())?;
        }
        Commands::Ls { prefix, limit } => {
            let files = storage.list_files(&prefix, limit).await?;
            let total: u64 = files.iter().map(|f| f.size).sum();
            tracing::info!(count = files.len(), total = %human_size(total), "Listed files");
            print_json(&files)?;
        }
        Commands::Sweep {
            prefix,
            older_than_hours,
            dry_run,
        } => {
            let older_than = cutoff_before(Utc::now(), older_than_hours)?;

            if dry_run {
                let expired: Vec<_> = storage
                    .list_files(&prefix, 0)
                    .await?
                    .into_iter()
                    .filter(|f| f.last_modified < older_than)
                    .collect();
                print_json(&expired)?;
                return Ok(());
            }

            match cleanup_expired_files(storage.as_ref(), &prefix, older_than).await {
                Ok(report) => print_json(&report)?,
                Err(SweepError::Partial {
                    failed,
                    expired,
                    deleted,
                    errors,
                }) => {
                    let failures: Vec<_> = errors
                        .iter()
                        .map(|(key, e)| serde_json::json!({ "key": key, "error": e.to_string() }))
                        .collect();
                    print_json(&serde_json::json!({
                        "prefix": prefix,
                        "expired": expired,
                        "deleted": deleted,
                        "failed": failed,
                        "failures": failures,
                    }))?;
                    anyhow::bail!("failed to delete {} files", failed);
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    Ok(())
}
