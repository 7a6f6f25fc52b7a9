use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Result};
use bytes::Bytes;
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use dedup_storage::{check_integrity, Deduplicator, LocalBackends, SharedMetrics};
use s3_dedup::config::StoreConfig;
use s3_dedup::metrics::{self, PrometheusMetrics};

#[derive(Parser)]
#[command(version)]
struct Cli {
    #[arg(long, global = true, help = "Path to the TOML config file")]
    config: Option<PathBuf>,

    #[arg(long, global = true, help = "Data directory, overrides the config file")]
    data_root: Option<PathBuf>,

    #[arg(
        long,
        global = true,
        default_value = "info",
        help = "Log level (error, warn, info, debug, trace). Can also be set via RUST_LOG env var"
    )]
    log_level: String,

    #[arg(long, global = true, help = "Print Prometheus metrics after the command")]
    print_metrics: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Create the bucket and usage record of a user
    Provision { user: String },

    /// Upload a local file
    Put {
        user: String,
        /// Destination path inside the user's bucket
        path: String,
        /// Local file to upload
        file: PathBuf,
    },

    /// Resolve a file to a download URL, or list a folder
    Read {
        user: String,
        #[arg(default_value = "")]
        path: String,
    },

    /// Download the content of a file
    Get {
        user: String,
        path: String,
        /// Write to this file instead of stdout
        #[arg(long, short)]
        output: Option<PathBuf>,
    },

    /// Delete a file or a folder
    Rm { user: String, path: String },

    /// Create an empty folder
    Mkdir { user: String, path: String },

    /// Search a user's files by name, type or hash
    Search { user: String, term: String },

    /// Show usage counters
    Usage { user: Option<String> },

    /// Check the dedup invariant over the whole store
    Check,

    /// Inspect DB
    Inspect {
        #[command(subcommand)]
        command: InspectCommand,
    },
}

#[derive(Debug, Subcommand)]
pub enum InspectCommand {
    /// Number of objects across all buckets
    NumKeys,
    /// Total disk space used by the data root
    DiskSpace,
    /// List all buckets
    ListBuckets,
    /// Show deduplication statistics
    DedupStats,
}

fn setup_tracing(log_level: &str) {
    // Try to use RUST_LOG env var first, fall back to CLI flag
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(log_level))
        .unwrap_or_else(|_| {
            eprintln!("Invalid log level '{}', falling back to 'info'", log_level);
            EnvFilter::new("info")
        });

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn main() -> Result<()> {
    dotenv::dotenv().ok();

    let cli = Cli::parse();
    setup_tracing(&cli.log_level);

    run(cli)
}

#[tokio::main]
async fn run(cli: Cli) -> Result<()> {
    let mut config = StoreConfig::load(cli.config.as_deref())?;
    if let Some(data_root) = cli.data_root {
        config.data_root = data_root;
    }
    let print_metrics = cli.print_metrics;

    let backends = LocalBackends::open(&config.data_root, config.presign_config()?)?;
    let dedup = Deduplicator::open(backends.blobs(), backends.index(), config.dedup_options())
        .await?
        .with_metrics(SharedMetrics::new(Arc::new(PrometheusMetrics::new())));
    info!(data_root = %config.data_root.display(), "opened store");

    match cli.command {
        Command::Provision { user } => {
            let usage = dedup.provision_user(&user).await?;
            println!("Provisioned {} ({})", usage.user_id, usage.bucket_name);
        }
        Command::Put { user, path, file } => {
            let content = tokio::fs::read(&file).await?;
            let outcome = dedup.create(&user, &path, Bytes::from(content)).await?;
            println!("{}", serde_json::to_string_pretty(&outcome)?);
        }
        Command::Read { user, path } => {
            let outcome = dedup.read(&user, &path).await?;
            println!("{}", serde_json::to_string_pretty(&outcome)?);
        }
        Command::Get { user, path, output } => {
            let content = dedup.fetch(&user, &path).await?;
            match output {
                Some(output) => tokio::fs::write(&output, &content).await?,
                None => std::io::stdout().write_all(&content)?,
            }
        }
        Command::Rm { user, path } => {
            let outcome = dedup.delete(&user, &path).await?;
            println!("{}", serde_json::to_string_pretty(&outcome)?);
        }
        Command::Mkdir { user, path } => {
            dedup.create_folder(&user, &path).await?;
            println!("Created folder {}/", path.trim_end_matches('/'));
        }
        Command::Search { user, term } => {
            let hits = dedup.search(&user, &term).await?;
            println!("{}", serde_json::to_string_pretty(&hits)?);
        }
        Command::Usage { user } => {
            s3_dedup::inspect::user_stats(&dedup, user).await?;
        }
        Command::Check => {
            let report = check_integrity(dedup.registry(), &**dedup.blobs()).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
            if !report.is_clean() {
                bail!("{} integrity issue(s) found", report.issues.len());
            }
        }
        Command::Inspect { command } => {
            use s3_dedup::inspect::*;
            match command {
                InspectCommand::NumKeys => {
                    let num_keys = num_keys(&backends)?;
                    println!("Number of keys: {num_keys}");
                }
                InspectCommand::DiskSpace => {
                    let disk_space = disk_space(&backends);
                    println!("Disk space: {disk_space}");
                }
                InspectCommand::ListBuckets => list_buckets(&backends)?,
                InspectCommand::DedupStats => dedup_stats(&dedup).await?,
            }
        }
    }

    backends.persist()?;

    if print_metrics {
        print!("{}", metrics::render()?);
    }
    Ok(())
}
