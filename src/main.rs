// ABOUTME: CLI entry point for edge-cloud-sync
// ABOUTME: Parses commands, sets up logging to stderr and the run log, routes to the engine

use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{bail, Context};
use clap::{Args, Parser, Subcommand};
use edge_cloud_sync::engine::{lock, AuditLog, RunCoordinator, RunOutcome, UnlockOutcome};
use edge_cloud_sync::store::{self, AnyStore};
use edge_cloud_sync::{ConflictPolicy, Strategy, SyncConfig, SyncError};
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser)]
#[command(name = "edge-cloud-sync")]
#[command(about = "Bidirectional edge/cloud database reconciliation", long_about = None)]
#[command(version)]
struct Cli {
    /// Set the log level (error, warn, info, debug, trace)
    #[arg(long, global = true, default_value = "info")]
    log: String,
    /// Path to a TOML config file (default: ~/.edge-cloud-sync/config.toml if present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Lock file guarding against concurrent runs
    #[arg(long = "lock-file", global = true)]
    lock_file: Option<PathBuf>,
    /// File the run log is appended to
    #[arg(long = "log-file", global = true)]
    log_file: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct ConnectionArgs {
    /// Edge database URL (mysql://... or a SQLite path)
    #[arg(long, env = "EDGE_DATABASE_URL")]
    edge: String,
    /// Cloud database URL (mysql://... or a SQLite path)
    #[arg(long, env = "CLOUD_DATABASE_URL")]
    cloud: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one reconciliation between edge and cloud
    Run {
        #[command(flatten)]
        connection: ConnectionArgs,
        #[arg(long, value_enum)]
        strategy: Option<Strategy>,
        #[arg(long, value_enum)]
        conflict_policy: Option<ConflictPolicy>,
        /// Rows per fetch page and upsert statement
        #[arg(long)]
        batch_size: Option<usize>,
        /// Number of audit rows to keep
        #[arg(long)]
        audit_retention: Option<usize>,
        /// Extra tables to skip (comma-separated, added to the configured list)
        #[arg(long = "exclude-tables", value_delimiter = ',')]
        exclude_tables: Vec<String>,
    },
    /// Show whether a run currently holds the lock
    Status,
    /// Remove a lock left behind by a process that is no longer running
    Unlock {
        /// Also remove a lock whose holder cannot be read
        #[arg(long)]
        force: bool,
    },
    /// Show recent runs from the edge audit log
    History {
        /// Edge database URL
        #[arg(long, env = "EDGE_DATABASE_URL")]
        edge: String,
        #[arg(long, default_value_t = 10)]
        limit: usize,
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => SyncConfig::load(path)?,
        None => SyncConfig::load_default()?,
    };
    if let Some(path) = &cli.lock_file {
        config.lock_path = Some(path.clone());
    }
    if let Some(path) = &cli.log_file {
        config.log_path = Some(path.clone());
    }

    init_logging(&cli.log, &config.log_path()?);

    match cli.command {
        Commands::Run {
            connection,
            strategy,
            conflict_policy,
            batch_size,
            audit_retention,
            exclude_tables,
        } => {
            if let Some(strategy) = strategy {
                config.strategy = strategy;
            }
            if let Some(policy) = conflict_policy {
                config.conflict_policy = policy;
            }
            if let Some(size) = batch_size {
                config.batch_size = size;
            }
            if let Some(keep) = audit_retention {
                config.audit_retention = keep;
            }
            config.exclude_tables.extend(exclude_tables);
            run(config, &connection).await
        }
        Commands::Status => status(&config.lock_path()?),
        Commands::Unlock { force } => unlock(&config.lock_path()?, force),
        Commands::History { edge, limit, json } => history(&edge, limit, json).await,
    }
}

/// RUST_LOG wins over `--log`; events go to stderr and, without colours, to the log file.
fn init_logging(level: &str, log_path: &Path) {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let file_layer = match open_log_file(log_path) {
        Ok(file) => Some(
            fmt::layer()
                .with_writer(Mutex::new(file))
                .with_ansi(false),
        ),
        Err(e) => {
            eprintln!("Warning: run log disabled: {:#}", e);
            None
        }
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(file_layer)
        .init();
}

fn open_log_file(path: &Path) -> anyhow::Result<std::fs::File> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create log directory: {:?}", parent))?;
        }
    }
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("Failed to open log file: {:?}", path))
}

async fn connect(url: &str, side: &'static str) -> Result<AnyStore, SyncError> {
    store::connect(url)
        .await
        .map_err(|source| SyncError::Connection { side, source })
}

async fn run(config: SyncConfig, connection: &ConnectionArgs) -> anyhow::Result<()> {
    config.validate()?;
    edge_cloud_sync::utils::validate_edge_cloud_different(&connection.edge, &connection.cloud)?;

    let mut edge = connect(&connection.edge, "edge").await?;
    let mut cloud = connect(&connection.cloud, "cloud").await?;

    let outcome = RunCoordinator::new(config).run(&mut edge, &mut cloud).await;

    if let Err(e) = edge.close().await {
        tracing::warn!("Failed to close edge connection: {:#}", e);
    }
    if let Err(e) = cloud.close().await {
        tracing::warn!("Failed to close cloud connection: {:#}", e);
    }

    match outcome? {
        RunOutcome::AbortedLockHeld => {
            println!("Sync already running.");
        }
        RunOutcome::Completed(run) => {
            println!("Sync complete (run {})", run.run_id);
            println!("  Started:          {}", run.started_at.format("%Y-%m-%d %H:%M:%S UTC"));
            println!("  Finished:         {}", run.finished_at.format("%Y-%m-%d %H:%M:%S UTC"));
            println!("  Tables processed: {}", run.tables_processed);
            println!("  Rows synced:      {}", run.rows_synced);
            println!("  Rows deleted:     {}", run.rows_deleted);
            println!("  Errors:           {}", run.error_text);
        }
    }
    Ok(())
}

fn status(lock_path: &Path) -> anyhow::Result<()> {
    let status = lock::status(lock_path)?;
    println!("Lock file: {}", status.path.display());
    if !status.held {
        println!("Status: idle");
        return Ok(());
    }

    match &status.info {
        Some(info) => {
            println!(
                "Status: {} (PID {}, started {})",
                if status.holder_running {
                    "running"
                } else {
                    "stale lock"
                },
                info.pid,
                info.started_at
            );
        }
        None => println!("Status: lock held, holder unknown"),
    }
    if status.info.is_none() {
        println!("Run `edge-cloud-sync unlock --force` to remove it once no sync is running.");
    } else if !status.holder_running {
        println!("Run `edge-cloud-sync unlock` to remove it.");
    }
    Ok(())
}

fn unlock(lock_path: &Path, force: bool) -> anyhow::Result<()> {
    match lock::unlock(lock_path, force)? {
        UnlockOutcome::NotHeld => println!("No lock at {}", lock_path.display()),
        UnlockOutcome::Removed => println!("Removed stale lock {}", lock_path.display()),
        UnlockOutcome::HolderRunning(pid) => {
            bail!("A sync is still running (PID {}); refusing to remove the lock", pid)
        }
        UnlockOutcome::HolderUnknown => bail!(
            "Lock {} does not name its holder (a run may be starting); \
             use --force to remove it anyway",
            lock_path.display()
        ),
    }
    Ok(())
}

async fn history(edge_url: &str, limit: usize, json: bool) -> anyhow::Result<()> {
    let mut edge = connect(edge_url, "edge").await?;
    let entries = AuditLog::recent(&mut edge, limit).await;
    if let Err(e) = edge.close().await {
        tracing::warn!("Failed to close edge connection: {:#}", e);
    }
    let entries = entries?;

    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&entries).context("Failed to serialize history")?
        );
        return Ok(());
    }

    if entries.is_empty() {
        println!("No runs recorded.");
        return Ok(());
    }
    for entry in entries {
        println!(
            "#{:<6} {}  ->  {}  tables={:<4} {}",
            entry.id, entry.sync_start, entry.sync_end, entry.total_tables, entry.errors
        );
    }
    Ok(())
}
