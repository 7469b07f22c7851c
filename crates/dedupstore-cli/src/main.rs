//! dedupstore: command-line maintenance for the deduplicated file store.
//!
//! Analyses legacy directories, migrates them into the store behind
//! symlinks (and back), sweeps orphans, and reports storage health.

mod commands;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{ArgAction, Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use dedupstore_core::defaults::{MIGRATION_CHUNK_SIZE, SWEEP_CHUNK_SIZE};

#[derive(Parser, Debug)]
#[command(name = "dedupstore")]
#[command(author, version, about = "Content-addressed file store maintenance")]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file (default: $DEDUPSTORE_CONFIG or ~/.config/dedupstore/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Print reports as JSON
    #[arg(long, global = true)]
    json: bool,

    /// Increase log verbosity (-v info, -vv debug)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    verbose: u8,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Find duplicate files in a directory without touching the store
    Analyse {
        /// Directory to scan
        directory: PathBuf,

        /// Number of largest duplicate groups to list
        #[arg(long, default_value_t = 10)]
        top: usize,
    },

    /// Move a legacy directory tree into the store, leaving symlinks behind
    MigrateLegacy {
        /// Base directory to migrate
        base_dir: PathBuf,

        /// Disk to store files on (default: configured default disk)
        #[arg(long)]
        disk: Option<String>,

        /// Files per progress chunk
        #[arg(long, default_value_t = MIGRATION_CHUNK_SIZE)]
        chunk: usize,

        /// Report what would happen without changing anything
        #[arg(long)]
        dry_run: bool,

        /// Skip the confirmation prompt
        #[arg(long)]
        force: bool,

        /// Keep `.backup` files after migration
        #[arg(long)]
        keep_backups: bool,
    },

    /// Restore migrated files from their backups
    RollbackLegacy {
        /// Base directory to restore
        base_dir: PathBuf,

        /// Report what would be restored without changing anything
        #[arg(long)]
        dry_run: bool,

        /// Skip the confirmation prompt
        #[arg(long)]
        force: bool,
    },

    /// Delete orphaned links and unreferenced objects
    Cleanup {
        /// Report counts without deleting
        #[arg(long)]
        dry_run: bool,

        /// Skip the confirmation prompt
        #[arg(long)]
        force: bool,

        /// Rows per sweep page
        #[arg(long, default_value_t = SWEEP_CHUNK_SIZE)]
        chunk: i64,
    },

    /// Show storage statistics
    Stats,

    /// Verify database, tables and default disk
    Check,

    /// Apply database migrations
    Init,
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    let _log_guard = init_tracing(cli.verbose);

    match commands::run(cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

/// Initialize tracing on stderr so stdout carries only reports.
///
/// Environment variables:
///   LOG_FORMAT  - "json" or "text" (default: "text")
///   LOG_FILE    - path to log file (optional, daily rotation)
///   RUST_LOG    - env filter, overrides `-v`
fn init_tracing(verbose: u8) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let default_filter = match verbose {
        0 => "warn",
        1 => "warn,dedupstore_engine=info,dedupstore_db=info",
        _ => "info,dedupstore_engine=debug,dedupstore_db=debug,dedupstore_core=debug",
    };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| default_filter.into());
    let json = std::env::var("LOG_FORMAT").map(|f| f == "json").unwrap_or(false);
    let registry = tracing_subscriber::registry().with(env_filter);

    if let Ok(path) = std::env::var("LOG_FILE") {
        let path = std::path::Path::new(&path);
        let dir = path.parent().unwrap_or(std::path::Path::new("."));
        let file_name = path
            .file_name()
            .and_then(|f| f.to_str())
            .unwrap_or("dedupstore.log");
        let (writer, guard) =
            tracing_appender::non_blocking(tracing_appender::rolling::daily(dir, file_name));
        if json {
            registry
                .with(tracing_subscriber::fmt::layer().json().with_writer(writer))
                .init();
        } else {
            registry
                .with(
                    tracing_subscriber::fmt::layer()
                        .with_ansi(false)
                        .with_writer(writer),
                )
                .init();
        }
        return Some(guard);
    }

    if json {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr),
            )
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
    None
}
