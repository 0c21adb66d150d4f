//! # nc-s3-backup
//!
//! Content-addressed, deduplicating snapshot backups of a Nextcloud instance
//! whose primary data lives in an S3-compatible object store and whose
//! metadata lives in PostgreSQL.
//!
//! ## Architecture
//!
//! ```text
//!                    ┌──────────────┐
//!                    │   CLI (clap)  │
//!                    └──────┬───────┘
//!                           │
//!              ┌────────────┼────────────┐
//!              ▼                         ▼
//!         ┌─────────┐               ┌─────────┐
//!         │ backup  │               │  purge  │
//!         └────┬────┘               └────┬────┘
//!              │                         │
//!     ┌────────┴────────┐                │
//!     ▼                 ▼                ▼
//! ┌─────────┐    ┌─────────────┐   ┌──────────────┐
//! │Metadata │    │Object Store │   │  Repository  │
//! │(postgres)│   │ (aws-sdk-s3)│   │ (inode index)│
//! └─────────┘    └─────────────┘   └──────────────┘
//! ```

mod config;
mod engine;
mod error;
mod hash;
mod metadata;
mod metrics;
mod object_store;
mod purge;
mod repository;

use clap::{Parser, Subcommand};
use metadata::PostgresMetadataSource;
use object_store::S3ObjectStore;
use std::path::{Path, PathBuf};

/// nc-s3-backup — content-addressed, deduplicating Nextcloud snapshot backups
#[derive(Parser, Debug)]
#[command(
    name = "nc-s3-backup",
    version,
    about = "Content-addressed, deduplicating snapshot backups of a Nextcloud instance",
    long_about = "nc-s3-backup materializes dated snapshot trees of a Nextcloud instance's \
                  S3-backed files, deduplicating identical content across users, paths, and \
                  successive snapshots via a content-addressed blob repository and hardlinks."
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Path to configuration file (overrides default search)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose (debug-level) logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Generate a default configuration file
    Init {
        /// Output path for the configuration file
        #[arg(short, long, default_value = "nc-s3-backup.yaml")]
        output: PathBuf,
    },

    /// Back up all configured mappings into a new dated snapshot
    Backup,

    /// Garbage-collect repository blobs no longer referenced by any snapshot
    Purge,
}

fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    if let Err(e) = run(cli) {
        eprintln!("{} {}", colored::Colorize::red("error:"), e);
        std::process::exit(1);
    }
}

fn init_tracing(verbose: bool) {
    use tracing_subscriber::EnvFilter;

    let default_directive = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

fn run(cli: Cli) -> error::Result<()> {
    match &cli.command {
        Command::Init { output } => cmd_init(output),
        Command::Backup => cmd_backup(&cli),
        Command::Purge => cmd_purge(&cli),
    }
}

// ─── Command Implementations ────────────────────────────────────────────────

fn cmd_init(output: &Path) -> error::Result<()> {
    config::init_config(output)?;
    eprintln!(
        "{} Created configuration file: {}",
        colored::Colorize::green("✓"),
        output.display(),
    );
    eprintln!("  Edit the file to configure your mappings, then run:");
    eprintln!("  {} nc-s3-backup backup", colored::Colorize::bold("$"));
    Ok(())
}

fn cmd_backup(cli: &Cli) -> error::Result<()> {
    let cfg = load_config(cli)?;
    print_header("Backup");

    let mut source = PostgresMetadataSource::connect(&cfg.postgres.dsn, &cfg.postgres.schema)?;
    let store = S3ObjectStore::new(cfg.s3.endpoint_url.as_deref(), cfg.s3.region.as_deref())?;
    let snapshot_token = chrono::Local::now().format(&cfg.backup_date_format).to_string();
    let mut metrics = metrics::Metrics::new();

    eprintln!(
        "  Snapshot token: {}",
        colored::Colorize::bold(snapshot_token.as_str())
    );
    eprintln!("  Mappings:       {}", cfg.mapping.len());
    eprintln!();

    let spinner = progress_spinner("backing up mappings");

    engine::backup(
        &cfg.mapping,
        &mut source,
        &store,
        &cfg.excluded_mimetype_ids,
        &snapshot_token,
        &mut metrics,
    )?;

    spinner.finish_and_clear();
    print_metrics(&metrics);
    eprintln!("{} backup complete", colored::Colorize::green("✓"));
    Ok(())
}

fn cmd_purge(cli: &Cli) -> error::Result<()> {
    let cfg = load_config(cli)?;
    print_header("Purge");

    let mut metrics = metrics::Metrics::new();
    let spinner = progress_spinner("sweeping repository blobs");
    let reports = purge::purge(&cfg.mapping, &mut metrics)?;
    spinner.finish_and_clear();

    for (root, report) in &reports {
        eprintln!("  {}", colored::Colorize::bold(root.display().to_string().as_str()));
        eprintln!(
            "    sha1:  removed {:>6}  freed {}",
            report.sha1.files_removed,
            format_size(report.sha1.bytes_freed),
        );
        eprintln!(
            "    etag:  removed {:>6}  freed {}",
            report.etag.files_removed,
            format_size(report.etag.bytes_freed),
        );
    }

    print_metrics(&metrics);
    eprintln!("{} purge complete", colored::Colorize::green("✓"));
    Ok(())
}

// ─── Helpers ────────────────────────────────────────────────────────────────

fn load_config(cli: &Cli) -> error::Result<config::Config> {
    if let Some(path) = &cli.config {
        config::load_config_from(path)
    } else {
        config::load_config()
    }
}

fn print_header(action: &str) {
    eprintln!();
    eprintln!(
        "  {} nc-s3-backup v{} — {action}",
        colored::Colorize::bold("⚡"),
        env!("CARGO_PKG_VERSION"),
    );
    eprintln!();
}

fn progress_spinner(message: &'static str) -> indicatif::ProgressBar {
    let bar = indicatif::ProgressBar::new_spinner();
    bar.set_message(message);
    bar.enable_steady_tick(std::time::Duration::from_millis(120));
    bar
}

fn print_metrics(metrics: &metrics::Metrics) {
    let report = metrics.report();
    if report.is_empty() {
        return;
    }
    eprintln!();
    eprintln!("  {}", colored::Colorize::dimmed("timing"));
    for stats in report {
        eprintln!("    {stats}");
    }
}

fn format_size(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KiB", "MiB", "GiB", "TiB"];
    let mut size = bytes as f64;
    let mut unit = 0;
    while size >= 1024.0 && unit < UNITS.len() - 1 {
        size /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes} {}", UNITS[unit])
    } else {
        format!("{size:.1} {}", UNITS[unit])
    }
}
