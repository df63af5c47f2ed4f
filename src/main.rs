//! Store-Ripple main entry point
//!
//! This is the command-line interface for the Store-Ripple catalog crawler.

use anyhow::{anyhow, Context};
use clap::{Args, Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use store_ripple::catalog::{CatalogClient, HttpCatalogClient};
use store_ripple::config::{load_config_with_hash, Config, DownloadOverrides};
use store_ripple::crawler::{self, LoopOutcome};
use store_ripple::output::{load_statistics, print_statistics};
use store_ripple::storage::open_storage;
use store_ripple::TaskKind;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

/// Store-Ripple: a lease-based app catalog crawler
///
/// Store-Ripple walks an app catalog outward from its category charts,
/// following similar-app, same-creator and cross-reference edges, and keeps
/// its work queue in SQLite so any number of workers can share it.
#[derive(Parser, Debug)]
#[command(name = "store-ripple")]
#[command(version)]
#[command(about = "A lease-based app catalog crawler", long_about = None)]
struct Cli {
    /// Path to TOML configuration file
    #[arg(value_name = "CONFIG")]
    config: PathBuf,

    /// Increase logging verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, conflicts_with = "verbose", global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Walk the category tree and enqueue the apps its charts list
    Seed,

    /// Drain the task queue until it is exhausted
    Crawl {
        /// Number of concurrent crawl workers
        #[arg(long, default_value_t = 1)]
        workers: usize,
    },

    /// Download binaries for stored records
    Download(DownloadArgs),

    /// Raise the priority of tasks for the given keys
    Prioritize {
        /// Package ids (or creator ids for --kind creator)
        #[arg(value_name = "KEYS", required = true)]
        keys: Vec<String>,

        /// Priority to set [default: crawler.default-priority-bump]
        #[arg(long)]
        priority: Option<i64>,

        /// Task kind the keys belong to (details, similar, creator)
        #[arg(long, default_value = "details", value_parser = parse_task_kind)]
        kind: TaskKind,
    },

    /// Show statistics from the database and exit
    Stats,
}

#[derive(Args, Debug)]
struct DownloadArgs {
    /// Directory to write binaries to
    #[arg(long)]
    output_dir: Option<String>,

    /// Stop claiming new downloads once the directory reaches this size
    #[arg(long)]
    max_dir_size_mb: Option<u64>,

    /// Also download paid apps
    #[arg(long)]
    include_paid: bool,
}

fn parse_task_kind(s: &str) -> Result<TaskKind, String> {
    TaskKind::from_cli_name(s).ok_or_else(|| format!("unknown task kind: {}", s))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Setup logging based on verbosity
    setup_logging(cli.verbose, cli.quiet);

    tracing::info!("Loading configuration from: {}", cli.config.display());
    let (mut config, config_hash) = load_config_with_hash(&cli.config)
        .with_context(|| format!("failed to load {}", cli.config.display()))?;
    tracing::info!("Configuration loaded successfully (hash: {})", config_hash);

    match cli.command {
        Command::Seed => handle_seed(&config, &config_hash).await,
        Command::Crawl { workers } => handle_crawl(&config, &config_hash, workers).await,
        Command::Download(args) => {
            DownloadOverrides {
                output_dir: args.output_dir,
                max_dir_size_mb: args.max_dir_size_mb,
                include_paid: args.include_paid,
            }
            .apply(&mut config)
            .context("invalid download options")?;
            handle_download(&config, &config_hash).await
        }
        Command::Prioritize {
            keys,
            priority,
            kind,
        } => handle_prioritize(&config, &config_hash, kind, &keys, priority),
        Command::Stats => handle_stats(&config),
    }
}

/// Sets up the logging/tracing subscriber based on verbosity level
fn setup_logging(verbose: u8, quiet: bool) {
    let filter = if quiet {
        // Only show errors
        EnvFilter::new("error")
    } else {
        match verbose {
            0 => EnvFilter::new("store_ripple=info,warn"),
            1 => EnvFilter::new("store_ripple=debug,info"),
            2 => EnvFilter::new("store_ripple=trace,debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .init();
}

/// Builds the catalog client from the `[catalog]` section
fn catalog_client(config: &Config) -> anyhow::Result<Arc<dyn CatalogClient>> {
    let client = HttpCatalogClient::new(&config.catalog)
        .with_context(|| format!("failed to set up catalog client for {}", config.catalog.base_url))?;
    Ok(Arc::new(client))
}

/// Returns a token that is cancelled on Ctrl-C
///
/// Drivers reset the lease they hold and stop when it fires.
fn cancel_on_interrupt() -> CancellationToken {
    let cancel = CancellationToken::new();
    let token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupt received, releasing leases and stopping");
            token.cancel();
        }
    });
    cancel
}

/// Handles the `seed` command
async fn handle_seed(config: &Config, config_hash: &str) -> anyhow::Result<()> {
    let catalog = catalog_client(config)?;
    let report = crawler::seed(config, config_hash, catalog, cancel_on_interrupt())
        .await
        .context("seeding failed")?;

    println!(
        "Seeded {} charts from {} categories: {} new tasks, {} new records",
        report.charts, report.categories, report.tasks_enqueued, report.records_inserted
    );
    if report.skipped > 0 {
        println!("{} categories were refused by the catalog", report.skipped);
    }
    if report.cancelled {
        println!("Seeding was interrupted; run it again to continue");
    }
    Ok(())
}

/// Handles the `crawl` command
async fn handle_crawl(config: &Config, config_hash: &str, workers: usize) -> anyhow::Result<()> {
    if workers == 0 {
        return Err(anyhow!("--workers must be at least 1"));
    }

    let catalog = catalog_client(config)?;
    let report = crawler::crawl(config, config_hash, catalog, workers, cancel_on_interrupt())
        .await
        .context("crawl failed")?;

    match report.outcome {
        LoopOutcome::Exhausted => println!(
            "Queue exhausted: {} tasks completed, {} with errors",
            report.completed, report.failed
        ),
        LoopOutcome::Cancelled => println!(
            "Crawl interrupted after {} tasks ({} with errors)",
            report.completed, report.failed
        ),
    }
    Ok(())
}

/// Handles the `download` command
async fn handle_download(config: &Config, config_hash: &str) -> anyhow::Result<()> {
    tracing::info!(
        "Downloading into {} (cap {} MB, {})",
        config.download.output_dir,
        config.download.max_dir_size_mb,
        if config.download.free_only {
            "free apps only"
        } else {
            "free and paid apps"
        }
    );

    let catalog = catalog_client(config)?;
    let report = crawler::download(config, config_hash, catalog, cancel_on_interrupt())
        .await
        .context("download failed")?;

    println!(
        "{} binaries written, {} without a binary, {} unavailable",
        report.downloaded, report.skipped, report.unavailable
    );
    if report.outcome == LoopOutcome::Cancelled {
        println!("Downloads were interrupted");
    }
    Ok(())
}

/// Handles the `prioritize` command
fn handle_prioritize(
    config: &Config,
    config_hash: &str,
    kind: TaskKind,
    keys: &[String],
    priority: Option<i64>,
) -> anyhow::Result<()> {
    let priority = priority.unwrap_or(config.crawler.default_priority_bump);
    let matched = crawler::prioritize(config, config_hash, kind, keys, priority)
        .context("failed to update priorities")?;

    println!(
        "Set priority {} on {} of {} {} tasks",
        priority,
        matched,
        keys.len(),
        kind
    );
    Ok(())
}

/// Handles the `stats` command: shows statistics from the database
fn handle_stats(config: &Config) -> anyhow::Result<()> {
    println!("Database: {}\n", config.store.database_path);

    let storage = open_storage(Path::new(&config.store.database_path))
        .with_context(|| format!("failed to open {}", config.store.database_path))?;
    let stats = load_statistics(&storage).context("failed to read statistics")?;

    print_statistics(&stats);
    Ok(())
}
