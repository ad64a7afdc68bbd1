//! star-sweep main entry point
//!
//! This is the command-line interface for the star-sweep crawler.

use anyhow::Context;
use clap::Parser;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use star_sweep::config::{load_config_with_hash, read_token, Config};
use star_sweep::crawler::crawl;
use star_sweep::output::{load_statistics, print_report, print_statistics};
use star_sweep::storage::{FileProgressStore, ProgressStore, SqliteStorage};
use star_sweep::CrawlOutcome;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

/// star-sweep: an adaptive, resumable repository crawler
///
/// star-sweep enumerates repositories through the GitHub search API by
/// star-count range, splitting ranges that exceed the per-query result
/// cap, and stores them in SQLite. Interrupt it at any time; the next run
/// picks up after the last saved page.
#[derive(Parser, Debug)]
#[command(name = "star-sweep")]
#[command(version)]
#[command(about = "An adaptive, resumable repository crawler", long_about = None)]
struct Cli {
    /// Path to TOML configuration file
    #[arg(value_name = "CONFIG")]
    config: PathBuf,

    /// Increase logging verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,

    /// Resume from the saved checkpoint (default behavior)
    #[arg(long, conflicts_with = "fresh")]
    resume: bool,

    /// Discard the saved checkpoint and start the plan over
    #[arg(long, conflicts_with = "resume")]
    fresh: bool,

    /// Validate config and show the plan without crawling
    #[arg(long, conflicts_with = "stats")]
    dry_run: bool,

    /// Show statistics from the database and exit
    #[arg(long, conflicts_with = "dry_run")]
    stats: bool,
}

/// Exit status when the plan ran out before the target
const EXIT_SHORT_OF_TARGET: u8 = 2;

/// Exit status after a graceful interruption
const EXIT_INTERRUPTED: u8 = 130;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Setup logging based on verbosity
    setup_logging(cli.verbose, cli.quiet);

    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            tracing::error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<ExitCode> {
    tracing::info!("Loading configuration from: {}", cli.config.display());
    let (config, config_hash) = load_config_with_hash(&cli.config)
        .with_context(|| format!("Failed to load configuration {}", cli.config.display()))?;
    tracing::info!("Configuration loaded successfully (hash: {})", config_hash);

    if cli.dry_run {
        handle_dry_run(&config)?;
        return Ok(ExitCode::SUCCESS);
    }
    if cli.stats {
        handle_stats(&config)?;
        return Ok(ExitCode::SUCCESS);
    }

    handle_crawl(&config, &config_hash, cli.fresh).await
}

/// Sets up the logging/tracing subscriber based on verbosity level
fn setup_logging(verbose: u8, quiet: bool) {
    let filter = if quiet {
        EnvFilter::new("error")
    } else {
        match verbose {
            0 => EnvFilter::new("star_sweep=info,warn"),
            1 => EnvFilter::new("star_sweep=debug,info"),
            2 => EnvFilter::new("star_sweep=trace,debug"),
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

/// Handles the --dry-run mode: validates config and shows the plan
fn handle_dry_run(config: &Config) -> anyhow::Result<()> {
    let plan = config.plan_ranges()?;
    let progress = FileProgressStore::new(&config.output.checkpoint_path);
    let checkpoint = progress.load()?;

    println!("=== star-sweep Dry Run ===\n");

    println!("Crawler Configuration:");
    println!("  Target count: {}", config.crawler.target_count);
    println!("  Result cap: {}", config.crawler.result_cap);
    println!("  Page size: {}", config.crawler.page_size);
    println!(
        "  Rate floor: {} calls (+{}s margin)",
        config.crawler.safety_floor, config.crawler.safety_margin_secs
    );
    println!("  Max retries: {}", config.crawler.max_retries);

    println!("\nAPI:");
    println!("  Endpoint: {}", config.github.endpoint);
    println!("  Token variable: {}", config.github.token_env);

    println!("\nOutput:");
    println!("  Database: {}", config.output.database_path);
    println!("  Checkpoint: {}", config.output.checkpoint_path);

    println!("\nPlan ({} ranges):", plan.len());
    for range in &plan {
        println!("  - {}  ({})", range, range.predicate());
    }

    println!();
    if checkpoint.finished {
        println!("✓ Checkpoint marks the plan as finished; use --fresh to crawl again");
    } else if !checkpoint.retrying.is_empty() && checkpoint.active_range.is_none() {
        println!(
            "✓ Would retry {} ranges skipped by the previous pass",
            checkpoint.retrying.len()
        );
    } else if let Some(range) = checkpoint.active_range {
        println!(
            "✓ Would resume in range {} with {} items already persisted",
            range, checkpoint.total_persisted
        );
    } else {
        println!("✓ Would start at the beginning of the plan");
    }
    println!("✓ Configuration is valid");

    Ok(())
}

/// Handles the --stats mode: shows statistics from the database
fn handle_stats(config: &Config) -> anyhow::Result<()> {
    println!("Database: {}\n", config.output.database_path);

    let storage = SqliteStorage::new(Path::new(&config.output.database_path))?;
    let stats = load_statistics(&storage)?;

    let progress = FileProgressStore::new(&config.output.checkpoint_path);
    let checkpoint = match progress.load() {
        Ok(checkpoint) => Some(checkpoint),
        Err(e) => {
            tracing::warn!("Could not read checkpoint: {}", e);
            None
        }
    };

    print_statistics(&stats, checkpoint.as_ref());
    Ok(())
}

/// Handles the main crawl operation
async fn handle_crawl(config: &Config, config_hash: &str, fresh: bool) -> anyhow::Result<ExitCode> {
    let token = read_token(config)?;

    if fresh {
        tracing::info!("Starting fresh crawl (ignoring saved checkpoint)");
    } else {
        tracing::info!("Starting crawl (will resume from checkpoint if present)");
    }

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!(
                "Interrupt received; abandoning any in-flight request and saving the checkpoint"
            );
            on_signal.cancel();
        }
    });

    let report = crawl(config, config_hash, token, fresh, cancel)
        .await
        .context("Crawl failed")?;

    print_report(&report);

    Ok(match report.outcome {
        CrawlOutcome::TargetReached => ExitCode::SUCCESS,
        CrawlOutcome::PlanExhausted => ExitCode::from(EXIT_SHORT_OF_TARGET),
        CrawlOutcome::Interrupted => ExitCode::from(EXIT_INTERRUPTED),
    })
}
