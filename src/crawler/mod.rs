//! Crawler module for range-partitioned search crawling
//!
//! This module contains the core crawling logic, including:
//! - The depth-first range queue and checkpoint-based resumption
//! - Retry policy for transport and storage failures
//! - The crawl engine state machine

mod engine;
mod queue;
mod retry;

pub use engine::{CrawlEngine, CrawlOutcome, CrawlReport, EngineSettings, RangeFailure};
pub use queue::WorkQueue;
pub use retry::RetryPolicy;

use crate::config::Config;
use crate::gateway::GithubGateway;
use crate::storage::{FileProgressStore, ProgressStore, RunStatus, SqliteStorage};
use crate::SweepError;
use std::path::Path;
use tokio_util::sync::CancellationToken;

/// Runs a complete crawl operation
///
/// This is the main entry point for starting a crawl. It will:
/// 1. Open the database and the checkpoint file
/// 2. Discard the checkpoint when `fresh` is set
/// 3. Rebuild the range queue from the plan and the checkpoint
/// 4. Record a run and crawl until the target, the end of the plan or
///    cancellation
/// 5. Record the run's final status
///
/// # Arguments
///
/// * `config` - The validated configuration
/// * `config_hash` - Hash of the config file, stored with the run
/// * `token` - API token for the search gateway
/// * `fresh` - Start from the beginning of the plan
/// * `cancel` - Token that requests a graceful stop
///
/// # Returns
///
/// * `Ok(CrawlReport)` - Crawl stopped cleanly
/// * `Err(SweepError)` - Crawl failed; the checkpoint is still resumable
pub async fn crawl(
    config: &Config,
    config_hash: &str,
    token: String,
    fresh: bool,
    cancel: CancellationToken,
) -> Result<CrawlReport, SweepError> {
    let plan = config.plan_ranges()?;

    let storage = SqliteStorage::new(Path::new(&config.output.database_path))?;
    let mut progress = FileProgressStore::new(&config.output.checkpoint_path);
    if fresh {
        tracing::info!(
            "Fresh crawl requested; discarding checkpoint {}",
            progress.path().display()
        );
        progress.reset()?;
    }

    let gateway = GithubGateway::from_config(config, token)?;
    let settings = EngineSettings::from_config(&config.crawler);

    let mut engine =
        CrawlEngine::new(gateway, storage, progress, &plan, settings)?.with_cancellation(cancel);

    let run_id = engine.sink_mut().create_run(config_hash)?;
    tracing::info!(
        "Starting crawl run {} over {} plan ranges (target {})",
        run_id,
        plan.len(),
        settings.target_count
    );

    let result = engine.run().await;

    let status = match &result {
        Ok(report) => report.outcome.run_status(),
        Err(_) => RunStatus::Failed,
    };
    let persisted = engine.persisted_this_run();
    if let Err(e) = engine.sink_mut().finish_run(run_id, status, persisted) {
        tracing::error!("Failed to record end of run {}: {}", run_id, e);
    }

    result
}
