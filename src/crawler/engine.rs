//! Crawl engine - the range-partitioning crawl loop
//!
//! The engine drains a depth-first queue of search ranges. For every page it
//! asks the partitioner whether the range is dense; dense ranges are split
//! and their page discarded, sparse ones are paginated to the end. After
//! each persisted page the checkpoint is rewritten, so at any instant the
//! checkpoint names the range being worked on, the cursor after the last
//! page that reached the sink and the running total. Once a range is done
//! the checkpoint moves on to the next queued range, so a finished range is
//! never named again.

use crate::config::CrawlerConfig;
use crate::crawler::queue::WorkQueue;
use crate::crawler::retry::RetryPolicy;
use crate::gateway::{GatewayError, Item, Page, SearchGateway};
use crate::range::{Decision, RangePartitioner, SearchRange};
use crate::rate::{RateBudget, RatePolicy};
use crate::storage::{CrawlCheckpoint, ProgressStore, RepositorySink, StorageResult, RunStatus};
use crate::SweepError;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Tunables for one crawl
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineSettings {
    /// Stop once this many items have been persisted
    pub target_count: u64,

    pub partitioner: RangePartitioner,

    pub rate: RatePolicy,

    /// Applies to transport failures and failed writes
    pub retry: RetryPolicy,

    /// Sleep after every persisted page that has a successor
    pub page_delay: Duration,
}

impl EngineSettings {
    pub fn from_config(config: &CrawlerConfig) -> Self {
        let base_delay = Duration::from_millis(config.retry_backoff_ms);
        Self {
            target_count: config.target_count,
            partitioner: RangePartitioner::new(config.result_cap),
            rate: RatePolicy {
                floor: config.safety_floor,
                safety_margin: Duration::from_secs(config.safety_margin_secs),
                fallback_delay: Duration::from_millis(config.fallback_delay_ms),
            },
            retry: RetryPolicy {
                max_attempts: config.max_retries.saturating_add(1),
                base_delay,
                max_delay: base_delay.saturating_mul(32),
            },
            page_delay: Duration::from_millis(config.page_delay_ms),
        }
    }
}

/// Why a crawl stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CrawlOutcome {
    /// The persisted total reached the target
    TargetReached,

    /// The current pass was drained before the target
    PlanExhausted,

    /// Cancellation was requested; the checkpoint allows resuming
    Interrupted,
}

impl CrawlOutcome {
    /// Status recorded for the run in the database
    pub fn run_status(&self) -> RunStatus {
        match self {
            Self::TargetReached | Self::PlanExhausted => RunStatus::Completed,
            Self::Interrupted => RunStatus::Interrupted,
        }
    }
}

/// A range the API refused to serve
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RangeFailure {
    pub range: SearchRange,
    pub reason: String,
}

/// Summary of a finished crawl
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CrawlReport {
    pub outcome: CrawlOutcome,

    /// Items persisted across all runs of this crawl
    pub total_persisted: u64,

    /// Items persisted by this run alone
    pub persisted_this_run: u64,

    pub pages_fetched: u64,
    pub splits: u64,

    /// Dense ranges that could not be narrowed further
    pub truncated_ranges: Vec<SearchRange>,

    /// Ranges skipped after the API rejected their query
    pub failed_ranges: Vec<RangeFailure>,
}

#[derive(Debug, Default)]
struct Tally {
    persisted_this_run: u64,
    pages_fetched: u64,
    splits: u64,
    truncated_ranges: Vec<SearchRange>,
    failed_ranges: Vec<RangeFailure>,
}

/// States of the crawl loop
#[derive(Debug)]
enum Step {
    /// Pick the next range, or stop
    Idle,

    /// Fetch the page of `range` after `cursor`
    Fetch {
        range: SearchRange,
        cursor: Option<String>,
    },

    /// Stop
    Done(CrawlOutcome),
}

/// What a fetch attempt produced once retries are settled
enum Fetched {
    Page(Page),
    Rejected(String),
    Interrupted,
}

/// Drives one crawl from a checkpoint to an outcome
pub struct CrawlEngine<G, S, P> {
    gateway: G,
    sink: S,
    progress: P,
    settings: EngineSettings,
    budget: RateBudget,
    queue: WorkQueue,
    checkpoint: CrawlCheckpoint,
    resume_cursor: Option<(SearchRange, String)>,
    cancel: CancellationToken,
    tally: Tally,
}

impl<G, S, P> CrawlEngine<G, S, P>
where
    G: SearchGateway,
    S: RepositorySink,
    P: ProgressStore,
{
    /// Creates an engine positioned at the saved checkpoint
    ///
    /// # Errors
    ///
    /// Fails if the checkpoint cannot be read or does not belong to `plan`.
    pub fn new(
        gateway: G,
        sink: S,
        progress: P,
        plan: &[SearchRange],
        settings: EngineSettings,
    ) -> Result<Self, SweepError> {
        let checkpoint = progress.load()?;
        let queue = WorkQueue::resume(plan, &checkpoint)?;

        if checkpoint.finished {
            tracing::info!(
                "Checkpoint marks the plan as finished ({} items); use --fresh to crawl again",
                checkpoint.total_persisted
            );
        } else if !checkpoint.retrying.is_empty() && checkpoint.active_range.is_none() {
            tracing::info!(
                "Retrying {} ranges skipped by an earlier pass",
                checkpoint.retrying.len()
            );
        } else if let Some(range) = checkpoint.active_range {
            tracing::info!(
                "Resuming in range {} with {} items already persisted ({} ranges queued)",
                range,
                checkpoint.total_persisted,
                queue.len()
            );
        }

        let resume_cursor = match (checkpoint.active_range, checkpoint.cursor.clone()) {
            (Some(range), Some(cursor)) if !checkpoint.finished => Some((range, cursor)),
            _ => None,
        };

        Ok(Self {
            gateway,
            sink,
            progress,
            budget: RateBudget::new(settings.rate),
            settings,
            queue,
            checkpoint,
            resume_cursor,
            cancel: CancellationToken::new(),
            tally: Tally::default(),
        })
    }

    /// Uses `cancel` to request a graceful stop
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn checkpoint(&self) -> &CrawlCheckpoint {
        &self.checkpoint
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn sink_mut(&mut self) -> &mut S {
        &mut self.sink
    }

    pub fn progress(&self) -> &P {
        &self.progress
    }

    /// Items persisted by this run so far
    pub fn persisted_this_run(&self) -> u64 {
        self.tally.persisted_this_run
    }

    /// Runs the crawl until the target, the end of the plan or cancellation
    ///
    /// # Errors
    ///
    /// A fatal error is returned after the current checkpoint has been
    /// flushed one last time, so a later run resumes at the same place.
    pub async fn run(&mut self) -> Result<CrawlReport, SweepError> {
        match self.drive().await {
            Ok(outcome) => self.finish(outcome).await,
            Err(e) => {
                if let Err(flush) = self.progress.save(&self.checkpoint) {
                    tracing::error!("Failed to flush checkpoint after error: {}", flush);
                }
                Err(e)
            }
        }
    }

    async fn drive(&mut self) -> Result<CrawlOutcome, SweepError> {
        let mut step = Step::Idle;
        loop {
            step = match step {
                Step::Idle => self.next_range().await?,
                Step::Fetch { range, cursor } => self.fetch_step(range, cursor).await?,
                Step::Done(outcome) => return Ok(outcome),
            };
        }
    }

    async fn next_range(&mut self) -> Result<Step, SweepError> {
        if self.cancel.is_cancelled() {
            return Ok(Step::Done(CrawlOutcome::Interrupted));
        }
        if self.target_reached() {
            return Ok(Step::Done(CrawlOutcome::TargetReached));
        }

        let Some(range) = self.queue.pop_next() else {
            return Ok(Step::Done(CrawlOutcome::PlanExhausted));
        };

        let cursor = match self.resume_cursor.take() {
            Some((resumed, cursor)) if resumed == range => Some(cursor),
            _ => None,
        };

        let positioned =
            self.checkpoint.active_range == Some(range) && self.checkpoint.cursor.is_none();
        if cursor.is_none() && !positioned {
            self.checkpoint.begin(range);
            self.save_checkpoint().await?;
        }

        tracing::debug!("Crawling range {} ({} more queued)", range, self.queue.len());
        Ok(Step::Fetch { range, cursor })
    }

    async fn fetch_step(
        &mut self,
        range: SearchRange,
        cursor: Option<String>,
    ) -> Result<Step, SweepError> {
        let page = match self.fetch_with_retry(&range, cursor.as_deref()).await? {
            Fetched::Page(page) => page,
            Fetched::Interrupted => return Ok(Step::Done(CrawlOutcome::Interrupted)),
            Fetched::Rejected(reason) => {
                tracing::warn!("Skipping range {}: {}", range, reason);
                self.tally.failed_ranges.push(RangeFailure { range, reason });
                self.checkpoint.skipped.push(range);
                self.range_done().await?;
                return Ok(Step::Idle);
            }
        };
        self.tally.pages_fetched += 1;

        match self.settings.partitioner.evaluate(&range, page.total_count) {
            Decision::NeedsSplit(children) => {
                let [left, right] = children;
                tracing::info!(
                    "Range {} reports {} matches; splitting into {} and {}",
                    range,
                    page.total_count,
                    left,
                    right
                );
                self.checkpoint.begin(left);
                self.save_checkpoint().await?;
                self.queue.push_split(children);
                self.tally.splits += 1;
                Ok(Step::Idle)
            }
            Decision::Truncated { reachable } => {
                if !self.tally.truncated_ranges.contains(&range) {
                    tracing::warn!(
                        "Range {} reports {} matches but cannot be split; only {} are reachable",
                        range,
                        page.total_count,
                        reachable
                    );
                    self.tally.truncated_ranges.push(range);
                }
                self.persist_page(range, cursor, page).await
            }
            Decision::Exhausted => self.persist_page(range, cursor, page).await,
        }
    }

    async fn persist_page(
        &mut self,
        range: SearchRange,
        cursor: Option<String>,
        page: Page,
    ) -> Result<Step, SweepError> {
        let acked = if page.items.is_empty() {
            0
        } else {
            self.upsert_with_retry(&page.items).await? as u64
        };

        let total = self.checkpoint.total_persisted + acked;
        self.checkpoint.total_persisted = total;
        let next = match page.next_cursor {
            _ if !page.has_more => None,
            Some(next) if cursor.as_deref() == Some(next.as_str()) => {
                tracing::warn!("Range {} returned the same cursor twice; moving on", range);
                None
            }
            Some(next) => Some(next),
            None => {
                tracing::warn!("Range {} has more pages but no cursor; moving on", range);
                None
            }
        };

        match &next {
            Some(next) => {
                self.checkpoint.active_range = Some(range);
                self.checkpoint.cursor = Some(next.clone());
                self.save_checkpoint().await?;
            }
            None => self.range_done().await?,
        }
        self.tally.persisted_this_run += acked;

        tracing::info!(
            "Persisted {} items from {} ({} total)",
            acked,
            range,
            total
        );

        if self.target_reached() {
            return Ok(Step::Done(CrawlOutcome::TargetReached));
        }

        let Some(next) = next else {
            return Ok(Step::Idle);
        };

        if !self.sleep(self.settings.page_delay).await {
            return Ok(Step::Done(CrawlOutcome::Interrupted));
        }

        Ok(Step::Fetch {
            range,
            cursor: Some(next),
        })
    }

    async fn fetch_with_retry(
        &mut self,
        range: &SearchRange,
        cursor: Option<&str>,
    ) -> Result<Fetched, SweepError> {
        let predicate = range.predicate();
        let mut failures = 0u32;

        loop {
            let pause = self.budget.should_pause();
            if !pause.is_zero() {
                match self.budget.remaining() {
                    Some(remaining) => tracing::info!(
                        "Rate budget low ({} calls left); pausing {:.1}s",
                        remaining,
                        pause.as_secs_f64()
                    ),
                    None => tracing::debug!("Rate budget unknown; pausing {:?}", pause),
                }
                if !self.sleep(pause).await {
                    return Ok(Fetched::Interrupted);
                }
            }

            let response = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Ok(Fetched::Interrupted),
                response = self.gateway.fetch_page(&predicate, cursor) => response,
            };
            self.budget.update(response.rate.as_ref());

            match response.outcome {
                Ok(page) => return Ok(Fetched::Page(page)),
                Err(GatewayError::Query(reason)) => return Ok(Fetched::Rejected(reason)),
                Err(error @ GatewayError::Unauthorized(_)) => return Err(error.into()),
                Err(GatewayError::RateExhausted(reason)) => {
                    tracing::warn!("Rate limit hit on {}: {}", predicate, reason);
                    self.budget.mark_exhausted();
                }
                Err(GatewayError::Transport(reason)) => {
                    failures += 1;
                    if !self.settings.retry.allows_retry(failures) {
                        return Err(SweepError::RetriesExhausted {
                            operation: format!("fetching {}", predicate),
                            attempts: failures,
                            last_error: reason,
                        });
                    }

                    let delay = self.settings.retry.delay_for(failures);
                    tracing::warn!(
                        "Fetching {} failed (attempt {}/{}): {}; retrying in {:?}",
                        predicate,
                        failures,
                        self.settings.retry.max_attempts,
                        reason,
                        delay
                    );
                    if !self.sleep(delay).await {
                        return Ok(Fetched::Interrupted);
                    }
                }
            }
        }
    }

    async fn upsert_with_retry(&mut self, items: &[Item]) -> Result<usize, SweepError> {
        let policy = self.settings.retry;
        let sink = &mut self.sink;
        retry_storage(policy, "persisting batch", || sink.upsert_batch(items)).await
    }

    /// Moves the checkpoint past a range that needs no more pages
    ///
    /// The checkpoint names the next queued range, or closes the pass when
    /// nothing is queued.
    async fn range_done(&mut self) -> Result<(), SweepError> {
        match self.queue.peek() {
            Some(next) => self.checkpoint.begin(*next),
            None => self.checkpoint.complete_pass(),
        }
        self.save_checkpoint().await
    }

    async fn save_checkpoint(&mut self) -> Result<(), SweepError> {
        let policy = self.settings.retry;
        let progress = &mut self.progress;
        let checkpoint = &self.checkpoint;
        retry_storage(policy, "saving checkpoint", || progress.save(checkpoint)).await
    }

    async fn finish(&mut self, outcome: CrawlOutcome) -> Result<CrawlReport, SweepError> {
        self.save_checkpoint().await?;

        match outcome {
            CrawlOutcome::TargetReached => tracing::info!(
                "Target of {} reached with {} items",
                self.settings.target_count,
                self.checkpoint.total_persisted
            ),
            CrawlOutcome::PlanExhausted if self.checkpoint.finished => tracing::warn!(
                "Plan exhausted with {} of {} items",
                self.checkpoint.total_persisted,
                self.settings.target_count
            ),
            CrawlOutcome::PlanExhausted => tracing::warn!(
                "Pass over with {} of {} items; {} skipped ranges are retried on the next run",
                self.checkpoint.total_persisted,
                self.settings.target_count,
                self.checkpoint.retrying.len()
            ),
            CrawlOutcome::Interrupted => tracing::info!(
                "Interrupted; checkpoint saved at {} items",
                self.checkpoint.total_persisted
            ),
        }

        Ok(CrawlReport {
            outcome,
            total_persisted: self.checkpoint.total_persisted,
            persisted_this_run: self.tally.persisted_this_run,
            pages_fetched: self.tally.pages_fetched,
            splits: self.tally.splits,
            truncated_ranges: self.tally.truncated_ranges.clone(),
            failed_ranges: self.tally.failed_ranges.clone(),
        })
    }

    fn target_reached(&self) -> bool {
        self.checkpoint.total_persisted >= self.settings.target_count
    }

    /// Sleeps unless cancelled first; returns false on cancellation
    async fn sleep(&self, duration: Duration) -> bool {
        if duration.is_zero() {
            return !self.cancel.is_cancelled();
        }
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => false,
            _ = tokio::time::sleep(duration) => true,
        }
    }
}

/// Retries a local storage operation with backoff
///
/// Cancellation is not observed here; a write in progress is allowed to
/// finish so the sink and the checkpoint stay in step.
async fn retry_storage<T>(
    policy: RetryPolicy,
    operation: &str,
    mut op: impl FnMut() -> StorageResult<T>,
) -> Result<T, SweepError> {
    let mut failures = 0u32;
    loop {
        match op() {
            Ok(value) => return Ok(value),
            Err(e) => {
                failures += 1;
                if !policy.allows_retry(failures) {
                    return Err(SweepError::RetriesExhausted {
                        operation: operation.to_string(),
                        attempts: failures,
                        last_error: e.to_string(),
                    });
                }
                let delay = policy.delay_for(failures);
                tracing::warn!(
                    "{} failed (attempt {}/{}): {}; retrying in {:?}",
                    operation,
                    failures,
                    policy.max_attempts,
                    e,
                    delay
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}
