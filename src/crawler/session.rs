//! Collection session - the per-target fetch loop
//!
//! A session walks one target's pages from the first cursor until the source
//! runs out, a cap is reached, or a failure ends it early. It:
//! - Loads the target's checkpoint and seeds the accumulator and error ledger
//! - Fetches pages through the `CursorFetcher`, bounded by a timeout
//! - Merges each page and saves the checkpoint on the configured cadence
//! - Paces between pages and backs off on rate limits via the `RateController`
//! - Records pages that fail twice and moves past them when the source allows
//!
//! Only a fatal target failure or a failed checkpoint write escalates out of
//! a session. Everything else is absorbed into the ledger and the summary.

use crate::config::Config;
use crate::crawler::pacer::{Clock, PacingPolicy, PauseKind, RateController};
use crate::crawler::{CursorFetcher, FetchError};
use crate::output::{SessionSummary, Termination};
use crate::state::{MergeStats, SessionPhase, SessionState};
use crate::storage::{Checkpoint, CheckpointStore, ErrorEntry, Identified, RecordKind};
use crate::target::page_reference;
use crate::HarvestError;
use std::time::Duration;

/// Consecutive failures on one page before it is recorded and skipped
const MAX_PAGE_ATTEMPTS: u32 = 2;

/// When the session writes its checkpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckpointCadence {
    /// After every successfully merged page
    EveryPage,
    /// Once at least this many items have been merged since the last save
    EveryRecords(usize),
}

/// Limits and timing for one session
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Stop once the accumulated set holds this many records
    pub max_items: Option<usize>,

    /// Stop after this many successful pages in one run
    pub max_pages: Option<u32>,

    pub cadence: CheckpointCadence,

    /// Upper bound on one fetch attempt
    pub fetch_timeout: Duration,

    /// Rate-limit events tolerated before the session ends early
    pub max_rate_limit_retries: u32,
}

impl SessionConfig {
    /// Builds the uncapped session settings from configuration
    pub fn from_config(config: &Config) -> Self {
        let cadence = match config.session.checkpoint_every_records {
            0 => CheckpointCadence::EveryPage,
            k => CheckpointCadence::EveryRecords(k),
        };

        Self {
            max_items: None,
            max_pages: None,
            cadence,
            fetch_timeout: Duration::from_secs(config.session.fetch_timeout_secs),
            max_rate_limit_retries: config.pacing.max_rate_limit_retries,
        }
    }

    pub fn with_max_items(mut self, max_items: usize) -> Self {
        self.max_items = Some(max_items);
        self
    }

    pub fn with_max_pages(mut self, max_pages: u32) -> Self {
        self.max_pages = Some(max_pages);
        self
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

/// One target's collection run
///
/// The session borrows its fetcher, store and clock so that several sessions
/// can share one execution context sequentially.
pub struct Session<'a, R> {
    target: String,
    kind: RecordKind,
    config: SessionConfig,
    pacer: RateController,
    fetcher: &'a mut dyn CursorFetcher<Item = R>,
    store: &'a dyn CheckpointStore<R>,
    clock: &'a dyn Clock,
    state: SessionState,
}

impl<'a, R: Identified + Send> Session<'a, R> {
    /// Creates a session for `target`
    ///
    /// # Arguments
    ///
    /// * `target` - Normalized target identity; also the checkpoint key
    /// * `kind` - Kind of record collected, recorded in a new checkpoint
    /// * `config` - Caps, cadence and timeout
    /// * `pacing` - Delay and backoff policy
    /// * `fetcher` - Source of pages
    /// * `store` - Checkpoint backend
    /// * `clock` - Where waits are performed
    pub fn new(
        target: impl Into<String>,
        kind: RecordKind,
        config: SessionConfig,
        pacing: PacingPolicy,
        fetcher: &'a mut dyn CursorFetcher<Item = R>,
        store: &'a dyn CheckpointStore<R>,
        clock: &'a dyn Clock,
    ) -> Self {
        Self {
            target: target.into(),
            kind,
            config,
            pacer: RateController::new(pacing),
            fetcher,
            store,
            clock,
            state: SessionState::new(),
        }
    }

    /// Replaces the pacer's randomness with a fixed seed
    pub fn with_seed(mut self, seed: u64) -> Self {
        let policy = self.pacer.policy().clone();
        self.pacer = RateController::with_seed(policy, seed);
        self
    }

    /// Runs the session to completion
    ///
    /// # Returns
    ///
    /// * `Ok(SessionSummary)` - The session ended normally or early with partial results
    /// * `Err(HarvestError::FatalTarget)` - The target is invalid, missing, or forbidden
    /// * `Err(HarvestError::Persistence)` - A checkpoint write failed
    /// * `Err(HarvestError::Storage)` - The existing checkpoint could not be read
    pub async fn run(mut self) -> Result<SessionSummary, HarvestError> {
        let (mut checkpoint, resumed) = match self.store.load(&self.target)? {
            Some(checkpoint) => (checkpoint, true),
            None => (Checkpoint::new(self.target.clone(), self.kind), false),
        };
        let ledger_start = checkpoint.errors.len();

        let known = checkpoint.records.known_identities();
        self.fetcher.narrow(&known);

        tracing::info!(
            "Starting {} session for {} ({} records on file{})",
            self.kind,
            self.target,
            known.len(),
            if resumed { ", resuming" } else { "" }
        );

        let mut merged = MergeStats::default();
        let mut unsaved_items = 0usize;

        self.state.transition(SessionPhase::Fetching)?;

        let termination = loop {
            let attempt = tokio::time::timeout(
                self.config.fetch_timeout,
                self.fetcher.fetch(&self.target, &self.state.cursor),
            )
            .await;

            let result = match attempt {
                Ok(result) => result,
                Err(_) => Err(FetchError::recoverable(format!(
                    "Fetch timed out after {}s",
                    self.config.fetch_timeout.as_secs()
                ))),
            };

            match result {
                Ok(page) => {
                    let count = page.items.len();
                    merged.absorb(checkpoint.records.merge(page.items));
                    self.state.record_page(count);
                    unsaved_items += count;

                    if let Some(total) = page.total_available {
                        tracing::debug!("{} reports {} available", self.target, total);
                    }

                    tracing::debug!(
                        "Page {} of {}: {} items, {} on file",
                        self.state.pages_fetched,
                        self.target,
                        count,
                        checkpoint.records.len()
                    );

                    if self.save_due(unsaved_items) {
                        self.save(&mut checkpoint)?;
                        unsaved_items = 0;
                    }

                    if self.state.pages_fetched % 10 == 0 {
                        tracing::info!(
                            "Progress: {} pages, {} fetched, {} records on file for {}",
                            self.state.pages_fetched,
                            self.state.fetched_this_run,
                            checkpoint.records.len(),
                            self.target
                        );
                    }

                    if !page.has_more {
                        break Termination::Exhausted;
                    }

                    if self
                        .config
                        .max_items
                        .is_some_and(|max| checkpoint.records.len() >= max)
                    {
                        break Termination::ItemCap;
                    }

                    if self
                        .config
                        .max_pages
                        .is_some_and(|max| self.state.pages_fetched >= max)
                    {
                        break Termination::PageCap;
                    }

                    match page.cursor {
                        Some(cursor) if cursor == self.state.cursor => {
                            tracing::warn!(
                                "{} returned the cursor it was given ({}); stopping",
                                self.target,
                                cursor
                            );
                            break Termination::Exhausted;
                        }
                        Some(cursor) if !cursor.is_empty() => self.state.advance(cursor),
                        _ => {
                            tracing::warn!(
                                "{} reported more pages but gave no cursor; stopping",
                                self.target
                            );
                            break Termination::Exhausted;
                        }
                    }

                    self.state.transition(SessionPhase::Fetching)?;
                    self.pace().await;
                }

                Err(FetchError::RateLimited(reason)) => {
                    self.state.transition(SessionPhase::RateLimited)?;
                    let observed = self.state.record_rate_limit();

                    if observed >= self.config.max_rate_limit_retries {
                        let reference = page_reference(&self.target, &self.state.cursor);
                        tracing::warn!(
                            "Rate limit on {} persisted after {} backoffs; ending session",
                            reference,
                            observed
                        );
                        checkpoint.errors.push(ErrorEntry::new(
                            reference,
                            format!("Rate limited after {} backoffs: {}", observed, reason),
                        ));
                        break Termination::RateLimitExhausted;
                    }

                    let pause = self.pacer.backoff_delay(observed);
                    tracing::warn!(
                        "Rate limited on {} ({}); backing off for {}s",
                        page_reference(&self.target, &self.state.cursor),
                        reason,
                        pause.duration.as_secs()
                    );
                    self.clock.sleep(pause.duration).await;

                    self.state.transition(SessionPhase::Fetching)?;
                }

                Err(FetchError::Transient {
                    reason,
                    recoverable,
                }) => {
                    let failures = self.state.record_page_failure();

                    if failures < MAX_PAGE_ATTEMPTS {
                        tracing::warn!(
                            "Transient failure on {}: {}; retrying",
                            page_reference(&self.target, &self.state.cursor),
                            reason
                        );
                        if recoverable {
                            if let Err(e) = self.fetcher.recover().await {
                                tracing::warn!("Failed to recover fetch context: {}", e);
                            }
                        }
                        continue;
                    }

                    self.state.transition(SessionPhase::Degraded)?;
                    let reference = page_reference(&self.target, &self.state.cursor);
                    tracing::warn!("{} failed {} times: {}", reference, failures, reason);
                    checkpoint.errors.push(ErrorEntry::new(reference, reason));

                    if self.has_checkpoint(resumed) {
                        self.save(&mut checkpoint)?;
                        unsaved_items = 0;
                    }

                    match self.fetcher.resume_cursor(&self.target, &self.state.cursor) {
                        Some(next) => {
                            self.state.advance(next);
                            self.state.transition(SessionPhase::Fetching)?;
                            self.pace().await;
                        }
                        None => break Termination::Degraded,
                    }
                }

                Err(FetchError::Fatal(reason)) => {
                    let reference = page_reference(&self.target, &self.state.cursor);
                    tracing::error!("Fatal failure for {}: {}", reference, reason);
                    checkpoint.errors.push(ErrorEntry::new(reference, reason.clone()));

                    if self.has_checkpoint(resumed) {
                        self.save(&mut checkpoint)?;
                    }
                    self.state.transition(SessionPhase::Done)?;

                    let partial =
                        self.summarize(&checkpoint, ledger_start, merged, Termination::Fatal);
                    return Err(HarvestError::FatalTarget {
                        target: self.target.clone(),
                        reason,
                        partial: Box::new(partial),
                    });
                }
            }
        };

        self.state.transition(SessionPhase::Done)?;

        if self.has_checkpoint(resumed) {
            self.save(&mut checkpoint)?;
        }

        let summary = self.summarize(&checkpoint, ledger_start, merged, termination);

        tracing::info!(
            "Finished {} session for {}: {} fetched over {} pages, {} records on file, {} new errors ({})",
            self.kind,
            self.target,
            summary.total_fetched,
            summary.pages,
            summary.total_records,
            summary.total_errors,
            termination
        );

        Ok(summary)
    }

    /// Waits between pages, taking the long break when it is due
    async fn pace(&mut self) {
        let pause = self.pacer.next_delay(&self.state);

        if pause.kind == PauseKind::LongBreak {
            tracing::info!(
                "Taking a {}s break after {} pages",
                pause.duration.as_secs(),
                self.state.pages_since_break
            );
            self.state.reset_break_counter();
        }

        self.clock.sleep(pause.duration).await;
    }

    fn save_due(&self, unsaved_items: usize) -> bool {
        match self.config.cadence {
            CheckpointCadence::EveryPage => true,
            CheckpointCadence::EveryRecords(k) => unsaved_items >= k,
        }
    }

    /// A checkpoint exists on disk or is owed after a successful fetch
    fn has_checkpoint(&self, resumed: bool) -> bool {
        resumed || self.state.pages_fetched > 0
    }

    fn save(&self, checkpoint: &mut Checkpoint<R>) -> Result<(), HarvestError> {
        checkpoint.touch();
        self.store.save(checkpoint).map_err(|source| {
            tracing::error!("Checkpoint write failed for {}: {}", self.target, source);
            HarvestError::Persistence {
                target: self.target.clone(),
                source,
            }
        })
    }

    fn summarize(
        &self,
        checkpoint: &Checkpoint<R>,
        ledger_start: usize,
        merged: MergeStats,
        termination: Termination,
    ) -> SessionSummary {
        let errors: Vec<ErrorEntry> = checkpoint.errors[ledger_start..].to_vec();

        SessionSummary {
            target: self.target.clone(),
            kind: self.kind,
            total_fetched: self.state.fetched_this_run,
            total_records: checkpoint.records.len(),
            total_errors: errors.len(),
            pages: self.state.pages_fetched,
            inserted: merged.inserted,
            updated: merged.updated,
            rate_limit_events: self.state.rate_limit_events,
            termination,
            errors,
        }
    }
}
