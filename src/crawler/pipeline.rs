//! Pipeline orchestrator for one root account
//!
//! Runs the stages in order: Profile, Urls, Posts, Comments, and optionally
//! Tags. Each stage is one or more collection sessions with their own
//! checkpoints, so re-running a pipeline resumes every stage where it left
//! off. Nothing about the pipeline itself is persisted.
//!
//! A stage that produces nothing usable stops the pipeline; later stages are
//! reported as skipped.

use crate::config::Config;
use crate::crawler::pacer::{Clock, PacingPolicy};
use crate::crawler::session::{Session, SessionConfig};
use crate::crawler::sources::{
    CommentFetcher, PostPageFetcher, PostUrlFetcher, ProfileFetcher, SourceContext, TagFetcher,
};
use crate::crawler::CursorFetcher;
use crate::output::{PipelineReport, SessionSummary, StageReport, StageStatus};
use crate::storage::{
    CheckpointStore, CommentRecord, Identified, JsonCheckpointStore, PostRecord, PostUrlRecord,
    ProfileRecord, RecordKind, TagRelationRecord,
};
use crate::target::extract_shortcode;
use crate::HarvestError;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// A pipeline stage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Profile,
    Urls,
    Posts,
    Comments,
    Tags,
}

impl Stage {
    /// Kind of record the stage collects
    pub fn kind(&self) -> RecordKind {
        match self {
            Self::Profile => RecordKind::Profile,
            Self::Urls => RecordKind::PostUrl,
            Self::Posts => RecordKind::Post,
            Self::Comments => RecordKind::Comment,
            Self::Tags => RecordKind::Tag,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Profile => "profile",
            Self::Urls => "urls",
            Self::Posts => "posts",
            Self::Comments => "comments",
            Self::Tags => "tags",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Creates the fetcher each stage needs
///
/// The web implementation hands every fetcher the same `SourceContext`;
/// tests substitute scripted fetchers.
pub trait FetcherFactory {
    fn profile(&self) -> Box<dyn CursorFetcher<Item = ProfileRecord>>;
    fn post_urls(&self) -> Box<dyn CursorFetcher<Item = PostUrlRecord>>;
    fn posts(&self, urls: Vec<String>) -> Box<dyn CursorFetcher<Item = PostRecord>>;
    fn comments(&self) -> Box<dyn CursorFetcher<Item = CommentRecord>>;
    fn tags(&self, urls: Vec<String>) -> Box<dyn CursorFetcher<Item = TagRelationRecord>>;
}

/// Builds web fetchers over one shared context
pub struct HttpSourceFactory {
    ctx: Arc<SourceContext>,
}

impl HttpSourceFactory {
    pub fn new(ctx: Arc<SourceContext>) -> Self {
        Self { ctx }
    }
}

impl FetcherFactory for HttpSourceFactory {
    fn profile(&self) -> Box<dyn CursorFetcher<Item = ProfileRecord>> {
        Box::new(ProfileFetcher::new(Arc::clone(&self.ctx)))
    }

    fn post_urls(&self) -> Box<dyn CursorFetcher<Item = PostUrlRecord>> {
        Box::new(PostUrlFetcher::new(Arc::clone(&self.ctx)))
    }

    fn posts(&self, urls: Vec<String>) -> Box<dyn CursorFetcher<Item = PostRecord>> {
        Box::new(PostPageFetcher::new(Arc::clone(&self.ctx), urls))
    }

    fn comments(&self) -> Box<dyn CursorFetcher<Item = CommentRecord>> {
        Box::new(CommentFetcher::new(Arc::clone(&self.ctx)))
    }

    fn tags(&self, urls: Vec<String>) -> Box<dyn CursorFetcher<Item = TagRelationRecord>> {
        Box::new(TagFetcher::new(Arc::clone(&self.ctx), urls))
    }
}

/// Sequences the stages for one account
pub struct Pipeline {
    config: Config,
    factory: Box<dyn FetcherFactory>,
    clock: Box<dyn Clock>,
    checkpoint_dir: PathBuf,
    seed: Option<u64>,
}

impl Pipeline {
    /// Creates a pipeline writing checkpoints under `config.output.checkpoint_dir`
    pub fn new(config: Config, factory: Box<dyn FetcherFactory>, clock: Box<dyn Clock>) -> Self {
        let checkpoint_dir = PathBuf::from(&config.output.checkpoint_dir);
        Self {
            config,
            factory,
            clock,
            checkpoint_dir,
            seed: None,
        }
    }

    /// Seeds every session's pacer, for reproducible runs
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Runs every stage for `username`
    ///
    /// Failures are reported per stage rather than returned; check
    /// `PipelineReport::succeeded`.
    pub async fn run(&self, username: &str) -> PipelineReport {
        let mut report = PipelineReport::new(username);
        let mut stages = vec![Stage::Profile, Stage::Urls, Stage::Posts, Stage::Comments];
        if self.config.pipeline.with_tags {
            stages.push(Stage::Tags);
        }

        tracing::info!(
            "Starting pipeline for {} ({} stages)",
            username,
            stages.len()
        );

        let mut post_urls: Vec<String> = Vec::new();

        for (position, stage) in stages.iter().copied().enumerate() {
            if position > 0 {
                self.stage_pause().await;
            }

            tracing::info!("Stage {}: {}", position + 1, stage);

            let stage_report = match stage {
                Stage::Profile => self.run_profile(username).await,
                Stage::Urls => {
                    let stage_report = self.run_urls(username).await;
                    if stage_report.status != StageStatus::Failed {
                        match self.load_post_urls(username) {
                            Ok(urls) => post_urls = urls,
                            Err(e) => tracing::error!("Failed to reload post URLs: {}", e),
                        }
                    }
                    if post_urls.is_empty() && stage_report.status != StageStatus::Failed {
                        StageReport {
                            status: StageStatus::Failed,
                            message: Some("No post URLs collected".to_string()),
                            ..stage_report
                        }
                    } else {
                        stage_report
                    }
                }
                Stage::Posts => self.run_posts(username, &post_urls).await,
                Stage::Comments => self.run_comments(&post_urls).await,
                Stage::Tags => self.run_tags(username, &post_urls).await,
            };

            tracing::info!(
                "Stage {} {}: {} records on file, {} new errors",
                stage,
                stage_report.status,
                stage_report.total_records(),
                stage_report.total_errors()
            );

            let failed = stage_report.status == StageStatus::Failed;
            report.stages.push(stage_report);

            if failed {
                tracing::error!("Stopping pipeline for {} after {} failed", username, stage);
                for skipped in &stages[position + 1..] {
                    report
                        .stages
                        .push(StageReport::skipped(*skipped, format!("{} failed", stage)));
                }
                break;
            }
        }

        report.finish();
        tracing::info!(
            "Pipeline for {} finished in {}s: {} records, {} new errors",
            username,
            report.duration_seconds().unwrap_or(0),
            report.total_records(),
            report.total_errors()
        );

        report
    }

    async fn run_profile(&self, username: &str) -> StageReport {
        let mut fetcher = self.factory.profile();
        let config = SessionConfig::from_config(&self.config).with_max_pages(1);
        let result = self
            .run_session(username, RecordKind::Profile, config, self.pacing(), fetcher.as_mut())
            .await;

        single_session_report(Stage::Profile, result)
    }

    async fn run_urls(&self, username: &str) -> StageReport {
        let mut fetcher = self.factory.post_urls();
        let config =
            SessionConfig::from_config(&self.config).with_max_items(self.config.pipeline.max_urls);
        let result = self
            .run_session(username, RecordKind::PostUrl, config, self.pacing(), fetcher.as_mut())
            .await;

        single_session_report(Stage::Urls, result)
    }

    async fn run_posts(&self, username: &str, urls: &[String]) -> StageReport {
        let mut fetcher = self.factory.posts(urls.to_vec());
        let pacing = self
            .pacing()
            .with_base_delay(Duration::from_millis(self.config.pipeline.post_delay_ms));
        let result = self
            .run_session(
                username,
                RecordKind::Post,
                SessionConfig::from_config(&self.config),
                pacing,
                fetcher.as_mut(),
            )
            .await;

        single_session_report(Stage::Posts, result)
    }

    async fn run_tags(&self, username: &str, urls: &[String]) -> StageReport {
        let mut fetcher = self.factory.tags(urls.to_vec());
        let pacing = self
            .pacing()
            .with_base_delay(Duration::from_millis(self.config.pipeline.post_delay_ms));
        let result = self
            .run_session(
                username,
                RecordKind::Tag,
                SessionConfig::from_config(&self.config),
                pacing,
                fetcher.as_mut(),
            )
            .await;

        single_session_report(Stage::Tags, result)
    }

    /// One comment session per post; failures are counted, not fatal
    async fn run_comments(&self, urls: &[String]) -> StageReport {
        let mut report = StageReport::new(Stage::Comments);
        let shortcodes: Vec<String> = urls
            .iter()
            .filter_map(|url| match extract_shortcode(url) {
                Ok(code) => Some(code),
                Err(e) => {
                    tracing::warn!("Skipping comments for {}: {}", url, e);
                    None
                }
            })
            .collect();

        for (index, shortcode) in shortcodes.iter().enumerate() {
            if index > 0 {
                self.stage_pause().await;
            }

            tracing::info!(
                "Comments for post {}/{}: {}",
                index + 1,
                shortcodes.len(),
                shortcode
            );

            let mut fetcher = self.factory.comments();
            let config = SessionConfig::from_config(&self.config)
                .with_max_items(self.config.pipeline.max_comments);
            let result = self
                .run_session(shortcode, RecordKind::Comment, config, self.pacing(), fetcher.as_mut())
                .await;

            match result {
                Ok(summary) => report.sessions.push(summary),
                Err(e) => {
                    tracing::warn!("Comments for {} failed: {}", shortcode, e);
                    report.failed_sessions += 1;
                    if let Some(partial) = partial_summary(e) {
                        report.sessions.push(partial);
                    }
                }
            }
        }

        let succeeded = shortcodes.len() - report.failed_sessions;
        report.status = if shortcodes.is_empty() || report.failed_sessions == 0 {
            StageStatus::Completed
        } else if succeeded == 0 {
            StageStatus::Failed
        } else {
            StageStatus::Partial
        };
        if report.failed_sessions > 0 {
            report.message = Some(format!(
                "{} of {} posts failed",
                report.failed_sessions,
                shortcodes.len()
            ));
        }

        report
    }

    async fn run_session<R>(
        &self,
        target: &str,
        kind: RecordKind,
        config: SessionConfig,
        pacing: PacingPolicy,
        fetcher: &mut dyn CursorFetcher<Item = R>,
    ) -> Result<SessionSummary, HarvestError>
    where
        R: Identified + Serialize + DeserializeOwned + Send,
    {
        let store = JsonCheckpointStore::new(&self.checkpoint_dir, kind);
        let mut session = Session::new(
            target,
            kind,
            config,
            pacing,
            fetcher,
            &store,
            self.clock.as_ref(),
        );
        if let Some(seed) = self.seed {
            session = session.with_seed(seed);
        }
        session.run().await
    }

    /// Post URLs on file, newest first, capped at `max_urls`
    fn load_post_urls(&self, username: &str) -> Result<Vec<String>, HarvestError> {
        let store = JsonCheckpointStore::new(&self.checkpoint_dir, RecordKind::PostUrl);
        let checkpoint: Option<crate::storage::Checkpoint<PostUrlRecord>> = store.load(username)?;

        let mut records: Vec<PostUrlRecord> = checkpoint
            .map(|c| c.records.records().cloned().collect())
            .unwrap_or_default();
        records.sort_by(|a, b| b.taken_at.cmp(&a.taken_at));
        records.truncate(self.config.pipeline.max_urls);

        Ok(records.into_iter().map(|r| r.url).collect())
    }

    fn pacing(&self) -> PacingPolicy {
        PacingPolicy::from_config(&self.config.pacing)
    }

    async fn stage_pause(&self) {
        let delay = Duration::from_millis(self.config.pipeline.stage_delay_ms);
        if !delay.is_zero() {
            self.clock.sleep(delay).await;
        }
    }
}

/// Builds the report for a stage that runs a single session
///
/// An escalated failure still counts as partial output when the session
/// left records on file.
fn single_session_report(
    stage: Stage,
    result: Result<SessionSummary, HarvestError>,
) -> StageReport {
    let mut report = StageReport::new(stage);

    match result {
        Ok(summary) => {
            report.sessions.push(summary);
        }
        Err(e) => {
            tracing::error!("Stage {} failed: {}", stage, e);
            report.failed_sessions = 1;
            report.message = Some(e.to_string());
            let partial = partial_summary(e);
            report.status = match &partial {
                Some(summary) if summary.total_records > 0 => StageStatus::Partial,
                _ => StageStatus::Failed,
            };
            report.sessions.extend(partial);
        }
    }

    report
}

/// Extracts the partial summary carried by a fatal target failure
fn partial_summary(error: HarvestError) -> Option<SessionSummary> {
    match error {
        HarvestError::FatalTarget { partial, .. } => Some(*partial),
        _ => None,
    }
}
