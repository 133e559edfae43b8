//! Session and pipeline summary types
//!
//! Summaries are for logging and CLI display. Nothing here is persisted
//! except through the markdown report.

use crate::crawler::Stage;
use crate::storage::{ErrorEntry, RecordKind};
use chrono::{DateTime, Utc};
use std::fmt;
use thiserror::Error;

/// Errors that can occur during output operations
#[derive(Debug, Error)]
pub enum OutputError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Storage error: {0}")]
    Storage(#[from] crate::storage::StorageError),
}

/// Result type for output operations
pub type OutputResult<T> = Result<T, OutputError>;

/// Why a session stopped fetching
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    /// The source reported no further pages
    Exhausted,
    /// The accumulated record count reached the session's maximum
    ItemCap,
    /// The page cap was reached
    PageCap,
    /// A page failed twice and the source offered no way past it
    Degraded,
    /// Rate limits persisted beyond the retry budget
    RateLimitExhausted,
    /// The target itself failed
    Fatal,
}

impl Termination {
    /// Returns true if the session ended before the source ran out
    pub fn is_early(&self) -> bool {
        matches!(
            self,
            Self::Degraded | Self::RateLimitExhausted | Self::Fatal
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Exhausted => "exhausted",
            Self::ItemCap => "item_cap",
            Self::PageCap => "page_cap",
            Self::Degraded => "degraded",
            Self::RateLimitExhausted => "rate_limit_exhausted",
            Self::Fatal => "fatal",
        }
    }
}

impl fmt::Display for Termination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Result of one collection session
#[derive(Debug, Clone)]
pub struct SessionSummary {
    pub target: String,
    pub kind: RecordKind,

    /// Items returned by the fetcher this run, duplicates included
    pub total_fetched: usize,

    /// Distinct records on file after the run
    pub total_records: usize,

    /// Ledger entries added this run
    pub total_errors: usize,

    /// Pages fetched successfully this run
    pub pages: u32,

    pub inserted: usize,
    pub updated: usize,
    pub rate_limit_events: u32,
    pub termination: Termination,

    /// The ledger entries counted by `total_errors`
    pub errors: Vec<ErrorEntry>,
}

impl SessionSummary {
    /// Creates an empty summary for a target
    pub fn new(target: impl Into<String>, kind: RecordKind) -> Self {
        Self {
            target: target.into(),
            kind,
            total_fetched: 0,
            total_records: 0,
            total_errors: 0,
            pages: 0,
            inserted: 0,
            updated: 0,
            rate_limit_events: 0,
            termination: Termination::Exhausted,
            errors: Vec::new(),
        }
    }
}

/// How a pipeline stage ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageStatus {
    /// Every session in the stage finished without escalating
    Completed,
    /// Some sessions failed but the stage produced usable output
    Partial,
    /// The stage produced nothing usable
    Failed,
    /// The stage did not run
    Skipped,
}

impl StageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::Partial => "partial",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
        }
    }
}

impl fmt::Display for StageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One ledger line attributed to the stage that produced it
#[derive(Debug, Clone)]
pub struct ReportedError {
    pub stage: Stage,
    pub target: String,
    pub source_reference: String,
    pub description: String,
}

/// Outcome of one pipeline stage
#[derive(Debug, Clone)]
pub struct StageReport {
    pub stage: Stage,
    pub status: StageStatus,

    /// Summaries of the sessions that ran, including partial ones
    pub sessions: Vec<SessionSummary>,

    /// Sessions that escalated an error
    pub failed_sessions: usize,

    /// Why the stage failed or was skipped
    pub message: Option<String>,
}

impl StageReport {
    /// Creates a report for a stage that has not produced anything yet
    pub fn new(stage: Stage) -> Self {
        Self {
            stage,
            status: StageStatus::Completed,
            sessions: Vec::new(),
            failed_sessions: 0,
            message: None,
        }
    }

    /// Creates a report for a stage that never ran
    pub fn skipped(stage: Stage, reason: impl Into<String>) -> Self {
        Self {
            status: StageStatus::Skipped,
            message: Some(reason.into()),
            ..Self::new(stage)
        }
    }

    /// Distinct records on file across this stage's sessions
    pub fn total_records(&self) -> usize {
        self.sessions.iter().map(|s| s.total_records).sum()
    }

    /// Ledger entries added by this stage
    pub fn total_errors(&self) -> usize {
        self.sessions.iter().map(|s| s.total_errors).sum()
    }
}

/// Aggregate result of a pipeline run for one account
#[derive(Debug, Clone)]
pub struct PipelineReport {
    pub username: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub stages: Vec<StageReport>,
}

impl PipelineReport {
    pub fn new(username: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            started_at: Utc::now(),
            finished_at: None,
            stages: Vec::new(),
        }
    }

    /// Marks the run as finished now
    pub fn finish(&mut self) {
        self.finished_at = Some(Utc::now());
    }

    /// Duration in seconds, once finished
    pub fn duration_seconds(&self) -> Option<i64> {
        self.finished_at
            .map(|finished| (finished - self.started_at).num_seconds())
    }

    /// Looks up the report for a stage
    pub fn stage(&self, stage: Stage) -> Option<&StageReport> {
        self.stages.iter().find(|s| s.stage == stage)
    }

    /// The first stage that failed, if any
    pub fn failed_stage(&self) -> Option<&StageReport> {
        self.stages
            .iter()
            .find(|s| s.status == StageStatus::Failed)
    }

    /// Returns true if no stage failed
    pub fn succeeded(&self) -> bool {
        self.failed_stage().is_none()
    }

    pub fn total_records(&self) -> usize {
        self.stages.iter().map(StageReport::total_records).sum()
    }

    pub fn total_errors(&self) -> usize {
        self.stages.iter().map(StageReport::total_errors).sum()
    }

    /// Every ledger entry added during the run, in stage order
    pub fn itemised_errors(&self) -> Vec<ReportedError> {
        self.stages
            .iter()
            .flat_map(|stage| {
                stage.sessions.iter().flat_map(move |session| {
                    session.errors.iter().map(move |entry| ReportedError {
                        stage: stage.stage,
                        target: session.target.clone(),
                        source_reference: entry.source_reference.clone(),
                        description: entry.error_description.clone(),
                    })
                })
            })
            .collect()
    }
}
