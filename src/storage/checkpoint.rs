use crate::state::Accumulator;
use crate::storage::RecordKind;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One entry in a checkpoint's error ledger
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorEntry {
    /// The page or item that failed (`target` or `target@cursor`)
    pub source_reference: String,
    pub error_description: String,
    #[serde(default = "Utc::now")]
    pub recorded_at: DateTime<Utc>,
}

impl ErrorEntry {
    /// Creates a ledger entry stamped with the current time
    pub fn new(source_reference: impl Into<String>, error_description: impl Into<String>) -> Self {
        Self {
            source_reference: source_reference.into(),
            error_description: error_description.into(),
            recorded_at: Utc::now(),
        }
    }
}

/// Durable state for one target
///
/// On disk this is a pretty-printed JSON document. `records` is keyed by
/// identity, so the file itself holds at most one record per identity.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(bound(
    serialize = "R: Serialize",
    deserialize = "R: Deserialize<'de>"
))]
pub struct Checkpoint<R> {
    pub target: String,
    pub kind: RecordKind,
    pub records: Accumulator<R>,
    #[serde(default)]
    pub errors: Vec<ErrorEntry>,
    pub first_collected_at: DateTime<Utc>,
    pub last_updated_at: DateTime<Utc>,
}

impl<R> Checkpoint<R> {
    /// Creates an empty checkpoint for a target seen for the first time
    pub fn new(target: impl Into<String>, kind: RecordKind) -> Self {
        let now = Utc::now();
        Self {
            target: target.into(),
            kind,
            records: Accumulator::new(),
            errors: Vec::new(),
            first_collected_at: now,
            last_updated_at: now,
        }
    }

    /// Advances `last_updated_at`; `first_collected_at` never moves
    pub fn touch(&mut self) {
        self.last_updated_at = Utc::now();
    }

    /// Number of distinct records held
    pub fn record_count(&self) -> usize {
        self.records.len()
    }
}
