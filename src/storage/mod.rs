//! Storage module for persisting collected records
//!
//! This module handles durable checkpoint state for every collection target, including:
//! - Typed record shapes for each resource kind
//! - The checkpoint document (records, error ledger, timestamps)
//! - Atomic write-temp-then-rename persistence to one JSON file per target
//!
//! Each checkpoint file has a single writer: the session collecting that target.
//! This is not enforced by locking.

mod checkpoint;
mod json_store;
mod records;
mod traits;

pub use checkpoint::{Checkpoint, ErrorEntry};
pub use json_store::JsonCheckpointStore;
pub use records::{CommentRecord, PostRecord, PostUrlRecord, ProfileRecord, TagRelationRecord};
pub use traits::{CheckpointStore, StorageError, StorageResult};

use serde::{Deserialize, Serialize};
use std::fmt;

/// A record with a stable identity
///
/// The identity is immutable for the lifetime of the record; every other field
/// may change between scrapes.
pub trait Identified {
    /// Returns the key the record is deduplicated on
    fn identity(&self) -> String;
}

/// The kind of resource a checkpoint holds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordKind {
    Profile,
    PostUrl,
    Post,
    Comment,
    Tag,
}

impl RecordKind {
    /// File name prefix for checkpoints of this kind
    pub fn file_prefix(&self) -> &'static str {
        match self {
            Self::Profile => "profile",
            Self::PostUrl => "urls",
            Self::Post => "posts",
            Self::Comment => "comments",
            Self::Tag => "tags",
        }
    }

    /// Converts to the serialized name
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Profile => "profile",
            Self::PostUrl => "post_url",
            Self::Post => "post",
            Self::Comment => "comment",
            Self::Tag => "tag",
        }
    }

    /// Resolves a file name prefix back to its kind
    pub fn from_file_prefix(prefix: &str) -> Option<Self> {
        Self::all_kinds()
            .iter()
            .copied()
            .find(|kind| kind.file_prefix() == prefix)
    }

    /// Returns all record kinds
    pub fn all_kinds() -> &'static [RecordKind] {
        &[
            Self::Profile,
            Self::PostUrl,
            Self::Post,
            Self::Comment,
            Self::Tag,
        ]
    }
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
