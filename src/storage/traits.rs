//! Storage traits and error types
//!
//! This module defines the trait interface for checkpoint backends and
//! associated error types.

use crate::storage::{Checkpoint, RecordKind};
use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur during storage operations
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Corrupt checkpoint {path}: {reason}")]
    Corrupt { path: PathBuf, reason: String },

    #[error("Checkpoint kind mismatch: expected {expected}, found {found}")]
    KindMismatch {
        expected: RecordKind,
        found: RecordKind,
    },
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Trait for checkpoint backend implementations
///
/// A backend stores at most one checkpoint per target. A failed `save` must
/// leave the previously stored checkpoint readable and unchanged.
pub trait CheckpointStore<R> {
    /// Loads the checkpoint for a target
    ///
    /// # Arguments
    ///
    /// * `target` - The target the checkpoint is keyed on
    ///
    /// # Returns
    ///
    /// * `Ok(Some(Checkpoint))` - A prior checkpoint exists
    /// * `Ok(None)` - Nothing has been collected for this target yet
    /// * `Err(StorageError)` - The checkpoint exists but could not be read
    fn load(&self, target: &str) -> StorageResult<Option<Checkpoint<R>>>;

    /// Replaces the stored checkpoint for `checkpoint.target`
    fn save(&self, checkpoint: &Checkpoint<R>) -> StorageResult<()>;
}
