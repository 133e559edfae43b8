//! JSON file checkpoint backend
//!
//! One pretty-printed JSON document per target, named `{prefix}_{target}.json`
//! inside the checkpoint directory. Writes go to a `.tmp` sibling which is
//! synced and then renamed over the live file, so a reader only ever sees the
//! previous or the newest complete checkpoint.

use crate::storage::{Checkpoint, CheckpointStore, RecordKind, StorageError, StorageResult};
use crate::target::file_stem;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

/// Checkpoint store writing one JSON file per target
#[derive(Debug, Clone)]
pub struct JsonCheckpointStore {
    dir: PathBuf,
    kind: RecordKind,
}

impl JsonCheckpointStore {
    /// Creates a store for checkpoints of `kind` under `dir`
    ///
    /// The directory is created lazily on the first save.
    pub fn new(dir: impl Into<PathBuf>, kind: RecordKind) -> Self {
        Self {
            dir: dir.into(),
            kind,
        }
    }

    /// Returns the checkpoint directory
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Returns the kind of record this store holds
    pub fn kind(&self) -> RecordKind {
        self.kind
    }

    /// Path of the checkpoint file for a target
    pub fn path_for(&self, target: &str) -> PathBuf {
        self.dir
            .join(format!("{}_{}.json", self.kind.file_prefix(), file_stem(target)))
    }
}

impl<R> CheckpointStore<R> for JsonCheckpointStore
where
    R: Serialize + DeserializeOwned,
{
    fn load(&self, target: &str) -> StorageResult<Option<Checkpoint<R>>> {
        let path = self.path_for(target);

        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let checkpoint: Checkpoint<R> =
            serde_json::from_slice(&bytes).map_err(|e| StorageError::Corrupt {
                path: path.clone(),
                reason: e.to_string(),
            })?;

        if checkpoint.kind != self.kind {
            return Err(StorageError::KindMismatch {
                expected: self.kind,
                found: checkpoint.kind,
            });
        }

        tracing::debug!(
            "Loaded checkpoint {} ({} records, {} errors)",
            path.display(),
            checkpoint.records.len(),
            checkpoint.errors.len()
        );

        Ok(Some(checkpoint))
    }

    fn save(&self, checkpoint: &Checkpoint<R>) -> StorageResult<()> {
        let path = self.path_for(&checkpoint.target);
        let bytes = serde_json::to_vec_pretty(checkpoint)?;
        write_atomically(&path, &bytes)?;

        tracing::debug!(
            "Saved checkpoint {} ({} records)",
            path.display(),
            checkpoint.records.len()
        );

        Ok(())
    }
}

/// Writes `bytes` to a temporary sibling, syncs it, then renames it over `path`
///
/// On failure the temporary file is removed and `path` is left untouched.
fn write_atomically(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let tmp_path = path.with_extension("json.tmp");

    let result = (|| {
        let mut file = File::create(&tmp_path)?;
        file.write_all(bytes)?;
        file.sync_all()?;
        fs::rename(&tmp_path, path)
    })();

    if result.is_err() {
        let _ = fs::remove_file(&tmp_path);
    }

    result
}
