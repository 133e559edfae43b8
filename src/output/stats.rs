//! Statistics over the checkpoint directory
//!
//! This module scans the checkpoint files on disk and summarises what has
//! been collected so far, without knowing the record types involved.

use crate::output::summary::OutputResult;
use crate::storage::{Checkpoint, RecordKind, StorageError};
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// What one checkpoint file holds
#[derive(Debug, Clone)]
pub struct CheckpointInfo {
    pub path: PathBuf,
    pub kind: RecordKind,
    pub target: String,
    pub records: usize,
    pub errors: usize,
    pub last_updated_at: DateTime<Utc>,
}

/// Summary of every checkpoint in a directory
#[derive(Debug, Clone, Default)]
pub struct CheckpointStatistics {
    /// Checkpoints, ordered by kind then target
    pub checkpoints: Vec<CheckpointInfo>,

    /// Files that look like checkpoints but could not be read
    pub unreadable: Vec<(PathBuf, String)>,
}

impl CheckpointStatistics {
    /// Distinct records held per kind
    pub fn records_by_kind(&self) -> HashMap<RecordKind, usize> {
        let mut counts = HashMap::new();
        for info in &self.checkpoints {
            *counts.entry(info.kind).or_insert(0) += info.records;
        }
        counts
    }

    pub fn total_records(&self) -> usize {
        self.checkpoints.iter().map(|c| c.records).sum()
    }

    pub fn total_errors(&self) -> usize {
        self.checkpoints.iter().map(|c| c.errors).sum()
    }
}

/// Loads statistics from the checkpoint directory
///
/// Files whose name does not start with a known kind prefix are ignored.
/// A missing directory yields empty statistics.
///
/// # Arguments
///
/// * `dir` - The checkpoint directory
///
/// # Returns
///
/// * `Ok(CheckpointStatistics)` - Successfully scanned the directory
/// * `Err(OutputError)` - The directory could not be listed
pub fn load_statistics(dir: &Path) -> OutputResult<CheckpointStatistics> {
    let mut stats = CheckpointStatistics::default();

    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(stats),
        Err(e) => return Err(e.into()),
    };

    for entry in entries {
        let path = entry?.path();
        if path.extension().and_then(|e| e.to_str()) != Some("json") {
            continue;
        }
        let Some(kind) = kind_for(&path) else {
            continue;
        };

        match read_checkpoint(&path) {
            Ok(checkpoint) => {
                if checkpoint.kind != kind {
                    stats.unreadable.push((
                        path,
                        format!("holds {} records, expected {}", checkpoint.kind, kind),
                    ));
                    continue;
                }
                stats.checkpoints.push(CheckpointInfo {
                    path,
                    kind,
                    target: checkpoint.target,
                    records: checkpoint.records.len(),
                    errors: checkpoint.errors.len(),
                    last_updated_at: checkpoint.last_updated_at,
                });
            }
            Err(e) => {
                tracing::warn!("Skipping unreadable checkpoint {}: {}", path.display(), e);
                stats.unreadable.push((path, e.to_string()));
            }
        }
    }

    stats.checkpoints.sort_by(|a, b| {
        let order = |kind: RecordKind| RecordKind::all_kinds().iter().position(|k| *k == kind);
        order(a.kind)
            .cmp(&order(b.kind))
            .then_with(|| a.target.cmp(&b.target))
    });

    Ok(stats)
}

fn kind_for(path: &Path) -> Option<RecordKind> {
    let name = path.file_name()?.to_str()?;
    let (prefix, _) = name.split_once('_')?;
    RecordKind::from_file_prefix(prefix)
}

fn read_checkpoint(path: &Path) -> Result<Checkpoint<Value>, StorageError> {
    let contents = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&contents)?)
}

/// Prints checkpoint statistics to stdout
///
/// # Arguments
///
/// * `stats` - The statistics to display
pub fn print_statistics(stats: &CheckpointStatistics) {
    println!("=== Checkpoint Statistics ===\n");

    println!("Overview:");
    println!("  Checkpoints: {}", stats.checkpoints.len());
    println!("  Total records: {}", stats.total_records());
    println!("  Logged errors: {}", stats.total_errors());
    println!();

    let by_kind = stats.records_by_kind();
    println!("Records by Kind:");
    for kind in RecordKind::all_kinds() {
        if let Some(count) = by_kind.get(kind) {
            println!("  {}: {}", kind, count);
        }
    }
    println!();

    if !stats.checkpoints.is_empty() {
        println!("Checkpoints:");
        for info in &stats.checkpoints {
            println!(
                "  {} {}: {} records, {} errors (updated {})",
                info.kind,
                info.target,
                info.records,
                info.errors,
                info.last_updated_at.format("%Y-%m-%d %H:%M:%S")
            );
        }
        println!();
    }

    if !stats.unreadable.is_empty() {
        println!("Unreadable ({}):", stats.unreadable.len());
        for (path, reason) in &stats.unreadable {
            println!("  - {}: {}", path.display(), reason);
        }
        println!();
    }
}
