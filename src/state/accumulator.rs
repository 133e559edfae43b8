use crate::storage::Identified;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

/// Counts produced by one merge
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeStats {
    /// Records whose identity was not yet present
    pub inserted: usize,
    /// Records that replaced an existing record with the same identity
    pub updated: usize,
}

impl MergeStats {
    /// Adds another merge's counts to this one
    pub fn absorb(&mut self, other: MergeStats) {
        self.inserted += other.inserted;
        self.updated += other.updated;
    }
}

/// Identity-keyed record set
///
/// Holds at most one record per identity. Merging is an upsert where the
/// incoming record wins, which makes re-merging the same batch a no-op.
/// Iteration order is the identity order, so checkpoint files are stable
/// across saves.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Accumulator<R> {
    records: BTreeMap<String, R>,
}

impl<R> Default for Accumulator<R> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R> Accumulator<R> {
    /// Creates an empty set
    pub fn new() -> Self {
        Self {
            records: BTreeMap::new(),
        }
    }

    /// Number of distinct identities held
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Returns true if nothing has been accumulated
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Returns true if a record with this identity is held
    pub fn contains(&self, identity: &str) -> bool {
        self.records.contains_key(identity)
    }

    /// Looks up a record by identity
    pub fn get(&self, identity: &str) -> Option<&R> {
        self.records.get(identity)
    }

    /// Snapshot of every identity held, for fetchers that can skip known items
    pub fn known_identities(&self) -> HashSet<String> {
        self.records.keys().cloned().collect()
    }

    /// Iterates records in identity order
    pub fn records(&self) -> impl Iterator<Item = &R> {
        self.records.values()
    }
}

impl<R: Identified> Accumulator<R> {
    /// Upserts incoming records by identity
    ///
    /// # Arguments
    ///
    /// * `incoming` - Records from one fetched page, in any order
    ///
    /// # Returns
    ///
    /// How many identities were new and how many existing records were overwritten.
    /// A batch that repeats an identity counts the later occurrence as an update.
    pub fn merge<I>(&mut self, incoming: I) -> MergeStats
    where
        I: IntoIterator<Item = R>,
    {
        let mut stats = MergeStats::default();

        for record in incoming {
            match self.records.insert(record.identity(), record) {
                Some(_) => stats.updated += 1,
                None => stats.inserted += 1,
            }
        }

        stats
    }
}
