//! Append-only version log.
//!
//! A grow-only set of snapshots that lives inside the document content, so
//! the history replicates with the text it describes. Entries are never
//! mutated; a restore is a new forward edit on the text.

use crate::error::Result;
use crate::lattice::Lattice;
use crate::text::RgaText;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Position of a version in the replicated log.
///
/// `lamport` is one past the highest entry the appending replica had seen,
/// so an entry appended later always carries a larger value.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct VersionId {
    pub lamport: u64,
    pub replica: String,
}

/// An immutable point-in-time capture of a document's text.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Version {
    pub id: VersionId,
    /// Creation timestamp, the primary sort key.
    pub date: DateTime<Utc>,
    /// Encoded [`RgaText`] state at capture time.
    pub snapshot: Vec<u8>,
}

impl Version {
    /// Materialize the captured text.
    pub fn text(&self) -> Result<String> {
        Ok(RgaText::decode(&self.snapshot)?.to_string())
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Version {
    /// Dates first; on a clock collision the later log entry sorts last.
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.date
            .cmp(&other.date)
            .then_with(|| self.id.cmp(&other.id))
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionLog {
    entries: BTreeSet<Version>,
}

impl VersionLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a new snapshot taken by `replica`.
    pub fn append(
        &mut self,
        replica: impl Into<String>,
        date: DateTime<Utc>,
        snapshot: Vec<u8>,
    ) -> Version {
        let lamport = self
            .entries
            .iter()
            .map(|v| v.id.lamport)
            .max()
            .unwrap_or(0)
            + 1;

        let version = Version {
            id: VersionId {
                lamport,
                replica: replica.into(),
            },
            date,
            snapshot,
        };
        self.entries.insert(version.clone());
        version
    }

    /// Merge a version received from another replica. Idempotent.
    pub fn insert(&mut self, version: Version) {
        self.entries.insert(version);
    }

    pub fn get(&self, id: &VersionId) -> Option<&Version> {
        self.entries.iter().find(|v| &v.id == id)
    }

    pub fn contains(&self, id: &VersionId) -> bool {
        self.get(id).is_some()
    }

    /// Versions ordered by date, oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &Version> {
        self.entries.iter()
    }

    /// The most recent version.
    pub fn latest(&self) -> Option<&Version> {
        self.entries.iter().next_back()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Lattice for VersionLog {
    fn bottom() -> Self {
        Self::new()
    }

    fn join(&self, other: &Self) -> Self {
        Self {
            entries: self.entries.union(&other.entries).cloned().collect(),
        }
    }
}
