//! Document content: the replicated text plus its version log.
//!
//! This is the opaque blob a document record carries. It encodes to bytes
//! for persistence, produces deltas for replication, and exposes the
//! snapshot operations the session layer builds on.

use crate::diff::Edit;
use crate::error::{CrdtError, Result};
use crate::lattice::{DeltaCRDT, Lattice};
use crate::text::{RgaText, TextDelta};
use crate::versions::{Version, VersionLog};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Current content encoding version.
pub const CONTENT_FORMAT: u8 = 1;

/// A replication delta: new characters, tombstones and log entries.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentDelta {
    #[serde(default)]
    pub text: TextDelta,
    #[serde(default)]
    pub versions: Vec<Version>,
}

impl ContentDelta {
    pub fn is_empty(&self) -> bool {
        self.text.is_empty() && self.versions.is_empty()
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| CrdtError::Encode(e.to_string()))
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes).map_err(|e| CrdtError::Decode(e.to_string()))
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DocContent {
    format: u8,
    text: RgaText,
    #[serde(default)]
    versions: VersionLog,
    #[serde(skip)]
    pending_versions: Vec<Version>,
}

impl DocContent {
    /// Create empty content edited by `replica_id`.
    pub fn new(replica_id: impl Into<String>) -> Self {
        Self {
            format: CONTENT_FORMAT,
            text: RgaText::new(replica_id),
            versions: VersionLog::new(),
            pending_versions: Vec::new(),
        }
    }

    /// Content pre-filled with `text`. The initial insert is not kept as a
    /// pending delta; use [`DeltaCRDT::full_delta`] to publish it.
    pub fn with_text(replica_id: impl Into<String>, text: &str) -> Self {
        let mut content = Self::new(replica_id);
        content.text.insert(0, text);
        let _ = content.text.split_delta();
        content
    }

    pub fn replica_id(&self) -> &str {
        self.text.replica_id()
    }

    /// Continue editing under another replica id.
    pub fn rebind(&mut self, replica_id: impl Into<String>) {
        self.text.set_replica(replica_id);
    }

    /// An independent copy with no pending deltas, edited by `replica_id`.
    pub fn fork(&self, replica_id: impl Into<String>) -> Self {
        let mut copy = self.clone();
        let _ = copy.split_delta();
        copy.rebind(replica_id);
        copy
    }

    /// Rendered text.
    pub fn text(&self) -> String {
        self.text.to_string()
    }

    pub fn len(&self) -> usize {
        self.text.len()
    }

    /// Empty means no visible text once whitespace is ignored.
    pub fn is_empty(&self) -> bool {
        self.text.is_blank()
    }

    pub fn insert(&mut self, position: usize, text: &str) {
        self.text.insert(position, text);
    }

    pub fn delete(&mut self, start: usize, length: usize) {
        self.text.delete(start, length);
    }

    /// Delete all text (select all, delete). The version log is kept.
    pub fn clear(&mut self) {
        self.text.clear();
    }

    pub fn apply_edits(&mut self, edits: &[Edit]) {
        self.text.apply_edits(edits);
    }

    /// Forward-edit the text into `target`. Returns whether it changed.
    pub fn replace_text(&mut self, target: &str) -> bool {
        self.text.replace_with(target)
    }

    /// Encode the text CRDT as a snapshot blob.
    pub fn snapshot(&self) -> Result<Vec<u8>> {
        self.text.encode()
    }

    /// Capture the current text into the version log.
    pub fn add_version(&mut self, date: DateTime<Utc>) -> Result<Version> {
        let snapshot = self.snapshot()?;
        let version = self
            .versions
            .append(self.text.replica_id().to_string(), date, snapshot);
        self.pending_versions.push(version.clone());
        Ok(version)
    }

    pub fn versions(&self) -> &VersionLog {
        &self.versions
    }

    /// Restore `version` as a forward edit. Returns whether the text changed.
    pub fn restore_version(&mut self, version: &Version) -> Result<bool> {
        let target = version.text()?;
        Ok(self.text.replace_with(&target))
    }

    /// Encode the whole content for storage.
    pub fn encode(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| CrdtError::Encode(e.to_string()))
    }

    /// Decode stored content and continue editing as `replica_id`.
    pub fn decode(bytes: &[u8], replica_id: impl Into<String>) -> Result<Self> {
        let mut content: DocContent =
            serde_json::from_slice(bytes).map_err(|e| CrdtError::Decode(e.to_string()))?;
        if content.format != CONTENT_FORMAT {
            return Err(CrdtError::UnsupportedFormat(content.format));
        }
        content.rebind(replica_id);
        Ok(content)
    }
}

impl PartialEq for DocContent {
    fn eq(&self, other: &Self) -> bool {
        self.text == other.text && self.versions == other.versions
    }
}

impl Eq for DocContent {}

impl Default for DocContent {
    fn default() -> Self {
        Self::new("")
    }
}

impl Lattice for DocContent {
    fn bottom() -> Self {
        Self::new("")
    }

    fn join(&self, other: &Self) -> Self {
        let mut result = self.clone();
        result.apply_delta(&other.full_delta());
        result
    }
}

impl DeltaCRDT for DocContent {
    type Delta = ContentDelta;

    fn split_delta(&mut self) -> Option<ContentDelta> {
        let delta = ContentDelta {
            text: self.text.split_delta().unwrap_or_default(),
            versions: std::mem::take(&mut self.pending_versions),
        };
        (!delta.is_empty()).then_some(delta)
    }

    fn full_delta(&self) -> ContentDelta {
        ContentDelta {
            text: self.text.full_delta(),
            versions: self.versions.iter().cloned().collect(),
        }
    }

    fn apply_delta(&mut self, delta: &ContentDelta) {
        self.text.apply_delta(&delta.text);
        for version in &delta.versions {
            self.versions.insert(version.clone());
        }
    }
}
