//! Replicated text sequence based on the Replicated Growable Array.
//!
//! Provides character-level collaborative text editing with:
//! - Insert at any position
//! - Delete ranges
//! - Forward edits computed from a text diff (used to restore snapshots)
//!
//! Characters form a tree keyed by their origin (the character they were
//! inserted after); siblings are ordered by descending [`TextId`]. Ids carry a
//! Lamport sequence that is bumped past every id a replica has seen, so an
//! insert made after observing a sibling always sorts in front of it.

use crate::diff::{self, Edit};
use crate::error::{CrdtError, Result};
use crate::lattice::{DeltaCRDT, Lattice};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

/// Unique identifier for a character in the text.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TextId {
    /// The replica that created this character.
    pub replica: String,
    /// Lamport sequence number.
    pub seq: u64,
}

impl TextId {
    pub fn new(replica: impl Into<String>, seq: u64) -> Self {
        Self {
            replica: replica.into(),
            seq,
        }
    }

    /// The virtual start of the text.
    pub fn genesis() -> Self {
        Self {
            replica: String::new(),
            seq: 0,
        }
    }

    fn is_genesis(&self) -> bool {
        self.seq == 0 && self.replica.is_empty()
    }
}

impl PartialOrd for TextId {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for TextId {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        // Tie-break on replica ID for determinism
        self.seq
            .cmp(&other.seq)
            .then_with(|| self.replica.cmp(&other.replica))
    }
}

/// A character node. Deleted nodes stay as tombstones so that concurrent
/// inserts anchored on them still find their origin.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
struct TextNode {
    id: TextId,
    ch: char,
    origin: TextId,
    deleted: bool,
}

/// Delta for text operations.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextDelta {
    /// Characters to insert as `(id, char, origin)`.
    pub inserts: Vec<(TextId, char, TextId)>,
    /// IDs of characters to delete.
    pub deletes: Vec<TextId>,
}

impl TextDelta {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.inserts.is_empty() && self.deletes.is_empty()
    }

    /// Fold another delta into this one.
    pub fn extend(&mut self, other: TextDelta) {
        self.inserts.extend(other.inserts);
        self.deletes.extend(other.deletes);
    }
}

/// Serialized form: maps keyed by structs do not survive JSON, so the node
/// table is flattened into a list and the child index rebuilt on load.
#[derive(Serialize, Deserialize)]
struct TextState {
    replica_id: String,
    seq: u64,
    nodes: Vec<TextNode>,
    #[serde(default)]
    pending_deletes: Vec<TextId>,
}

/// Collaborative text CRDT.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(from = "TextState", into = "TextState")]
pub struct RgaText {
    /// All nodes indexed by their ID.
    nodes: HashMap<TextId, TextNode>,
    /// origin -> children, sorted by descending ID.
    children: HashMap<TextId, Vec<TextId>>,
    /// Deletes that arrived before the insert they target.
    pending_deletes: HashSet<TextId>,
    replica_id: String,
    seq: u64,
    pending_delta: Option<TextDelta>,
}

impl RgaText {
    /// Create a new empty text.
    pub fn new(replica_id: impl Into<String>) -> Self {
        let mut text = Self {
            nodes: HashMap::new(),
            children: HashMap::new(),
            pending_deletes: HashSet::new(),
            replica_id: replica_id.into(),
            seq: 0,
            pending_delta: None,
        };
        text.children.insert(TextId::genesis(), Vec::new());
        text
    }

    pub fn replica_id(&self) -> &str {
        &self.replica_id
    }

    /// Continue editing under another replica id. The Lamport counter is kept
    /// so new ids still sort after everything already observed.
    pub fn set_replica(&mut self, replica_id: impl Into<String>) {
        self.replica_id = replica_id.into();
    }

    fn next_id(&mut self) -> TextId {
        self.seq += 1;
        TextId::new(&self.replica_id, self.seq)
    }

    fn observe(&mut self, id: &TextId) {
        self.seq = self.seq.max(id.seq);
    }

    fn record(&mut self) -> &mut TextDelta {
        self.pending_delta.get_or_insert_with(TextDelta::new)
    }

    /// Insert a string at the given position. Positions past the end append.
    pub fn insert(&mut self, position: usize, text: &str) {
        if text.is_empty() {
            return;
        }

        let mut origin = if position == 0 {
            TextId::genesis()
        } else {
            let ids: Vec<TextId> = self.visible_ids().cloned().collect();
            let index = position.min(ids.len());
            if index == 0 {
                TextId::genesis()
            } else {
                ids[index - 1].clone()
            }
        };

        for ch in text.chars() {
            let id = self.next_id();
            self.integrate(TextNode {
                id: id.clone(),
                ch,
                origin: origin.clone(),
                deleted: false,
            });
            self.record().inserts.push((id.clone(), ch, origin));
            origin = id;
        }
    }

    /// Delete characters from start to start+length.
    pub fn delete(&mut self, start: usize, length: usize) {
        let ids: Vec<_> = self
            .visible_ids()
            .skip(start)
            .take(length)
            .cloned()
            .collect();

        for id in ids {
            if let Some(node) = self.nodes.get_mut(&id) {
                node.deleted = true;
                self.record().deletes.push(id);
            }
        }
    }

    /// Delete every visible character.
    pub fn clear(&mut self) {
        let len = self.len();
        self.delete(0, len);
    }

    /// Apply a sequence of diff edits against the current visible text.
    pub fn apply_edits(&mut self, edits: &[Edit]) {
        let mut position = 0;
        for edit in edits {
            match edit {
                Edit::Retain(n) => position += n,
                Edit::Delete(n) => self.delete(position, *n),
                Edit::Insert(text) => {
                    self.insert(position, text);
                    position += text.chars().count();
                }
            }
        }
    }

    /// Turn the visible text into `target` with a forward edit. Characters the
    /// two texts share keep their ids, so concurrent edits around them survive.
    /// Returns whether anything changed.
    pub fn replace_with(&mut self, target: &str) -> bool {
        let current = self.to_string();
        if current == target {
            return false;
        }
        let edits = diff::diff(&current, target);
        self.apply_edits(&edits);
        true
    }

    /// Number of visible characters.
    pub fn len(&self) -> usize {
        self.nodes.values().filter(|n| !n.deleted).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// True when the visible text is empty or whitespace only.
    pub fn is_blank(&self) -> bool {
        self.iter().all(char::is_whitespace)
    }

    /// Iterate over visible characters.
    pub fn iter(&self) -> impl Iterator<Item = char> + '_ {
        self.iter_nodes().filter(|n| !n.deleted).map(|n| n.ch)
    }

    fn visible_ids(&self) -> impl Iterator<Item = &TextId> + '_ {
        self.iter_nodes().filter(|n| !n.deleted).map(|n| &n.id)
    }

    fn iter_nodes(&self) -> impl Iterator<Item = &TextNode> + '_ {
        TextIterator {
            text: self,
            stack: vec![TextId::genesis()],
        }
    }

    fn integrate(&mut self, mut node: TextNode) {
        // An origin always precedes its child in id order; anything else
        // would put a cycle in the tree.
        if node.origin >= node.id {
            return;
        }
        let id = node.id.clone();
        self.observe(&id);
        if self.pending_deletes.remove(&id) {
            node.deleted = true;
        }

        let children = self.children.entry(node.origin.clone()).or_default();
        let pos = children
            .iter()
            .position(|c| c < &id)
            .unwrap_or(children.len());
        children.insert(pos, id.clone());

        self.children.entry(id.clone()).or_default();
        self.nodes.insert(id, node);
    }

    fn mark_deleted(&mut self, id: &TextId) {
        match self.nodes.get_mut(id) {
            Some(node) => node.deleted = true,
            None => {
                self.pending_deletes.insert(id.clone());
            }
        }
    }

    /// Serialize the full state.
    pub fn encode(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| CrdtError::Encode(e.to_string()))
    }

    /// Deserialize a state produced by [`RgaText::encode`].
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes).map_err(|e| CrdtError::Decode(e.to_string()))
    }
}

/// Depth-first walk over the origin tree.
struct TextIterator<'a> {
    text: &'a RgaText,
    stack: Vec<TextId>,
}

impl<'a> Iterator for TextIterator<'a> {
    type Item = &'a TextNode;

    fn next(&mut self) -> Option<Self::Item> {
        while let Some(id) = self.stack.pop() {
            if let Some(children) = self.text.children.get(&id) {
                self.stack.extend(children.iter().rev().cloned());
            }

            if !id.is_genesis() {
                if let Some(node) = self.text.nodes.get(&id) {
                    return Some(node);
                }
            }
        }
        None
    }
}

impl From<TextState> for RgaText {
    fn from(state: TextState) -> Self {
        let mut text = RgaText::new(state.replica_id);
        text.pending_deletes = state.pending_deletes.into_iter().collect();
        for node in state.nodes {
            text.integrate(node);
        }
        text.seq = text.seq.max(state.seq);
        text
    }
}

impl From<RgaText> for TextState {
    fn from(text: RgaText) -> Self {
        let mut nodes: Vec<TextNode> = text.nodes.into_values().collect();
        nodes.sort_by(|a, b| a.id.cmp(&b.id));
        let mut pending_deletes: Vec<TextId> = text.pending_deletes.into_iter().collect();
        pending_deletes.sort();
        TextState {
            replica_id: text.replica_id,
            seq: text.seq,
            nodes,
            pending_deletes,
        }
    }
}

impl std::fmt::Display for RgaText {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for ch in self.iter() {
            write!(f, "{}", ch)?;
        }
        Ok(())
    }
}

impl PartialEq for RgaText {
    fn eq(&self, other: &Self) -> bool {
        self.iter().eq(other.iter())
    }
}

impl Eq for RgaText {}

impl Default for RgaText {
    fn default() -> Self {
        Self::new("")
    }
}

impl Lattice for RgaText {
    fn bottom() -> Self {
        Self::new("")
    }

    fn join(&self, other: &Self) -> Self {
        let mut result = self.clone();
        result.apply_delta(&other.full_delta());
        result
    }
}

impl DeltaCRDT for RgaText {
    type Delta = TextDelta;

    fn split_delta(&mut self) -> Option<TextDelta> {
        self.pending_delta.take().filter(|d| !d.is_empty())
    }

    fn full_delta(&self) -> TextDelta {
        let mut nodes: Vec<&TextNode> = self.nodes.values().collect();
        nodes.sort_by(|a, b| a.id.cmp(&b.id));

        let mut deletes: Vec<TextId> = nodes
            .iter()
            .filter(|n| n.deleted)
            .map(|n| n.id.clone())
            .collect();
        deletes.extend(self.pending_deletes.iter().cloned());

        TextDelta {
            inserts: nodes
                .into_iter()
                .map(|n| (n.id.clone(), n.ch, n.origin.clone()))
                .collect(),
            deletes,
        }
    }

    fn apply_delta(&mut self, delta: &TextDelta) {
        for (id, ch, origin) in &delta.inserts {
            if !self.nodes.contains_key(id) {
                self.integrate(TextNode {
                    id: id.clone(),
                    ch: *ch,
                    origin: origin.clone(),
                    deleted: false,
                });
            }
        }

        for id in &delta.deletes {
            self.mark_deleted(id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn synced(a: &mut RgaText, b: &mut RgaText) {
        let da = a.split_delta();
        let db = b.split_delta();
        if let Some(d) = da {
            b.apply_delta(&d);
        }
        if let Some(d) = db {
            a.apply_delta(&d);
        }
    }

    #[test]
    fn test_basic_insert() {
        let mut text = RgaText::new("r1");
        text.insert(0, "Hello");
        assert_eq!(text.to_string(), "Hello");
        assert_eq!(text.len(), 5);
    }

    #[test]
    fn test_insert_at_front_of_existing_text() {
        let mut text = RgaText::new("r1");
        text.insert(0, "World");
        text.insert(0, "Hello ");
        assert_eq!(text.to_string(), "Hello World");
    }

    #[test]
    fn test_insert_in_middle_and_past_end() {
        let mut text = RgaText::new("r1");
        text.insert(0, "Helo");
        text.insert(2, "l");
        text.insert(100, "!");
        assert_eq!(text.to_string(), "Hello!");
    }

    #[test]
    fn test_delete_and_clear() {
        let mut text = RgaText::new("r1");
        text.insert(0, "Hello World");
        text.delete(5, 6);
        assert_eq!(text.to_string(), "Hello");
        text.clear();
        assert!(text.is_empty());
    }

    #[test]
    fn test_blank_counts_whitespace_as_empty() {
        let mut text = RgaText::new("r1");
        assert!(text.is_blank());
        text.insert(0, "  \n\t");
        assert!(text.is_blank());
        assert!(!text.is_empty());
        text.insert(1, "x");
        assert!(!text.is_blank());
    }

    #[test]
    fn test_concurrent_inserts_converge() {
        let mut text1 = RgaText::new("r1");
        let mut text2 = RgaText::new("r2");

        text1.insert(0, "Hello");
        synced(&mut text1, &mut text2);

        text1.insert(5, " World");
        text2.insert(5, " Rust");
        synced(&mut text1, &mut text2);

        assert_eq!(text1.to_string(), text2.to_string());
        assert!(text1.to_string().contains(" World"));
        assert!(text1.to_string().contains(" Rust"));
    }

    #[test]
    fn test_concurrent_insert_delete() {
        let mut text1 = RgaText::new("r1");
        let mut text2 = RgaText::new("r2");

        text1.insert(0, "Hello");
        synced(&mut text1, &mut text2);

        text1.delete(2, 3);
        text2.insert(2, "x");
        synced(&mut text1, &mut text2);

        assert_eq!(text1.to_string(), text2.to_string());
        assert_eq!(text1.to_string(), "Hex");
    }

    #[test]
    fn test_insert_after_observing_sorts_first() {
        let mut text1 = RgaText::new("r1");
        let mut text2 = RgaText::new("r2");

        text2.insert(0, "b");
        synced(&mut text1, &mut text2);
        text1.insert(0, "a");
        synced(&mut text1, &mut text2);

        assert_eq!(text1.to_string(), "ab");
        assert_eq!(text2.to_string(), "ab");
    }

    #[test]
    fn test_delete_before_insert_is_buffered() {
        let mut source = RgaText::new("r1");
        source.insert(0, "abc");
        let insert = source.split_delta().unwrap();
        source.delete(1, 1);
        let delete = source.split_delta().unwrap();

        let mut target = RgaText::new("r2");
        target.apply_delta(&delete);
        assert!(target.is_empty());
        target.apply_delta(&insert);
        assert_eq!(target.to_string(), "ac");
    }

    #[test]
    fn test_replace_with_keeps_shared_characters() {
        let mut text = RgaText::new("r1");
        text.insert(0, "hello world");
        let _ = text.split_delta();

        assert!(text.replace_with("hello brave world"));
        assert_eq!(text.to_string(), "hello brave world");

        let delta = text.split_delta().unwrap();
        assert_eq!(delta.inserts.len(), "brave ".len());
        assert!(delta.deletes.is_empty());
        assert!(!text.replace_with("hello brave world"));
    }

    #[test]
    fn test_encode_round_trip_preserves_order_and_clock() {
        let mut text = RgaText::new("r1");
        text.insert(0, "Hello");
        text.delete(0, 1);
        text.insert(0, "J");

        let decoded = RgaText::decode(&text.encode().unwrap()).unwrap();
        assert_eq!(decoded.to_string(), "Jello");
        assert_eq!(decoded.seq, text.seq);
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(matches!(
            RgaText::decode(b"not json"),
            Err(CrdtError::Decode(_))
        ));
    }

    #[test]
    fn test_lattice_join() {
        let mut text1 = RgaText::new("r1");
        let mut text2 = RgaText::new("r2");

        text1.insert(0, "Hello");
        text2.insert(0, "World");

        let left = text1.join(&text2);
        let right = text2.join(&text1);
        assert_eq!(left, right);
        assert_eq!(left.len(), 10);
    }
}
