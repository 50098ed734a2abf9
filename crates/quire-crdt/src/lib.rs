//! # quire-crdt
//!
//! Replicated document content for the Quire editor.
//!
//! This crate provides:
//! - [`RgaText`]: a character-level replicated sequence
//! - [`VersionLog`]: an append-only snapshot history embedded in the content
//! - [`DocContent`]: text plus history, with delta replication and a
//!   byte encoding for persistence
//! - [`diff`]: the edit scripts used to restore snapshots as forward edits
//!
//! ## Example
//!
//! ```rust
//! use quire_crdt::{DeltaCRDT, DocContent};
//!
//! let mut alice = DocContent::new("alice");
//! let mut bob = DocContent::new("bob");
//!
//! alice.insert(0, "Hello");
//! bob.apply_delta(&alice.split_delta().unwrap());
//! assert_eq!(bob.text(), "Hello");
//! ```

pub mod content;
pub mod diff;
pub mod error;
pub mod lattice;
pub mod text;
pub mod versions;

pub use content::{ContentDelta, DocContent, CONTENT_FORMAT};
pub use diff::Edit;
pub use error::{CrdtError, Result};
pub use lattice::{DeltaCRDT, Lattice};
pub use text::{RgaText, TextDelta, TextId};
pub use versions::{Version, VersionId, VersionLog};
