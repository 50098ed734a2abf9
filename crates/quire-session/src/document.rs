//! Document records: the unit of content the session manages.

use chrono::{DateTime, Utc};
use quire_crdt::DocContent;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Stable identity of a document. Doubles as the room id once shared.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DocumentId(String);

impl DocumentId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// A fresh, time-ordered id.
    pub fn generate() -> Self {
        Self(ulid::Ulid::new().to_string().to_lowercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Ids are used as store keys and link components.
    pub fn is_valid(&self) -> bool {
        !self.0.is_empty()
            && self
                .0
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    }
}

impl std::fmt::Display for DocumentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for DocumentId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// Opaque handle of an editor surface rendering a document.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SurfaceHandle(pub u64);

/// One document in the session.
///
/// Content is either inline (the CRDT blob is the source of truth) or file
/// backed (the file is, and the blob is a working copy).
#[derive(Clone, Debug)]
pub struct Document {
    id: DocumentId,
    pub(crate) content: DocContent,
    pub(crate) path: Option<PathBuf>,
    pub(crate) markdown: bool,
    pub(crate) last_modified: DateTime<Utc>,
    /// Set once the document has been shared, so restarting collaboration
    /// rejoins its own room instead of forking.
    pub(crate) shared: bool,
    pub(crate) surface: Option<SurfaceHandle>,
}

impl Document {
    pub(crate) fn new(id: DocumentId, content: DocContent) -> Self {
        Self {
            id,
            content,
            path: None,
            markdown: false,
            last_modified: Utc::now(),
            shared: false,
            surface: None,
        }
    }

    pub(crate) fn with_path(mut self, path: PathBuf) -> Self {
        self.path = Some(path);
        self
    }

    pub fn id(&self) -> &DocumentId {
        &self.id
    }

    pub fn content(&self) -> &DocContent {
        &self.content
    }

    pub fn text(&self) -> String {
        self.content.text()
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn markdown(&self) -> bool {
        self.markdown
    }

    pub fn last_modified(&self) -> DateTime<Utc> {
        self.last_modified
    }

    pub fn shared(&self) -> bool {
        self.shared
    }

    pub fn surface(&self) -> Option<SurfaceHandle> {
        self.surface
    }

    pub fn is_empty(&self) -> bool {
        self.content.is_empty()
    }

    pub fn is_file_backed(&self) -> bool {
        self.path.is_some()
    }

    /// Record a content or metadata change. Never moves backwards.
    pub(crate) fn touch(&mut self) {
        let now = Utc::now();
        if now > self.last_modified {
            self.last_modified = now;
        } else {
            self.last_modified += chrono::Duration::microseconds(1);
        }
    }
}

/// What to open: a known id, a file path or inline text.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DocumentRef {
    pub id: Option<DocumentId>,
    pub path: Option<PathBuf>,
    pub text: Option<String>,
    pub markdown: Option<bool>,
}

impl DocumentRef {
    pub fn id(id: impl Into<DocumentId>) -> Self {
        Self {
            id: Some(id.into()),
            ..Default::default()
        }
    }

    pub fn path(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
            ..Default::default()
        }
    }

    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.id.is_none() && self.path.is_none() && self.text.is_none()
    }
}
