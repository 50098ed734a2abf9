//! Session state and the shared context every manager works against.

use crate::config::{EditorConfig, SessionConfig};
use crate::document::{Document, DocumentId};
use crate::error::SessionError;
use crate::files::FileIo;
use crate::replication::{ChannelRegistry, Peer, PeerId, ReplicationProvider};
use crate::store::LocalStore;
use parking_lot::RwLock;
use quire_crdt::{DocContent, VersionId};
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum LoadingState {
    #[default]
    Uninitialized,
    Restoring,
    Ready,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum CollabPhase {
    #[default]
    Local,
    Starting,
    Shared,
    Stopping,
}

/// Collaboration status of the session.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CollabStatus {
    pub started: bool,
    pub phase: CollabPhase,
    /// Room id, equal to the id of the replicating document.
    pub room: Option<DocumentId>,
    pub connected: bool,
    /// Participants in the room, the local peer included.
    pub peer_count: usize,
    pub peers: Vec<Peer>,
    pub error: Option<SessionError>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowPlacement {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

impl WindowPlacement {
    /// Smaller windows come from minimize animations and are ignored.
    pub fn is_plausible(&self) -> bool {
        self.width > 10 && self.height > 10
    }
}

/// A version rendered for viewing in place of the live text.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Preview {
    pub document: DocumentId,
    pub version: VersionId,
    pub text: String,
}

/// A persisted document that failed validation on restore.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RejectedDocument {
    pub id: String,
    pub error: SessionError,
}

#[derive(Clone, Debug)]
pub struct SessionState {
    pub active: Document,
    /// Inactive documents, most recently displaced first.
    pub files: Vec<Document>,
    pub collab: CollabStatus,
    pub loading: LoadingState,
    pub error: Option<SessionError>,
    pub config: EditorConfig,
    pub window: Option<WindowPlacement>,
    pub fullscreen: bool,
    pub preview: Option<Preview>,
    pub rejected: Vec<RejectedDocument>,
}

impl SessionState {
    pub fn new(active: Document) -> Self {
        Self {
            active,
            files: Vec::new(),
            collab: CollabStatus::default(),
            loading: LoadingState::default(),
            error: None,
            config: EditorConfig::default(),
            window: None,
            fullscreen: false,
            preview: None,
            rejected: Vec::new(),
        }
    }

    pub fn document(&self, id: &DocumentId) -> Option<&Document> {
        if self.active.id() == id {
            return Some(&self.active);
        }
        self.files.iter().find(|d| d.id() == id)
    }

    pub fn document_mut(&mut self, id: &DocumentId) -> Option<&mut Document> {
        if self.active.id() == id {
            return Some(&mut self.active);
        }
        self.files.iter_mut().find(|d| d.id() == id)
    }

    pub fn position_by_id(&self, id: &DocumentId) -> Option<usize> {
        self.files.iter().position(|d| d.id() == id)
    }

    pub fn position_by_path(&self, path: &Path) -> Option<usize> {
        self.files.iter().position(|d| d.path() == Some(path))
    }

    /// Whether `id` is the document bound to the collaboration session.
    pub fn is_replicating(&self, id: &DocumentId) -> bool {
        self.collab.started && self.collab.room.as_ref() == Some(id)
    }

    /// Every document, active first.
    pub fn documents(&self) -> impl Iterator<Item = &Document> {
        std::iter::once(&self.active).chain(self.files.iter())
    }
}

/// Notifications about session changes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SessionEvent {
    /// Content or metadata of a document changed.
    DocumentChanged(DocumentId),
    /// A different document became active.
    DocumentOpened(DocumentId),
    DocumentDiscarded(DocumentId),
    /// Config, window or other session-level state changed.
    StateChanged,
    CollabStarted(DocumentId),
    CollabStopped(DocumentId),
    RemoteUpdate(DocumentId),
    PresenceChanged { peer_count: usize },
    VersionAdded(DocumentId),
    DocumentRejected { id: String, reason: String },
    Persisted { sequence: u64 },
    Error(SessionError),
}

impl SessionEvent {
    /// Whether the event reflects state that must be written back.
    pub fn is_mutation(&self) -> bool {
        !matches!(
            self,
            SessionEvent::Persisted { .. }
                | SessionEvent::DocumentRejected { .. }
                | SessionEvent::PresenceChanged { .. }
                | SessionEvent::Error(_)
        )
    }
}

const ADJECTIVES: &[&str] = &[
    "Amber", "Brave", "Calm", "Clever", "Eager", "Gentle", "Happy", "Jolly", "Kind", "Lucky",
    "Mellow", "Nimble", "Proud", "Quiet", "Swift", "Witty",
];

const ANIMALS: &[&str] = &[
    "Badger", "Crane", "Dolphin", "Falcon", "Fox", "Heron", "Koala", "Lynx", "Otter", "Owl",
    "Panda", "Puffin", "Seal", "Sparrow", "Tiger", "Wombat",
];

/// A random "Adjective Animal" presence name.
pub fn generate_user_name() -> String {
    let mut rng = rand::thread_rng();
    let adjective = ADJECTIVES.choose(&mut rng).copied().unwrap_or("Quiet");
    let animal = ANIMALS.choose(&mut rng).copied().unwrap_or("Owl");
    format!("{adjective} {animal}")
}

/// Everything a manager needs: the state, the injected collaborators and
/// the event channel. Shared as `Arc<SessionContext>`.
///
/// The state lock is synchronous and must never be held across an await.
pub struct SessionContext {
    pub(crate) state: RwLock<SessionState>,
    pub(crate) store: Arc<dyn LocalStore>,
    pub(crate) files: Arc<dyn FileIo>,
    pub(crate) provider: Arc<dyn ReplicationProvider>,
    pub(crate) registry: Arc<ChannelRegistry>,
    pub(crate) config: SessionConfig,
    replica_id: String,
    local_peer: Peer,
    event_tx: broadcast::Sender<SessionEvent>,
    persistence_suspended: AtomicBool,
}

impl SessionContext {
    pub fn new(
        config: SessionConfig,
        store: Arc<dyn LocalStore>,
        files: Arc<dyn FileIo>,
        provider: Arc<dyn ReplicationProvider>,
    ) -> Self {
        Self::with_registry(config, store, files, provider, ChannelRegistry::new())
    }

    /// Share a channel registry with other sessions in the process.
    pub fn with_registry(
        config: SessionConfig,
        store: Arc<dyn LocalStore>,
        files: Arc<dyn FileIo>,
        provider: Arc<dyn ReplicationProvider>,
        registry: Arc<ChannelRegistry>,
    ) -> Self {
        let replica_id = ulid::Ulid::new().to_string().to_lowercase();
        let name = config
            .user_name
            .clone()
            .unwrap_or_else(generate_user_name);
        let local_peer = Peer {
            id: PeerId::new(replica_id.clone()),
            name,
        };
        let active = Document::new(DocumentId::generate(), DocContent::new(replica_id.clone()));
        let (event_tx, _) = broadcast::channel(256);

        Self {
            state: RwLock::new(SessionState::new(active)),
            store,
            files,
            provider,
            registry,
            config,
            replica_id,
            local_peer,
            event_tx,
            persistence_suspended: AtomicBool::new(false),
        }
    }

    pub fn replica_id(&self) -> &str {
        &self.replica_id
    }

    pub fn local_peer(&self) -> &Peer {
        &self.local_peer
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.event_tx.subscribe()
    }

    pub(crate) fn emit(&self, event: SessionEvent) {
        let _ = self.event_tx.send(event);
    }

    /// Read the state under the lock.
    pub fn read<R>(&self, f: impl FnOnce(&SessionState) -> R) -> R {
        f(&self.state.read())
    }

    pub(crate) fn write<R>(&self, f: impl FnOnce(&mut SessionState) -> R) -> R {
        f(&mut self.state.write())
    }

    /// A copy of the whole state.
    pub fn snapshot(&self) -> SessionState {
        self.state.read().clone()
    }

    /// Stop writing back until the user acknowledges a broken restore.
    pub(crate) fn suspend_persistence(&self) {
        self.persistence_suspended.store(true, Ordering::SeqCst);
    }

    pub(crate) fn resume_persistence(&self) {
        self.persistence_suspended.store(false, Ordering::SeqCst);
    }

    pub fn persistence_suspended(&self) -> bool {
        self.persistence_suspended.load(Ordering::SeqCst)
    }

    /// A new empty document edited by this replica.
    pub(crate) fn blank_document(&self) -> Document {
        Document::new(DocumentId::generate(), DocContent::new(self.replica_id.clone()))
    }
}
