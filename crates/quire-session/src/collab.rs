//! Collaboration: binding the active document to a replication room.
//!
//! Start and stop are serialized. Every asynchronous step targets the
//! document id captured when the operation began, so a document switch in
//! the middle of a start or stop never touches the wrong record.

use crate::document::{Document, DocumentId};
use crate::error::{Result, SessionError};
use crate::replication::{ChannelEvent, ChannelGuard, ChannelHandle, ReplicationChannel};
use crate::state::{CollabPhase, CollabStatus, SessionContext, SessionEvent, SessionState};
use parking_lot::Mutex;
use quire_crdt::{ContentDelta, DeltaCRDT, DocContent};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

type PendingUpdates = Arc<Mutex<HashMap<DocumentId, Vec<ContentDelta>>>>;

struct Link {
    room: DocumentId,
    channel: Option<Arc<dyn ReplicationChannel>>,
    listener: Option<JoinHandle<()>>,
    guard: ChannelGuard,
}

impl Link {
    async fn shutdown(self) -> ChannelGuard {
        if let Some(listener) = self.listener {
            listener.abort();
        }
        if let Some(channel) = self.channel {
            channel.close().await;
        }
        self.guard
    }
}

/// Links for sharing a room.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ShareLinks {
    pub web: String,
    pub app: String,
}

pub struct CollabManager {
    ctx: Arc<SessionContext>,
    transition: tokio::sync::Mutex<()>,
    link: Mutex<Option<Link>>,
    pending: PendingUpdates,
}

impl CollabManager {
    pub fn new(ctx: Arc<SessionContext>) -> Self {
        Self {
            ctx,
            transition: tokio::sync::Mutex::new(()),
            link: Mutex::new(None),
            pending: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn status(&self) -> CollabStatus {
        self.ctx.read(|s| s.collab.clone())
    }

    /// Share the active document, or join `room` when given.
    ///
    /// Sharing a document with content that is not already bound to the
    /// room keeps the original as a standalone backup in `files`. Joining
    /// someone else's room starts from empty content. Connection failures
    /// are reported through the returned status, not as an error.
    pub async fn start_collab(&self, room: Option<DocumentId>) -> Result<CollabStatus> {
        let _transition = self.transition.lock().await;
        if self.ctx.read(|s| s.collab.started) {
            return Ok(self.status());
        }

        let (room, guard, switched) = {
            let mut state = self.ctx.state.write();
            self.bind_room(&mut state, room)?
        };

        tracing::info!(room = %room, "Starting collaboration");
        if switched {
            self.ctx.emit(SessionEvent::DocumentOpened(room.clone()));
        }
        self.ctx.emit(SessionEvent::CollabStarted(room.clone()));
        self.drain_pending();

        self.connect(room, guard).await;
        Ok(self.status())
    }

    fn bind_room(
        &self,
        state: &mut SessionState,
        requested: Option<DocumentId>,
    ) -> Result<(DocumentId, ChannelGuard, bool)> {
        let joining = requested.is_some();
        let room = match requested {
            Some(room) => room,
            // A file-backed document never replicates under its own id.
            None if !state.active.is_file_backed()
                && (state.active.shared || state.active.is_empty()) =>
            {
                state.active.id().clone()
            }
            None => DocumentId::generate(),
        };
        if !room.is_valid() {
            return Err(SessionError::InvalidState(format!("invalid room id {room}")));
        }
        let guard = self.ctx.registry.acquire(&room)?;

        let mut switched = false;
        if &room != state.active.id() {
            let shared = match state.position_by_id(&room) {
                Some(index) => state.files.remove(index),
                None => {
                    let replica = self.ctx.replica_id();
                    let content = if joining {
                        DocContent::new(replica)
                    } else {
                        state.active.content.fork(replica)
                    };
                    let mut doc = Document::new(room.clone(), content);
                    doc.markdown = state.active.markdown;
                    doc
                }
            };

            let displaced = std::mem::replace(&mut state.active, shared);
            if !displaced.is_empty() || displaced.is_file_backed() {
                tracing::debug!(backup = %displaced.id(), "Keeping pre-collaboration backup");
                state.files.insert(0, displaced);
            }
            state.preview = None;
            switched = true;
        }

        state.active.shared = true;
        state.active.touch();
        state.collab = CollabStatus {
            started: true,
            phase: CollabPhase::Starting,
            room: Some(room.clone()),
            ..Default::default()
        };
        Ok((room, guard, switched))
    }

    async fn connect(&self, room: DocumentId, guard: ChannelGuard) {
        let timeout = self.ctx.config.connect_timeout();
        let opened = tokio::time::timeout(
            timeout,
            self.ctx.provider.open(&room, self.ctx.local_peer()),
        )
        .await;

        let handle = match opened {
            Ok(Ok(handle)) => Some(handle),
            Ok(Err(err)) => {
                self.record_error(&room, err);
                None
            }
            Err(_) => {
                self.record_error(
                    &room,
                    SessionError::ReplicationError(format!(
                        "timed out connecting after {} ms",
                        timeout.as_millis()
                    )),
                );
                None
            }
        };

        let Some(ChannelHandle { channel, events }) = handle else {
            self.ctx.write(|s| {
                if s.is_replicating(&room) {
                    s.collab.phase = CollabPhase::Shared;
                }
            });
            *self.link.lock() = Some(Link {
                room,
                channel: None,
                listener: None,
                guard,
            });
            return;
        };

        // Push everything we have; the room merges it idempotently.
        let full = self.ctx.write(|s| {
            s.document_mut(&room).map(|doc| {
                let _ = doc.content.split_delta();
                doc.content.full_delta()
            })
        });
        let mut pushed = Ok(());
        if let Some(full) = full.filter(|d| !d.is_empty()) {
            pushed = match full.encode() {
                Ok(bytes) => channel.apply_local(bytes).await,
                Err(e) => Err(SessionError::ReplicationError(e.to_string())),
            };
        }

        let listener = self.spawn_listener(room.clone(), events);
        *self.link.lock() = Some(Link {
            room: room.clone(),
            channel: Some(channel),
            listener: Some(listener),
            guard,
        });

        match pushed {
            Ok(()) => {
                self.ctx.write(|s| {
                    if s.is_replicating(&room) {
                        s.collab.phase = CollabPhase::Shared;
                        s.collab.connected = true;
                        s.collab.error = None;
                    }
                });
                tracing::info!(room = %room, "Connected to room");
            }
            Err(err) => self.record_error(&room, err),
        }
        self.ctx.emit(SessionEvent::StateChanged);
    }

    fn record_error(&self, room: &DocumentId, err: SessionError) {
        tracing::warn!(room = %room, error = %err, "Replication failed");
        self.ctx.write(|s| {
            if s.is_replicating(room) {
                s.collab.phase = CollabPhase::Shared;
                s.collab.connected = false;
                s.collab.error = Some(err.clone());
            }
        });
        self.ctx.emit(SessionEvent::Error(err));
    }

    fn spawn_listener(
        &self,
        room: DocumentId,
        mut events: mpsc::UnboundedReceiver<ChannelEvent>,
    ) -> JoinHandle<()> {
        let ctx = self.ctx.clone();
        let pending = self.pending.clone();
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                match event {
                    ChannelEvent::Update(bytes) => match ContentDelta::decode(&bytes) {
                        Ok(delta) => apply_remote(&ctx, &pending, &room, delta),
                        Err(e) => {
                            tracing::warn!(room = %room, error = %e, "Dropping undecodable update")
                        }
                    },
                    ChannelEvent::Presence(peers) => {
                        let peer_count = peers.len();
                        ctx.write(|s| {
                            if s.is_replicating(&room) {
                                s.collab.peer_count = peer_count;
                                s.collab.peers = peers;
                            }
                        });
                        ctx.emit(SessionEvent::PresenceChanged { peer_count });
                    }
                    ChannelEvent::Error(reason) => {
                        tracing::warn!(room = %room, reason = %reason, "Connection lost");
                        let err = SessionError::ReplicationError(reason);
                        // The roster is left as last seen.
                        ctx.write(|s| {
                            if s.is_replicating(&room) {
                                s.collab.connected = false;
                                s.collab.error = Some(err.clone());
                            }
                        });
                        ctx.emit(SessionEvent::Error(err));
                    }
                }
            }
        })
    }

    /// Send local changes of the replicating document to the room.
    ///
    /// While offline the changes stay pending in the content. A failed send
    /// is covered by the full push on reconnect.
    pub async fn publish(&self) {
        let link = self
            .link
            .lock()
            .as_ref()
            .map(|l| (l.room.clone(), l.channel.clone()));
        let Some((room, Some(channel))) = link else {
            return;
        };

        let delta = self.ctx.write(|s| {
            if !s.collab.connected {
                return None;
            }
            s.document_mut(&room).and_then(|d| d.content.split_delta())
        });
        let Some(delta) = delta else {
            return;
        };

        let sent = match delta.encode() {
            Ok(bytes) => channel.apply_local(bytes).await,
            Err(e) => Err(SessionError::ReplicationError(e.to_string())),
        };
        if let Err(err) = sent {
            self.record_error(&room, err);
        }
    }

    /// Publish the pending delta of `id` if it is replicating, otherwise
    /// drop it.
    pub(crate) async fn commit(&self, id: &DocumentId) {
        if self.ctx.read(|s| s.is_replicating(id)) {
            self.publish().await;
        } else {
            self.ctx.write(|s| {
                if let Some(doc) = s.document_mut(id) {
                    let _ = doc.content.split_delta();
                }
            });
        }
    }

    /// Reopen the channel after a failure.
    pub async fn reconnect(&self) -> Result<CollabStatus> {
        let _transition = self.transition.lock().await;
        let (room, connected) = self.ctx.read(|s| {
            (
                s.collab.room.clone().filter(|_| s.collab.started),
                s.collab.connected,
            )
        });
        let Some(room) = room else {
            return Err(SessionError::InvalidState(
                "collaboration is not started".to_string(),
            ));
        };
        if connected {
            return Ok(self.status());
        }

        tracing::info!(room = %room, "Reconnecting");
        let link = self.link.lock().take();
        let guard = match link {
            Some(link) => link.shutdown().await,
            None => self.ctx.registry.acquire(&room)?,
        };
        self.ctx.write(|s| s.collab.phase = CollabPhase::Starting);
        self.connect(room, guard).await;
        Ok(self.status())
    }

    /// Stop sharing. The document keeps its merged content.
    ///
    /// A connection error is kept in the status if the link had already
    /// dropped; a stop on a healthy link clears it.
    pub async fn stop_collab(&self) -> Result<()> {
        let _transition = self.transition.lock().await;
        self.stop_locked().await
    }

    /// Stop sharing if `id` is the replicating document.
    pub async fn stop_if_replicating(&self, id: &DocumentId) -> Result<()> {
        let _transition = self.transition.lock().await;
        if !self.ctx.read(|s| s.is_replicating(id)) {
            return Ok(());
        }
        self.stop_locked().await
    }

    async fn stop_locked(&self) -> Result<()> {
        let room = self.ctx.write(|s| {
            if !s.collab.started {
                return None;
            }
            s.collab.phase = CollabPhase::Stopping;
            s.collab.room.clone()
        });
        let Some(room) = room else {
            return Ok(());
        };

        tracing::info!(room = %room, "Stopping collaboration");
        let link = self.link.lock().take();
        if let Some(link) = link {
            drop(link.shutdown().await);
        }

        self.ctx.write(|s| {
            let error = if s.collab.connected {
                None
            } else {
                s.collab.error.take()
            };
            s.collab = CollabStatus {
                error,
                ..Default::default()
            };
            if let Some(doc) = s.document_mut(&room) {
                let _ = doc.content.split_delta();
                doc.touch();
            }
        });
        self.pending.lock().remove(&room);
        self.ctx.emit(SessionEvent::CollabStopped(room));
        Ok(())
    }

    /// Apply buffered remote updates whose document is now present.
    pub fn drain_pending(&self) {
        let present: HashSet<DocumentId> = self.ctx.read(|s| {
            std::iter::once(&s.active)
                .chain(s.files.iter())
                .map(|d| d.id().clone())
                .collect()
        });
        let ready: Vec<(DocumentId, Vec<ContentDelta>)> = {
            let mut pending = self.pending.lock();
            present
                .into_iter()
                .filter_map(|id| pending.remove(&id).map(|d| (id, d)))
                .collect()
        };
        for (id, deltas) in ready {
            for delta in deltas {
                apply_remote(&self.ctx, &self.pending, &id, delta);
            }
        }
    }

    pub fn pending_updates(&self) -> usize {
        self.pending.lock().values().map(Vec::len).sum()
    }

    /// Web and app links for the current room.
    pub fn share_link(&self) -> Option<ShareLinks> {
        let room = self
            .ctx
            .read(|s| s.collab.room.clone().filter(|_| s.collab.started))?;
        Some(ShareLinks {
            web: format!("{}/{}", self.ctx.config.web_url, room),
            app: format!("quire://open?room={room}"),
        })
    }
}

fn apply_remote(
    ctx: &SessionContext,
    pending: &PendingUpdates,
    room: &DocumentId,
    delta: ContentDelta,
) {
    let applied = ctx.write(|s| match s.document_mut(room) {
        Some(doc) => {
            doc.content.apply_delta(&delta);
            doc.touch();
            true
        }
        None => false,
    });
    if applied {
        ctx.emit(SessionEvent::RemoteUpdate(room.clone()));
    } else {
        tracing::debug!(room = %room, "Buffering update for absent document");
        pending.lock().entry(room.clone()).or_default().push(delta);
    }
}
