//! Replication provider abstraction and an in-memory relay.
//!
//! A provider opens one channel per room. The channel carries encoded
//! content deltas out, and delivers remote deltas, presence rosters and
//! connection errors back as [`ChannelEvent`]s.

use crate::document::DocumentId;
use crate::error::{Result, SessionError};
use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use quire_crdt::{ContentDelta, DeltaCRDT, DocContent};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

/// Unique identifier for a peer.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PeerId(pub String);

impl PeerId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl std::fmt::Display for PeerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A participant in a room.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Peer {
    pub id: PeerId,
    pub name: String,
}

/// Inbound traffic on an open channel.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ChannelEvent {
    /// Encoded [`quire_crdt::ContentDelta`] from another peer.
    Update(Vec<u8>),
    /// Everyone currently in the room, including the local peer.
    Presence(Vec<Peer>),
    /// The connection was lost.
    Error(String),
}

#[async_trait]
pub trait ReplicationChannel: Send + Sync + 'static {
    /// Send an encoded delta to the room.
    async fn apply_local(&self, delta: Vec<u8>) -> Result<()>;

    /// Leave the room. Further events are not delivered.
    async fn close(&self);
}

/// An open channel and its event stream.
pub struct ChannelHandle {
    pub channel: Arc<dyn ReplicationChannel>,
    pub events: mpsc::UnboundedReceiver<ChannelEvent>,
}

#[async_trait]
pub trait ReplicationProvider: Send + Sync + 'static {
    async fn open(&self, room: &DocumentId, peer: &Peer) -> Result<ChannelHandle>;
}

struct Member {
    id: u64,
    peer: Peer,
    tx: mpsc::UnboundedSender<ChannelEvent>,
}

/// Update log length at which a room folds its log into one delta.
const COMPACT_AFTER: usize = 64;

#[derive(Default)]
struct Room {
    members: Vec<Member>,
    /// Deltas replayed to joiners, merged once the log grows long.
    history: Vec<Vec<u8>>,
    /// Set when the log holds something other than content deltas.
    opaque: bool,
}

impl Room {
    fn record(&mut self, delta: Vec<u8>) {
        self.history.push(delta);
        if !self.opaque && self.history.len() >= COMPACT_AFTER {
            self.compact();
        }
    }

    /// Replace the log with the full state it adds up to.
    fn compact(&mut self) {
        let mut merged = DocContent::new("");
        for bytes in &self.history {
            match ContentDelta::decode(bytes) {
                Ok(delta) => merged.apply_delta(&delta),
                Err(_) => {
                    self.opaque = true;
                    return;
                }
            }
        }
        match merged.full_delta().encode() {
            Ok(bytes) => {
                tracing::trace!(folded = self.history.len(), "Compacted room history");
                self.history = vec![bytes];
            }
            Err(err) => tracing::warn!(error = %err, "Cannot compact room history"),
        }
    }

    fn roster(&self) -> Vec<Peer> {
        self.members.iter().map(|m| m.peer.clone()).collect()
    }

    fn announce(&self) {
        let roster = self.roster();
        for member in &self.members {
            let _ = member.tx.send(ChannelEvent::Presence(roster.clone()));
        }
    }
}

#[derive(Default)]
struct HubInner {
    rooms: RwLock<HashMap<DocumentId, Room>>,
    next_member: AtomicU64,
    refuse: AtomicBool,
    stall: AtomicBool,
}

/// In-memory relay server for tests and simulation.
///
/// Keeps each room's update log so late joiners and reconnecting peers
/// catch up, and broadcasts the roster whenever membership changes. A long
/// log is folded into a single full-state delta.
#[derive(Clone, Default)]
pub struct MemoryHub {
    inner: Arc<HubInner>,
}

impl MemoryHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail new connections immediately.
    pub fn refuse_connections(&self, refuse: bool) {
        self.inner.refuse.store(refuse, Ordering::SeqCst);
    }

    /// Leave new connection attempts pending forever.
    pub fn stall_connections(&self, stall: bool) {
        self.inner.stall.store(stall, Ordering::SeqCst);
    }

    /// Drop every connection, reporting `reason` to each member.
    pub fn drop_connections(&self, reason: &str) {
        let mut rooms = self.inner.rooms.write();
        for room in rooms.values_mut() {
            for member in room.members.drain(..) {
                let _ = member.tx.send(ChannelEvent::Error(reason.to_string()));
            }
        }
    }

    pub fn members(&self, room: &DocumentId) -> usize {
        self.inner
            .rooms
            .read()
            .get(room)
            .map(|r| r.members.len())
            .unwrap_or(0)
    }

    pub fn history_len(&self, room: &DocumentId) -> usize {
        self.inner
            .rooms
            .read()
            .get(room)
            .map(|r| r.history.len())
            .unwrap_or(0)
    }
}

#[async_trait]
impl ReplicationProvider for MemoryHub {
    async fn open(&self, room: &DocumentId, peer: &Peer) -> Result<ChannelHandle> {
        if self.inner.stall.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        if self.inner.refuse.load(Ordering::SeqCst) {
            return Err(SessionError::ReplicationError(
                "connection refused".to_string(),
            ));
        }

        let (tx, events) = mpsc::unbounded_channel();
        let id = self.inner.next_member.fetch_add(1, Ordering::SeqCst);

        {
            let mut rooms = self.inner.rooms.write();
            let entry = rooms.entry(room.clone()).or_default();
            for delta in &entry.history {
                let _ = tx.send(ChannelEvent::Update(delta.clone()));
            }
            entry.members.push(Member {
                id,
                peer: peer.clone(),
                tx,
            });
            entry.announce();
        }

        tracing::debug!(room = %room, peer = %peer.id, "Peer joined room");

        Ok(ChannelHandle {
            channel: Arc::new(MemoryChannel {
                hub: self.inner.clone(),
                room: room.clone(),
                member: id,
            }),
            events,
        })
    }
}

struct MemoryChannel {
    hub: Arc<HubInner>,
    room: DocumentId,
    member: u64,
}

#[async_trait]
impl ReplicationChannel for MemoryChannel {
    async fn apply_local(&self, delta: Vec<u8>) -> Result<()> {
        let mut rooms = self.hub.rooms.write();
        let room = rooms
            .get_mut(&self.room)
            .filter(|r| r.members.iter().any(|m| m.id == self.member))
            .ok_or_else(|| SessionError::ReplicationError("not connected".to_string()))?;

        for member in room.members.iter().filter(|m| m.id != self.member) {
            let _ = member.tx.send(ChannelEvent::Update(delta.clone()));
        }
        room.record(delta);
        Ok(())
    }

    async fn close(&self) {
        let mut rooms = self.hub.rooms.write();
        if let Some(room) = rooms.get_mut(&self.room) {
            let before = room.members.len();
            room.members.retain(|m| m.id != self.member);
            if room.members.len() != before {
                room.announce();
            }
        }
    }
}

/// Process-wide record of open channels: at most one per document id.
#[derive(Default)]
pub struct ChannelRegistry {
    open: Mutex<HashSet<DocumentId>>,
}

impl ChannelRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Claim the channel slot for `id`. Released when the guard drops.
    pub fn acquire(self: &Arc<Self>, id: &DocumentId) -> Result<ChannelGuard> {
        if !self.open.lock().insert(id.clone()) {
            return Err(SessionError::Busy(id.to_string()));
        }
        Ok(ChannelGuard {
            registry: self.clone(),
            id: id.clone(),
        })
    }

    pub fn is_open(&self, id: &DocumentId) -> bool {
        self.open.lock().contains(id)
    }
}

pub struct ChannelGuard {
    registry: Arc<ChannelRegistry>,
    id: DocumentId,
}

impl ChannelGuard {
    pub fn id(&self) -> &DocumentId {
        &self.id
    }
}

impl Drop for ChannelGuard {
    fn drop(&mut self) {
        self.registry.open.lock().remove(&self.id);
    }
}
