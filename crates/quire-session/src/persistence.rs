//! Writing the session back to the local store and restoring it.
//!
//! Writes are debounced and serialized. Each write persists the latest
//! state: document records first, then config and window, then the meta
//! record that points at them, and finally deletions of records that left
//! the session. A reader therefore never sees meta referencing content
//! that was not written.

use crate::config::EditorConfig;
use crate::document::{Document, DocumentId};
use crate::error::{Result, SessionError};
use crate::schedule::Debouncer;
use crate::state::{LoadingState, RejectedDocument, SessionContext, SessionEvent, WindowPlacement};
use crate::store::Collection;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use quire_crdt::{DeltaCRDT, DocContent};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;

/// Key of the singleton records (meta, config, window).
pub const MAIN_KEY: &str = "main";

/// Where a document's text lives.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Backing {
    /// The base64 content blob is the source of truth.
    Inline { content: String },
    /// The file is the source of truth; the blob keeps history.
    File {
        path: PathBuf,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        content: Option<String>,
    },
}

/// A document as stored in the `Documents` collection.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentRecord {
    pub id: DocumentId,
    #[serde(flatten)]
    pub backing: Backing,
    #[serde(default)]
    pub markdown: bool,
    #[serde(default)]
    pub shared: bool,
    pub last_modified: DateTime<Utc>,
}

impl DocumentRecord {
    fn from_document(doc: &Document) -> Result<Self> {
        let blob = doc
            .content
            .encode()
            .map(|bytes| BASE64.encode(bytes))
            .map_err(|e| SessionError::StorageError(e.to_string()))?;
        let backing = match &doc.path {
            Some(path) => Backing::File {
                path: path.clone(),
                content: Some(blob),
            },
            None => Backing::Inline { content: blob },
        };
        Ok(Self {
            id: doc.id().clone(),
            backing,
            markdown: doc.markdown,
            shared: doc.shared,
            last_modified: doc.last_modified,
        })
    }

    /// Validate a stored record and rebuild the document for `replica`.
    pub fn decode(key: &str, bytes: &[u8], replica: &str) -> Result<Document> {
        let invalid = |reason: String| SessionError::InvalidDocument {
            id: key.to_string(),
            reason,
        };

        let record: DocumentRecord =
            serde_json::from_slice(bytes).map_err(|e| invalid(e.to_string()))?;
        if record.id.as_str() != key || !record.id.is_valid() {
            return Err(invalid(format!("record id {:?} does not match key", record.id.as_str())));
        }

        let (blob, path) = match record.backing {
            Backing::Inline { content } => (Some(content), None),
            Backing::File { path, content } => (content, Some(path)),
        };
        let content = match blob {
            Some(blob) => {
                let bytes = BASE64
                    .decode(blob.as_bytes())
                    .map_err(|e| invalid(e.to_string()))?;
                DocContent::decode(&bytes, replica).map_err(|e| invalid(e.to_string()))?
            }
            None => DocContent::new(replica),
        };

        let mut doc = Document::new(record.id, content);
        doc.path = path;
        doc.markdown = record.markdown;
        doc.shared = record.shared;
        doc.last_modified = record.last_modified;
        Ok(doc)
    }
}

/// The session-level record in the `Meta` collection.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetaRecord {
    pub active: Option<DocumentId>,
    #[serde(default)]
    pub files: Vec<DocumentId>,
    #[serde(default)]
    pub room: Option<DocumentId>,
    #[serde(default)]
    pub fullscreen: bool,
    pub last_modified: DateTime<Utc>,
    #[serde(default)]
    pub sequence: u64,
}

#[derive(Serialize, Deserialize)]
struct CounterRecord {
    bytes: u64,
}

/// Outcome of [`SessionPersistence::restore`].
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RestoreReport {
    pub restored: usize,
    pub rejected: usize,
    /// Room the active document was shared in at the last write.
    pub room: Option<DocumentId>,
    /// Set when the persisted session was unusable.
    pub error: Option<SessionError>,
}

struct DocumentWrite {
    id: DocumentId,
    record: Vec<u8>,
    file: Option<(PathBuf, String)>,
    last_modified: DateTime<Utc>,
}

struct WritePlan {
    documents: Vec<DocumentWrite>,
    config: Vec<u8>,
    window: Option<Vec<u8>>,
    meta: MetaRecord,
    fingerprint: String,
    present: HashSet<DocumentId>,
    keep: HashSet<String>,
}

struct Inner {
    ctx: Arc<SessionContext>,
    write_lock: tokio::sync::Mutex<()>,
    sequence: AtomicU64,
    /// `last_modified` of each document as last written.
    written: Mutex<HashMap<DocumentId, DateTime<Utc>>>,
    last_fingerprint: Mutex<Option<String>>,
    last_present: Mutex<HashSet<DocumentId>>,
}

pub struct SessionPersistence {
    inner: Arc<Inner>,
    debouncer: Debouncer,
}

impl SessionPersistence {
    pub fn new(ctx: Arc<SessionContext>) -> Self {
        let delay = ctx.config.save_debounce();
        let inner = Arc::new(Inner {
            ctx,
            write_lock: tokio::sync::Mutex::new(()),
            sequence: AtomicU64::new(0),
            written: Mutex::new(HashMap::new()),
            last_fingerprint: Mutex::new(None),
            last_present: Mutex::new(HashSet::new()),
        });

        let weak: Weak<Inner> = Arc::downgrade(&inner);
        let debouncer = Debouncer::new(delay, move || {
            let weak = weak.clone();
            Box::pin(async move {
                let Some(inner) = weak.upgrade() else {
                    return true;
                };
                match inner.persist().await {
                    Ok(_) => true,
                    Err(err) => {
                        tracing::warn!(error = %err, "Failed to persist session");
                        inner.ctx.write(|s| s.error = Some(err.clone()));
                        inner.ctx.emit(SessionEvent::Error(err));
                        false
                    }
                }
            })
        });

        Self { inner, debouncer }
    }

    /// Schedule a debounced write for every mutation event.
    pub fn watch(&self) -> JoinHandle<()> {
        let mut events = self.inner.ctx.subscribe();
        let debouncer = self.debouncer.clone();
        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(event) if event.is_mutation() => debouncer.schedule(),
                    Ok(_) => {}
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::debug!(skipped, "Persistence watcher lagged");
                        debouncer.schedule();
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        })
    }

    pub fn request_save(&self) {
        self.debouncer.schedule();
    }

    /// Cancel the debounce timer and write now.
    pub async fn flush(&self) {
        self.debouncer.flush().await;
    }

    /// Write the current state immediately. Returns the write sequence.
    pub async fn persist(&self) -> Result<u64> {
        self.inner.persist().await
    }

    pub fn sequence(&self) -> u64 {
        self.inner.sequence.load(Ordering::SeqCst)
    }

    /// Bytes of content stored, per the `Counters` collection.
    pub async fn storage_size(&self) -> Result<u64> {
        let counters = self.inner.ctx.store.list(Collection::Counters).await?;
        Ok(counters
            .iter()
            .filter_map(|(_, bytes)| serde_json::from_slice::<CounterRecord>(bytes).ok())
            .map(|c| c.bytes)
            .sum())
    }

    /// Load the persisted session into the context.
    ///
    /// A document that fails validation is reported and left out. A broken
    /// meta or config record, or an unreadable store, falls back to a fresh
    /// session with the error set and suspends writes so the stored data is
    /// not overwritten before the user acknowledges it.
    pub async fn restore(&self) -> RestoreReport {
        let ctx = &self.inner.ctx;
        ctx.write(|s| s.loading = LoadingState::Restoring);

        match self.inner.load().await {
            Ok(report) => {
                tracing::info!(
                    restored = report.restored,
                    rejected = report.rejected,
                    "Restored session"
                );
                report
            }
            Err(err) => {
                tracing::error!(error = %err, "Persisted session is unusable");
                ctx.suspend_persistence();
                ctx.write(|s| {
                    s.loading = LoadingState::Ready;
                    s.error = Some(err.clone());
                });
                ctx.emit(SessionEvent::Error(err.clone()));
                RestoreReport {
                    error: Some(err),
                    ..Default::default()
                }
            }
        }
    }
}

impl Inner {
    async fn load(&self) -> Result<RestoreReport> {
        let ctx = &self.ctx;
        let replica = ctx.replica_id().to_string();

        let meta = match ctx.store.get(Collection::Meta, MAIN_KEY).await? {
            Some(bytes) => Some(
                serde_json::from_slice::<MetaRecord>(&bytes)
                    .map_err(|e| SessionError::InvalidState(e.to_string()))?,
            ),
            None => None,
        };
        let config = match ctx.store.get(Collection::Config, MAIN_KEY).await? {
            Some(bytes) => EditorConfig::from_slice(&bytes)?,
            None => EditorConfig::default(),
        };
        let window = match ctx.store.get(Collection::Window, MAIN_KEY).await? {
            Some(bytes) => match serde_json::from_slice::<WindowPlacement>(&bytes) {
                Ok(window) => Some(window).filter(WindowPlacement::is_plausible),
                Err(e) => {
                    tracing::warn!(error = %e, "Ignoring stored window placement");
                    None
                }
            },
            None => None,
        };

        let mut documents = Vec::new();
        let mut rejected = Vec::new();
        for (key, bytes) in ctx.store.list(Collection::Documents).await? {
            match DocumentRecord::decode(&key, &bytes, &replica) {
                Ok(doc) => documents.push(doc),
                Err(error) => {
                    tracing::warn!(id = %key, error = %error, "Rejected stored document");
                    rejected.push(RejectedDocument { id: key, error });
                }
            }
        }

        let order: Vec<DocumentId> = meta.as_ref().map(|m| m.files.clone()).unwrap_or_default();
        documents.sort_by(|a, b| {
            let rank = |d: &Document| order.iter().position(|id| id == d.id()).unwrap_or(usize::MAX);
            rank(a)
                .cmp(&rank(b))
                .then_with(|| b.last_modified.cmp(&a.last_modified))
        });

        let active_id = meta.as_ref().and_then(|m| m.active.clone());
        let stored_active = active_id
            .as_ref()
            .and_then(|id| documents.iter().position(|d| d.id() == id))
            .map(|index| documents.remove(index));
        let restored = documents.len() + usize::from(stored_active.is_some());
        let mut active = stored_active.unwrap_or_else(|| ctx.blank_document());

        let mut file_error = None;
        if let Some(path) = active.path.clone() {
            match ctx.files.read(&path).await {
                Ok(text) => {
                    active.content.replace_text(&text);
                    let _ = active.content.split_delta();
                }
                Err(err) => {
                    tracing::warn!(path = %path.display(), error = %err, "Cannot read active file");
                    file_error = Some(err);
                }
            }
        }

        let room = meta
            .as_ref()
            .and_then(|m| m.room.clone())
            .filter(|room| room == active.id());

        {
            let mut written = self.written.lock();
            let mut present = self.last_present.lock();
            for doc in std::iter::once(&active).chain(documents.iter()) {
                written.insert(doc.id().clone(), doc.last_modified);
                present.insert(doc.id().clone());
            }
        }

        let report = RestoreReport {
            restored,
            rejected: rejected.len(),
            room,
            error: file_error.clone(),
        };

        let notices: Vec<(String, String)> = rejected
            .iter()
            .map(|r| (r.id.clone(), r.error.to_string()))
            .collect();

        ctx.write(|s| {
            s.active = active;
            s.files = documents;
            s.config = config;
            s.window = window;
            s.fullscreen = meta.as_ref().map(|m| m.fullscreen).unwrap_or(false);
            s.rejected = rejected;
            s.error = file_error;
            s.loading = LoadingState::Ready;
        });

        for (id, reason) in notices {
            ctx.emit(SessionEvent::DocumentRejected { id, reason });
        }
        ctx.emit(SessionEvent::StateChanged);
        Ok(report)
    }

    async fn persist(&self) -> Result<u64> {
        let ctx = &self.ctx;
        if ctx.persistence_suspended() {
            tracing::debug!("Persistence suspended; skipping write");
            return Ok(self.sequence.load(Ordering::SeqCst));
        }
        if ctx.read(|s| s.loading) != LoadingState::Ready {
            return Ok(self.sequence.load(Ordering::SeqCst));
        }

        let _guard = self.write_lock.lock().await;
        let plan = self.plan()?;

        let unchanged = plan.documents.is_empty()
            && *self.last_present.lock() == plan.present
            && self.last_fingerprint.lock().as_deref() == Some(plan.fingerprint.as_str());
        if unchanged {
            return Ok(self.sequence.load(Ordering::SeqCst));
        }

        let sequence = self.sequence.fetch_add(1, Ordering::SeqCst) + 1;
        let meta = to_json(&MetaRecord {
            sequence,
            ..plan.meta.clone()
        })?;

        // A document whose file could not be written stays out of `written`
        // so the next run writes it again.
        let mut file_error = None;
        for write in &plan.documents {
            let mut file_written = true;
            if let Some((path, text)) = &write.file {
                if let Err(err) = ctx.files.write(path, text).await {
                    tracing::warn!(path = %path.display(), error = %err, "Cannot write file");
                    file_written = false;
                    file_error = Some(err);
                }
            }
            ctx.store
                .set(Collection::Documents, write.id.as_str(), write.record.clone())
                .await?;
            let counter = to_json(&CounterRecord {
                bytes: write.record.len() as u64,
            })?;
            ctx.store
                .set(Collection::Counters, write.id.as_str(), counter)
                .await?;
            if file_written {
                self.written
                    .lock()
                    .insert(write.id.clone(), write.last_modified);
            }
        }

        ctx.store
            .set(Collection::Config, MAIN_KEY, plan.config.clone())
            .await?;
        if let Some(window) = &plan.window {
            ctx.store
                .set(Collection::Window, MAIN_KEY, window.clone())
                .await?;
        }
        ctx.store.set(Collection::Meta, MAIN_KEY, meta).await?;

        for (key, _) in ctx.store.list(Collection::Documents).await? {
            if plan.keep.contains(&key) {
                continue;
            }
            tracing::debug!(id = %key, "Deleting stored document");
            ctx.store.delete(Collection::Documents, &key).await?;
            ctx.store.delete(Collection::Counters, &key).await?;
            self.written.lock().remove(&DocumentId::new(key));
        }

        *self.last_present.lock() = plan.present;
        *self.last_fingerprint.lock() = Some(plan.fingerprint);
        tracing::debug!(sequence, documents = plan.documents.len(), "Persisted session");
        ctx.emit(SessionEvent::Persisted { sequence });
        match file_error {
            Some(err) => Err(err),
            None => Ok(sequence),
        }
    }

    /// Snapshot what needs writing, eliding empty inline documents.
    fn plan(&self) -> Result<WritePlan> {
        let written = self.written.lock().clone();
        self.ctx.write(|s| -> Result<WritePlan> {
            let room = s.collab.room.clone().filter(|_| s.collab.started);
            let elided = |d: &Document| {
                d.is_empty() && !d.is_file_backed() && room.as_ref() != Some(d.id())
            };
            s.files.retain(|d| !elided(d));
            let active_kept = !elided(&s.active);

            let mut documents = Vec::new();
            let mut present = HashSet::new();
            let kept = s
                .files
                .iter()
                .chain(std::iter::once(&s.active).filter(|_| active_kept));
            for doc in kept {
                present.insert(doc.id().clone());
                if written.get(doc.id()) == Some(&doc.last_modified) {
                    continue;
                }
                let record = DocumentRecord::from_document(doc)?;
                documents.push(DocumentWrite {
                    id: doc.id().clone(),
                    record: to_json(&record)?,
                    file: doc.path.clone().map(|p| (p, doc.text())),
                    last_modified: doc.last_modified,
                });
            }

            let meta = MetaRecord {
                active: active_kept.then(|| s.active.id().clone()),
                files: s.files.iter().map(|d| d.id().clone()).collect(),
                room: room.clone(),
                fullscreen: s.fullscreen,
                last_modified: Utc::now(),
                sequence: 0,
            };
            let config = to_json(&s.config)?;
            let window = s.window.as_ref().map(to_json).transpose()?;

            let fingerprint = format!(
                "{:?}|{:?}|{:?}|{}|{}|{}",
                meta.active,
                meta.files,
                meta.room,
                meta.fullscreen,
                String::from_utf8_lossy(&config),
                window
                    .as_deref()
                    .map(String::from_utf8_lossy)
                    .unwrap_or_default(),
            );

            let mut keep: HashSet<String> =
                present.iter().map(|id| id.as_str().to_string()).collect();
            keep.extend(s.rejected.iter().map(|r| r.id.clone()));

            Ok(WritePlan {
                documents,
                config,
                window,
                meta,
                fingerprint,
                present,
                keep,
            })
        })
    }
}

fn to_json<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    serde_json::to_vec(value).map_err(|e| SessionError::StorageError(e.to_string()))
}
