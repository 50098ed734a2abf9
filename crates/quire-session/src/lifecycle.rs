//! Creating, opening, discarding and editing documents.

use crate::collab::CollabManager;
use crate::config::{ConfigPatch, EditorConfig};
use crate::document::{Document, DocumentId, DocumentRef, SurfaceHandle};
use crate::error::{Result, SessionError};
use crate::state::{LoadingState, SessionContext, SessionEvent, SessionState, WindowPlacement};
use chrono::Utc;
use quire_crdt::{DeltaCRDT, DocContent};
use std::path::{Path, PathBuf};
use std::sync::Arc;

enum Incoming {
    Located(DocumentId),
    Fresh(Document),
}

enum Discarded {
    /// The active document left the session; another one took its place.
    Replaced { old: DocumentId, new: DocumentId },
    /// The active document was emptied in place.
    Cleared(DocumentId),
}

pub struct DocumentLifecycle {
    ctx: Arc<SessionContext>,
    collab: Arc<CollabManager>,
}

impl DocumentLifecycle {
    pub fn new(ctx: Arc<SessionContext>, collab: Arc<CollabManager>) -> Self {
        Self { ctx, collab }
    }

    /// Make a fresh empty document active, keeping the current one in
    /// `files`. A no-op when the active document is already empty and not
    /// file backed.
    pub async fn new_document(&self) -> Result<DocumentId> {
        let (id, displaced) = self.ctx.write(|s| {
            if s.active.is_empty() && !s.active.is_file_backed() {
                return (s.active.id().clone(), None);
            }
            let displaced = std::mem::replace(&mut s.active, self.ctx.blank_document());
            let displaced_id = displaced.id().clone();
            s.files.insert(0, displaced);
            s.error = None;
            s.preview = None;
            (s.active.id().clone(), Some(displaced_id))
        });

        if let Some(old) = displaced {
            tracing::debug!(id = %id, previous = %old, "New document");
            self.collab.stop_if_replicating(&old).await?;
            self.ctx.emit(SessionEvent::DocumentOpened(id.clone()));
        }
        Ok(id)
    }

    /// Activate a document by id, path or inline text.
    ///
    /// Known documents are taken out of `files` with their timestamps kept;
    /// unknown paths are loaded from disk. On failure the session is left
    /// unchanged.
    pub async fn open_document(&self, target: DocumentRef) -> Result<Document> {
        if target.is_empty() {
            return Err(SessionError::NotFound("empty document reference".to_string()));
        }

        let already_active = self.ctx.read(|s| {
            target.id.as_ref() == Some(s.active.id())
                || (target.path.is_some() && target.path.as_deref() == s.active.path())
        });
        if already_active {
            return Ok(self.ctx.read(|s| s.active.clone()));
        }

        let located = self.ctx.read(|s| {
            let index = target
                .id
                .as_ref()
                .and_then(|id| s.position_by_id(id))
                .or_else(|| target.path.as_deref().and_then(|p| s.position_by_path(p)))?;
            let doc = &s.files[index];
            Some((doc.id().clone(), doc.path.clone()))
        });

        let (incoming, file_text) = match located {
            Some((id, path)) => {
                // File-backed documents are refreshed from disk when present.
                let text = match path {
                    Some(path) if self.ctx.files.exists(&path).await => {
                        Some(self.ctx.files.read(&path).await?)
                    }
                    _ => None,
                };
                (Incoming::Located(id), text)
            }
            None => (Incoming::Fresh(self.load(&target).await?), None),
        };

        let (active, displaced) = self.ctx.write(|s| -> Result<_> {
            let mut doc = match incoming {
                Incoming::Located(id) => {
                    let index = s
                        .position_by_id(&id)
                        .ok_or_else(|| SessionError::NotFound(id.to_string()))?;
                    s.files.remove(index)
                }
                Incoming::Fresh(doc) => doc,
            };
            if let Some(text) = &file_text {
                if doc.content.replace_text(text) {
                    let _ = doc.content.split_delta();
                }
            }

            let displaced = std::mem::replace(&mut s.active, doc);
            let displaced_id = displaced.id().clone();
            if !displaced.is_empty()
                || displaced.is_file_backed()
                || s.is_replicating(&displaced_id)
            {
                s.files.insert(0, displaced);
            }
            s.error = None;
            s.preview = None;
            Ok((s.active.clone(), displaced_id))
        })?;

        tracing::debug!(id = %active.id(), "Opened document");
        self.collab.stop_if_replicating(&displaced).await?;
        self.collab.drain_pending();
        self.ctx.emit(SessionEvent::DocumentOpened(active.id().clone()));
        Ok(active)
    }

    async fn load(&self, target: &DocumentRef) -> Result<Document> {
        let replica = self.ctx.replica_id();
        if let Some(path) = &target.path {
            let text = self.ctx.files.read(path).await?;
            let modified = self
                .ctx
                .files
                .last_modified(path)
                .await
                .unwrap_or_else(|_| Utc::now());
            let mut doc = Document::new(DocumentId::generate(), DocContent::with_text(replica, &text))
                .with_path(path.clone());
            doc.markdown = target.markdown.unwrap_or_else(|| is_markdown_path(path));
            doc.last_modified = modified;
            return Ok(doc);
        }
        if let Some(text) = &target.text {
            let mut doc = Document::new(
                target.id.clone().unwrap_or_else(DocumentId::generate),
                DocContent::with_text(replica, text),
            );
            doc.markdown = target.markdown.unwrap_or(false);
            return Ok(doc);
        }
        Err(SessionError::NotFound(
            target
                .id
                .as_ref()
                .map(ToString::to_string)
                .unwrap_or_default(),
        ))
    }

    /// Discard the active document.
    ///
    /// File-backed documents are deactivated (the file keeps the content).
    /// An empty inline document gives way to the most recent file. Anything
    /// else is cleared in place.
    pub async fn discard(&self) -> Result<()> {
        let outcome = self.ctx.write(|s| {
            s.preview = None;
            if s.active.is_file_backed() || (s.active.is_empty() && !s.files.is_empty()) {
                let next = if s.files.is_empty() {
                    self.ctx.blank_document()
                } else {
                    s.files.remove(0)
                };
                let old = std::mem::replace(&mut s.active, next);
                Discarded::Replaced {
                    old: old.id().clone(),
                    new: s.active.id().clone(),
                }
            } else {
                s.active.content.clear();
                s.active.touch();
                Discarded::Cleared(s.active.id().clone())
            }
        });

        match outcome {
            Discarded::Replaced { old, new } => {
                tracing::debug!(discarded = %old, active = %new, "Discarded document");
                self.collab.stop_if_replicating(&old).await?;
                self.ctx.emit(SessionEvent::DocumentDiscarded(old));
                self.ctx.emit(SessionEvent::DocumentOpened(new));
            }
            Discarded::Cleared(id) => {
                self.collab.commit(&id).await;
                self.ctx.emit(SessionEvent::DocumentChanged(id));
            }
        }
        Ok(())
    }

    /// Reset to a single empty document. Keeps fullscreen and window
    /// placement, and resumes persistence if a restore had suspended it.
    pub async fn clean(&self) -> Result<()> {
        self.collab.stop_collab().await?;
        self.ctx.write(|s| {
            let mut fresh = SessionState::new(self.ctx.blank_document());
            fresh.fullscreen = s.fullscreen;
            fresh.window = s.window;
            fresh.loading = LoadingState::Ready;
            *s = fresh;
        });
        self.ctx.resume_persistence();
        tracing::info!("Session cleaned");
        self.ctx.emit(SessionEvent::StateChanged);
        Ok(())
    }

    /// Apply a local edit to the active document.
    pub async fn edit_active<R>(&self, edit: impl FnOnce(&mut DocContent) -> R) -> R {
        let (id, result) = self.ctx.write(|s| {
            let result = edit(&mut s.active.content);
            s.active.touch();
            (s.active.id().clone(), result)
        });
        self.collab.commit(&id).await;
        self.ctx.emit(SessionEvent::DocumentChanged(id));
        result
    }

    pub async fn insert_text(&self, position: usize, text: &str) {
        self.edit_active(|c| c.insert(position, text)).await
    }

    pub async fn delete_text(&self, start: usize, length: usize) {
        self.edit_active(|c| c.delete(start, length)).await
    }

    /// Replace the active text through a minimal forward edit.
    pub async fn set_text(&self, text: &str) -> bool {
        self.edit_active(|c| c.replace_text(text)).await
    }

    /// Flip markdown mode of the active document. Leaving markdown strips
    /// trailing whitespace from every line.
    pub async fn toggle_markdown(&self) -> bool {
        let (id, markdown) = self.ctx.write(|s| {
            let doc = &mut s.active;
            doc.markdown = !doc.markdown;
            if !doc.markdown {
                let text = doc.content.text();
                let normalized: Vec<&str> = text.split('\n').map(str::trim_end).collect();
                doc.content.replace_text(&normalized.join("\n"));
            }
            doc.touch();
            (doc.id().clone(), doc.markdown)
        });
        self.collab.commit(&id).await;
        self.ctx.emit(SessionEvent::DocumentChanged(id));
        markdown
    }

    /// Bind the active document to a file. Shared documents cannot be.
    pub fn update_path(&self, path: impl Into<PathBuf>) -> Result<()> {
        let path = path.into();
        let id = self.ctx.write(|s| {
            if s.is_replicating(s.active.id()) {
                return Err(SessionError::InvalidState(
                    "a shared document cannot be file backed".to_string(),
                ));
            }
            s.active.path = Some(path);
            s.active.touch();
            Ok(s.active.id().clone())
        })?;
        self.ctx.emit(SessionEvent::DocumentChanged(id));
        Ok(())
    }

    pub fn update_config(&self, patch: &ConfigPatch) -> Result<EditorConfig> {
        let config = self.ctx.write(|s| -> Result<EditorConfig> {
            s.config = s.config.merged(patch)?;
            Ok(s.config.clone())
        })?;
        self.ctx.emit(SessionEvent::StateChanged);
        Ok(config)
    }

    pub fn set_fullscreen(&self, fullscreen: bool) {
        self.ctx.write(|s| s.fullscreen = fullscreen);
        self.ctx.emit(SessionEvent::StateChanged);
    }

    /// Record the window placement. Returns false if it was ignored.
    pub fn update_window(&self, placement: WindowPlacement) -> bool {
        if !placement.is_plausible() {
            return false;
        }
        self.ctx.write(|s| s.window = Some(placement));
        self.ctx.emit(SessionEvent::StateChanged);
        true
    }

    /// Acknowledge the current error and resume persistence.
    pub fn dismiss_error(&self) {
        self.ctx.write(|s| s.error = None);
        self.ctx.resume_persistence();
        self.ctx.emit(SessionEvent::StateChanged);
    }

    pub fn attach_surface(&self, surface: SurfaceHandle) -> DocumentId {
        self.ctx.write(|s| {
            for doc in s.files.iter_mut().filter(|d| d.surface == Some(surface)) {
                doc.surface = None;
            }
            s.active.surface = Some(surface);
            s.active.id().clone()
        })
    }

    /// The document an editor surface is rendering.
    pub fn document_for_surface(&self, surface: SurfaceHandle) -> Option<DocumentId> {
        self.ctx.read(|s| {
            s.documents()
                .find(|d| d.surface == Some(surface))
                .map(|d| d.id().clone())
        })
    }

    pub fn document(&self, id: &DocumentId) -> Option<Document> {
        self.ctx.read(|s| s.document(id).cloned())
    }

    pub fn active(&self) -> Document {
        self.ctx.read(|s| s.active.clone())
    }
}

fn is_markdown_path(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("md" | "markdown")
    )
}
