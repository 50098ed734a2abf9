//! Version history of the active document.

use crate::collab::CollabManager;
use crate::error::{Result, SessionError};
use crate::state::{Preview, SessionContext, SessionEvent};
use chrono::Utc;
use quire_crdt::{Version, VersionId};
use std::sync::Arc;

pub struct VersionManager {
    ctx: Arc<SessionContext>,
    collab: Arc<CollabManager>,
}

impl VersionManager {
    pub fn new(ctx: Arc<SessionContext>, collab: Arc<CollabManager>) -> Self {
        Self { ctx, collab }
    }

    /// Snapshot the active text into its version log.
    pub async fn add_version(&self) -> Result<Version> {
        let (id, version) = self.ctx.write(|s| -> Result<_> {
            let doc = &mut s.active;
            let version = doc
                .content
                .add_version(Utc::now())
                .map_err(|e| SessionError::invalid_document(doc.id().as_str(), e))?;
            doc.touch();
            Ok((doc.id().clone(), version))
        })?;

        tracing::debug!(document = %id, lamport = version.id.lamport, "Added version");
        self.collab.commit(&id).await;
        self.ctx.emit(SessionEvent::VersionAdded(id));
        Ok(version)
    }

    /// Versions of the active document, oldest first.
    pub fn versions(&self) -> Vec<Version> {
        self.ctx
            .read(|s| s.active.content.versions().iter().cloned().collect())
    }

    pub fn latest_version(&self) -> Option<Version> {
        self.ctx
            .read(|s| s.active.content.versions().latest().cloned())
    }

    /// Show a version in place of the live text. Nothing is modified.
    pub fn render_version(&self, version: &VersionId) -> Result<String> {
        let text = self.ctx.write(|s| -> Result<String> {
            let doc = &s.active;
            let found = doc
                .content
                .versions()
                .get(version)
                .ok_or_else(|| SessionError::NotFound(format!("version {}", version.lamport)))?;
            let text = found
                .text()
                .map_err(|e| SessionError::invalid_document(doc.id().as_str(), e))?;
            s.preview = Some(Preview {
                document: doc.id().clone(),
                version: version.clone(),
                text: text.clone(),
            });
            Ok(text)
        })?;
        self.ctx.emit(SessionEvent::StateChanged);
        Ok(text)
    }

    /// Leave the preview and return the live text.
    pub fn unrender_version(&self) -> String {
        let text = self.ctx.write(|s| {
            s.preview = None;
            s.active.text()
        });
        self.ctx.emit(SessionEvent::StateChanged);
        text
    }

    /// The version being previewed, if it belongs to the active document.
    pub fn preview(&self) -> Option<Preview> {
        self.ctx.read(|s| {
            s.preview
                .clone()
                .filter(|p| &p.document == s.active.id())
        })
    }

    /// Restore a version as a forward edit on the live text.
    ///
    /// Earlier versions stay in the log, and peers see an ordinary edit.
    pub async fn apply_version(&self, version: &VersionId) -> Result<bool> {
        let (id, changed) = self.ctx.write(|s| -> Result<_> {
            let doc = &mut s.active;
            let found = doc
                .content
                .versions()
                .get(version)
                .cloned()
                .ok_or_else(|| SessionError::NotFound(format!("version {}", version.lamport)))?;
            let changed = doc
                .content
                .restore_version(&found)
                .map_err(|e| SessionError::invalid_document(doc.id().as_str(), e))?;
            if changed {
                doc.touch();
            }
            let id = doc.id().clone();
            s.preview = None;
            Ok((id, changed))
        })?;

        tracing::debug!(document = %id, changed, "Applied version");
        if changed {
            self.collab.commit(&id).await;
            self.ctx.emit(SessionEvent::DocumentChanged(id));
        } else {
            self.ctx.emit(SessionEvent::StateChanged);
        }
        Ok(changed)
    }
}
