//! The session controller: one object wiring the managers together.

use crate::args::SessionArgs;
use crate::collab::CollabManager;
use crate::document::{DocumentId, DocumentRef};
use crate::error::{Result, SessionError};
use crate::lifecycle::DocumentLifecycle;
use crate::persistence::{RestoreReport, SessionPersistence};
use crate::state::{SessionContext, SessionEvent, SessionState};
use crate::version::VersionManager;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

pub struct Controller {
    ctx: Arc<SessionContext>,
    pub lifecycle: DocumentLifecycle,
    pub collab: Arc<CollabManager>,
    pub versions: VersionManager,
    pub persistence: SessionPersistence,
    watcher: Mutex<Option<JoinHandle<()>>>,
}

impl Controller {
    pub fn new(ctx: Arc<SessionContext>) -> Self {
        let collab = Arc::new(CollabManager::new(ctx.clone()));
        Self {
            lifecycle: DocumentLifecycle::new(ctx.clone(), collab.clone()),
            versions: VersionManager::new(ctx.clone(), collab.clone()),
            persistence: SessionPersistence::new(ctx.clone()),
            collab,
            watcher: Mutex::new(None),
            ctx,
        }
    }

    pub fn context(&self) -> &Arc<SessionContext> {
        &self.ctx
    }

    /// Restore the persisted session, resume sharing, apply launch
    /// arguments and start writing changes back.
    pub async fn init(&self, args: Option<SessionArgs>) -> RestoreReport {
        let report = self.persistence.restore().await;

        if let Some(room) = report.room.clone() {
            if self.ctx.config.resume_collab && args.as_ref().map_or(true, |a| a.room.is_none()) {
                if let Err(err) = self.collab.start_collab(Some(room)).await {
                    tracing::warn!(error = %err, "Cannot resume collaboration");
                }
            }
        }

        if let Some(args) = args.filter(|a| !a.is_empty()) {
            if let Err(err) = self.handle_args(args).await {
                tracing::warn!(error = %err, "Cannot apply launch arguments");
                self.ctx.write(|s| s.error = Some(err.clone()));
                self.ctx.emit(SessionEvent::Error(err));
            }
        }

        let mut watcher = self.watcher.lock();
        if watcher.is_none() {
            *watcher = Some(self.persistence.watch());
        }
        report
    }

    /// Act on launch or deep-link arguments: open a file, start from text,
    /// then join a room.
    pub async fn handle_args(&self, args: SessionArgs) -> Result<()> {
        tracing::debug!(?args, "Handling arguments");
        if let Some(file) = args.file {
            self.lifecycle
                .open_document(DocumentRef::path(file))
                .await?;
        }
        if let Some(text) = args.text {
            self.lifecycle
                .open_document(DocumentRef::text(text))
                .await?;
        }
        if let Some(room) = args.room {
            let room = DocumentId::new(room);
            if !room.is_valid() {
                return Err(SessionError::InvalidState(format!("invalid room id {room}")));
            }
            if self.ctx.read(|s| s.is_replicating(&room)) {
                return Ok(());
            }
            self.collab.stop_collab().await?;
            if self.ctx.read(|s| s.position_by_id(&room).is_some()) {
                self.lifecycle.open_document(DocumentRef::id(room.clone())).await?;
            }
            self.collab.start_collab(Some(room)).await?;
        }
        Ok(())
    }

    pub fn state(&self) -> SessionState {
        self.ctx.snapshot()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.ctx.subscribe()
    }

    /// Write pending changes and leave any room.
    pub async fn shutdown(&self) -> Result<()> {
        if let Some(watcher) = self.watcher.lock().take() {
            watcher.abort();
        }
        self.persistence.flush().await;
        self.collab.stop_collab().await?;
        self.persistence.persist().await?;
        Ok(())
    }
}
