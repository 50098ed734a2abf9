mod common;

use common::{build, config, fixture_with, Fixture};
use quire_session::{
    Collection, DocumentRef, LoadingState, MemoryFiles, MemoryHub, MemoryStore, MetaRecord,
    SessionError, WindowPlacement,
};
use std::sync::Arc;

struct Backend {
    store: Arc<MemoryStore>,
    files: Arc<MemoryFiles>,
    hub: MemoryHub,
}

impl Backend {
    fn new() -> Self {
        Self {
            store: Arc::new(MemoryStore::new()),
            files: Arc::new(MemoryFiles::new()),
            hub: MemoryHub::new(),
        }
    }

    async fn session(&self) -> Fixture {
        fixture_with(self.store.clone(), self.files.clone(), self.hub.clone()).await
    }
}

#[tokio::test]
async fn test_restart_restores_documents_and_active() {
    let backend = Backend::new();
    let f = backend.session().await;
    f.controller.lifecycle.insert_text(0, "older").await;
    f.controller.lifecycle.new_document().await.unwrap();
    f.controller.lifecycle.insert_text(0, "current").await;
    f.controller.versions.add_version().await.unwrap();
    f.controller.lifecycle.set_fullscreen(true);
    let active_id = f.controller.lifecycle.active().id().clone();
    f.controller.persistence.flush().await;
    drop(f);

    let g = backend.session().await;
    let state = g.controller.state();
    assert_eq!(state.loading, LoadingState::Ready);
    assert_eq!(state.active.id(), &active_id);
    assert_eq!(state.active.text(), "current");
    assert_eq!(state.active.content().versions().len(), 1);
    assert_eq!(state.files.len(), 1);
    assert_eq!(state.files[0].text(), "older");
    assert!(state.fullscreen);
    assert!(state.error.is_none());
}

#[tokio::test]
async fn test_documents_are_written_before_meta() {
    let backend = Backend::new();
    let f = backend.session().await;
    f.controller.lifecycle.insert_text(0, "content").await;
    f.controller.persistence.flush().await;

    let log = backend.store.write_log();
    let first_meta = log
        .iter()
        .position(|(c, _)| *c == Collection::Meta)
        .expect("meta written");
    let id = f.controller.lifecycle.active().id().to_string();
    let document = log
        .iter()
        .position(|(c, key)| *c == Collection::Documents && *key == id)
        .expect("document written");
    assert!(document < first_meta);
}

#[tokio::test]
async fn test_unchanged_documents_are_not_rewritten() {
    let backend = Backend::new();
    let f = backend.session().await;
    f.controller.lifecycle.insert_text(0, "a").await;
    f.controller.persistence.flush().await;
    let sequence = f.controller.persistence.sequence();

    backend.store.clear_write_log();
    f.controller.persistence.flush().await;
    assert!(backend.store.write_log().is_empty());
    assert_eq!(f.controller.persistence.sequence(), sequence);

    f.controller.lifecycle.insert_text(1, "b").await;
    f.controller.persistence.flush().await;
    assert!(f.controller.persistence.sequence() > sequence);
}

#[tokio::test]
async fn test_empty_inline_documents_are_elided() {
    let backend = Backend::new();
    let f = backend.session().await;
    f.controller.lifecycle.insert_text(0, "temp").await;
    let id = f.controller.lifecycle.active().id().clone();
    f.controller.persistence.flush().await;
    assert!(backend.store.keys(Collection::Documents).contains(&id.to_string()));

    // Emptied and moved to the background: dropped at the next write.
    f.controller.lifecycle.discard().await.unwrap();
    f.controller
        .lifecycle
        .open_document(DocumentRef::text("next"))
        .await
        .unwrap();
    assert_eq!(f.files_len(), 0);
    f.controller.persistence.flush().await;
    assert!(!backend.store.keys(Collection::Documents).contains(&id.to_string()));
    assert!(!backend.store.keys(Collection::Counters).contains(&id.to_string()));
}

#[tokio::test]
async fn test_emptied_shared_document_is_elided_after_stop() {
    let backend = Backend::new();
    let f = backend.session().await;
    f.controller.lifecycle.insert_text(0, "shared").await;
    f.controller.collab.start_collab(None).await.unwrap();
    let room = f.controller.lifecycle.active().id().clone();
    f.controller.lifecycle.discard().await.unwrap();

    // Still replicating when displaced, so it is kept in files.
    f.controller
        .lifecycle
        .open_document(DocumentRef::text("other"))
        .await
        .unwrap();
    assert!(!f.controller.collab.status().started);
    assert!(f.controller.lifecycle.document(&room).is_some());

    f.controller.persistence.flush().await;
    assert!(f.controller.lifecycle.document(&room).is_none());
    assert!(!backend.store.keys(Collection::Documents).contains(&room.to_string()));
}

#[tokio::test]
async fn test_file_backed_document_writes_file() {
    let backend = Backend::new();
    backend.files.put("/tmp/a.md", "A");
    let f = backend.session().await;
    f.controller
        .lifecycle
        .open_document(DocumentRef::path("/tmp/a.md"))
        .await
        .unwrap();
    f.controller.lifecycle.insert_text(1, "B").await;
    f.controller.persistence.flush().await;
    assert_eq!(backend.files.contents("/tmp/a.md").as_deref(), Some("AB"));

    let record = backend
        .store
        .get_raw(Collection::Documents, f.controller.lifecycle.active().id().as_str())
        .unwrap();
    let value: serde_json::Value = serde_json::from_slice(&record).unwrap();
    assert_eq!(value["kind"], "file");
    assert_eq!(value["path"], "/tmp/a.md");
}

#[tokio::test]
async fn test_restore_rereads_active_file() {
    let backend = Backend::new();
    backend.files.put("/tmp/a.md", "A");
    let f = backend.session().await;
    f.controller
        .lifecycle
        .open_document(DocumentRef::path("/tmp/a.md"))
        .await
        .unwrap();
    f.controller.persistence.flush().await;
    drop(f);

    backend.files.put("/tmp/a.md", "edited elsewhere");
    let g = backend.session().await;
    assert_eq!(g.active_text(), "edited elsewhere");
}

#[tokio::test]
async fn test_file_write_failure_is_non_fatal() {
    let backend = Backend::new();
    backend.files.put("/tmp/a.md", "A");
    let f = backend.session().await;
    f.controller
        .lifecycle
        .open_document(DocumentRef::path("/tmp/a.md"))
        .await
        .unwrap();
    backend.files.deny("/tmp/a.md");
    f.controller.lifecycle.insert_text(1, "!").await;
    f.controller.persistence.flush().await;

    let state = f.controller.state();
    assert!(matches!(
        state.error,
        Some(SessionError::FilePermissionDenied { .. })
    ));
    assert_eq!(state.active.text(), "A!");
    assert_eq!(backend.files.contents("/tmp/a.md").as_deref(), Some("A"));

    f.controller.lifecycle.dismiss_error();
    assert!(f.controller.state().error.is_none());

    // The write is retried without another edit.
    backend.files.allow("/tmp/a.md");
    assert!(
        common::eventually(|| backend.files.contents("/tmp/a.md").as_deref() == Some("A!")).await
    );
}

#[tokio::test]
async fn test_corrupt_meta_falls_back_and_is_not_overwritten() {
    let backend = Backend::new();
    backend.store.insert_raw(Collection::Meta, "main", "{not json");

    let f = backend.session().await;
    let state = f.controller.state();
    assert!(matches!(state.error, Some(SessionError::InvalidState(_))));
    assert_eq!(state.loading, LoadingState::Ready);
    assert!(state.active.is_empty());

    f.controller.lifecycle.insert_text(0, "new work").await;
    f.controller.persistence.flush().await;
    assert_eq!(
        backend.store.get_raw(Collection::Meta, "main").unwrap(),
        b"{not json".to_vec()
    );

    // Acknowledging the error resumes writing.
    f.controller.lifecycle.dismiss_error();
    f.controller.persistence.flush().await;
    let meta: MetaRecord =
        serde_json::from_slice(&backend.store.get_raw(Collection::Meta, "main").unwrap()).unwrap();
    assert_eq!(meta.active.as_ref(), Some(f.controller.lifecycle.active().id()));
}

#[tokio::test]
async fn test_invalid_config_is_fatal_until_clean() {
    let backend = Backend::new();
    backend.store.insert_raw(
        Collection::Config,
        "main",
        r#"{"theme":"light","code_theme":"x","font":"mono","font_size":300,"content_width":800}"#,
    );

    let f = backend.session().await;
    assert!(matches!(
        f.controller.state().error,
        Some(SessionError::InvalidConfig(_))
    ));
    assert!(f.ctx().persistence_suspended());

    f.controller.lifecycle.clean().await.unwrap();
    assert!(!f.ctx().persistence_suspended());
    f.controller.persistence.flush().await;
    let config = backend.store.get_raw(Collection::Config, "main").unwrap();
    let value: serde_json::Value = serde_json::from_slice(&config).unwrap();
    assert_eq!(value["font_size"], 24);
}

#[tokio::test]
async fn test_invalid_document_is_isolated() {
    let backend = Backend::new();
    let f = backend.session().await;
    f.controller.lifecycle.insert_text(0, "good").await;
    f.controller.persistence.flush().await;
    drop(f);

    backend
        .store
        .insert_raw(Collection::Documents, "broken", r#"{"id":"broken","kind":"inline"}"#);
    backend.store.insert_raw(
        Collection::Documents,
        "mismatch",
        r#"{"id":"other","kind":"inline","content":"","last_modified":"2024-01-01T00:00:00Z"}"#,
    );

    let g = backend.session().await;
    let state = g.controller.state();
    assert!(state.error.is_none());
    assert_eq!(state.active.text(), "good");
    assert_eq!(state.rejected.len(), 2);
    assert!(state
        .rejected
        .iter()
        .all(|r| matches!(r.error, SessionError::InvalidDocument { .. })));

    // Rejected records stay in the store for inspection.
    g.controller.lifecycle.insert_text(4, "!").await;
    g.controller.persistence.flush().await;
    assert!(backend.store.keys(Collection::Documents).contains(&"broken".to_string()));
}

#[tokio::test]
async fn test_storage_failure_is_retried() {
    let backend = Backend::new();
    let f = backend.session().await;
    backend.store.fail_writes(true);
    f.controller.lifecycle.insert_text(0, "pending").await;
    f.controller.persistence.flush().await;
    assert!(backend.store.keys(Collection::Documents).is_empty());
    assert!(matches!(
        f.controller.state().error,
        Some(SessionError::StorageError(_))
    ));
    assert!(f.controller.persistence.persist().await.is_err());

    backend.store.fail_writes(false);
    let id = f.controller.lifecycle.active().id().to_string();
    assert!(common::eventually(|| backend.store.keys(Collection::Documents).contains(&id)).await);
}

#[tokio::test]
async fn test_unreadable_store_is_fatal() {
    let backend = Backend::new();
    backend.store.fail_reads(true);
    let f = backend.session().await;
    assert!(matches!(
        f.controller.state().error,
        Some(SessionError::StorageError(_))
    ));
    assert!(f.ctx().persistence_suspended());
}

#[tokio::test]
async fn test_window_and_config_round_trip() {
    let backend = Backend::new();
    let f = backend.session().await;
    let window = WindowPlacement {
        x: 10,
        y: 20,
        width: 1024,
        height: 768,
    };
    f.controller.lifecycle.update_window(window);
    f.controller
        .lifecycle
        .update_config(&quire_session::ConfigPatch {
            theme: Some("dark".into()),
            ..Default::default()
        })
        .unwrap();
    f.controller.persistence.flush().await;
    drop(f);

    let g = backend.session().await;
    let state = g.controller.state();
    assert_eq!(state.window, Some(window));
    assert_eq!(state.config.theme, "dark");
}

#[tokio::test]
async fn test_storage_size_counts_documents() {
    let backend = Backend::new();
    let f = backend.session().await;
    assert_eq!(f.controller.persistence.storage_size().await.unwrap(), 0);
    f.controller.lifecycle.insert_text(0, "some text").await;
    f.controller.persistence.flush().await;
    assert!(f.controller.persistence.storage_size().await.unwrap() > 0);
}

#[tokio::test]
async fn test_restart_resumes_sharing() {
    let backend = Backend::new();
    let f = backend.session().await;
    f.controller.lifecycle.insert_text(0, "team notes").await;
    let room = f.controller.collab.start_collab(None).await.unwrap().room.unwrap();
    f.controller.persistence.flush().await;
    drop(f);

    let g = backend.session().await;
    let status = g.controller.collab.status();
    assert!(status.started);
    assert_eq!(status.room, Some(room));
    assert_eq!(g.files_len(), 1, "no second backup on resume");
}

#[tokio::test]
async fn test_launch_arguments_open_file() {
    let backend = Backend::new();
    backend.files.put("/work/todo.md", "- milk");
    let f = build(
        backend.store.clone(),
        backend.files.clone(),
        backend.hub.clone(),
        config(),
    );
    let args = quire_session::SessionArgs::parse("todo.md", std::path::Path::new("/work"));
    f.controller.init(Some(args)).await;
    assert_eq!(f.active_text(), "- milk");
    assert!(f.controller.lifecycle.active().markdown());
}

#[tokio::test]
async fn test_directory_store_survives_restart() {
    use quire_session::{Controller, DirStore, FsFiles, SessionContext};

    let dir = tempfile::tempdir().unwrap();
    let note = dir.path().join("note.md");
    std::fs::write(&note, "# Title").unwrap();

    let session = || {
        let ctx = SessionContext::new(
            config(),
            Arc::new(DirStore::new(dir.path().join("store"))),
            Arc::new(FsFiles),
            Arc::new(MemoryHub::new()),
        );
        Controller::new(Arc::new(ctx))
    };

    let first = session();
    first.init(None).await;
    first
        .lifecycle
        .open_document(DocumentRef::path(&note))
        .await
        .unwrap();
    first.lifecycle.insert_text(7, "\n\nbody").await;
    first.shutdown().await.unwrap();
    assert_eq!(std::fs::read_to_string(&note).unwrap(), "# Title\n\nbody");
    drop(first);

    let second = session();
    let report = second.init(None).await;
    assert!(report.error.is_none());
    let active = second.lifecycle.active();
    assert_eq!(active.path(), Some(note.as_path()));
    assert_eq!(active.text(), "# Title\n\nbody");
}
