mod common;

use common::{build, config, eventually, fixture, fixture_with};
use quire_session::{
    ChannelRegistry, CollabPhase, Controller, DocumentId, DocumentRef, MemoryFiles, MemoryHub,
    MemoryStore, SessionArgs, SessionConfigBuilder, SessionContext, SessionError,
};
use std::sync::Arc;

async fn peer(hub: &MemoryHub) -> common::Fixture {
    fixture_with(
        Arc::new(MemoryStore::new()),
        Arc::new(MemoryFiles::new()),
        hub.clone(),
    )
    .await
}

#[tokio::test]
async fn test_sharing_non_empty_document_keeps_one_backup() {
    let f = fixture().await;
    f.controller.lifecycle.insert_text(0, "private draft").await;
    let original = f.controller.lifecycle.active().id().clone();

    let status = f.controller.collab.start_collab(None).await.unwrap();
    assert!(status.started);
    assert!(status.connected);
    assert_eq!(status.phase, CollabPhase::Shared);

    let state = f.controller.state();
    assert_eq!(state.files.len(), 1);
    assert_eq!(state.files[0].id(), &original);
    assert_eq!(state.files[0].text(), "private draft");
    assert_eq!(state.active.text(), "private draft");
    assert_eq!(state.collab.room.as_ref(), Some(state.active.id()));
    assert_ne!(state.active.id(), &original);
}

#[tokio::test]
async fn test_sharing_empty_document_adds_no_backup() {
    let f = fixture().await;
    let id = f.controller.lifecycle.active().id().clone();

    let status = f.controller.collab.start_collab(None).await.unwrap();
    assert_eq!(status.room, Some(id));
    assert_eq!(f.files_len(), 0);
}

#[tokio::test]
async fn test_start_is_noop_when_started() {
    let f = fixture().await;
    f.controller.lifecycle.insert_text(0, "x").await;
    let first = f.controller.collab.start_collab(None).await.unwrap();
    let second = f.controller.collab.start_collab(None).await.unwrap();
    assert_eq!(first.room, second.room);
    assert_eq!(f.files_len(), 1);
}

#[tokio::test]
async fn test_two_peers_converge() {
    let hub = MemoryHub::new();
    let a = peer(&hub).await;
    let b = peer(&hub).await;

    let room = a.controller.collab.start_collab(None).await.unwrap().room.unwrap();
    b.controller
        .handle_args(SessionArgs {
            room: Some(room.to_string()),
            ..Default::default()
        })
        .await
        .unwrap();
    assert!(eventually(|| a.controller.collab.status().peer_count == 2).await);

    a.controller.lifecycle.insert_text(0, "x").await;
    b.controller.lifecycle.insert_text(0, "y").await;

    assert!(eventually(|| a.active_text().len() == 2 && b.active_text().len() == 2).await);
    assert_eq!(a.active_text(), b.active_text());
    assert!(a.active_text().contains('x'));
    assert!(a.active_text().contains('y'));
    assert_eq!(b.controller.state().collab.peers.len(), 2);
}

#[tokio::test]
async fn test_joining_existing_room_does_not_fork() {
    let hub = MemoryHub::new();
    let a = peer(&hub).await;
    a.controller.lifecycle.insert_text(0, "shared text").await;
    let room = a.controller.collab.start_collab(None).await.unwrap().room.unwrap();

    let b = peer(&hub).await;
    b.controller
        .handle_args(SessionArgs::parse(
            &format!("quire://open?room={room}"),
            std::path::Path::new("/"),
        ))
        .await
        .unwrap();

    assert_eq!(b.files_len(), 0);
    assert_eq!(b.controller.lifecycle.active().id(), &room);
    assert!(eventually(|| b.active_text() == "shared text").await);
}

#[tokio::test]
async fn test_join_keeps_local_content_as_backup() {
    let hub = MemoryHub::new();
    let a = peer(&hub).await;
    a.controller.lifecycle.insert_text(0, "theirs").await;
    let room = a.controller.collab.start_collab(None).await.unwrap().room.unwrap();

    let b = peer(&hub).await;
    b.controller.lifecycle.insert_text(0, "mine").await;
    b.controller.collab.start_collab(Some(room)).await.unwrap();

    assert!(eventually(|| b.active_text() == "theirs").await);
    let state = b.controller.state();
    assert_eq!(state.files.len(), 1);
    assert_eq!(state.files[0].text(), "mine");
}

#[tokio::test]
async fn test_stop_then_start_keeps_offline_edits() {
    let f = fixture().await;
    f.controller.lifecycle.insert_text(0, "online").await;
    f.controller.collab.start_collab(None).await.unwrap();
    let room = f.controller.collab.status().room.unwrap();

    f.controller.collab.stop_collab().await.unwrap();
    let at_stop = f.active_text();
    assert!(!f.controller.collab.status().started);
    assert_eq!(f.controller.lifecycle.active().id(), &room);

    f.controller.lifecycle.insert_text(at_stop.len(), " offline").await;
    let status = f.controller.collab.start_collab(None).await.unwrap();
    assert_eq!(status.room, Some(room.clone()));
    assert_eq!(f.files_len(), 1, "restarting a shared document does not fork again");
    assert_eq!(f.active_text(), "online offline");

    // A fresh peer sees the offline edit through the room.
    let g = peer(&f.hub).await;
    g.controller.collab.start_collab(Some(room)).await.unwrap();
    assert!(eventually(|| g.active_text() == "online offline").await);
}

#[tokio::test]
async fn test_connection_refused_keeps_session_started() {
    let f = fixture().await;
    f.hub.refuse_connections(true);
    f.controller.lifecycle.insert_text(0, "draft").await;

    let status = f.controller.collab.start_collab(None).await.unwrap();
    assert!(status.started);
    assert!(!status.connected);
    assert!(matches!(status.error, Some(SessionError::ReplicationError(_))));

    // Local editing continues while disconnected.
    f.controller.lifecycle.insert_text(5, "!").await;
    assert_eq!(f.active_text(), "draft!");

    f.hub.refuse_connections(false);
    let status = f.controller.collab.reconnect().await.unwrap();
    assert!(status.connected);
    assert!(status.error.is_none());

    let g = peer(&f.hub).await;
    g.controller.collab.start_collab(status.room).await.unwrap();
    assert!(eventually(|| g.active_text() == "draft!").await);
}

#[tokio::test]
async fn test_connect_timeout_sets_error() {
    let hub = MemoryHub::new();
    hub.stall_connections(true);
    let config = SessionConfigBuilder::new()
        .connect_timeout(30)
        .user_name("Slow Seal")
        .build();
    let f = build(
        Arc::new(MemoryStore::new()),
        Arc::new(MemoryFiles::new()),
        hub,
        config,
    );
    f.controller.init(None).await;

    let status = f.controller.collab.start_collab(None).await.unwrap();
    assert!(status.started);
    assert!(!status.connected);
    match status.error {
        Some(SessionError::ReplicationError(reason)) => assert!(reason.contains("timed out")),
        other => panic!("unexpected error {other:?}"),
    }
}

#[tokio::test]
async fn test_connection_loss_freezes_roster_and_keeps_edits() {
    let hub = MemoryHub::new();
    let a = peer(&hub).await;
    let b = peer(&hub).await;
    let room = a.controller.collab.start_collab(None).await.unwrap().room;
    b.controller.collab.start_collab(room.clone()).await.unwrap();
    assert!(eventually(|| a.controller.collab.status().peer_count == 2).await);

    hub.drop_connections("relay restarted");
    assert!(eventually(|| !a.controller.collab.status().connected).await);
    let status = a.controller.collab.status();
    assert!(status.started);
    assert_eq!(status.peer_count, 2);
    assert!(matches!(status.error, Some(SessionError::ReplicationError(_))));

    a.controller.lifecycle.insert_text(0, "offline").await;
    a.controller.collab.reconnect().await.unwrap();
    b.controller.collab.reconnect().await.unwrap();
    assert!(eventually(|| b.active_text() == "offline").await);

    // Stopping after a drop keeps the error for display.
    hub.drop_connections("again");
    assert!(eventually(|| !a.controller.collab.status().connected).await);
    a.controller.collab.stop_collab().await.unwrap();
    let status = a.controller.collab.status();
    assert!(!status.started);
    assert!(status.error.is_some());
}

#[tokio::test]
async fn test_stop_targets_document_captured_at_invocation() {
    let f = fixture().await;
    f.controller.lifecycle.insert_text(0, "shared").await;
    f.controller.collab.start_collab(None).await.unwrap();
    let room = f.controller.collab.status().room.unwrap();

    // Switching documents stops sharing the displaced one.
    f.controller
        .lifecycle
        .open_document(DocumentRef::text("other"))
        .await
        .unwrap();
    assert!(!f.controller.collab.status().started);
    assert_eq!(f.active_text(), "other");

    let shared = f.controller.lifecycle.document(&room).unwrap();
    assert_eq!(shared.text(), "shared");
    assert_eq!(f.hub.members(&room), 0);
}

#[tokio::test]
async fn test_new_document_stops_sharing() {
    let f = fixture().await;
    f.controller.lifecycle.insert_text(0, "x").await;
    f.controller.collab.start_collab(None).await.unwrap();
    f.controller.lifecycle.new_document().await.unwrap();
    assert!(!f.controller.collab.status().started);
    assert_eq!(f.files_len(), 2);
}

#[tokio::test]
async fn test_shared_document_cannot_take_a_path() {
    let f = fixture().await;
    f.controller.collab.start_collab(None).await.unwrap();
    let result = f.controller.lifecycle.update_path("/tmp/x.md");
    assert!(matches!(result, Err(SessionError::InvalidState(_))));
}

#[tokio::test]
async fn test_previously_shared_document_with_path_forks_when_shared_again() {
    let f = fixture().await;
    f.controller.lifecycle.insert_text(0, "notes").await;
    f.controller.collab.start_collab(None).await.unwrap();
    f.controller.collab.stop_collab().await.unwrap();
    let before = f.controller.lifecycle.active().id().clone();
    f.controller.lifecycle.update_path("/tmp/x.md").unwrap();

    let status = f.controller.collab.start_collab(None).await.unwrap();
    let state = f.controller.state();
    assert_ne!(status.room.as_ref(), Some(&before));
    assert_eq!(status.room.as_ref(), Some(state.active.id()));
    assert!(state.active.path().is_none());
    assert_eq!(state.active.text(), "notes");
    assert!(state
        .files
        .iter()
        .any(|d| d.id() == &before && d.path().is_some()));
}

#[tokio::test]
async fn test_sharing_file_backed_document_detaches_path() {
    let f = fixture().await;
    f.files.put("/tmp/a.md", "from disk");
    f.controller
        .lifecycle
        .open_document(DocumentRef::path("/tmp/a.md"))
        .await
        .unwrap();

    f.controller.collab.start_collab(None).await.unwrap();
    let state = f.controller.state();
    assert!(state.active.path().is_none());
    assert_eq!(state.active.text(), "from disk");
    assert_eq!(state.files.len(), 1);
    assert!(state.files[0].path().is_some());
}

#[tokio::test]
async fn test_one_channel_per_document_in_process() {
    let hub = MemoryHub::new();
    let registry = ChannelRegistry::new();
    let make = || {
        Controller::new(Arc::new(SessionContext::with_registry(
            config(),
            Arc::new(MemoryStore::new()),
            Arc::new(MemoryFiles::new()),
            Arc::new(hub.clone()),
            registry.clone(),
        )))
    };
    let a = make();
    let b = make();
    a.init(None).await;
    b.init(None).await;

    let room = a.collab.start_collab(None).await.unwrap().room.unwrap();
    let result = b.collab.start_collab(Some(room.clone())).await;
    assert!(matches!(result, Err(SessionError::Busy(_))));
    assert!(!b.collab.status().started);

    a.collab.stop_collab().await.unwrap();
    assert!(b.collab.start_collab(Some(room)).await.unwrap().started);
}

#[tokio::test]
async fn test_share_links() {
    let f = fixture().await;
    assert!(f.controller.collab.share_link().is_none());
    let room = f.controller.collab.start_collab(None).await.unwrap().room.unwrap();
    let links = f.controller.collab.share_link().unwrap();
    assert_eq!(links.web, format!("https://quire.app/{room}"));
    assert_eq!(links.app, format!("quire://open?room={room}"));

    let parsed = SessionArgs::parse(&links.app, std::path::Path::new("/"));
    assert_eq!(parsed.room.map(DocumentId::new), Some(room));
}

#[tokio::test]
async fn test_invalid_room_is_rejected() {
    let f = fixture().await;
    let result = f
        .controller
        .collab
        .start_collab(Some(DocumentId::new("../../etc")))
        .await;
    assert!(matches!(result, Err(SessionError::InvalidState(_))));
    assert!(!f.controller.collab.status().started);
}
