//! Shared fixtures for the integration tests.

#![allow(dead_code)]

use quire_session::{
    Controller, MemoryFiles, MemoryHub, MemoryStore, SessionConfig, SessionConfigBuilder,
    SessionContext,
};
use std::sync::Arc;
use std::time::Duration;

pub struct Fixture {
    pub store: Arc<MemoryStore>,
    pub files: Arc<MemoryFiles>,
    pub hub: MemoryHub,
    pub controller: Controller,
}

impl Fixture {
    pub fn active_text(&self) -> String {
        self.controller.lifecycle.active().text()
    }

    pub fn files_len(&self) -> usize {
        self.controller.state().files.len()
    }

    pub fn ctx(&self) -> &Arc<SessionContext> {
        self.controller.context()
    }
}

pub fn config() -> SessionConfig {
    SessionConfigBuilder::new()
        .save_debounce(10)
        .connect_timeout(200)
        .user_name("Test Owl")
        .build()
}

pub async fn fixture() -> Fixture {
    fixture_with(
        Arc::new(MemoryStore::new()),
        Arc::new(MemoryFiles::new()),
        MemoryHub::new(),
    )
    .await
}

/// A controller over existing collaborators, initialized without arguments.
pub async fn fixture_with(
    store: Arc<MemoryStore>,
    files: Arc<MemoryFiles>,
    hub: MemoryHub,
) -> Fixture {
    let fixture = build(store, files, hub, config());
    fixture.controller.init(None).await;
    fixture
}

/// A controller that has not been initialized yet.
pub fn build(
    store: Arc<MemoryStore>,
    files: Arc<MemoryFiles>,
    hub: MemoryHub,
    config: SessionConfig,
) -> Fixture {
    let ctx = Arc::new(SessionContext::new(
        config,
        store.clone(),
        files.clone(),
        Arc::new(hub.clone()),
    ));
    Fixture {
        store,
        files,
        hub,
        controller: Controller::new(ctx),
    }
}

/// Poll `condition` until it holds or about two seconds pass.
pub async fn eventually(mut condition: impl FnMut() -> bool) -> bool {
    for _ in 0..400 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    condition()
}
