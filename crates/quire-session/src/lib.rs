//! # Quire Session
//!
//! The document session controller of the Quire editor: which document is
//! active, which are kept in the background, whether the active one is
//! shared with peers, its version history, and how all of it survives a
//! restart.
//!
//! Collaborators are injected: a [`LocalStore`] for persistence, a
//! [`FileIo`] for file-backed documents and a [`ReplicationProvider`] for
//! rooms. In-memory versions of each ship with the crate.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use quire_session::{
//!     Controller, MemoryFiles, MemoryHub, MemoryStore, SessionConfig, SessionContext,
//! };
//! use std::sync::Arc;
//!
//! # async fn example() -> quire_session::Result<()> {
//! let ctx = Arc::new(SessionContext::new(
//!     SessionConfig::default(),
//!     Arc::new(MemoryStore::new()),
//!     Arc::new(MemoryFiles::new()),
//!     Arc::new(MemoryHub::new()),
//! ));
//! let controller = Controller::new(ctx);
//! controller.init(None).await;
//!
//! controller.lifecycle.insert_text(0, "hello").await;
//! controller.versions.add_version().await?;
//! controller.collab.start_collab(None).await?;
//! # Ok(())
//! # }
//! ```

pub mod args;
pub mod collab;
pub mod config;
pub mod controller;
pub mod document;
pub mod error;
pub mod files;
pub mod lifecycle;
pub mod persistence;
pub mod replication;
pub mod schedule;
pub mod state;
pub mod store;
pub mod version;

pub use args::SessionArgs;
pub use collab::{CollabManager, ShareLinks};
pub use config::{ConfigPatch, EditorConfig, SessionConfig, SessionConfigBuilder};
pub use controller::Controller;
pub use document::{Document, DocumentId, DocumentRef, SurfaceHandle};
pub use error::{Result, SessionError};
pub use files::{FileIo, FsFiles, MemoryFiles};
pub use lifecycle::DocumentLifecycle;
pub use persistence::{DocumentRecord, MetaRecord, RestoreReport, SessionPersistence};
pub use replication::{
    ChannelEvent, ChannelRegistry, MemoryHub, Peer, PeerId, ReplicationChannel, ReplicationProvider,
};
pub use state::{
    CollabPhase, CollabStatus, LoadingState, Preview, SessionContext, SessionEvent, SessionState,
    WindowPlacement,
};
pub use store::{Collection, DirStore, LocalStore, MemoryStore};
pub use version::VersionManager;

pub use quire_crdt::{DocContent, Version, VersionId};
