//! Error types for the session controller.

use quire_crdt::CrdtError;
use thiserror::Error;

/// Errors surfaced by the session controller.
///
/// Errors are `Clone` because the session keeps the last one in its state
/// for display until the user dismisses it.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    /// The persisted session failed shape validation.
    #[error("Invalid session state: {0}")]
    InvalidState(String),

    /// A single persisted document failed validation.
    #[error("Invalid document {id}: {reason}")]
    InvalidDocument { id: String, reason: String },

    /// The persisted or requested config failed validation.
    #[error("Invalid config: {0}")]
    InvalidConfig(String),

    /// The local store failed.
    #[error("Storage error: {0}")]
    StorageError(String),

    /// The file collaborator failed.
    #[error("Permission denied for {path}: {reason}")]
    FilePermissionDenied { path: String, reason: String },

    /// Connecting or syncing with the replication provider failed.
    #[error("Replication error: {0}")]
    ReplicationError(String),

    /// Nothing matched an open request.
    #[error("Not found: {0}")]
    NotFound(String),

    /// A replication channel is already open for this document.
    #[error("Replication channel already open for {0}")]
    Busy(String),
}

impl SessionError {
    pub fn invalid_document(id: impl Into<String>, err: CrdtError) -> Self {
        SessionError::InvalidDocument {
            id: id.into(),
            reason: err.to_string(),
        }
    }

    pub fn file(path: &std::path::Path, reason: impl ToString) -> Self {
        SessionError::FilePermissionDenied {
            path: path.display().to_string(),
            reason: reason.to_string(),
        }
    }

    /// Errors that abort a restore and fall back to a fresh session.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            SessionError::InvalidState(_)
                | SessionError::InvalidConfig(_)
                | SessionError::StorageError(_)
        )
    }
}

/// Result type for session operations.
pub type Result<T> = std::result::Result<T, SessionError>;
