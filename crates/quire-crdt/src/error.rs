//! Error types for content encoding.

use thiserror::Error;

/// Errors raised while encoding or decoding replicated content.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CrdtError {
    #[error("Failed to encode content: {0}")]
    Encode(String),

    #[error("Failed to decode content: {0}")]
    Decode(String),

    #[error("Unsupported content format version {0}")]
    UnsupportedFormat(u8),
}

pub type Result<T> = std::result::Result<T, CrdtError>;
