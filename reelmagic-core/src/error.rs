//! Error types for the ReelMagic player subsystem.

use thiserror::Error;

use crate::registry::Handle;

/// ReelMagic errors
#[derive(Debug, Error)]
pub enum ReelMagicError {
    /// The codec could not detect a stream, decode a first frame, or the picture size is zero.
    #[error("Failed to open MPEG asset: {0}")]
    AssetOpen(String),

    #[error("Invalid handle #{0}")]
    InvalidHandle(Handle),

    #[error("Ran out of handles while registering player")]
    HandlesExhausted,

    #[error("Settings error: {0}")]
    Settings(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type ReelMagicResult<T> = Result<T, ReelMagicError>;
