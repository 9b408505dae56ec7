//! Store error types.

use std::path::PathBuf;
use thiserror::Error;

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors that can occur during store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("File not found: {0}")]
    NotFound(PathBuf),

    #[error("Invalid file {path}: {message}")]
    SchemaInvalid { path: PathBuf, message: String },

    #[error("Anchor file {path} belongs to a different video (expected {expected}, found {found})")]
    VideoPathMismatch {
        path: PathBuf,
        expected: String,
        found: String,
    },

    #[error("Write failed: {0}")]
    WriteFailed(String),

    #[error("Unknown player id: {0}")]
    UnknownPlayer(String),

    #[error("No video loaded")]
    NoVideoLoaded,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl StoreError {
    pub fn schema_invalid(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::SchemaInvalid {
            path: path.into(),
            message: message.into(),
        }
    }

    pub fn write_failed(msg: impl Into<String>) -> Self {
        Self::WriteFailed(msg.into())
    }

    /// Whether this error means "no file on disk" rather than a real failure.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}
