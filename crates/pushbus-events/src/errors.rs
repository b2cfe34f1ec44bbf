//! Event bus error types.

use std::path::PathBuf;

use thiserror::Error;

/// Errors raised while loading event definitions.
#[derive(Debug, Error)]
pub enum EventsError {
    /// The definitions file could not be read.
    #[error("failed to read event definitions from {path}: {source}")]
    Io {
        /// File that was read.
        path: PathBuf,
        /// Underlying error.
        source: std::io::Error,
    },
    /// The definitions file was not a JSON array of definitions.
    #[error("failed to parse event definitions: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type for event operations.
pub type Result<T> = std::result::Result<T, EventsError>;
