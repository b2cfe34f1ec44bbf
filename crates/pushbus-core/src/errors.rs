//! Core error types.

use thiserror::Error;

/// Errors raised while validating topics or encoding envelopes.
#[derive(Debug, Error)]
pub enum CoreError {
    /// A topic string was empty.
    #[error("topic must not be empty")]
    EmptyTopic,
    /// A topic pattern could not be compiled.
    #[error("invalid topic pattern {pattern:?}: {reason}")]
    InvalidPattern {
        /// Pattern as written.
        pattern: String,
        /// Why compilation failed.
        reason: String,
    },
    /// The envelope could not be serialized to its wire form.
    #[error("failed to encode event envelope: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Result type for core operations.
pub type Result<T> = std::result::Result<T, CoreError>;
