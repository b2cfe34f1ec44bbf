//! Push server error types.

use axum::http::{Method, StatusCode};
use axum::response::{IntoResponse, Response};
use thiserror::Error;
use tracing::debug;

/// Errors surfaced by subscription binding, dispatch, and the HTTP layer.
#[derive(Debug, Error)]
pub enum PushError {
    /// The topic addressed by the request path has no broadcaster.
    #[error("no broadcaster for topic '{0}'")]
    UnresolvedPrimaryTopic(String),
    /// `max_connections` suspended connections are already open.
    #[error("connection limit of {0} reached")]
    ConnectionLimit(usize),
    /// Inbound request used a method other than the publish method.
    #[error("method {0} not accepted for publish")]
    MethodNotAllowed(Method),
    /// Inbound body was larger than `max_message_size`.
    #[error("request body exceeds {limit} bytes")]
    PayloadTooLarge {
        /// Configured limit.
        limit: usize,
    },
    /// Reading the inbound body failed.
    #[error("failed to read request body: {0}")]
    BodyRead(#[from] std::io::Error),
}

impl PushError {
    /// HTTP status this error maps to.
    pub fn status(&self) -> StatusCode {
        match self {
            Self::UnresolvedPrimaryTopic(_) => StatusCode::FORBIDDEN,
            Self::ConnectionLimit(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::MethodNotAllowed(_) => StatusCode::METHOD_NOT_ALLOWED,
            Self::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            Self::BodyRead(_) => StatusCode::BAD_REQUEST,
        }
    }
}

impl IntoResponse for PushError {
    fn into_response(self) -> Response {
        let status = self.status();
        debug!(status = status.as_u16(), error = %self, "request rejected");
        (status, self.to_string()).into_response()
    }
}

/// Result type for push server operations.
pub type Result<T> = std::result::Result<T, PushError>;
