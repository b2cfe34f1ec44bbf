//! Uniform inbound request representation.
//!
//! HTTP publishes and normalized WebSocket frames are both turned into an
//! [`InboundRequest`] before dispatch, so the publish path never needs to
//! know which transport a message arrived on.

use std::collections::HashMap;
use std::fmt;
use std::pin::Pin;
use std::sync::Arc;

use axum::http::request::Parts;
use axum::http::{HeaderMap, Method};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use pushbus_core::SessionId;
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::errors::{PushError, Result};
use crate::websocket::SUBPROTOCOL_ATTRIBUTE;

/// Request attributes, keyed by name.
pub type Attributes = HashMap<String, Value>;

/// Attribute carrying the transport a connection subscribed with.
pub const TRANSPORT_ATTRIBUTE: &str = "pushbus.transport";

/// Attribute carrying the ID of the connection a request originated from.
pub const CONNECTION_ATTRIBUTE: &str = "pushbus.connection_id";

/// Snapshot of the request that opened a connection.
#[derive(Clone, Debug, Default)]
pub struct OriginRequest {
    /// Topic path below the base path, e.g. `/news`.
    pub path_info: String,
    /// Full request URI (path and query).
    pub request_uri: String,
    /// Request headers.
    pub headers: HeaderMap,
    /// Attributes attached when the connection was accepted.
    pub attributes: Attributes,
}

impl OriginRequest {
    /// Capture the parts of an HTTP request.
    pub fn from_parts(parts: &Parts, path_info: &str) -> Self {
        let request_uri = parts
            .uri
            .path_and_query()
            .map_or_else(|| parts.uri.path().to_owned(), ToString::to_string);
        Self {
            path_info: path_info.to_owned(),
            request_uri,
            headers: parts.headers.clone(),
            attributes: Attributes::new(),
        }
    }

    /// Builder-style attribute setter.
    #[must_use]
    pub fn with_attribute(mut self, name: &str, value: impl Into<Value>) -> Self {
        let _ = self.attributes.insert(name.to_owned(), value.into());
        self
    }
}

#[derive(Debug)]
struct Session {
    id: SessionId,
    created_at: DateTime<Utc>,
}

/// Shared handle to the session a connection belongs to.
///
/// Cloning shares the session; every request reconstructed from one
/// connection carries the same handle.
#[derive(Clone, Debug)]
pub struct SessionHandle(Arc<Session>);

impl SessionHandle {
    /// Start a new session.
    pub fn new() -> Self {
        Self(Arc::new(Session {
            id: SessionId::new(),
            created_at: Utc::now(),
        }))
    }

    /// Session ID.
    pub fn id(&self) -> &SessionId {
        &self.0.id
    }

    /// When the session started.
    pub fn created_at(&self) -> DateTime<Utc> {
        self.0.created_at
    }

    /// Whether two handles refer to the same session.
    pub fn same_session(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl Default for SessionHandle {
    fn default() -> Self {
        Self::new()
    }
}

/// Boxed async reader used for streamed bodies.
pub type BodyReader = Pin<Box<dyn AsyncRead + Send>>;

/// Body of an inbound request.
pub enum RequestBody {
    /// No body.
    Empty,
    /// Fully buffered body.
    Bytes(Bytes),
    /// Body still to be read.
    Reader(BodyReader),
}

impl RequestBody {
    /// Buffer the body, failing if it is longer than `limit` bytes.
    pub async fn into_bytes(self, limit: usize) -> Result<Bytes> {
        match self {
            Self::Empty => Ok(Bytes::new()),
            Self::Bytes(bytes) => {
                if bytes.len() > limit {
                    return Err(PushError::PayloadTooLarge { limit });
                }
                Ok(bytes)
            }
            Self::Reader(reader) => {
                let mut buf = Vec::new();
                let cap = u64::try_from(limit).unwrap_or(u64::MAX).saturating_add(1);
                let _ = reader.take(cap).read_to_end(&mut buf).await?;
                if buf.len() > limit {
                    return Err(PushError::PayloadTooLarge { limit });
                }
                Ok(Bytes::from(buf))
            }
        }
    }
}

impl fmt::Debug for RequestBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => f.write_str("Empty"),
            Self::Bytes(b) => f.debug_tuple("Bytes").field(&b.len()).finish(),
            Self::Reader(_) => f.write_str("Reader(..)"),
        }
    }
}

/// A transport-independent inbound request.
#[derive(Debug)]
pub struct InboundRequest {
    /// Request method.
    pub method: Method,
    /// Content type.
    pub content_type: String,
    /// Topic path below the base path.
    pub path_info: String,
    /// Full request URI.
    pub request_uri: String,
    /// Headers.
    pub headers: HeaderMap,
    /// Attributes.
    pub attributes: Attributes,
    /// Session shared with the originating connection, if any.
    pub session: Option<SessionHandle>,
    /// Whether the request may be recycled once dispatched.
    pub destroyable: bool,
    /// Body.
    pub body: RequestBody,
}

impl InboundRequest {
    /// Wrap an HTTP request whose body is still streaming in.
    pub fn from_http(parts: &Parts, path_info: &str, body: RequestBody) -> Self {
        let content_type = parts
            .headers
            .get(axum::http::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_owned();
        let origin = OriginRequest::from_parts(parts, path_info);
        Self {
            method: parts.method.clone(),
            content_type,
            path_info: origin.path_info,
            request_uri: origin.request_uri,
            headers: origin.headers,
            attributes: Attributes::new(),
            session: None,
            destroyable: false,
            body,
        }
    }

    /// Whether the request was rebuilt from a WebSocket frame.
    pub fn is_websocket_frame(&self) -> bool {
        self.attributes.contains_key(SUBPROTOCOL_ATTRIBUTE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request;

    fn parts(uri: &str) -> Parts {
        let (parts, ()) = Request::builder()
            .method(Method::POST)
            .uri(uri)
            .header("content-type", "application/json")
            .header("topics", "a,b")
            .body(())
            .unwrap()
            .into_parts();
        parts
    }

    #[test]
    fn origin_captures_uri_and_headers() {
        let origin = OriginRequest::from_parts(&parts("/events/news?x=1"), "/news")
            .with_attribute(TRANSPORT_ATTRIBUTE, "websocket");
        assert_eq!(origin.path_info, "/news");
        assert_eq!(origin.request_uri, "/events/news?x=1");
        assert_eq!(origin.headers.get("topics").unwrap(), "a,b");
        assert_eq!(origin.attributes[TRANSPORT_ATTRIBUTE], "websocket");
    }

    #[test]
    fn from_http_copies_method_and_content_type() {
        let req = InboundRequest::from_http(&parts("/events/news"), "/news", RequestBody::Empty);
        assert_eq!(req.method, Method::POST);
        assert_eq!(req.content_type, "application/json");
        assert!(req.session.is_none());
        assert!(!req.destroyable);
        assert!(!req.is_websocket_frame());
    }

    #[test]
    fn session_handles_share_identity() {
        let a = SessionHandle::new();
        let b = a.clone();
        let c = SessionHandle::new();
        assert!(a.same_session(&b));
        assert_eq!(a.id(), b.id());
        assert!(!a.same_session(&c));
        assert!(a.id().starts_with("sess_"));
        assert!(a.created_at() <= Utc::now());
    }

    #[tokio::test]
    async fn bytes_body_within_limit() {
        let body = RequestBody::Bytes(Bytes::from_static(b"hello"));
        assert_eq!(body.into_bytes(5).await.unwrap(), "hello");
    }

    #[tokio::test]
    async fn bytes_body_over_limit() {
        let body = RequestBody::Bytes(Bytes::from_static(b"hello"));
        let err = body.into_bytes(4).await.unwrap_err();
        assert!(matches!(err, PushError::PayloadTooLarge { limit: 4 }));
    }

    #[tokio::test]
    async fn reader_body_is_read_fully() {
        let reader: BodyReader = Box::pin(std::io::Cursor::new(b"{\"a\":1}".to_vec()));
        let bytes = RequestBody::Reader(reader).into_bytes(64).await.unwrap();
        assert_eq!(&bytes[..], b"{\"a\":1}");
    }

    #[tokio::test]
    async fn reader_body_over_limit() {
        let reader: BodyReader = Box::pin(std::io::Cursor::new(vec![b'x'; 10]));
        let err = RequestBody::Reader(reader).into_bytes(9).await.unwrap_err();
        assert!(matches!(err, PushError::PayloadTooLarge { limit: 9 }));
    }

    #[tokio::test]
    async fn empty_body() {
        assert!(RequestBody::Empty.into_bytes(0).await.unwrap().is_empty());
    }
}
