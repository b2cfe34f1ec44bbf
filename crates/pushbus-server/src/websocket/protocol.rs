//! WebSocket frame → inbound request protocols.

use std::sync::{Arc, Weak};

use bytes::Bytes;
use metrics::counter;
use pushbus_core::ConnectionId;
use serde_json::Value;
use tracing::{debug, trace, warn};

use crate::broadcast::ClientConnection;
use crate::config::NormalizerConfig;
use crate::metrics::STALE_FRAMES_TOTAL;
use crate::request::{Attributes, BodyReader, InboundRequest, RequestBody};

/// Attribute set on every request reconstructed from a WebSocket frame.
pub const SUBPROTOCOL_ATTRIBUTE: &str = "pushbus.websocket.subprotocol";

/// One inbound WebSocket frame, as handed to a protocol.
pub enum InboundFrame {
    /// Text frame exposed as a reader.
    TextStream(BodyReader),
    /// Binary frame exposed as a reader.
    BinaryStream(BodyReader),
    /// Complete text message.
    TextMessage(String),
    /// Complete binary message; the payload is `data[offset..offset + length]`.
    BinaryMessage {
        /// Frame bytes.
        data: Bytes,
        /// Start of the payload.
        offset: usize,
        /// Payload length.
        length: usize,
    },
}

/// Non-owning view of the connection a frame arrived on.
#[derive(Clone, Debug)]
pub struct WebSocketHandle {
    id: ConnectionId,
    conn: Weak<ClientConnection>,
}

impl WebSocketHandle {
    /// Handle for `conn`.
    pub fn new(conn: &Arc<ClientConnection>) -> Self {
        Self {
            id: conn.id.clone(),
            conn: Arc::downgrade(conn),
        }
    }

    /// Connection ID.
    pub fn id(&self) -> &ConnectionId {
        &self.id
    }

    /// The connection, unless it has been closed or dropped.
    pub fn connection(&self) -> Option<Arc<ClientConnection>> {
        self.conn.upgrade().filter(|c| !c.is_closed())
    }
}

/// Turns WebSocket frames into [`InboundRequest`]s.
///
/// Every method returns the requests to dispatch; an empty list means the
/// frame produced nothing (for example, it arrived after close).
pub trait WebSocketProtocol: Send + Sync {
    /// A text frame delivered as a stream.
    fn on_text_stream(&self, ws: &WebSocketHandle, _reader: BodyReader) -> Vec<InboundRequest> {
        debug!(conn_id = %ws.id(), "text streams not handled by this protocol");
        Vec::new()
    }

    /// A binary frame delivered as a stream.
    fn on_binary_stream(&self, ws: &WebSocketHandle, _reader: BodyReader) -> Vec<InboundRequest> {
        debug!(conn_id = %ws.id(), "binary streams not handled by this protocol");
        Vec::new()
    }

    /// A complete text message.
    fn on_text_message(&self, ws: &WebSocketHandle, text: &str) -> Vec<InboundRequest>;

    /// A complete binary message.
    fn on_binary_message(
        &self,
        ws: &WebSocketHandle,
        data: &[u8],
        offset: usize,
        length: usize,
    ) -> Vec<InboundRequest>;

    /// The socket opened.
    fn on_open(&self, ws: &WebSocketHandle) {
        debug!(conn_id = %ws.id(), "websocket opened");
    }

    /// The socket closed.
    fn on_close(&self, ws: &WebSocketHandle) {
        debug!(conn_id = %ws.id(), "websocket closed");
    }

    /// The socket failed.
    fn on_error(&self, ws: &WebSocketHandle, error: &str) {
        warn!(conn_id = %ws.id(), error, "websocket error");
    }

    /// Route a frame to the matching handler.
    fn on_frame(&self, ws: &WebSocketHandle, frame: InboundFrame) -> Vec<InboundRequest> {
        match frame {
            InboundFrame::TextStream(reader) => self.on_text_stream(ws, reader),
            InboundFrame::BinaryStream(reader) => self.on_binary_stream(ws, reader),
            InboundFrame::TextMessage(text) => self.on_text_message(ws, &text),
            InboundFrame::BinaryMessage {
                data,
                offset,
                length,
            } => self.on_binary_message(ws, &data, offset, length),
        }
    }
}

/// Discrete-message protocol.
///
/// A text message of the form `<delim>/path<delim>body` is addressed to
/// `/path`; any other message goes to the connection's own path.
#[derive(Clone, Debug)]
pub struct SimpleHttpProtocol {
    config: NormalizerConfig,
}

impl SimpleHttpProtocol {
    /// Create the protocol.
    pub fn new(config: NormalizerConfig) -> Self {
        Self { config }
    }

    /// Normalization settings.
    pub fn config(&self) -> &NormalizerConfig {
        &self.config
    }

    /// Reconstruct a request on `ws`'s connection.
    ///
    /// `path` replaces the connection's path info and is appended to its
    /// request URI. Returns `None` when the connection is gone.
    pub(crate) fn build_request(
        &self,
        ws: &WebSocketHandle,
        path: Option<&str>,
        body: RequestBody,
    ) -> Option<InboundRequest> {
        let Some(conn) = ws.connection() else {
            trace!(conn_id = %ws.id(), "frame for closed connection dropped");
            counter!(STALE_FRAMES_TOTAL).increment(1);
            return None;
        };
        let origin = conn.origin();

        let mut attributes = Attributes::with_capacity(origin.attributes.len() + 1);
        let _ = attributes.insert(SUBPROTOCOL_ATTRIBUTE.to_owned(), Value::Bool(true));
        attributes.extend(
            origin
                .attributes
                .iter()
                .map(|(k, v)| (k.clone(), v.clone())),
        );

        let (path_info, request_uri) = match path {
            Some(p) => (p.to_owned(), format!("{}{p}", origin.request_uri)),
            None => (origin.path_info.clone(), origin.request_uri.clone()),
        };

        Some(InboundRequest {
            method: self.config.method.clone(),
            content_type: self.config.content_type.clone(),
            path_info,
            request_uri,
            headers: origin.headers.clone(),
            attributes,
            session: Some(conn.session().clone()),
            destroyable: self.config.destroyable,
            body,
        })
    }

    /// Split an optional `<delim>path<delim>` prefix off a text message.
    fn split_path<'a>(&self, text: &'a str) -> (Option<&'a str>, &'a str) {
        let delim = self.config.path_delimiter.as_str();
        if delim.is_empty() {
            return (None, text);
        }
        text.strip_prefix(delim)
            .and_then(|rest| rest.split_once(delim))
            .map_or((None, text), |(path, body)| (Some(path), body))
    }
}

impl WebSocketProtocol for SimpleHttpProtocol {
    fn on_text_message(&self, ws: &WebSocketHandle, text: &str) -> Vec<InboundRequest> {
        let (path, body) = self.split_path(text);
        let body = RequestBody::Bytes(Bytes::copy_from_slice(body.as_bytes()));
        self.build_request(ws, path, body).into_iter().collect()
    }

    fn on_binary_message(
        &self,
        ws: &WebSocketHandle,
        data: &[u8],
        offset: usize,
        length: usize,
    ) -> Vec<InboundRequest> {
        let Some(payload) = offset
            .checked_add(length)
            .and_then(|end| data.get(offset..end))
        else {
            warn!(conn_id = %ws.id(), offset, length, size = data.len(), "binary message range out of bounds");
            return Vec::new();
        };
        match std::str::from_utf8(payload) {
            Ok(text) => self.on_text_message(ws, text),
            Err(_) => {
                let body = RequestBody::Bytes(Bytes::copy_from_slice(payload));
                self.build_request(ws, None, body).into_iter().collect()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broadcast::TransportKind;
    use crate::broadcast::connection::test_support::connection;
    use crate::request::TRANSPORT_ATTRIBUTE;
    use axum::http::Method;

    fn protocol() -> SimpleHttpProtocol {
        SimpleHttpProtocol::new(NormalizerConfig::default())
    }

    async fn body_text(req: InboundRequest) -> String {
        let bytes = req.body.into_bytes(1024).await.unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn text_message_uses_connection_path() {
        let (conn, _rx) = connection(TransportKind::WebSocket);
        let ws = WebSocketHandle::new(&conn);

        let mut reqs = protocol().on_text_message(&ws, r#"{"x":1}"#);
        assert_eq!(reqs.len(), 1);
        let req = reqs.remove(0);
        assert_eq!(req.method, Method::POST);
        assert_eq!(req.content_type, "text/plain");
        assert_eq!(req.path_info, "/news");
        assert_eq!(req.request_uri, "/events/news");
        assert!(req.session.as_ref().unwrap().same_session(conn.session()));
        assert_eq!(req.attributes[SUBPROTOCOL_ATTRIBUTE], Value::Bool(true));
        assert!(req.is_websocket_frame());
        assert_eq!(body_text(req).await, r#"{"x":1}"#);
    }

    #[tokio::test]
    async fn delimited_text_message_overrides_path() {
        let (conn, _rx) = connection(TransportKind::WebSocket);
        let ws = WebSocketHandle::new(&conn);

        let mut reqs = protocol().on_text_message(&ws, r#"@@/chat@@{"m":"hi"}"#);
        let req = reqs.remove(0);
        assert_eq!(req.path_info, "/chat");
        assert_eq!(req.request_uri, "/events/news/chat");
        assert_eq!(body_text(req).await, r#"{"m":"hi"}"#);
    }

    #[tokio::test]
    async fn unterminated_delimiter_is_plain_body() {
        let (conn, _rx) = connection(TransportKind::WebSocket);
        let ws = WebSocketHandle::new(&conn);

        let mut reqs = protocol().on_text_message(&ws, "@@/chat");
        let req = reqs.remove(0);
        assert_eq!(req.path_info, "/news");
        assert_eq!(body_text(req).await, "@@/chat");
    }

    #[tokio::test]
    async fn binary_message_honors_offset_and_length() {
        let (conn, _rx) = connection(TransportKind::WebSocket);
        let ws = WebSocketHandle::new(&conn);

        let mut reqs = protocol().on_binary_message(&ws, b"xx{\"a\":1}yy", 2, 7);
        assert_eq!(body_text(reqs.remove(0)).await, r#"{"a":1}"#);
    }

    #[test]
    fn binary_message_out_of_range_is_dropped() {
        let (conn, _rx) = connection(TransportKind::WebSocket);
        let ws = WebSocketHandle::new(&conn);
        assert!(protocol().on_binary_message(&ws, b"abc", 2, 5).is_empty());
        assert!(protocol().on_binary_message(&ws, b"abc", usize::MAX, 2).is_empty());
    }

    #[tokio::test]
    async fn non_utf8_binary_is_passed_through() {
        let (conn, _rx) = connection(TransportKind::WebSocket);
        let ws = WebSocketHandle::new(&conn);
        let mut reqs = protocol().on_binary_message(&ws, &[0xff, 0xfe], 0, 2);
        let bytes = reqs.remove(0).body.into_bytes(16).await.unwrap();
        assert_eq!(&bytes[..], &[0xff, 0xfe]);
    }

    #[test]
    fn frame_after_close_is_dropped() {
        let (conn, _rx) = connection(TransportKind::WebSocket);
        let ws = WebSocketHandle::new(&conn);
        let _ = conn.mark_closed();
        assert!(protocol().on_text_message(&ws, "{}").is_empty());
    }

    #[test]
    fn frame_after_drop_is_dropped() {
        let (conn, _rx) = connection(TransportKind::WebSocket);
        let ws = WebSocketHandle::new(&conn);
        drop(conn);
        assert!(ws.connection().is_none());
        assert!(protocol().on_text_message(&ws, "{}").is_empty());
    }

    #[test]
    fn origin_attributes_overlay_marker() {
        let (tx, _rx) = tokio::sync::mpsc::channel(4);
        let origin = crate::request::OriginRequest::default()
            .with_attribute(TRANSPORT_ATTRIBUTE, "websocket")
            .with_attribute(SUBPROTOCOL_ATTRIBUTE, "custom");
        let conn = Arc::new(ClientConnection::new(
            ConnectionId::new(),
            TransportKind::WebSocket,
            tx,
            origin,
        ));
        let ws = WebSocketHandle::new(&conn);

        let reqs = protocol().on_text_message(&ws, "{}");
        assert_eq!(reqs[0].attributes[TRANSPORT_ATTRIBUTE], "websocket");
        assert_eq!(reqs[0].attributes[SUBPROTOCOL_ATTRIBUTE], "custom");
    }

    #[test]
    fn requests_from_one_connection_are_independent() {
        let (conn, _rx) = connection(TransportKind::WebSocket);
        let ws = WebSocketHandle::new(&conn);
        let proto = protocol();

        let mut first = proto.on_text_message(&ws, "{}").remove(0);
        let second = proto.on_text_message(&ws, "{}").remove(0);

        let _ = first
            .attributes
            .insert("handled".to_owned(), Value::Bool(true));
        let _ = first.attributes.remove(SUBPROTOCOL_ATTRIBUTE);
        let _ = first.headers.insert("x-extra", "1".parse().unwrap());
        first.path_info = "/elsewhere".to_owned();

        assert!(!second.attributes.contains_key("handled"));
        assert_eq!(second.attributes[SUBPROTOCOL_ATTRIBUTE], Value::Bool(true));
        assert!(second.headers.get("x-extra").is_none());
        assert_eq!(second.path_info, "/news");
        assert!(conn.origin().headers.get("x-extra").is_none());
        assert!(
            first
                .session
                .as_ref()
                .unwrap()
                .same_session(second.session.as_ref().unwrap())
        );
    }

    #[test]
    fn streams_are_not_handled_by_simple_protocol() {
        let (conn, _rx) = connection(TransportKind::WebSocket);
        let ws = WebSocketHandle::new(&conn);
        let reader: BodyReader = Box::pin(std::io::Cursor::new(b"{}".to_vec()));
        assert!(protocol().on_frame(&ws, InboundFrame::TextStream(reader)).is_empty());
    }

    #[test]
    fn custom_configuration_is_stamped() {
        let (conn, _rx) = connection(TransportKind::WebSocket);
        let ws = WebSocketHandle::new(&conn);
        let proto = SimpleHttpProtocol::new(NormalizerConfig {
            content_type: "application/json".into(),
            method: Method::PUT,
            path_delimiter: "##".into(),
            destroyable: true,
            stream_frames: false,
        });

        let reqs = proto.on_text_message(&ws, "##/alt##{}");
        assert_eq!(reqs[0].method, Method::PUT);
        assert_eq!(reqs[0].content_type, "application/json");
        assert_eq!(reqs[0].path_info, "/alt");
        assert!(reqs[0].destroyable);
    }
}
