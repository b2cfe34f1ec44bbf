//! Stream-aware protocol used for every WebSocket connection.

use tracing::debug;

use super::protocol::{SimpleHttpProtocol, WebSocketHandle, WebSocketProtocol};
use crate::config::NormalizerConfig;
use crate::request::{BodyReader, InboundRequest, RequestBody};

/// Normalizes WebSocket frames into [`InboundRequest`]s.
///
/// Streamed frames become one request whose body is the stream itself;
/// discrete messages follow [`SimpleHttpProtocol`], including its
/// `<delim>/path<delim>` addressing.
#[derive(Clone, Debug)]
pub struct MessageNormalizer {
    inner: SimpleHttpProtocol,
}

impl MessageNormalizer {
    /// Create a normalizer.
    pub fn new(config: NormalizerConfig) -> Self {
        Self {
            inner: SimpleHttpProtocol::new(config),
        }
    }

    /// Normalization settings.
    pub fn config(&self) -> &NormalizerConfig {
        self.inner.config()
    }

    fn stream_request(&self, ws: &WebSocketHandle, reader: BodyReader) -> Vec<InboundRequest> {
        self.inner
            .build_request(ws, None, RequestBody::Reader(reader))
            .into_iter()
            .collect()
    }
}

impl WebSocketProtocol for MessageNormalizer {
    fn on_text_stream(&self, ws: &WebSocketHandle, reader: BodyReader) -> Vec<InboundRequest> {
        self.stream_request(ws, reader)
    }

    fn on_binary_stream(&self, ws: &WebSocketHandle, reader: BodyReader) -> Vec<InboundRequest> {
        self.stream_request(ws, reader)
    }

    fn on_text_message(&self, ws: &WebSocketHandle, text: &str) -> Vec<InboundRequest> {
        self.inner.on_text_message(ws, text)
    }

    fn on_binary_message(
        &self,
        ws: &WebSocketHandle,
        data: &[u8],
        offset: usize,
        length: usize,
    ) -> Vec<InboundRequest> {
        self.inner.on_binary_message(ws, data, offset, length)
    }

    fn on_open(&self, ws: &WebSocketHandle) {
        debug!(conn_id = %ws.id(), delimiter = %self.config().path_delimiter, "websocket normalizer attached");
    }

    fn on_close(&self, ws: &WebSocketHandle) {
        self.inner.on_close(ws);
    }

    fn on_error(&self, ws: &WebSocketHandle, error: &str) {
        self.inner.on_error(ws, error);
    }
}
