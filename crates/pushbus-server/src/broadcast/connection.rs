//! Suspended client connection state.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use axum::http::HeaderMap;
use axum::http::header::UPGRADE;
use metrics::counter;
use parking_lot::Mutex;
use pushbus_core::ConnectionId;
use tokio::sync::mpsc;

use crate::metrics::BROADCAST_DROPS_TOTAL;
use crate::request::{OriginRequest, SessionHandle};

/// Request header selecting the transport.
pub const TRANSPORT_HEADER: &str = "x-push-transport";

/// How a connection receives frames.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TransportKind {
    /// Resumed after the first delivered frame.
    LongPolling,
    /// Chunked HTTP response, one envelope per line.
    Streaming,
    /// Upgraded WebSocket.
    WebSocket,
}

impl TransportKind {
    /// Pick the transport from request headers.
    ///
    /// `long-polling` and `websocket` are recognized (case-insensitive), as
    /// is a bare `Upgrade: websocket`; anything else streams.
    pub fn from_headers(headers: &HeaderMap) -> Self {
        let requested = headers
            .get(TRANSPORT_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::trim);
        match requested {
            Some(t) if t.eq_ignore_ascii_case("long-polling") => Self::LongPolling,
            Some(t) if t.eq_ignore_ascii_case("websocket") => Self::WebSocket,
            _ if is_websocket_upgrade(headers) => Self::WebSocket,
            _ => Self::Streaming,
        }
    }

    /// Wire name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::LongPolling => "long-polling",
            Self::Streaming => "streaming",
            Self::WebSocket => "websocket",
        }
    }
}

fn is_websocket_upgrade(headers: &HeaderMap) -> bool {
    headers
        .get(UPGRADE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.eq_ignore_ascii_case("websocket"))
}

/// One serialized envelope queued for a connection.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OutboundFrame {
    /// Registry-wide sequence stamp.
    pub seq: u64,
    /// Envelope text.
    pub payload: Arc<String>,
}

/// A suspended client connection.
///
/// The transport task owns the connection; broadcasters only hold weak
/// references to it.
pub struct ClientConnection {
    /// Unique connection ID.
    pub id: ConnectionId,
    /// Transport the client subscribed with.
    pub transport: TransportKind,
    tx: mpsc::Sender<OutboundFrame>,
    origin: OriginRequest,
    session: SessionHandle,
    /// Topics this connection is attached to, in attach order.
    topics: Mutex<Vec<String>>,
    closed: AtomicBool,
    /// Set once a long-poll connection has been handed its frame.
    delivered: AtomicBool,
    /// When this connection was established.
    pub connected_at: Instant,
    /// Whether the client has responded to the last ping.
    pub is_alive: AtomicBool,
    last_pong: Mutex<Instant>,
    /// Count of frames dropped due to a full queue.
    pub dropped_messages: AtomicU64,
}

impl ClientConnection {
    /// Create a connection with a fresh session.
    pub fn new(
        id: ConnectionId,
        transport: TransportKind,
        tx: mpsc::Sender<OutboundFrame>,
        origin: OriginRequest,
    ) -> Self {
        let now = Instant::now();
        Self {
            id,
            transport,
            tx,
            origin,
            session: SessionHandle::new(),
            topics: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
            delivered: AtomicBool::new(false),
            connected_at: now,
            is_alive: AtomicBool::new(true),
            last_pong: Mutex::new(now),
            dropped_messages: AtomicU64::new(0),
        }
    }

    /// The request that opened this connection.
    pub fn origin(&self) -> &OriginRequest {
        &self.origin
    }

    /// The session this connection belongs to.
    pub fn session(&self) -> &SessionHandle {
        &self.session
    }

    /// Queue a frame for the client.
    ///
    /// Returns `false` if the connection is closed, the queue is full, or a
    /// long-poll connection already has its frame.
    pub fn send(&self, frame: OutboundFrame) -> bool {
        if self.is_closed() {
            return false;
        }
        if self.transport == TransportKind::LongPolling
            && self
                .delivered
                .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                .is_err()
        {
            return false;
        }
        if self.tx.try_send(frame).is_ok() {
            true
        } else {
            let _ = self.dropped_messages.fetch_add(1, Ordering::Relaxed);
            counter!(BROADCAST_DROPS_TOTAL).increment(1);
            false
        }
    }

    /// Total frames dropped for this connection.
    pub fn drop_count(&self) -> u64 {
        self.dropped_messages.load(Ordering::Relaxed)
    }

    /// Whether the connection has been closed.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Mark the connection closed. Returns `true` for the first call only.
    pub fn mark_closed(&self) -> bool {
        !self.closed.swap(true, Ordering::AcqRel)
    }

    pub(crate) fn record_topic(&self, topic: &str) {
        let mut topics = self.topics.lock();
        if !topics.iter().any(|t| t == topic) {
            topics.push(topic.to_owned());
        }
    }

    pub(crate) fn forget_topic(&self, topic: &str) {
        self.topics.lock().retain(|t| t != topic);
    }

    pub(crate) fn take_topics(&self) -> Vec<String> {
        std::mem::take(&mut *self.topics.lock())
    }

    /// Topics this connection is attached to.
    pub fn topics(&self) -> Vec<String> {
        self.topics.lock().clone()
    }

    /// Mark the connection as alive (pong received).
    pub fn mark_alive(&self) {
        self.is_alive.store(true, Ordering::Relaxed);
        *self.last_pong.lock() = Instant::now();
    }

    /// Duration since the last pong (or connection establishment).
    pub fn last_pong_elapsed(&self) -> Duration {
        self.last_pong.lock().elapsed()
    }

    /// Check and reset the alive flag for heartbeat.
    pub fn check_alive(&self) -> bool {
        self.is_alive.swap(false, Ordering::Relaxed)
    }

    /// Connection age.
    pub fn age(&self) -> Duration {
        self.connected_at.elapsed()
    }
}

impl std::fmt::Debug for ClientConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientConnection")
            .field("id", &self.id)
            .field("transport", &self.transport)
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}
