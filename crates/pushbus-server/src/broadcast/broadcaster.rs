//! One topic's fan-out point.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use metrics::counter;
use parking_lot::{Mutex, RwLock};
use pushbus_core::ConnectionId;
use tracing::{debug, trace};

use super::cache::BroadcasterCache;
use super::connection::{ClientConnection, OutboundFrame};
use crate::metrics::{BROADCAST_DELIVERIES_TOTAL, BROADCASTS_TOTAL, STALE_FRAMES_TOTAL};

/// Delivers frames for one exact topic to every attached connection.
pub struct Broadcaster {
    topic: String,
    connections: RwLock<Vec<(ConnectionId, Weak<ClientConnection>)>>,
    cache: Arc<dyn BroadcasterCache>,
    seq: Arc<AtomicU64>,
    pinned: AtomicBool,
    /// Held for the whole of one fan-out so frames leave in publish order.
    fanout: Mutex<()>,
}

impl Broadcaster {
    /// Create a broadcaster stamping frames from the shared `seq` counter.
    pub fn new(topic: &str, cache: Arc<dyn BroadcasterCache>, seq: Arc<AtomicU64>) -> Self {
        Self {
            topic: topic.to_owned(),
            connections: RwLock::new(Vec::new()),
            cache,
            seq,
            pinned: AtomicBool::new(false),
            fanout: Mutex::new(()),
        }
    }

    /// The exact topic this broadcaster serves.
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Attach a connection. Returns `false` if it is closed or already attached.
    pub fn attach(&self, conn: &Arc<ClientConnection>) -> bool {
        let mut connections = self.connections.write();
        if conn.is_closed() || connections.iter().any(|(id, _)| *id == conn.id) {
            return false;
        }
        conn.record_topic(&self.topic);
        connections.push((conn.id.clone(), Arc::downgrade(conn)));
        trace!(topic = %self.topic, conn_id = %conn.id, "connection attached");
        true
    }

    /// Detach a connection by ID. Returns `false` if it was not attached.
    pub fn detach(&self, id: &ConnectionId) -> bool {
        let mut connections = self.connections.write();
        let before = connections.len();
        connections.retain(|(attached, _)| attached != id);
        connections.len() != before
    }

    /// Stamp, cache and deliver one serialized envelope.
    ///
    /// Returns how many connections accepted the frame.
    pub fn broadcast(&self, payload: &str) -> usize {
        let _order = self.fanout.lock();
        let frame = OutboundFrame {
            seq: self.seq.fetch_add(1, Ordering::Relaxed) + 1,
            payload: Arc::new(payload.to_owned()),
        };
        self.cache.add(&frame);

        let mut delivered = 0usize;
        let mut stale = 0usize;
        {
            let connections = self.connections.read();
            for (id, weak) in connections.iter() {
                match weak.upgrade() {
                    Some(conn) if !conn.is_closed() => {
                        if conn.send(frame.clone()) {
                            delivered += 1;
                        }
                    }
                    _ => {
                        stale += 1;
                        trace!(topic = %self.topic, conn_id = %id, "frame for closed connection dropped");
                    }
                }
            }
        }
        if stale > 0 {
            counter!(STALE_FRAMES_TOTAL).increment(stale as u64);
            self.prune();
        }

        counter!(BROADCASTS_TOTAL).increment(1);
        counter!(BROADCAST_DELIVERIES_TOTAL).increment(delivered as u64);
        debug!(topic = %self.topic, seq = frame.seq, delivered, "broadcast");
        delivered
    }

    /// Cached frames newer than `after`.
    pub fn cached_since(&self, after: u64) -> Vec<OutboundFrame> {
        self.cache.since(after)
    }

    /// Keep this broadcaster for the process lifetime.
    pub fn pin(&self) {
        self.pinned.store(true, Ordering::Release);
    }

    /// Whether the broadcaster is pinned.
    pub fn is_pinned(&self) -> bool {
        self.pinned.load(Ordering::Acquire)
    }

    /// Unpinned and without live connections.
    pub fn is_idle(&self) -> bool {
        !self.is_pinned() && self.connection_count() == 0
    }

    /// Number of live attached connections.
    pub fn connection_count(&self) -> usize {
        self.connections
            .read()
            .iter()
            .filter(|(_, weak)| weak.upgrade().is_some_and(|c| !c.is_closed()))
            .count()
    }

    /// IDs of live attached connections, in attach order.
    pub fn connection_ids(&self) -> Vec<ConnectionId> {
        self.connections
            .read()
            .iter()
            .filter(|(_, weak)| weak.upgrade().is_some_and(|c| !c.is_closed()))
            .map(|(id, _)| id.clone())
            .collect()
    }

    fn prune(&self) {
        self.connections
            .write()
            .retain(|(_, weak)| weak.upgrade().is_some_and(|c| !c.is_closed()));
    }
}

impl std::fmt::Debug for Broadcaster {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Broadcaster")
            .field("topic", &self.topic)
            .field("pinned", &self.is_pinned())
            .field("connections", &self.connection_count())
            .finish_non_exhaustive()
    }
}
