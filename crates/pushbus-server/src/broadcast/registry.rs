//! Topic → broadcaster registry.
//!
//! At most one live [`Broadcaster`] exists per exact topic string. Creation
//! is get-or-insert under the map's shard lock, and attaching a connection
//! happens under that same lock, so an idle release never removes a
//! broadcaster between its lookup and the attach.

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::AtomicU64;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use metrics::gauge;
use pushbus_core::ConnectionId;
use tracing::{debug, info, trace};

use super::broadcaster::Broadcaster;
use super::cache::{CacheFactory, CachePolicy};
use super::connection::ClientConnection;
use crate::metrics::BROADCASTERS_ACTIVE;

/// Creates, looks up and releases named broadcasters.
pub struct TopicRegistry {
    broadcasters: DashMap<String, Arc<Broadcaster>>,
    cache_factory: CacheFactory,
    seq: Arc<AtomicU64>,
}

impl TopicRegistry {
    /// Registry whose new broadcasters get caches from `cache_factory`.
    pub fn new(cache_factory: CacheFactory) -> Self {
        Self {
            broadcasters: DashMap::new(),
            cache_factory,
            seq: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Registry using the cache selected by `policy`.
    pub fn with_policy(policy: CachePolicy) -> Self {
        Self::new(policy.factory())
    }

    /// Find the broadcaster for `topic`, creating it if asked to.
    ///
    /// `None` means "no subscribers yet" and is not an error. Empty topics
    /// are never registered.
    pub fn lookup(&self, topic: &str, create_if_absent: bool) -> Option<Arc<Broadcaster>> {
        if topic.is_empty() {
            return None;
        }
        if !create_if_absent {
            return self.broadcasters.get(topic).map(|b| Arc::clone(b.value()));
        }
        let entry = self
            .broadcasters
            .entry(topic.to_owned())
            .or_insert_with(|| self.create(topic));
        Some(Arc::clone(entry.value()))
    }

    /// Look up `topic` (creating it if asked) and attach `conn` while the
    /// entry is still locked.
    ///
    /// A closed connection attaches nowhere: the result is `None` and no
    /// broadcaster is created for it.
    pub fn attach(
        &self,
        topic: &str,
        conn: &Arc<ClientConnection>,
        create_if_absent: bool,
    ) -> Option<Arc<Broadcaster>> {
        if topic.is_empty() {
            return None;
        }
        if !create_if_absent {
            let entry = self.broadcasters.get(topic)?;
            return attach_open(entry.value(), conn).then(|| Arc::clone(entry.value()));
        }
        match self.broadcasters.entry(topic.to_owned()) {
            Entry::Occupied(entry) => {
                attach_open(entry.get(), conn).then(|| Arc::clone(entry.get()))
            }
            Entry::Vacant(entry) => {
                let broadcaster = self.build(topic);
                if !broadcaster.attach(conn) {
                    trace!(topic, conn_id = %conn.id, "closed connection, broadcaster not created");
                    return None;
                }
                debug!(topic, "broadcaster created");
                gauge!(BROADCASTERS_ACTIVE).increment(1.0);
                Some(Arc::clone(entry.insert(broadcaster).value()))
            }
        }
    }

    /// Detach `conn` from `topic`, releasing the broadcaster if it became
    /// idle. Returns `false` if the connection was not attached.
    pub fn detach(&self, topic: &str, conn: &ClientConnection) -> bool {
        conn.forget_topic(topic);
        self.detach_id(topic, &conn.id)
    }

    /// Close `conn` and detach it from every topic it is attached to.
    ///
    /// Only the first call has any effect.
    pub fn close_connection(&self, conn: &ClientConnection) {
        if !conn.mark_closed() {
            return;
        }
        let topics = conn.take_topics();
        for topic in &topics {
            let _ = self.detach_id(topic, &conn.id);
        }
        debug!(conn_id = %conn.id, topics = topics.len(), "connection closed");
    }

    /// Drop every idle, unpinned broadcaster. Returns how many were released.
    pub fn release_idle(&self) -> usize {
        let before = self.broadcasters.len();
        self.broadcasters.retain(|_, b| !b.is_idle());
        let released = before.saturating_sub(self.broadcasters.len());
        if released > 0 {
            info!(released, "idle broadcasters released");
            self.update_gauge();
        }
        released
    }

    /// Number of registered broadcasters.
    pub fn len(&self) -> usize {
        self.broadcasters.len()
    }

    /// Whether no broadcaster is registered.
    pub fn is_empty(&self) -> bool {
        self.broadcasters.is_empty()
    }

    /// Registered topics, sorted.
    pub fn topics(&self) -> Vec<String> {
        let mut topics: Vec<String> = self.broadcasters.iter().map(|e| e.key().clone()).collect();
        topics.sort();
        topics
    }

    /// Number of distinct live connections attached to any broadcaster.
    pub fn connection_count(&self) -> usize {
        let ids: HashSet<ConnectionId> = self
            .broadcasters
            .iter()
            .flat_map(|e| e.value().connection_ids())
            .collect();
        ids.len()
    }

    fn create(&self, topic: &str) -> Arc<Broadcaster> {
        debug!(topic, "broadcaster created");
        gauge!(BROADCASTERS_ACTIVE).increment(1.0);
        self.build(topic)
    }

    fn build(&self, topic: &str) -> Arc<Broadcaster> {
        let cache = (self.cache_factory)(topic);
        Arc::new(Broadcaster::new(topic, cache, Arc::clone(&self.seq)))
    }

    fn detach_id(&self, topic: &str, id: &ConnectionId) -> bool {
        let detached = self
            .broadcasters
            .get(topic)
            .is_some_and(|b| b.value().detach(id));
        if self
            .broadcasters
            .remove_if(topic, |_, b| b.is_idle())
            .is_some()
        {
            debug!(topic, "idle broadcaster released");
            gauge!(BROADCASTERS_ACTIVE).decrement(1.0);
        }
        detached
    }

    #[allow(clippy::cast_precision_loss)]
    fn update_gauge(&self) {
        gauge!(BROADCASTERS_ACTIVE).set(self.broadcasters.len() as f64);
    }
}

/// Attach, treating "already attached" as success and "closed" as failure.
fn attach_open(broadcaster: &Broadcaster, conn: &Arc<ClientConnection>) -> bool {
    broadcaster.attach(conn) || !conn.is_closed()
}

impl Default for TopicRegistry {
    fn default() -> Self {
        Self::with_policy(CachePolicy::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broadcast::connection::TransportKind;
    use crate::broadcast::connection::test_support::{connection, connection_with_capacity};

    #[test]
    fn lookup_without_create_is_none() {
        let registry = TopicRegistry::default();
        assert!(registry.lookup("news", false).is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn lookup_with_create_returns_same_instance() {
        let registry = TopicRegistry::default();
        let a = registry.lookup("news", true).unwrap();
        let b = registry.lookup("news", true).unwrap();
        let c = registry.lookup("news", false).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert!(Arc::ptr_eq(&a, &c));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn distinct_topics_get_distinct_broadcasters() {
        let registry = TopicRegistry::default();
        let a = registry.lookup("news", true).unwrap();
        let b = registry.lookup("weather", true).unwrap();
        assert!(!Arc::ptr_eq(&a, &b));
        assert_eq!(a.topic(), "news");
        assert_eq!(b.topic(), "weather");
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn closed_connection_creates_nothing() {
        let registry = TopicRegistry::default();
        let (c, _rx) = connection(TransportKind::Streaming);
        let _ = c.mark_closed();

        assert!(registry.attach("chat", &c, true).is_none());
        assert!(registry.is_empty());

        let news = registry.lookup("news", true).unwrap();
        assert!(registry.attach("news", &c, false).is_none());
        assert!(registry.attach("news", &c, true).is_none());
        assert_eq!(news.connection_count(), 0);
        assert!(c.topics().is_empty());
    }

    #[test]
    fn repeated_attach_still_resolves() {
        let registry = TopicRegistry::default();
        let (c, _rx) = connection(TransportKind::Streaming);
        let first = registry.attach("chat", &c, true).unwrap();
        let again = registry.attach("chat", &c, true).unwrap();
        assert!(Arc::ptr_eq(&first, &again));
        assert_eq!(first.connection_count(), 1);
    }

    #[test]
    fn closing_connections_during_broadcast_is_safe() {
        let registry = TopicRegistry::default();
        let news = registry.lookup("news", true).unwrap();
        news.pin();
        let mut conns: Vec<_> = (0..16)
            .map(|_| connection_with_capacity(TransportKind::Streaming, 1024))
            .collect();
        for (c, _) in &conns {
            let _ = registry.attach("news", c, false).unwrap();
        }

        let publisher = {
            let news = Arc::clone(&news);
            std::thread::spawn(move || {
                (0..200)
                    .map(|n| news.broadcast(&n.to_string()))
                    .collect::<Vec<_>>()
            })
        };
        for (c, _) in &conns[..8] {
            registry.close_connection(c);
        }
        let delivered = publisher.join().unwrap();
        assert!(delivered.iter().all(|&d| (8..=16).contains(&d)));

        assert_eq!(news.broadcast("after"), 8);
        for (_, rx) in &mut conns[..8] {
            while let Ok(frame) = rx.try_recv() {
                assert_ne!(&*frame.payload, "after");
            }
        }
        for (_, rx) in &mut conns[8..] {
            let mut last = 0;
            let mut count = 0;
            while let Ok(frame) = rx.try_recv() {
                assert!(frame.seq > last);
                last = frame.seq;
                count += 1;
            }
            assert_eq!(count, 201);
        }
    }

    #[test]
    fn empty_topic_never_registered() {
        let registry = TopicRegistry::default();
        assert!(registry.lookup("", true).is_none());
        let (c, _rx) = connection(TransportKind::Streaming);
        assert!(registry.attach("", &c, true).is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn concurrent_lookups_yield_one_broadcaster() {
        let registry = Arc::new(TopicRegistry::default());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let registry = Arc::clone(&registry);
                std::thread::spawn(move || registry.lookup("race", true).unwrap())
            })
            .collect();
        let results: Vec<Arc<Broadcaster>> =
            handles.into_iter().map(|h| h.join().unwrap()).collect();
        for b in &results[1..] {
            assert!(Arc::ptr_eq(&results[0], b));
        }
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn attach_without_create_requires_existing() {
        let registry = TopicRegistry::default();
        let (c, _rx) = connection(TransportKind::Streaming);
        assert!(registry.attach("news", &c, false).is_none());

        let _ = registry.lookup("news", true);
        let b = registry.attach("news", &c, false).unwrap();
        assert_eq!(b.connection_count(), 1);
        assert_eq!(c.topics(), vec!["news"]);
    }

    #[test]
    fn detach_releases_idle_broadcaster() {
        let registry = TopicRegistry::default();
        let (c, _rx) = connection(TransportKind::Streaming);
        let _ = registry.attach("chat", &c, true).unwrap();
        assert_eq!(registry.len(), 1);

        assert!(registry.detach("chat", &c));
        assert!(registry.lookup("chat", false).is_none());
        assert!(c.topics().is_empty());
    }

    #[test]
    fn pinned_broadcaster_survives_detach() {
        let registry = TopicRegistry::default();
        registry.lookup("news", true).unwrap().pin();
        let (c, _rx) = connection(TransportKind::Streaming);
        let _ = registry.attach("news", &c, false).unwrap();

        assert!(registry.detach("news", &c));
        assert!(registry.lookup("news", false).is_some());
    }

    #[test]
    fn close_connection_detaches_everywhere() {
        let registry = TopicRegistry::default();
        let (c, _rx) = connection(TransportKind::Streaming);
        let news = registry.lookup("news", true).unwrap();
        news.pin();
        let _ = registry.attach("news", &c, false);
        let _ = registry.attach("chat", &c, true);
        assert_eq!(registry.connection_count(), 1);

        registry.close_connection(&c);
        assert!(c.is_closed());
        assert_eq!(news.connection_count(), 0);
        assert!(registry.lookup("chat", false).is_none());
        assert_eq!(registry.connection_count(), 0);

        // second close is a no-op
        registry.close_connection(&c);
    }

    #[test]
    fn release_idle_keeps_pinned_and_busy() {
        let registry = TopicRegistry::default();
        registry.lookup("pinned", true).unwrap().pin();
        let _ = registry.lookup("idle", true);
        let (c, _rx) = connection(TransportKind::Streaming);
        let _ = registry.attach("busy", &c, true);

        assert_eq!(registry.release_idle(), 1);
        assert_eq!(registry.topics(), vec!["busy", "pinned"]);
    }

    #[test]
    fn connection_count_is_distinct() {
        let registry = TopicRegistry::default();
        let (a, _ra) = connection(TransportKind::Streaming);
        let (b, _rb) = connection(TransportKind::Streaming);
        let _ = registry.attach("x", &a, true);
        let _ = registry.attach("y", &a, true);
        let _ = registry.attach("y", &b, true);
        assert_eq!(registry.connection_count(), 2);
    }
}
