//! Per-broadcaster replay caches.
//!
//! A reconnecting long-poll client sends the `seq` of the last frame it saw
//! in the [`CACHE_HEADER`] request header; frames cached after that stamp are
//! replayed before the connection suspends again.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use pushbus_settings::{CacheSettings, CacheStrategy};

use super::connection::OutboundFrame;

/// Header carrying a frame's `seq` to the client, and the client's replay
/// cursor back to the server.
pub const CACHE_HEADER: &str = "x-push-cache-seq";

/// Storage for recently broadcast frames.
pub trait BroadcasterCache: Send + Sync {
    /// Record a frame after it has been stamped.
    fn add(&self, frame: &OutboundFrame);

    /// Frames with `seq` greater than `after`, oldest first.
    fn since(&self, after: u64) -> Vec<OutboundFrame>;

    /// Number of cached frames.
    fn len(&self) -> usize;

    /// Whether nothing is cached.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Cache that stores nothing.
#[derive(Debug, Default)]
pub struct NoopCache;

impl BroadcasterCache for NoopCache {
    fn add(&self, _frame: &OutboundFrame) {}

    fn since(&self, _after: u64) -> Vec<OutboundFrame> {
        Vec::new()
    }

    fn len(&self) -> usize {
        0
    }
}

/// Bounded, time-limited cache of recent frames.
pub struct HeaderReplayCache {
    capacity: usize,
    max_age: Duration,
    entries: Mutex<VecDeque<(Instant, OutboundFrame)>>,
}

impl HeaderReplayCache {
    /// Keep at most `capacity` frames, none older than `max_age`.
    pub fn new(capacity: usize, max_age: Duration) -> Self {
        Self {
            capacity,
            max_age,
            entries: Mutex::new(VecDeque::with_capacity(capacity.min(1024))),
        }
    }

    fn evict_expired(&self, entries: &mut VecDeque<(Instant, OutboundFrame)>) {
        while entries
            .front()
            .is_some_and(|(at, _)| at.elapsed() > self.max_age)
        {
            let _ = entries.pop_front();
        }
    }
}

impl BroadcasterCache for HeaderReplayCache {
    fn add(&self, frame: &OutboundFrame) {
        if self.capacity == 0 {
            return;
        }
        let mut entries = self.entries.lock();
        self.evict_expired(&mut entries);
        while entries.len() >= self.capacity {
            let _ = entries.pop_front();
        }
        entries.push_back((Instant::now(), frame.clone()));
    }

    fn since(&self, after: u64) -> Vec<OutboundFrame> {
        let mut entries = self.entries.lock();
        self.evict_expired(&mut entries);
        entries
            .iter()
            .filter(|(_, f)| f.seq > after)
            .map(|(_, f)| f.clone())
            .collect()
    }

    fn len(&self) -> usize {
        self.entries.lock().len()
    }
}

/// Builds the cache for a newly created broadcaster, given its topic.
pub type CacheFactory = Arc<dyn Fn(&str) -> Arc<dyn BroadcasterCache> + Send + Sync>;

/// Which cache new broadcasters get.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CachePolicy {
    /// [`HeaderReplayCache`] with these limits.
    Header {
        /// Frames kept per broadcaster.
        capacity: usize,
        /// Frames older than this are evicted.
        max_age: Duration,
    },
    /// [`NoopCache`].
    None,
}

impl Default for CachePolicy {
    fn default() -> Self {
        Self::Header {
            capacity: 256,
            max_age: Duration::from_secs(120),
        }
    }
}

impl CachePolicy {
    /// Build from loaded settings.
    pub fn from_settings(settings: &CacheSettings) -> Self {
        match settings.strategy {
            CacheStrategy::Header => Self::Header {
                capacity: settings.capacity,
                max_age: Duration::from_secs(settings.max_age_secs),
            },
            CacheStrategy::None => Self::None,
        }
    }

    /// Factory producing one cache per broadcaster.
    pub fn factory(self) -> CacheFactory {
        match self {
            Self::Header { capacity, max_age } => {
                Arc::new(move |_topic: &str| -> Arc<dyn BroadcasterCache> {
                    Arc::new(HeaderReplayCache::new(capacity, max_age))
                })
            }
            Self::None => Arc::new(|_topic: &str| -> Arc<dyn BroadcasterCache> {
                Arc::new(NoopCache)
            }),
        }
    }
}
