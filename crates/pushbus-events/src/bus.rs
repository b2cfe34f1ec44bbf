//! In-process event bus.
//!
//! Listeners register for a `(namespace, topic)` pair where the topic may be
//! a `*` pattern. Publishing a concrete topic invokes every listener whose
//! namespace is equal and whose pattern matches, synchronously, in
//! registration order.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;
use pushbus_core::{EventDefinition, EventMessage, TopicPattern};
use serde_json::Value;
use tracing::{debug, trace, warn};

/// Callback invoked for each matching event.
pub type Listener = Arc<dyn Fn(&EventMessage) + Send + Sync>;

/// Handle returned by [`EventBus::on`], used to remove the listener.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

struct Registration {
    id: ListenerId,
    namespace: String,
    pattern: TopicPattern,
    listener: Listener,
}

/// Namespace + topic keyed listener table.
pub struct EventBus {
    definitions: Vec<EventDefinition>,
    listeners: RwLock<Vec<Registration>>,
    next_id: AtomicU64,
}

impl EventBus {
    /// Create a bus that exposes `definitions` to its consumers.
    pub fn new(definitions: Vec<EventDefinition>) -> Self {
        Self {
            definitions,
            listeners: RwLock::new(Vec::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Event definitions the bus was built with, in declaration order.
    pub fn definitions(&self) -> &[EventDefinition] {
        &self.definitions
    }

    /// Register `listener` for `topic` (exact or pattern) in `namespace`.
    pub fn on<F>(&self, namespace: &str, topic: &str, listener: F) -> ListenerId
    where
        F: Fn(&EventMessage) + Send + Sync + 'static,
    {
        let pattern = TopicPattern::new(topic).unwrap_or_else(|e| {
            warn!(namespace, topic, error = %e, "pattern rejected, listening on the literal topic");
            TopicPattern::exact(topic)
        });
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.listeners.write().push(Registration {
            id,
            namespace: namespace.to_owned(),
            pattern,
            listener: Arc::new(listener),
        });
        debug!(namespace, topic, "listener registered");
        id
    }

    /// Remove a listener. Returns `false` if it was not registered.
    pub fn remove(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners.write();
        let before = listeners.len();
        listeners.retain(|r| r.id != id);
        listeners.len() != before
    }

    /// Publish `data` on `topic` in `namespace`.
    ///
    /// Returns how many listeners were invoked. The table lock is released
    /// before any listener runs, so listeners may register or publish.
    pub fn publish(&self, namespace: &str, topic: &str, data: Value) -> usize {
        let matching: Vec<Listener> = self
            .listeners
            .read()
            .iter()
            .filter(|r| r.namespace == namespace && r.pattern.is_match(topic))
            .map(|r| Arc::clone(&r.listener))
            .collect();

        if matching.is_empty() {
            trace!(namespace, topic, "no listeners for event");
            return 0;
        }

        let message = EventMessage::new(namespace, topic, data);
        for listener in &matching {
            listener(&message);
        }
        debug!(namespace, topic, listeners = matching.len(), "event published");
        matching.len()
    }

    /// Number of registered listeners.
    pub fn listener_count(&self) -> usize {
        self.listeners.read().len()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}
