//! Event → broadcaster fan-out.

use std::sync::Arc;

use pushbus_core::{EventEnvelope, EventMessage, topic};
use pushbus_events::{EventBus, ListenerId};
use serde_json::Value;
use tracing::{trace, warn};

use super::broadcaster::Broadcaster;
use super::registry::TopicRegistry;

/// Where a bound topic's events go.
enum BindTarget {
    /// Exact topic: the broadcaster resolved (and pinned) at bind time.
    Exact(Arc<Broadcaster>),
    /// Pattern: the concrete topic's broadcaster, resolved per event.
    Pattern,
}

/// Bus listener state for one whitelisted topic.
pub struct TopicBinding {
    topic: String,
    target: BindTarget,
    registry: Arc<TopicRegistry>,
}

impl TopicBinding {
    fn new(topic: &str, registry: Arc<TopicRegistry>) -> Self {
        let target = if topic::is_wildcard(topic) {
            BindTarget::Pattern
        } else {
            match registry.lookup(topic, true) {
                Some(b) => {
                    b.pin();
                    BindTarget::Exact(b)
                }
                None => BindTarget::Pattern,
            }
        };
        Self {
            topic: topic.to_owned(),
            target,
            registry,
        }
    }

    /// The topic or pattern this binding was created for.
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Deliver one bus event as a `{"topic", "body"}` envelope.
    ///
    /// Returns how many connections received it.
    pub fn broadcast_event(&self, message: &EventMessage) -> usize {
        let Some(wire) = encode(&message.topic, message.data.clone()) else {
            return 0;
        };
        match &self.target {
            BindTarget::Exact(b) => b.broadcast(&wire),
            BindTarget::Pattern => match self.registry.lookup(&message.topic, false) {
                Some(b) => b.broadcast(&wire),
                None => {
                    trace!(pattern = %self.topic, topic = %message.topic, "no broadcaster for event");
                    0
                }
            },
        }
    }
}

fn encode(topic: &str, body: Value) -> Option<String> {
    match EventEnvelope::new(topic, body).to_wire() {
        Ok(wire) => Some(wire),
        Err(e) => {
            warn!(topic, error = %e, "failed to serialize envelope");
            None
        }
    }
}

/// Publishes events to subscribers, directly or through the event bus.
pub struct EventBroadcaster {
    registry: Arc<TopicRegistry>,
    bus: Arc<EventBus>,
}

impl EventBroadcaster {
    /// Create a publisher over `registry` and `bus`.
    pub fn new(registry: Arc<TopicRegistry>, bus: Arc<EventBus>) -> Self {
        Self { registry, bus }
    }

    /// Route events for `topic` in `namespace` to subscribers.
    ///
    /// An exact topic gets its broadcaster created and pinned now; a
    /// pattern creates nothing and resolves each event's concrete topic
    /// when it arrives.
    pub fn bind(&self, namespace: &str, topic: &str) -> ListenerId {
        let binding = TopicBinding::new(topic, Arc::clone(&self.registry));
        self.bus.on(namespace, topic, move |message| {
            let _ = binding.broadcast_event(message);
        })
    }

    /// Publish through the event bus. Returns how many listeners ran.
    pub fn publish(&self, scope: &str, topic: &str, payload: Value) -> usize {
        self.bus.publish(scope, topic, payload)
    }

    /// Deliver straight to the broadcaster for `topic`, bypassing the bus.
    ///
    /// Silent no-op when nobody is subscribed.
    pub fn deliver(&self, topic: &str, payload: Value) -> usize {
        let Some(broadcaster) = self.registry.lookup(topic, false) else {
            trace!(topic, "no broadcaster for delivery");
            return 0;
        };
        encode(topic, payload).map_or(0, |wire| broadcaster.broadcast(&wire))
    }
}
