//! Topics clients may subscribe to before anyone has published on them.

use pushbus_core::{EventDefinition, TopicPattern, topic};
use tracing::{debug, info, warn};

use super::publisher::EventBroadcaster;

/// One auto-creatable topic (or pattern) and the namespace that emits it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WhitelistEntry {
    /// Topic or `*` pattern.
    pub pattern: TopicPattern,
    /// Namespace of the definition that declared it.
    pub namespace: String,
}

/// Immutable, ordered set of whitelist entries.
#[derive(Clone, Debug, Default)]
pub struct WhitelistIndex {
    entries: Vec<WhitelistEntry>,
}

impl WhitelistIndex {
    /// Build from event definitions, binding each broadcastable topic into
    /// the event bus through `publisher`.
    ///
    /// Definitions without `browser: true` or without a topic are ignored.
    /// When the same topic is declared twice the first declaration wins.
    pub fn build(definitions: &[EventDefinition], publisher: &EventBroadcaster) -> Self {
        let mut entries: Vec<WhitelistEntry> = Vec::new();
        for def in definitions {
            if !def.broadcasts_to_client() || topic::validate(&def.topic).is_err() {
                continue;
            }
            if entries.iter().any(|e| e.pattern.as_str() == def.topic) {
                debug!(topic = %def.topic, namespace = %def.namespace, "duplicate whitelist topic skipped");
                continue;
            }
            let pattern = match TopicPattern::new(&def.topic) {
                Ok(pattern) => pattern,
                Err(e) => {
                    warn!(topic = %def.topic, error = %e, "unusable whitelist pattern skipped");
                    continue;
                }
            };
            let _ = publisher.bind(&def.namespace, &def.topic);
            entries.push(WhitelistEntry {
                pattern,
                namespace: def.namespace.clone(),
            });
        }
        info!(topics = entries.len(), "whitelist built");
        Self { entries }
    }

    /// First entry whose pattern matches `topic`.
    pub fn matches(&self, topic: &str) -> Option<&WhitelistEntry> {
        self.entries
            .iter()
            .find(|e| e.pattern.is_match(topic))
    }

    /// Entries in registration order.
    pub fn entries(&self) -> &[WhitelistEntry] {
        &self.entries
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the whitelist is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
