//! Application event definitions and in-flight event messages.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::topic::PUSH_SCOPE;

/// Declares an application event: which namespace emits it, on which topic,
/// and whether it should be pushed to connected clients.
///
/// ```json
/// { "namespace": "browser", "topic": "news.*", "browser": true }
/// ```
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventDefinition {
    /// Namespace that owns the event.
    #[serde(default = "default_namespace")]
    pub namespace: String,
    /// Topic or topic pattern.
    #[serde(default)]
    pub topic: String,
    /// Push to clients. Absent means `false`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub browser: Option<bool>,
    /// Any other attributes carried with the definition.
    #[serde(flatten)]
    pub attributes: Map<String, Value>,
}

/// Client publishes arrive in [`PUSH_SCOPE`], so that is the default.
fn default_namespace() -> String {
    PUSH_SCOPE.to_owned()
}

impl EventDefinition {
    /// Definition with the given namespace and topic and no client broadcast.
    pub fn new(namespace: impl Into<String>, topic: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            topic: topic.into(),
            browser: None,
            attributes: Map::new(),
        }
    }

    /// Builder-style setter for the `browser` flag.
    #[must_use]
    pub fn with_browser(mut self, browser: bool) -> Self {
        self.browser = Some(browser);
        self
    }

    /// Whether events on this definition are pushed to clients.
    pub fn broadcasts_to_client(&self) -> bool {
        self.browser.unwrap_or(false)
    }
}

/// One event travelling through the bus.
#[derive(Clone, Debug, PartialEq)]
pub struct EventMessage {
    /// Namespace (scope) the event was published in.
    pub namespace: String,
    /// Concrete topic.
    pub topic: String,
    /// Payload.
    pub data: Value,
}

impl EventMessage {
    /// Build a message.
    pub fn new(namespace: impl Into<String>, topic: impl Into<String>, data: Value) -> Self {
        Self {
            namespace: namespace.into(),
            topic: topic.into(),
            data,
        }
    }
}
