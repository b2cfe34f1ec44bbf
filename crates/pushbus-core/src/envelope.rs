//! Outbound wire envelope and inbound publish resolution.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::Result;
use crate::topic;

/// The single JSON object delivered to subscribers for every broadcast.
///
/// Serializes as exactly `{"topic": <string>, "body": <any>}`, in that order.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EventEnvelope {
    /// Concrete topic the event was published on.
    pub topic: String,
    /// Arbitrary JSON payload.
    pub body: Value,
}

impl EventEnvelope {
    /// Build an envelope for `topic` carrying `body`.
    pub fn new(topic: impl Into<String>, body: Value) -> Self {
        Self {
            topic: topic.into(),
            body,
        }
    }

    /// Serialize to the wire text format.
    pub fn to_wire(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// A client-originated publish after topic and payload have been resolved.
#[derive(Clone, Debug, PartialEq)]
pub struct InboundPublish {
    /// Topic to publish on.
    pub topic: String,
    /// Payload handed to the event bus.
    pub payload: Value,
}

impl InboundPublish {
    /// Resolve a parsed request body against the topic taken from the path.
    ///
    /// An object body may override the topic with a `topic` key and narrow
    /// the payload with a `body` key; otherwise the whole body is the payload.
    /// Returns `None` when no topic can be determined.
    pub fn resolve(body: Value, path_topic: Option<&str>) -> Option<Self> {
        let (topic, payload) = match body {
            Value::Object(mut map) => {
                let topic = match map.get("topic") {
                    Some(Value::String(s)) => Some(s.clone()),
                    Some(Value::Null) | None => path_topic.map(str::to_owned),
                    Some(other) => Some(other.to_string()),
                };
                let payload = match map.remove("body") {
                    Some(inner) => inner,
                    None => Value::Object(map),
                };
                (topic, payload)
            }
            other => (path_topic.map(str::to_owned), other),
        };

        let topic = topic.filter(|t| topic::validate(t).is_ok())?;
        Some(Self { topic, payload })
    }
}
