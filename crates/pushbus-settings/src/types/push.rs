//! WebSocket normalization, replay cache, and event definition settings.

use pushbus_core::EventDefinition;
use serde::{Deserialize, Serialize};

/// How inbound WebSocket frames are turned into requests.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct WebSocketSettings {
    /// Content type stamped on reconstructed requests.
    pub content_type: String,
    /// Synthetic HTTP method stamped on reconstructed requests.
    pub method: String,
    /// Marks an explicit path prefix in discrete text messages.
    pub path_delimiter: String,
    /// Whether reconstructed requests may be recycled after dispatch.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recycle_requests: Option<bool>,
    /// Hand frames to the normalizer as streams (full request
    /// reconstruction) instead of discrete messages.
    pub stream_frames: bool,
}

impl WebSocketSettings {
    /// Resolved `recycle_requests`; absent means `false`.
    pub fn destroyable(&self) -> bool {
        self.recycle_requests.unwrap_or(false)
    }
}

impl Default for WebSocketSettings {
    fn default() -> Self {
        Self {
            content_type: "text/plain".into(),
            method: "POST".into(),
            path_delimiter: "@@".into(),
            recycle_requests: None,
            stream_frames: true,
        }
    }
}

/// Replay cache strategy for new broadcasters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheStrategy {
    /// Keep recent frames so reconnecting long-poll clients can catch up.
    #[default]
    Header,
    /// No caching.
    None,
}

/// Replay cache limits.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CacheSettings {
    /// Which cache new broadcasters get.
    pub strategy: CacheStrategy,
    /// Frames kept per broadcaster.
    pub capacity: usize,
    /// Frames older than this are evicted.
    pub max_age_secs: u64,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            strategy: CacheStrategy::Header,
            capacity: 256,
            max_age_secs: 120,
        }
    }
}

/// Where event definitions come from.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EventSettings {
    /// JSON file holding an array of definitions, loaded at startup.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub definitions_file: Option<String>,
    /// Inline definitions, registered before those from the file.
    pub definitions: Vec<EventDefinition>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn websocket_defaults() {
        let ws = WebSocketSettings::default();
        assert_eq!(ws.content_type, "text/plain");
        assert_eq!(ws.method, "POST");
        assert_eq!(ws.path_delimiter, "@@");
        assert!(ws.stream_frames);
    }

    #[test]
    fn recycle_requests_absent_is_false() {
        let ws: WebSocketSettings = serde_json::from_str("{}").unwrap();
        assert_eq!(ws.recycle_requests, None);
        assert!(!ws.destroyable());

        let ws: WebSocketSettings = serde_json::from_str(r#"{"recycleRequests": true}"#).unwrap();
        assert!(ws.destroyable());
    }

    #[test]
    fn cache_strategy_parses_lowercase() {
        let c: CacheSettings = serde_json::from_str(r#"{"strategy": "none"}"#).unwrap();
        assert_eq!(c.strategy, CacheStrategy::None);
        assert_eq!(c.capacity, 256);
    }

    #[test]
    fn inline_definitions_parse() {
        let e: EventSettings = serde_json::from_str(
            r#"{"definitions": [{"namespace": "app", "topic": "news.*", "browser": true}]}"#,
        )
        .unwrap();
        assert_eq!(e.definitions.len(), 1);
        assert!(e.definitions[0].broadcasts_to_client());
        assert!(e.definitions_file.is_none());
    }
}
