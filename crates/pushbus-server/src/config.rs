//! Server configuration.

use std::time::Duration;

use axum::http::Method;
use pushbus_settings::PushbusSettings;
use tracing::warn;

use crate::broadcast::cache::CachePolicy;

/// How WebSocket frames are reconstructed into inbound requests.
#[derive(Clone, Debug)]
pub struct NormalizerConfig {
    /// Content type stamped on every reconstructed request.
    pub content_type: String,
    /// Method stamped on every reconstructed request.
    pub method: Method,
    /// Marks an explicit path prefix in discrete text messages.
    pub path_delimiter: String,
    /// Whether reconstructed requests may be recycled after dispatch.
    pub destroyable: bool,
    /// Deliver frames as streams rather than discrete messages.
    pub stream_frames: bool,
}

impl Default for NormalizerConfig {
    fn default() -> Self {
        Self {
            content_type: "text/plain".into(),
            method: Method::POST,
            path_delimiter: "@@".into(),
            destroyable: false,
            stream_frames: true,
        }
    }
}

/// Configuration for the push server.
#[derive(Clone, Debug)]
pub struct ServerConfig {
    /// Host to bind (default `"127.0.0.1"`).
    pub host: String,
    /// Port to bind (default `0` for auto-assign).
    pub port: u16,
    /// Prefix under which topic paths are routed.
    pub base_path: String,
    /// Maximum concurrently suspended connections.
    pub max_connections: usize,
    /// Outbound frame queue depth per connection.
    pub send_queue_capacity: usize,
    /// WebSocket ping interval.
    pub heartbeat_interval: Duration,
    /// Close a WebSocket that has not answered a ping for this long.
    pub heartbeat_timeout: Duration,
    /// Largest inbound body or WebSocket message, in bytes.
    pub max_message_size: usize,
    /// Replay cache given to new broadcasters.
    pub cache: CachePolicy,
    /// WebSocket frame normalization.
    pub normalizer: NormalizerConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 0,
            base_path: "/events".into(),
            max_connections: 1024,
            send_queue_capacity: 256,
            heartbeat_interval: Duration::from_secs(30),
            heartbeat_timeout: Duration::from_secs(90),
            max_message_size: 1024 * 1024,
            cache: CachePolicy::default(),
            normalizer: NormalizerConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Build from loaded settings.
    pub fn from_settings(settings: &PushbusSettings) -> Self {
        let server = &settings.server;
        let ws = &settings.websocket;

        let method = Method::from_bytes(ws.method.as_bytes()).unwrap_or_else(|_| {
            warn!(method = %ws.method, "invalid websocket method, using POST");
            Method::POST
        });

        Self {
            host: server.host.clone(),
            port: server.port,
            base_path: server.base_path.clone(),
            max_connections: server.max_connections,
            send_queue_capacity: server.send_queue_capacity.max(1),
            heartbeat_interval: Duration::from_secs(server.heartbeat_interval_secs.max(1)),
            heartbeat_timeout: Duration::from_secs(server.heartbeat_timeout_secs.max(1)),
            max_message_size: server.max_message_size,
            cache: CachePolicy::from_settings(&settings.cache),
            normalizer: NormalizerConfig {
                content_type: ws.content_type.clone(),
                method,
                path_delimiter: ws.path_delimiter.clone(),
                destroyable: ws.destroyable(),
                stream_frames: ws.stream_frames,
            },
        }
    }

    /// Route pattern for topic paths, e.g. `/events/{*topic_path}`.
    pub fn topic_route(&self) -> String {
        format!("{}/{{*topic_path}}", self.base_prefix())
    }

    /// Strip the base path from a request path, leaving the topic path.
    ///
    /// `/events/news/sports` → `/news/sports`.
    pub fn path_info<'a>(&self, uri_path: &'a str) -> &'a str {
        uri_path.strip_prefix(self.base_prefix()).unwrap_or(uri_path)
    }

    fn base_prefix(&self) -> &str {
        self.base_path.trim_end_matches('/')
    }
}
