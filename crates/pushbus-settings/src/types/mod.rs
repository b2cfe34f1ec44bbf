//! Settings type definitions.
//!
//! Field names are camelCase on the wire. Every section implements
//! [`Default`] and is `#[serde(default)]`, so partial JSON is accepted.

mod push;
mod server;

pub use push::*;
pub use server::*;

use serde::{Deserialize, Serialize};

/// Root settings type.
///
/// ```json
/// {
///   "server": { "port": 8765, "basePath": "/events" },
///   "websocket": { "contentType": "application/json" },
///   "events": { "definitions": [{ "topic": "news.*", "browser": true }] }
/// }
/// ```
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PushbusSettings {
    /// Network and connection limits.
    pub server: ServerSettings,
    /// WebSocket frame normalization.
    pub websocket: WebSocketSettings,
    /// Broadcaster replay cache.
    pub cache: CacheSettings,
    /// Event definitions feeding the whitelist.
    pub events: EventSettings,
    /// Log level and format.
    pub logging: LoggingSettings,
}
