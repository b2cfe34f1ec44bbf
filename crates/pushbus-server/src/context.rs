//! Shared state handed to every handler.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Instant;

use axum::http::Method;
use metrics::{counter, gauge, histogram};
use pushbus_core::topic::{self, PUSH_SCOPE};
use pushbus_core::{EventDefinition, InboundPublish};
use pushbus_events::{EventBus, EventsError};
use serde::Serialize;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::broadcast::{
    ClientConnection, EventBroadcaster, SubscriptionBinder, TopicRegistry, WhitelistIndex,
};
use crate::config::ServerConfig;
use crate::errors::{PushError, Result};
use crate::health::{HealthResponse, health_check};
use crate::metrics::{
    PUBLISH_REQUESTS_TOTAL, PUSH_CONNECTION_DURATION_SECONDS, PUSH_CONNECTIONS_ACTIVE,
    PUSH_CONNECTIONS_TOTAL, PUSH_DISCONNECTIONS_TOTAL,
};
use crate::request::InboundRequest;
use crate::websocket::{MessageNormalizer, WebSocketProtocol};

/// What happened to a dispatched request.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum DispatchOutcome {
    /// Published on the event bus.
    Published {
        /// Resolved topic.
        topic: String,
        /// Bus listeners that ran.
        listeners: usize,
    },
    /// Body was not JSON or carried no topic.
    Ignored,
}

/// Registry, bus, whitelist and protocol, built once at startup.
pub struct PushContext {
    /// Topic → broadcaster registry.
    pub registry: Arc<TopicRegistry>,
    /// Application event bus.
    pub bus: Arc<EventBus>,
    /// Auto-creatable topics.
    pub whitelist: Arc<WhitelistIndex>,
    /// Attaches new connections to their topics.
    pub binder: SubscriptionBinder,
    /// Event fan-out.
    pub publisher: Arc<EventBroadcaster>,
    /// WebSocket frame normalization.
    pub normalizer: Arc<dyn WebSocketProtocol>,
    /// Server configuration.
    pub config: ServerConfig,
    active: AtomicUsize,
    started_at: Instant,
    shutdown: CancellationToken,
}

impl PushContext {
    /// Build the context from configuration and loaded event definitions.
    ///
    /// If the definitions could not be loaded the server still runs, with an
    /// empty whitelist and nothing bound to the bus.
    pub fn initialize(
        config: ServerConfig,
        definitions: std::result::Result<Vec<EventDefinition>, EventsError>,
        shutdown: CancellationToken,
    ) -> Arc<Self> {
        let definitions = definitions.unwrap_or_else(|e| {
            error!(error = %e, "event definitions unavailable, broadcasting disabled");
            Vec::new()
        });

        let registry = Arc::new(TopicRegistry::with_policy(config.cache));
        let bus = Arc::new(EventBus::new(definitions));
        let publisher = Arc::new(EventBroadcaster::new(
            Arc::clone(&registry),
            Arc::clone(&bus),
        ));
        let whitelist = Arc::new(WhitelistIndex::build(bus.definitions(), &publisher));
        for entry in whitelist.entries() {
            if entry.namespace != PUSH_SCOPE {
                warn!(
                    topic = %entry.pattern,
                    namespace = %entry.namespace,
                    scope = PUSH_SCOPE,
                    "whitelisted topic outside the client publish scope, only in-process publishers reach it"
                );
            }
        }
        let binder = SubscriptionBinder::new(Arc::clone(&registry), Arc::clone(&whitelist));
        let normalizer: Arc<dyn WebSocketProtocol> =
            Arc::new(MessageNormalizer::new(config.normalizer.clone()));

        info!(
            definitions = bus.definitions().len(),
            whitelisted = whitelist.len(),
            broadcasters = registry.len(),
            "push context initialized"
        );

        Arc::new(Self {
            registry,
            bus,
            whitelist,
            binder,
            publisher,
            normalizer,
            config,
            active: AtomicUsize::new(0),
            started_at: Instant::now(),
            shutdown,
        })
    }

    /// Token cancelled when the server shuts down.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Publish an inbound request's body on the event bus.
    ///
    /// The path's last segment is the default topic; an object body may
    /// override it with `topic` and select the payload with `body`.
    ///
    /// HTTP requests must be `POST`. Requests rebuilt from WebSocket frames
    /// must carry the configured normalizer method.
    pub async fn dispatch(&self, request: InboundRequest) -> Result<DispatchOutcome> {
        let accepted = if request.is_websocket_frame() {
            self.config.normalizer.method.clone()
        } else {
            Method::POST
        };
        if request.method != accepted {
            counter!(PUBLISH_REQUESTS_TOTAL, "outcome" => "rejected").increment(1);
            return Err(PushError::MethodNotAllowed(request.method));
        }

        let path_topic = topic::from_path(&request.path_info);
        let bytes = request.body.into_bytes(self.config.max_message_size).await?;

        let body: Value = match serde_json::from_slice(&bytes) {
            Ok(v) => v,
            Err(e) => {
                warn!(path = %request.path_info, error = %e, "publish body is not valid JSON");
                counter!(PUBLISH_REQUESTS_TOTAL, "outcome" => "ignored").increment(1);
                return Ok(DispatchOutcome::Ignored);
            }
        };

        let Some(publish) = InboundPublish::resolve(body, path_topic.as_deref()) else {
            debug!(path = %request.path_info, "publish without topic ignored");
            counter!(PUBLISH_REQUESTS_TOTAL, "outcome" => "ignored").increment(1);
            return Ok(DispatchOutcome::Ignored);
        };

        let listeners = self
            .publisher
            .publish(PUSH_SCOPE, &publish.topic, publish.payload);
        if listeners == 0 {
            debug!(topic = %publish.topic, scope = PUSH_SCOPE, "client publish reached no listeners");
        } else {
            debug!(topic = %publish.topic, listeners, "client publish");
        }
        counter!(PUBLISH_REQUESTS_TOTAL, "outcome" => "published").increment(1);
        Ok(DispatchOutcome::Published {
            topic: publish.topic,
            listeners,
        })
    }

    /// Count `conn` against `max_connections`.
    ///
    /// The returned guard closes the connection in the registry when dropped.
    pub fn admit(self: &Arc<Self>, conn: Arc<ClientConnection>) -> Result<ConnectionGuard> {
        let limit = self.config.max_connections;
        let admitted = self
            .active
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                (n < limit).then_some(n + 1)
            })
            .is_ok();
        if !admitted {
            warn!(limit, conn_id = %conn.id, "connection limit reached");
            return Err(PushError::ConnectionLimit(limit));
        }

        let transport = conn.transport.as_str();
        counter!(PUSH_CONNECTIONS_TOTAL, "transport" => transport).increment(1);
        gauge!(PUSH_CONNECTIONS_ACTIVE).increment(1.0);
        debug!(conn_id = %conn.id, transport, "connection admitted");
        Ok(ConnectionGuard {
            ctx: Arc::clone(self),
            conn,
        })
    }

    /// Currently admitted connections.
    pub fn active_connections(&self) -> usize {
        self.active.load(Ordering::Acquire)
    }

    /// Current health snapshot.
    pub fn health(&self) -> HealthResponse {
        health_check(
            self.started_at,
            self.active_connections(),
            self.registry.len(),
            self.whitelist.len(),
        )
    }
}

/// Keeps a connection admitted; dropping it closes the connection.
pub struct ConnectionGuard {
    ctx: Arc<PushContext>,
    conn: Arc<ClientConnection>,
}

impl ConnectionGuard {
    /// The guarded connection.
    pub fn connection(&self) -> &Arc<ClientConnection> {
        &self.conn
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.ctx.registry.close_connection(&self.conn);
        let _ = self.ctx.active.fetch_sub(1, Ordering::AcqRel);
        let transport = self.conn.transport.as_str();
        counter!(PUSH_DISCONNECTIONS_TOTAL, "transport" => transport).increment(1);
        gauge!(PUSH_CONNECTIONS_ACTIVE).decrement(1.0);
        histogram!(PUSH_CONNECTION_DURATION_SECONDS, "transport" => transport)
            .record(self.conn.age().as_secs_f64());
    }
}
