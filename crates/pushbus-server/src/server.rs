//! `PushServer`: Axum HTTP + WebSocket push server.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use metrics_exporter_prometheus::PrometheusHandle;
use pushbus_core::EventDefinition;
use pushbus_events::EventsError;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::config::ServerConfig;
use crate::context::PushContext;
use crate::health::HealthResponse;
use crate::http;
use crate::metrics;
use crate::shutdown::ShutdownCoordinator;

/// How often idle, unpinned broadcasters are swept.
const IDLE_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Shared state accessible from Axum handlers.
#[derive(Clone)]
pub struct AppState {
    /// Push context.
    pub ctx: Arc<PushContext>,
    /// Prometheus handle (`None` serves `404` at `/metrics`).
    pub metrics: Option<PrometheusHandle>,
}

/// The push server.
pub struct PushServer {
    ctx: Arc<PushContext>,
    shutdown: Arc<ShutdownCoordinator>,
    metrics: Option<PrometheusHandle>,
}

impl PushServer {
    /// Create a server; `definitions` decide which topics clients may
    /// subscribe to before anything is published on them.
    pub fn new(
        config: ServerConfig,
        definitions: std::result::Result<Vec<EventDefinition>, EventsError>,
        metrics: Option<PrometheusHandle>,
    ) -> Self {
        let shutdown = Arc::new(ShutdownCoordinator::new());
        let ctx = PushContext::initialize(config, definitions, shutdown.token());
        Self {
            ctx,
            shutdown,
            metrics,
        }
    }

    /// Build the Axum router with all routes.
    pub fn router(&self) -> Router {
        let state = AppState {
            ctx: Arc::clone(&self.ctx),
            metrics: self.metrics.clone(),
        };

        Router::new()
            .route("/health", get(health_handler))
            .route("/metrics", get(metrics_handler))
            .route(
                &self.ctx.config.topic_route(),
                get(http::subscribe).post(http::publish),
            )
            .layer(TraceLayer::new_for_http())
            .layer(CorsLayer::permissive())
            .with_state(state)
    }

    /// Bind, then serve until shutdown.
    ///
    /// Returns the bound address (useful with port `0`) and the task serving
    /// it. A background task releases idle broadcasters periodically.
    pub async fn listen(&self) -> std::io::Result<(SocketAddr, JoinHandle<()>)> {
        let addr = format!("{}:{}", self.ctx.config.host, self.ctx.config.port);
        let listener = TcpListener::bind(addr.as_str()).await?;
        let local = listener.local_addr()?;
        info!(addr = %local, base_path = %self.ctx.config.base_path, "push server listening");

        let app = self.router();
        let token = self.shutdown.token();
        let sweep_ctx = Arc::clone(&self.ctx);
        let sweep_token = self.shutdown.token();

        let handle = tokio::spawn(async move {
            let sweeper = tokio::spawn(async move {
                let mut interval = tokio::time::interval(IDLE_SWEEP_INTERVAL);
                let _ = interval.tick().await;
                loop {
                    tokio::select! {
                        _ = interval.tick() => {
                            let _ = sweep_ctx.registry.release_idle();
                        }
                        () = sweep_token.cancelled() => break,
                    }
                }
            });

            let served = axum::serve(listener, app)
                .with_graceful_shutdown(async move { token.cancelled().await })
                .await;
            if let Err(e) = served {
                warn!(error = %e, "server error");
            }
            sweeper.abort();
            info!("push server stopped");
        });

        Ok((local, handle))
    }

    /// Push context shared by handlers.
    pub fn ctx(&self) -> &Arc<PushContext> {
        &self.ctx
    }

    /// Get the shutdown coordinator.
    pub fn shutdown(&self) -> &Arc<ShutdownCoordinator> {
        &self.shutdown
    }

    /// Get the server configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.ctx.config
    }
}

/// GET /health
async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(state.ctx.health())
}

/// GET /metrics
async fn metrics_handler(State(state): State<AppState>) -> Response {
    match &state.metrics {
        Some(handle) => metrics::render(handle).into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use pushbus_core::topic::PUSH_SCOPE;
    use serde_json::Value;
    use tower::ServiceExt;

    fn make_server() -> PushServer {
        let defs = vec![
            EventDefinition::new(PUSH_SCOPE, "news").with_browser(true),
            EventDefinition::new(PUSH_SCOPE, "chat.*").with_browser(true),
        ];
        PushServer::new(ServerConfig::default(), Ok(defs), None)
    }

    async fn body_json(resp: Response) -> Value {
        let body = axum::body::to_bytes(resp.into_body(), 10_000)
            .await
            .unwrap();
        serde_json::from_slice(&body).unwrap()
    }

    #[tokio::test]
    async fn health_endpoint_reports_counts() {
        let app = make_server().router();
        let req = Request::builder()
            .uri("/health")
            .body(Body::empty())
            .unwrap();

        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let parsed = body_json(resp).await;
        assert_eq!(parsed["status"], "ok");
        assert_eq!(parsed["connections"], 0);
        assert_eq!(parsed["broadcasters"], 1);
        assert_eq!(parsed["whitelisted_topics"], 2);
    }

    #[tokio::test]
    async fn metrics_without_recorder_is_not_found() {
        let app = make_server().router();
        let req = Request::builder()
            .uri("/metrics")
            .body(Body::empty())
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn metrics_with_handle_renders() {
        let handle = metrics_exporter_prometheus::PrometheusBuilder::new()
            .build_recorder()
            .handle();
        let server = PushServer::new(ServerConfig::default(), Ok(Vec::new()), Some(handle));
        let req = Request::builder()
            .uri("/metrics")
            .body(Body::empty())
            .unwrap();
        let resp = server.router().oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn subscribe_unknown_primary_is_forbidden() {
        let server = make_server();
        let req = Request::builder()
            .uri("/events/unknown")
            .body(Body::empty())
            .unwrap();
        let resp = server.router().oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);
        assert_eq!(server.ctx().active_connections(), 0);
    }

    #[tokio::test]
    async fn subscribe_over_limit_is_unavailable() {
        let config = ServerConfig {
            max_connections: 0,
            ..ServerConfig::default()
        };
        let server = PushServer::new(
            config,
            Ok(vec![EventDefinition::new(PUSH_SCOPE, "news").with_browser(true)]),
            None,
        );
        let req = Request::builder()
            .uri("/events/news")
            .body(Body::empty())
            .unwrap();
        let resp = server.router().oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn long_poll_completes_with_no_content_on_shutdown() {
        let server = make_server();
        let app = server.router();
        let req = Request::builder()
            .uri("/events/news")
            .header("x-push-transport", "long-polling")
            .body(Body::empty())
            .unwrap();

        let pending = tokio::spawn(app.oneshot(req));
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(server.ctx().active_connections(), 1);

        server.shutdown().shutdown();
        let resp = pending.await.unwrap().unwrap();
        assert_eq!(resp.status(), StatusCode::NO_CONTENT);
        assert_eq!(server.ctx().active_connections(), 0);
    }

    #[tokio::test]
    async fn publish_returns_outcome() {
        let app = make_server().router();
        let req = Request::builder()
            .method("POST")
            .uri("/events/news")
            .header("content-type", "application/json")
            .body(Body::from(r#"{"x":1}"#))
            .unwrap();

        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let parsed = body_json(resp).await;
        assert_eq!(parsed["status"], "published");
        assert_eq!(parsed["topic"], "news");
        assert_eq!(parsed["listeners"], 1);
    }

    #[tokio::test]
    async fn http_publish_ignores_frame_method_setting() {
        let mut config = ServerConfig::default();
        config.normalizer.method = axum::http::Method::PUT;
        let server = PushServer::new(
            config,
            Ok(vec![EventDefinition::new(PUSH_SCOPE, "news").with_browser(true)]),
            None,
        );
        let req = Request::builder()
            .method("POST")
            .uri("/events/news")
            .body(Body::from(r#"{"x":1}"#))
            .unwrap();
        let resp = server.router().oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(body_json(resp).await["status"], "published");
    }

    #[tokio::test]
    async fn publish_invalid_json_is_ignored() {
        let app = make_server().router();
        let req = Request::builder()
            .method("POST")
            .uri("/events/news")
            .body(Body::from("{{"))
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(body_json(resp).await["status"], "ignored");
    }

    #[tokio::test]
    async fn publish_over_size_limit_is_rejected() {
        let config = ServerConfig {
            max_message_size: 8,
            ..ServerConfig::default()
        };
        let app = PushServer::new(config, Ok(Vec::new()), None).router();
        let req = Request::builder()
            .method("POST")
            .uri("/events/news")
            .body(Body::from(r#"{"payload":"too long"}"#))
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::PAYLOAD_TOO_LARGE);
    }

    #[tokio::test]
    async fn unknown_route_returns_404() {
        let app = make_server().router();
        let req = Request::builder()
            .uri("/nonexistent")
            .body(Body::empty())
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn listen_binds_ephemeral_port_and_stops() {
        let server = make_server();
        let (addr, handle) = server.listen().await.unwrap();
        assert_ne!(addr.port(), 0);
        server
            .shutdown()
            .graceful_shutdown(vec![handle], Some(Duration::from_secs(5)))
            .await;
    }
}
