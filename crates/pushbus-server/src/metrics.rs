//! Prometheus metrics recorder and `/metrics` endpoint handler.

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use tracing::info;

/// Install the global Prometheus recorder.
///
/// Returns the handle used to render `/metrics`. Fails if a recorder is
/// already installed.
pub fn install_recorder() -> Result<PrometheusHandle, BuildError> {
    let handle = PrometheusBuilder::new().install_recorder()?;
    info!("prometheus metrics recorder installed");
    Ok(handle)
}

/// Render Prometheus text format from the installed recorder.
pub fn render(handle: &PrometheusHandle) -> String {
    handle.render()
}

// Metric names shared across modules.

/// Suspended connections accepted (counter, labels: transport).
pub const PUSH_CONNECTIONS_TOTAL: &str = "push_connections_total";
/// Suspended connections closed (counter, labels: transport).
pub const PUSH_DISCONNECTIONS_TOTAL: &str = "push_disconnections_total";
/// Currently suspended connections (gauge).
pub const PUSH_CONNECTIONS_ACTIVE: &str = "push_connections_active";
/// Connection lifetime in seconds (histogram, labels: transport).
pub const PUSH_CONNECTION_DURATION_SECONDS: &str = "push_connection_duration_seconds";
/// Subscriptions refused (counter, labels: reason).
pub const SUBSCRIBE_REJECTED_TOTAL: &str = "subscribe_rejected_total";
/// Registered broadcasters (gauge).
pub const BROADCASTERS_ACTIVE: &str = "broadcasters_active";
/// Broadcasts performed (counter).
pub const BROADCASTS_TOTAL: &str = "broadcasts_total";
/// Frames handed to connections (counter).
pub const BROADCAST_DELIVERIES_TOTAL: &str = "broadcast_deliveries_total";
/// Frames dropped because a connection queue was full (counter).
pub const BROADCAST_DROPS_TOTAL: &str = "broadcast_drops_total";
/// Frames addressed to connections that were already gone (counter).
pub const STALE_FRAMES_TOTAL: &str = "stale_frames_total";
/// Inbound publish requests (counter, labels: outcome).
pub const PUBLISH_REQUESTS_TOTAL: &str = "publish_requests_total";
