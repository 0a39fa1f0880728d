//! Prometheus metrics recorder and metric names.

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use tracing::info;

/// Install the Prometheus metrics recorder (global).
///
/// Returns the `PrometheusHandle` used to render `/metrics`. Call once at
/// startup before anything is recorded.
pub fn install_recorder() -> Result<PrometheusHandle, BuildError> {
    let handle = PrometheusBuilder::new().install_recorder()?;
    info!("prometheus metrics recorder installed");
    Ok(handle)
}

// Metric names, shared by every module that records.

/// Sessions created (counter).
pub const SESSIONS_CREATED_TOTAL: &str = "signature_sessions_created_total";
/// Sessions that reached a terminal status (counter, labels: status).
pub const SESSIONS_FINISHED_TOTAL: &str = "signature_sessions_finished_total";
/// Non-terminal sessions (gauge).
pub const SESSIONS_ACTIVE: &str = "signature_sessions_active";
/// Session lifetime from creation to terminal status (histogram, labels: status).
pub const SESSION_DURATION_SECONDS: &str = "signature_session_duration_seconds";
/// Requests that could not be delivered to the tablet (counter).
pub const DISPATCH_FAILURES_TOTAL: &str = "signature_dispatch_failures_total";
/// Frames for sessions that already finished (counter).
pub const LATE_EVENTS_TOTAL: &str = "signature_late_events_total";
/// Rejected operations (counter, labels: code).
pub const REJECTIONS_TOTAL: &str = "signature_rejections_total";
/// Channels opened (counter, labels: kind).
pub const WS_CONNECTIONS_TOTAL: &str = "ws_connections_total";
/// Channels closed (counter, labels: kind).
pub const WS_DISCONNECTIONS_TOTAL: &str = "ws_disconnections_total";
/// Open channels (gauge, labels: kind).
pub const WS_CONNECTIONS_ACTIVE: &str = "ws_connections_active";
/// Channels replaced by a newer one for the same device (counter, labels: kind).
pub const WS_SUPERSEDED_TOTAL: &str = "ws_superseded_total";
/// Inbound frames with an unhandled type (counter, labels: kind).
pub const WS_UNKNOWN_FRAMES_TOTAL: &str = "ws_unknown_frames_total";
