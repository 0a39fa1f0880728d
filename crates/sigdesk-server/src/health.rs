//! `/health` endpoint.

use serde::Serialize;
use std::time::Instant;

/// Health check response body.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// Always `"ok"` while the server runs.
    pub status: String,
    /// Seconds since the server started.
    pub uptime_secs: u64,
    /// Registered device channels.
    pub connections: usize,
    /// Registered tablets.
    pub tablets: usize,
    /// Registered workstations.
    pub workstations: usize,
    /// Sessions not yet finished.
    pub active_sessions: usize,
}

/// Build a health response from live counters.
pub fn health_check(
    start_time: Instant,
    tablets: usize,
    workstations: usize,
    active_sessions: usize,
) -> HealthResponse {
    HealthResponse {
        status: "ok".into(),
        uptime_secs: start_time.elapsed().as_secs(),
        connections: tablets + workstations,
        tablets,
        workstations,
        active_sessions,
    }
}
