//! `/health` endpoint.

use serde::Serialize;
use std::time::Instant;

/// Health check response body.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// Always `"ok"` when the server is running.
    pub status: String,
    /// Seconds since the server started.
    pub uptime_secs: u64,
    /// Whether a devtools upstream has been announced.
    pub upstream_ready: bool,
    /// Registered recorders, settled ones included.
    pub recorders: usize,
}

/// Build a health response from live state.
pub fn health_check(start_time: Instant, upstream_ready: bool, recorders: usize) -> HealthResponse {
    HealthResponse {
        status: "ok".into(),
        uptime_secs: start_time.elapsed().as_secs(),
        upstream_ready,
        recorders,
    }
}
