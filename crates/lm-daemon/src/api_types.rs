//! Response types for lm-daemon HTTP endpoints.
//!
//! No business logic lives here.

use lm_runtime::{RoundReport, SinkCounts};
use serde::Serialize;

// ---------------------------------------------------------------------------
// /v1/health
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    pub ok: bool,
    pub service: &'static str,
    pub version: &'static str,
    pub uptime_secs: u64,
}

// ---------------------------------------------------------------------------
// /v1/layers/{layer}/status
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct LayerStatusResponse {
    pub layer: String,
    pub config_hash: String,
    /// Round of the currently published snapshot (0 = none yet).
    pub round: u64,
    pub features: usize,
    pub last_report: Option<RoundReport>,
    pub feature_subscribers: usize,
    /// Changed features waiting to be paced out to feature subscribers.
    pub pacer_backlog: usize,
    /// `None` when persistence is disabled.
    pub persistence: Option<SinkCounts>,
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}
