//! Shared runtime state for lm-daemon.
//!
//! Handlers receive `State<Arc<AppState>>` from Axum. The pipeline itself runs
//! in its own task; this module only holds its subscriber handle.

use lm_runtime::{PersistenceSink, PipelineHandle};
use serde::{Deserialize, Serialize};

/// Static build metadata included in health responses.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BuildInfo {
    pub service: &'static str,
    pub version: &'static str,
}

#[derive(Clone, Debug)]
pub struct AppState {
    pub build: BuildInfo,
    /// Subscriber side of the layer's pipeline.
    pub pipeline: PipelineHandle,
    /// `None` when persistence is disabled.
    pub sink: Option<PersistenceSink>,
    /// Hash of the canonical effective config.
    pub config_hash: String,
}

impl AppState {
    pub fn new(
        pipeline: PipelineHandle,
        sink: Option<PersistenceSink>,
        config_hash: impl Into<String>,
    ) -> Self {
        Self {
            build: BuildInfo {
                service: "lm-daemon",
                version: env!("CARGO_PKG_VERSION"),
            },
            pipeline,
            sink,
            config_hash: config_hash.into(),
        }
    }
}

/// Seconds since the first call. `main` calls this once at startup so the
/// count covers the process lifetime.
pub fn uptime_secs() -> u64 {
    static START: std::sync::OnceLock<std::time::Instant> = std::sync::OnceLock::new();
    START
        .get_or_init(std::time::Instant::now)
        .elapsed()
        .as_secs()
}
