//! lm-runtime
//!
//! Ingestion round loop and fan-out for one feature layer:
//!
//! - [`ChangeDetector`]: pass/suppress per feature, ignoring volatile properties.
//! - [`SnapshotStore`]: merged current feature set.
//! - [`PersistenceSink`]: bounded, fire-and-forget repository writes.
//! - [`BroadcastPipeline`] / [`PipelineHandle`]: the round loop and the two
//!   subscription streams.
//!
//! Detector and store are plain owned state mutated only by the round loop.

pub mod distinct;
pub mod pipeline;
pub mod sink;
pub mod snapshot;

use std::fmt;

pub use distinct::{ChangeDetector, ContentHash, Verdict};
pub use pipeline::{
    BroadcastPipeline, CollectionSnapshot, FeatureEvent, PipelineHandle, PipelineSettings,
    RoundReport,
};
pub use sink::{PersistenceSink, SinkCounts};
pub use snapshot::SnapshotStore;

/// Terminal error on a subscriber's stream. Other subscribers are unaffected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryError {
    /// The subscriber fell behind and `skipped` events were discarded.
    Lagged { skipped: u64 },
}

impl fmt::Display for DeliveryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeliveryError::Lagged { skipped } => {
                write!(f, "subscriber lagged; {skipped} events skipped")
            }
        }
    }
}

impl std::error::Error for DeliveryError {}
