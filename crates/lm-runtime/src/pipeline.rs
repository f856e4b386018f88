//! Broadcast pipeline.
//!
//! One ingestion round at a time: fetch, decode, merge, detect, publish,
//! persist. The pipeline owns the change record and the snapshot store.
//! Subscribers reach the round output through a cloneable [`PipelineHandle`]:
//!
//! - full collection: `watch` channel, so a new subscriber sees the latest
//!   snapshot first and then every later one. A slow subscriber skips
//!   intermediate snapshots instead of lagging.
//! - per feature: a pacer task drains passed features from an unbounded
//!   queue and sends them on a `broadcast` channel with at least
//!   `pacing` between sends. A subscriber that falls more than
//!   `diff_capacity` events behind gets one `DeliveryError::Lagged` and its
//!   stream ends. When a round queues events while earlier ones are still
//!   waiting to be paced out, the round logs a warning and reports the
//!   backlog it found.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::stream::{self, BoxStream, StreamExt};
use lm_config::LiveMapConfig;
use lm_import::{ImportError, Importer};
use lm_schemas::{Feature, FeatureSet, RETRIEVAL_TIME};
use serde::Serialize;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_stream::wrappers::WatchStream;

use crate::distinct::{ChangeDetector, Verdict};
use crate::sink::PersistenceSink;
use crate::snapshot::SnapshotStore;
use crate::DeliveryError;

// ---------------------------------------------------------------------------
// Settings and round output
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct PipelineSettings {
    pub layer: String,
    pub volatile_properties: Vec<String>,
    pub pacing: Duration,
    pub diff_capacity: usize,
}

impl PipelineSettings {
    pub fn new(layer: impl Into<String>) -> Self {
        Self {
            layer: layer.into(),
            volatile_properties: vec![RETRIEVAL_TIME.to_string()],
            pacing: Duration::from_millis(5),
            diff_capacity: 1024,
        }
    }

    pub fn from_config(cfg: &LiveMapConfig) -> Self {
        Self {
            layer: cfg.layer.name.clone(),
            volatile_properties: cfg.layer.volatile_properties.clone(),
            pacing: cfg.stream.pacing(),
            diff_capacity: cfg.stream.diff_capacity,
        }
    }

    pub fn with_pacing(mut self, pacing: Duration) -> Self {
        self.pacing = pacing;
        self
    }

    pub fn with_diff_capacity(mut self, capacity: usize) -> Self {
        self.diff_capacity = capacity;
        self
    }
}

/// Counts for one completed round.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RoundReport {
    pub round: u64,
    pub received: usize,
    pub decoded: usize,
    pub dropped: usize,
    pub passed: usize,
    pub suppressed: usize,
    /// Events from earlier rounds still waiting on the pacer when this
    /// round's events were queued.
    pub pacer_backlog: usize,
}

/// Full-collection event: the whole merged set after a round.
///
/// Round 0 is the empty set published before the first round.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CollectionSnapshot {
    pub layer: String,
    pub round: u64,
    pub features: FeatureSet,
}

/// Per-feature event: one feature judged changed in `round`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FeatureEvent {
    pub layer: String,
    pub round: u64,
    pub feature: Arc<Feature>,
}

// ---------------------------------------------------------------------------
// Handle
// ---------------------------------------------------------------------------

/// Subscriber-side view of a pipeline. Cheap to clone; registering a
/// subscription never blocks the round loop.
#[derive(Debug, Clone)]
pub struct PipelineHandle {
    layer: Arc<str>,
    collection: watch::Receiver<Arc<CollectionSnapshot>>,
    diffs: broadcast::Sender<FeatureEvent>,
    report: watch::Receiver<Option<RoundReport>>,
    backlog: Arc<AtomicUsize>,
}

impl PipelineHandle {
    pub fn layer(&self) -> &str {
        &self.layer
    }

    /// Latest published snapshot.
    pub fn current(&self) -> Arc<CollectionSnapshot> {
        self.collection.borrow().clone()
    }

    pub fn last_report(&self) -> Option<RoundReport> {
        *self.report.borrow()
    }

    /// Current snapshot first, then one item per later round.
    ///
    /// Ends when the pipeline is dropped.
    pub fn subscribe_collection(&self) -> BoxStream<'static, Arc<CollectionSnapshot>> {
        WatchStream::new(self.collection.clone()).boxed()
    }

    /// Passed features from rounds published after this call.
    ///
    /// Yields `Err(DeliveryError::Lagged)` at most once, as its last item.
    pub fn subscribe_features(&self) -> BoxStream<'static, Result<FeatureEvent, DeliveryError>> {
        let rx = self.diffs.subscribe();
        stream::unfold(Some(rx), |state| async move {
            let mut rx = state?;
            match rx.recv().await {
                Ok(ev) => Some((Ok(ev), Some(rx))),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    Some((Err(DeliveryError::Lagged { skipped }), None))
                }
                Err(broadcast::error::RecvError::Closed) => None,
            }
        })
        .boxed()
    }

    /// Number of live per-feature subscribers.
    pub fn feature_subscribers(&self) -> usize {
        self.diffs.receiver_count()
    }

    /// Passed features queued for the pacer but not yet sent.
    pub fn pacer_backlog(&self) -> usize {
        self.backlog.load(Ordering::SeqCst)
    }
}

// ---------------------------------------------------------------------------
// Pipeline
// ---------------------------------------------------------------------------

pub struct BroadcastPipeline {
    settings: PipelineSettings,
    importer: Arc<dyn Importer>,
    sink: Option<PersistenceSink>,
    detector: ChangeDetector,
    store: SnapshotStore,
    round: u64,
    collection_tx: watch::Sender<Arc<CollectionSnapshot>>,
    report_tx: watch::Sender<Option<RoundReport>>,
    pacer_tx: mpsc::UnboundedSender<Vec<FeatureEvent>>,
    backlog: Arc<AtomicUsize>,
    handle: PipelineHandle,
}

impl BroadcastPipeline {
    /// Build the pipeline and spawn its pacer task.
    ///
    /// Must be called from within a Tokio runtime. `sink = None` disables
    /// persistence.
    pub fn new(
        settings: PipelineSettings,
        importer: Arc<dyn Importer>,
        sink: Option<PersistenceSink>,
    ) -> Self {
        let initial = Arc::new(CollectionSnapshot {
            layer: settings.layer.clone(),
            round: 0,
            features: FeatureSet::new(),
        });
        let (collection_tx, collection_rx) = watch::channel(initial);
        let (report_tx, report_rx) = watch::channel(None);
        let (diffs, _) = broadcast::channel(settings.diff_capacity.max(1));
        let (pacer_tx, pacer_rx) = mpsc::unbounded_channel();
        let backlog = Arc::new(AtomicUsize::new(0));

        tokio::spawn(pace(
            pacer_rx,
            diffs.clone(),
            settings.pacing,
            Arc::clone(&backlog),
        ));

        let handle = PipelineHandle {
            layer: Arc::from(settings.layer.as_str()),
            collection: collection_rx,
            diffs,
            report: report_rx,
            backlog: Arc::clone(&backlog),
        };

        Self {
            detector: ChangeDetector::new(settings.volatile_properties.iter().cloned()),
            settings,
            importer,
            sink,
            store: SnapshotStore::new(),
            round: 0,
            collection_tx,
            report_tx,
            pacer_tx,
            backlog,
            handle,
        }
    }

    pub fn handle(&self) -> PipelineHandle {
        self.handle.clone()
    }

    pub fn detector(&self) -> &ChangeDetector {
        &self.detector
    }

    pub fn store(&self) -> &SnapshotStore {
        &self.store
    }

    pub fn sink(&self) -> Option<&PersistenceSink> {
        self.sink.as_ref()
    }

    /// Run one ingestion round.
    ///
    /// Returns once every output has been dispatched; paced per-feature sends
    /// and persistence continue in the background. An importer failure
    /// publishes nothing and leaves the round counter unchanged.
    ///
    /// The pacer queue is unbounded. If `passed * pacing` keeps exceeding the
    /// poll interval, per-feature latency grows; each such round logs a
    /// warning and records the backlog in its report.
    pub async fn run_round(&mut self) -> Result<RoundReport, ImportError> {
        let layer = self.settings.layer.as_str();
        let batch = self.importer.fetch_batch().await?;
        self.round += 1;
        let round = self.round;

        let mut report = RoundReport {
            round,
            received: batch.len(),
            ..RoundReport::default()
        };

        let mut decoded = Vec::with_capacity(batch.len());
        for raw in batch {
            match raw.geometry.decode() {
                Ok(geometry) => decoded.push(Feature {
                    id: raw.id,
                    geometry,
                    properties: raw.properties,
                }),
                Err(e) => {
                    report.dropped += 1;
                    tracing::warn!(
                        layer,
                        round,
                        feature_id = %raw.id,
                        error = %e,
                        "dropping feature with malformed geometry"
                    );
                }
            }
        }
        report.decoded = decoded.len();

        let merged = self.store.merge(decoded.iter().cloned()).clone();

        let mut passed = Vec::new();
        for feature in decoded {
            match self.detector.evaluate(&feature) {
                Verdict::Pass => passed.push(Arc::new(feature)),
                Verdict::Suppress => report.suppressed += 1,
            }
        }
        report.passed = passed.len();

        self.collection_tx.send_replace(Arc::new(CollectionSnapshot {
            layer: layer.to_string(),
            round,
            features: merged,
        }));

        if !passed.is_empty() {
            let events: Vec<FeatureEvent> = passed
                .iter()
                .map(|feature| FeatureEvent {
                    layer: layer.to_string(),
                    round,
                    feature: Arc::clone(feature),
                })
                .collect();

            report.pacer_backlog = self.backlog.fetch_add(events.len(), Ordering::SeqCst);
            if report.pacer_backlog > 0 {
                tracing::warn!(
                    layer,
                    round,
                    backlog = report.pacer_backlog,
                    queued = events.len(),
                    "previous round still being paced; per-feature delivery is falling behind"
                );
            }
            // The pacer only exits once this sender is dropped.
            let _ = self.pacer_tx.send(events);
        }

        if let Some(sink) = &self.sink {
            sink.write(passed);
        }

        self.report_tx.send_replace(Some(report));
        tracing::info!(
            layer,
            round,
            received = report.received,
            dropped = report.dropped,
            passed = report.passed,
            suppressed = report.suppressed,
            "round complete"
        );
        Ok(report)
    }

    /// Run rounds forever, one per `poll_interval`.
    ///
    /// Importer failures are logged and the loop waits for the next tick.
    pub async fn run(mut self, poll_interval: Duration) {
        let mut ticker = tokio::time::interval(poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            if let Err(e) = self.run_round().await {
                tracing::warn!(
                    layer = %self.settings.layer,
                    importer = self.importer.name(),
                    error = %e,
                    "batch fetch failed; waiting for next round"
                );
            }
        }
    }

    /// Spawn [`run`](Self::run) and return the handle with the task.
    pub fn spawn(self, poll_interval: Duration) -> (PipelineHandle, JoinHandle<()>) {
        let handle = self.handle();
        let task = tokio::spawn(self.run(poll_interval));
        (handle, task)
    }
}

async fn pace(
    mut rx: mpsc::UnboundedReceiver<Vec<FeatureEvent>>,
    tx: broadcast::Sender<FeatureEvent>,
    pacing: Duration,
    backlog: Arc<AtomicUsize>,
) {
    let mut last: Option<Instant> = None;
    while let Some(batch) = rx.recv().await {
        for ev in batch {
            if let Some(prev) = last {
                tokio::time::sleep_until(prev + pacing).await;
            }
            last = Some(Instant::now());
            // No subscribers is not an error.
            let _ = tx.send(ev);
            backlog.fetch_sub(1, Ordering::SeqCst);
        }
    }
}
