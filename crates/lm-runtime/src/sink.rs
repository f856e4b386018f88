//! Fire-and-forget write-through to a [`Repository`].
//!
//! `write` returns immediately. A detached dispatcher task acquires one
//! semaphore permit per feature before spawning its save, so at most
//! `parallelism` saves are in flight at once. Failures are logged and
//! counted; nothing is retried.
//!
//! Saves from consecutive rounds can finish out of order. Each one carries
//! its observation time (retrieval stamp, else submission time) and the
//! repository keeps the newest as the latest row.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use lm_db::Repository;
use lm_schemas::Feature;
use serde::Serialize;
use tokio::sync::{Notify, Semaphore};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SinkCounts {
    pub submitted: u64,
    pub saved: u64,
    pub failed: u64,
}

impl SinkCounts {
    pub fn pending(&self) -> u64 {
        self.submitted.saturating_sub(self.saved + self.failed)
    }
}

#[derive(Debug, Default)]
struct Counters {
    submitted: AtomicU64,
    saved: AtomicU64,
    failed: AtomicU64,
    settled: Notify,
}

#[derive(Clone)]
pub struct PersistenceSink {
    layer: Arc<str>,
    repo: Arc<dyn Repository>,
    permits: Arc<Semaphore>,
    parallelism: usize,
    counters: Arc<Counters>,
}

impl std::fmt::Debug for PersistenceSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PersistenceSink")
            .field("layer", &self.layer)
            .field("repo", &self.repo.name())
            .field("parallelism", &self.parallelism)
            .field("counts", &self.counts())
            .finish()
    }
}

impl PersistenceSink {
    /// `parallelism` is clamped to at least 1.
    pub fn new(layer: &str, repo: Arc<dyn Repository>, parallelism: usize) -> Self {
        let parallelism = parallelism.max(1);
        Self {
            layer: Arc::from(layer),
            repo,
            permits: Arc::new(Semaphore::new(parallelism)),
            parallelism,
            counters: Arc::new(Counters::default()),
        }
    }

    pub fn parallelism(&self) -> usize {
        self.parallelism
    }

    pub fn counts(&self) -> SinkCounts {
        SinkCounts {
            submitted: self.counters.submitted.load(Ordering::SeqCst),
            saved: self.counters.saved.load(Ordering::SeqCst),
            failed: self.counters.failed.load(Ordering::SeqCst),
        }
    }

    /// Queue `features` for saving and return without waiting.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn write(&self, features: Vec<Arc<Feature>>) {
        if features.is_empty() {
            return;
        }
        self.counters
            .submitted
            .fetch_add(features.len() as u64, Ordering::SeqCst);
        let submitted_at = Utc::now();

        let sink = self.clone();
        tokio::spawn(async move {
            for feature in features {
                // The semaphore is never closed.
                let Ok(permit) = sink.permits.clone().acquire_owned().await else {
                    return;
                };
                let sink = sink.clone();
                let observed_at = lm_db::observed_at(&feature, submitted_at);
                tokio::spawn(async move {
                    sink.save_one(&feature, observed_at).await;
                    drop(permit);
                });
            }
        });
    }

    async fn save_one(&self, feature: &Feature, observed_at: DateTime<Utc>) {
        match self.repo.save(&self.layer, feature, observed_at).await {
            Ok(()) => {
                self.counters.saved.fetch_add(1, Ordering::SeqCst);
                tracing::debug!(
                    layer = %self.layer,
                    feature_id = %feature.id,
                    repository = self.repo.name(),
                    "feature persisted"
                );
            }
            Err(e) => {
                self.counters.failed.fetch_add(1, Ordering::SeqCst);
                tracing::error!(
                    layer = %self.layer,
                    feature_id = %feature.id,
                    repository = self.repo.name(),
                    error = %e,
                    "failed to persist feature"
                );
            }
        }
        self.counters.settled.notify_waiters();
    }

    /// Wait until every feature submitted so far has been saved or failed.
    pub async fn drain(&self) {
        loop {
            let settled = self.counters.settled.notified();
            if self.counts().pending() == 0 {
                return;
            }
            settled.await;
        }
    }
}
