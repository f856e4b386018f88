//! In-memory repository.
//!
//! Keeps the latest row per `(layer, feature_id)` plus counters. An older
//! observation never replaces a newer latest row. Test hooks
//! can make saves for chosen ids fail, or make every save slow, to exercise
//! the pipeline's fire-and-forget persistence.

use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, Utc};
use lm_schemas::Feature;

use crate::{FeatureRow, PersistenceError, Repository};

#[derive(Debug, Default)]
pub struct MemoryRepository {
    rows: Mutex<BTreeMap<(String, String), FeatureRow>>,
    failing_ids: Mutex<HashSet<String>>,
    delay: Option<Duration>,
    saved: AtomicUsize,
    failed: AtomicUsize,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every save sleeps for `delay` before completing.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Saves for `feature_id` fail with [`PersistenceError::Database`].
    pub fn fail_on(&self, feature_id: &str) {
        lock(&self.failing_ids).insert(feature_id.to_string());
    }

    pub fn get(&self, layer: &str, feature_id: &str) -> Option<FeatureRow> {
        lock(&self.rows)
            .get(&(layer.to_string(), feature_id.to_string()))
            .cloned()
    }

    pub fn len(&self) -> usize {
        lock(&self.rows).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Successful saves so far (including overwrites).
    pub fn saved(&self) -> usize {
        self.saved.load(Ordering::SeqCst)
    }

    pub fn failed(&self) -> usize {
        self.failed.load(Ordering::SeqCst)
    }

    /// Highest number of saves observed running at the same time.
    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }
}

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|p| p.into_inner())
}

#[async_trait::async_trait]
impl Repository for MemoryRepository {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn save(
        &self,
        layer: &str,
        feature: &Feature,
        observed_at: DateTime<Utc>,
    ) -> Result<(), PersistenceError> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(now, Ordering::SeqCst);

        if let Some(d) = self.delay {
            tokio::time::sleep(d).await;
        }

        let result = if lock(&self.failing_ids).contains(&feature.id) {
            Err(PersistenceError::Database(format!(
                "injected failure for {}",
                feature.id
            )))
        } else {
            FeatureRow::from_feature(layer, feature, observed_at).map(|row| {
                let mut rows = lock(&self.rows);
                let key = (row.layer.clone(), row.feature_id.clone());
                let stale = rows
                    .get(&key)
                    .is_some_and(|stored| stored.observed_at > row.observed_at);
                if !stale {
                    rows.insert(key, row);
                }
            })
        };

        match result {
            Ok(()) => self.saved.fetch_add(1, Ordering::SeqCst),
            Err(_) => self.failed.fetch_add(1, Ordering::SeqCst),
        };
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }
}
