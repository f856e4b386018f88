//! In-process importer that replays a queue of prepared batches.
//!
//! Used by scenario tests and local demos. Once the queue is drained every
//! further fetch returns an empty batch.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use lm_schemas::RawFeature;

use crate::{ImportError, Importer};

#[derive(Debug, Default)]
pub struct ScriptedImporter {
    queue: Mutex<VecDeque<Result<Vec<RawFeature>, ImportError>>>,
    fetches: AtomicUsize,
}

impl ScriptedImporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_batches<I>(batches: I) -> Self
    where
        I: IntoIterator<Item = Vec<RawFeature>>,
    {
        let me = Self::new();
        for b in batches {
            me.push_batch(b);
        }
        me
    }

    pub fn push_batch(&self, batch: Vec<RawFeature>) {
        self.lock().push_back(Ok(batch));
    }

    pub fn push_error(&self, err: ImportError) {
        self.lock().push_back(Err(err));
    }

    /// Number of `fetch_batch` calls made so far.
    pub fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, VecDeque<Result<Vec<RawFeature>, ImportError>>> {
        // A poisoned queue still holds valid batches.
        self.queue.lock().unwrap_or_else(|p| p.into_inner())
    }
}

#[async_trait::async_trait]
impl Importer for ScriptedImporter {
    fn name(&self) -> &'static str {
        "scripted"
    }

    async fn fetch_batch(&self) -> Result<Vec<RawFeature>, ImportError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        self.lock().pop_front().unwrap_or_else(|| Ok(Vec::new()))
    }
}
