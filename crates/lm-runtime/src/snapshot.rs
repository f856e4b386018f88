//! Snapshot store: the merged "world as last known" for one layer.

use lm_schemas::{Feature, FeatureSet};

#[derive(Debug, Clone, Default)]
pub struct SnapshotStore {
    features: FeatureSet,
}

impl SnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace each feature by id and return the merged set.
    ///
    /// Ids absent from `features` keep their last known value.
    pub fn merge<I>(&mut self, features: I) -> &FeatureSet
    where
        I: IntoIterator<Item = Feature>,
    {
        self.features.extend(features);
        &self.features
    }

    pub fn current(&self) -> &FeatureSet {
        &self.features
    }
}
