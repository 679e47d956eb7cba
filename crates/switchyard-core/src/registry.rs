//! The live transform registry.
//!
//! Holds the current [`TransformIndex`] snapshot. Readers take an `Arc` to the
//! snapshot and query it without holding any lock; a rebuild constructs a new
//! index off to the side and swaps it in.

use crate::index::TransformIndex;
use crate::merge::MergedConfig;
use crate::model::TransformOptions;
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;

/// Owner of the current capability index.
#[derive(Debug)]
pub struct TransformRegistry {
    current: RwLock<Arc<TransformIndex>>,
    /// Serializes rebuilds.
    rebuilding: Mutex<()>,
}

impl Default for TransformRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl TransformRegistry {
    /// A registry with an empty index.
    pub fn new() -> Self {
        Self::with_index(TransformIndex::empty())
    }

    /// A registry built from a merged config.
    pub fn from_config(config: &MergedConfig) -> Self {
        Self::with_index(TransformIndex::build(config))
    }

    pub fn with_index(index: TransformIndex) -> Self {
        Self {
            current: RwLock::new(Arc::new(index)),
            rebuilding: Mutex::new(()),
        }
    }

    /// The current snapshot.
    pub fn snapshot(&self) -> Arc<TransformIndex> {
        Arc::clone(&self.current.read())
    }

    /// Rebuild from a merged config and install the result.
    ///
    /// Queries already holding the old snapshot finish against it.
    pub fn rebuild(&self, config: &MergedConfig) -> Arc<TransformIndex> {
        let _guard = self.rebuilding.lock();
        let index = Arc::new(TransformIndex::build(config));
        *self.current.write() = Arc::clone(&index);
        tracing::info!(
            transformers = index.len(),
            transforms = index.transform_count(),
            "transform registry replaced"
        );
        index
    }

    pub fn find_transformer_name(
        &self,
        source: &str,
        size: i64,
        target: &str,
        options: &TransformOptions,
        rendition: Option<&str>,
    ) -> Option<String> {
        self.snapshot()
            .find_transformer_name(source, size, target, options, rendition)
    }

    pub fn find_max_size(
        &self,
        source: &str,
        target: &str,
        options: &TransformOptions,
        rendition: Option<&str>,
    ) -> i64 {
        self.snapshot()
            .find_max_size(source, target, options, rendition)
    }

    pub fn is_supported(
        &self,
        source: &str,
        size: i64,
        target: &str,
        options: &TransformOptions,
        rendition: Option<&str>,
    ) -> bool {
        self.snapshot()
            .is_supported(source, size, target, options, rendition)
    }
}
