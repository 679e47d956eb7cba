//! Engines: the workers that actually convert content.
//!
//! The routing core never looks inside a conversion. An engine is anything
//! that takes source bytes plus a source type, target type and options, and
//! returns target bytes. Engines are registered under the names of the
//! transformers they perform.

use crate::model::TransformOptions;
use indexmap::IndexMap;
use std::sync::Arc;

/// A single conversion request handed to an engine.
#[derive(Debug, Clone, Copy)]
pub struct TransformRequest<'a> {
    /// Name of the transformer being performed.
    pub transformer_name: &'a str,
    pub source: &'a [u8],
    pub source_media_type: &'a str,
    pub target_media_type: &'a str,
    pub options: &'a TransformOptions,
}

/// Errors an engine can report.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Worth trying the same step again.
    #[error("transient failure: {0}")]
    Retryable(String),

    /// The step cannot succeed with this engine.
    #[error("transform failed: {0}")]
    Terminal(String),

    #[error(transparent)]
    Other(#[from] Box<dyn std::error::Error + Send + Sync>),
}

impl EngineError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, EngineError::Retryable(_))
    }
}

/// A conversion worker.
pub trait Engine: Send + Sync {
    /// Convert `request.source` to the requested target type.
    fn transform(&self, request: &TransformRequest<'_>) -> Result<Vec<u8>, EngineError>;
}

/// An engine backed by a function.
pub struct FnEngine<F>(pub F);

impl<F> Engine for FnEngine<F>
where
    F: Fn(&TransformRequest<'_>) -> Result<Vec<u8>, EngineError> + Send + Sync,
{
    fn transform(&self, request: &TransformRequest<'_>) -> Result<Vec<u8>, EngineError> {
        (self.0)(request)
    }
}

/// Engines indexed by transformer name.
#[derive(Clone, Default)]
pub struct EngineRegistry {
    engines: IndexMap<String, Arc<dyn Engine>>,
}

impl EngineRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an engine for a transformer name, replacing any previous one.
    pub fn register(&mut self, transformer_name: impl Into<String>, engine: impl Engine + 'static) {
        self.engines.insert(transformer_name.into(), Arc::new(engine));
    }

    /// Register a function as an engine.
    pub fn register_fn<F>(&mut self, transformer_name: impl Into<String>, f: F)
    where
        F: Fn(&TransformRequest<'_>) -> Result<Vec<u8>, EngineError> + Send + Sync + 'static,
    {
        self.register(transformer_name, FnEngine(f));
    }

    /// Register an engine that is already shared.
    pub fn register_shared(&mut self, transformer_name: impl Into<String>, engine: Arc<dyn Engine>) {
        self.engines.insert(transformer_name.into(), engine);
    }

    pub fn get(&self, transformer_name: &str) -> Option<Arc<dyn Engine>> {
        self.engines.get(transformer_name).cloned()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.engines.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.engines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.engines.is_empty()
    }
}

impl std::fmt::Debug for EngineRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineRegistry")
            .field("engines", &self.engines.keys().collect::<Vec<_>>())
            .finish()
    }
}
