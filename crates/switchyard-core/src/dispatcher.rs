//! Dispatcher: drives an execution context through engines.
//!
//! [`Dispatcher::begin`] selects the transformer for a request and opens the
//! context. [`Dispatcher::advance`] performs one hop: it opens a level for a
//! composite step, or runs an engine step and applies the outcome. Between
//! hops the context may be encoded and handed to another process.
//! [`Dispatcher::execute`] runs a request to completion in-process.

use crate::engine::{EngineError, EngineRegistry, TransformRequest};
use crate::index::TransformIndex;
use crate::model::TransformOptions;
use crate::planner::{PlanError, Planner};
use crate::registry::TransformRegistry;
use crate::stack::{ExecutionContext, LevelBuilder, LevelKind, Progress, StackError, Step};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Default number of extra attempts at a step after a retryable failure.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// A request to transform some content.
#[derive(Debug, Clone)]
pub struct DispatchRequest {
    pub source: Vec<u8>,
    pub source_media_type: String,
    pub target_media_type: String,
    pub options: TransformOptions,
    /// Rendition name, used to memoize selection.
    pub rendition: Option<String>,
    pub source_reference: Option<String>,
    /// Seeds the outermost reference counter.
    pub request_id: Option<u64>,
}

impl DispatchRequest {
    pub fn new(source: Vec<u8>, source_media_type: impl Into<String>, target_media_type: impl Into<String>) -> Self {
        Self {
            source,
            source_media_type: source_media_type.into(),
            target_media_type: target_media_type.into(),
            options: TransformOptions::new(),
            rendition: None,
            source_reference: None,
            request_id: None,
        }
    }

    pub fn with_option(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.options.insert(name.into(), value.into());
        self
    }

    pub fn with_rendition(mut self, rendition: impl Into<String>) -> Self {
        self.rendition = Some(rendition.into());
        self
    }

    pub fn with_source_reference(mut self, reference: impl Into<String>) -> Self {
        self.source_reference = Some(reference.into());
        self
    }

    pub fn with_request_id(mut self, id: u64) -> Self {
        self.request_id = Some(id);
        self
    }
}

/// Result of a completed request.
#[derive(Debug)]
pub struct DispatchResult {
    pub data: Vec<u8>,
    /// The top-level transformer.
    pub transformer_name: String,
    pub stats: DispatchStats,
}

/// Statistics from running a request.
#[derive(Debug, Clone, Default)]
pub struct DispatchStats {
    pub duration: Duration,
    /// Engine steps attempted, not counting retries.
    pub steps_executed: usize,
    pub retries: usize,
    /// Failures that moved a failover on to its next alternative.
    pub failovers: usize,
}

/// What one call to [`Dispatcher::advance`] did.
#[derive(Debug)]
pub enum Hop {
    /// A composite step opened a level.
    Expanded { kind: LevelKind },
    /// A retryable failure; the same step is current again.
    Retry { error: EngineError, attempt: u32 },
    /// An engine step finished one way or the other.
    Done {
        reference: String,
        step: Step,
        outcome: Result<Vec<u8>, EngineError>,
        progress: Progress,
    },
}

/// Errors that end a request.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("no transformer for {source_media_type} to {target_media_type} ({size} bytes)")]
    NoTransformer {
        source_media_type: String,
        target_media_type: String,
        size: i64,
    },

    #[error("transform {reference} failed at {transformer}: {source}")]
    StepFailed {
        reference: String,
        transformer: String,
        #[source]
        source: EngineError,
    },

    #[error(transparent)]
    Plan(#[from] PlanError),

    #[error(transparent)]
    Stack(#[from] StackError),
}

/// Routes requests to engines using the live transform registry.
pub struct Dispatcher {
    registry: Arc<TransformRegistry>,
    engines: EngineRegistry,
    max_retries: u32,
}

impl Dispatcher {
    pub fn new(registry: Arc<TransformRegistry>, engines: EngineRegistry) -> Self {
        Self {
            registry,
            engines,
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }

    /// Set the retry ceiling for retryable failures.
    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    pub fn registry(&self) -> &Arc<TransformRegistry> {
        &self.registry
    }

    pub fn engines(&self) -> &EngineRegistry {
        &self.engines
    }

    /// Select a transformer and open a context for the request.
    pub fn begin(&self, request: &DispatchRequest) -> Result<ExecutionContext, DispatchError> {
        let size = request.source.len() as i64;
        let name = self
            .registry
            .find_transformer_name(
                &request.source_media_type,
                size,
                &request.target_media_type,
                &request.options,
                request.rendition.as_deref(),
            )
            .ok_or_else(|| DispatchError::NoTransformer {
                source_media_type: request.source_media_type.clone(),
                target_media_type: request.target_media_type.clone(),
                size,
            })?;

        let mut ctx = ExecutionContext::new(request.options.clone(), request.source_reference.clone());
        ctx.add_level(LevelBuilder::pipeline().step(
            name.clone(),
            request.source_media_type.clone(),
            request.target_media_type.clone(),
        ))?;
        if let Some(id) = request.request_id {
            ctx.set_reference(id)?;
        }
        tracing::debug!(
            reference = %ctx.reference(),
            transformer = %name,
            source = %request.source_media_type,
            target = %request.target_media_type,
            "selected transformer"
        );
        Ok(ctx)
    }

    /// Perform one hop on the context's current step.
    ///
    /// `input` is the content the current step should consume.
    pub fn advance(&self, ctx: &mut ExecutionContext, input: &[u8]) -> Result<Hop, DispatchError> {
        let index = self.registry.snapshot();
        let step = ctx.current_step().cloned().ok_or(StackError::Empty)?;

        let level = match Planner::new(&index).level_for(&step) {
            Ok(level) => level,
            Err(err) => {
                tracing::error!(reference = %ctx.reference(), "abandoning transform: {}", err);
                ctx.remove_remaining_levels();
                return Err(err.into());
            }
        };
        if let Some(level) = level {
            let kind = level.kind();
            ctx.add_level(level)?;
            tracing::debug!(
                reference = %ctx.reference(),
                transformer = %step.transformer_name,
                %kind,
                "opened level"
            );
            return Ok(Hop::Expanded { kind });
        }

        let reference = ctx.reference();
        let outcome = self.run_step(&index, &step, input, ctx.options());
        match outcome {
            Err(error) if error.is_retryable() && ctx.attempted_retries() < self.max_retries => {
                let attempt = ctx.increment_attempted_retries()?;
                tracing::warn!(
                    %reference,
                    transformer = %step.transformer_name,
                    attempt,
                    "retrying step: {}",
                    error
                );
                Ok(Hop::Retry { error, attempt })
            }
            Ok(output) => {
                let progress = ctx.remove_successful_step()?;
                tracing::debug!(%reference, transformer = %step.transformer_name, ?progress, "step succeeded");
                Ok(Hop::Done {
                    reference,
                    step,
                    outcome: Ok(output),
                    progress,
                })
            }
            Err(error) => {
                let in_failover = ctx.is_parent_a_failover();
                let progress = ctx.remove_failed_step()?;
                tracing::warn!(
                    %reference,
                    transformer = %step.transformer_name,
                    in_failover,
                    ?progress,
                    "step failed: {}",
                    error
                );
                Ok(Hop::Done {
                    reference,
                    step,
                    outcome: Err(error),
                    progress,
                })
            }
        }
    }

    fn run_step(
        &self,
        index: &TransformIndex,
        step: &Step,
        input: &[u8],
        options: &TransformOptions,
    ) -> Result<Vec<u8>, EngineError> {
        let size = input.len() as i64;
        if !index.supports(
            &step.transformer_name,
            &step.source_media_type,
            &step.target_media_type,
            size,
        ) {
            return Err(EngineError::Terminal(format!(
                "{} does not support {} to {} for {} bytes",
                step.transformer_name, step.source_media_type, step.target_media_type, size
            )));
        }
        let engine = self.engines.get(&step.transformer_name).ok_or_else(|| {
            EngineError::Terminal(format!("no engine registered for {}", step.transformer_name))
        })?;
        engine.transform(&TransformRequest {
            transformer_name: &step.transformer_name,
            source: input,
            source_media_type: &step.source_media_type,
            target_media_type: &step.target_media_type,
            options,
        })
    }

    /// Run a request to completion.
    pub fn execute(&self, request: DispatchRequest) -> Result<DispatchResult, DispatchError> {
        let start = Instant::now();
        let mut ctx = self.begin(&request)?;
        let transformer_name = ctx
            .current_step()
            .map(|s| s.transformer_name.clone())
            .unwrap_or_default();

        // Input of each open level, so failover alternatives start from the
        // same content.
        let mut inputs: Vec<Vec<u8>> = vec![request.source.clone()];
        let mut current = request.source;
        let mut stats = DispatchStats::default();

        loop {
            match self.advance(&mut ctx, &current)? {
                Hop::Expanded { .. } => inputs.push(current.clone()),
                Hop::Retry { .. } => stats.retries += 1,
                Hop::Done {
                    reference,
                    step,
                    outcome,
                    progress,
                } => {
                    stats.steps_executed += 1;
                    match outcome {
                        Ok(output) => {
                            current = output;
                            if progress == Progress::Completed {
                                stats.duration = start.elapsed();
                                tracing::info!(
                                    transformer = %transformer_name,
                                    steps = stats.steps_executed,
                                    retries = stats.retries,
                                    failovers = stats.failovers,
                                    "transform completed"
                                );
                                return Ok(DispatchResult {
                                    data: current,
                                    transformer_name,
                                    stats,
                                });
                            }
                            inputs.truncate(ctx.depth());
                        }
                        Err(error) => {
                            if progress != Progress::Continue {
                                tracing::info!(
                                    transformer = %transformer_name,
                                    %reference,
                                    "transform failed"
                                );
                                return Err(DispatchError::StepFailed {
                                    reference,
                                    transformer: step.transformer_name,
                                    source: error,
                                });
                            }
                            stats.failovers += 1;
                            inputs.truncate(ctx.depth());
                            current = inputs.last().cloned().unwrap_or_default();
                        }
                    }
                }
            }
        }
    }
}
