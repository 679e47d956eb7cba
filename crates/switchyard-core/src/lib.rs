//! Switchyard: routing core for content transforms
//!
//! Switchyard decides which transformer converts a piece of content from one
//! media type to another, and keeps track of where a multi-step transform has
//! got to. Transformer configuration arrives as fragments that are merged in
//! order; the merged result is indexed by source and target type; requests are
//! routed through that index and executed one step at a time.

mod config;
mod defaults;
mod dispatcher;
mod engine;
mod index;
mod merge;
mod model;
mod options;
mod planner;
mod registry;
mod stack;
mod wire;

pub use config::{ConfigError, SupportedDirective, TransformConfig, detect_format};
pub use defaults::{Defaults, SupportedDefaults};
pub use dispatcher::{
    DEFAULT_MAX_RETRIES, DispatchError, DispatchRequest, DispatchResult, DispatchStats, Dispatcher,
    Hop,
};
pub use engine::{Engine, EngineError, EngineRegistry, FnEngine, TransformRequest};
pub use index::{SupportedTransform, TransformIndex};
pub use merge::{ConfigMerger, MergedConfig};
pub use model::{
    DEFAULT_MAX_SOURCE_SIZE_BYTES, DEFAULT_PRIORITY, PipelineStep, SupportedConversion,
    SupportedSourceAndTarget, TransformOptions, Transformer, TransformerDecl, TransformerKind,
    UNLIMITED,
};
pub use options::{
    OptionCatalogue, OptionGroup, OptionValue, TransformOption, options_match, possible_options,
};
pub use planner::{DEFAULT_MAX_DEPTH, Plan, PlanError, PlanNode, Planner};
pub use registry::TransformRegistry;
pub use stack::{ExecutionContext, Level, LevelBuilder, LevelKind, Progress, StackError, Step};
