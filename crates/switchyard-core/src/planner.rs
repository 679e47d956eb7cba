//! Planning: expand a request into the steps it may take.
//!
//! The top-level transformer comes from the selector. Pipelines and failovers
//! expand into levels of further steps:
//!
//! - pipeline steps chain types, each step's source being the previous step's
//!   target, and the last step producing the requested target;
//! - failover alternatives all share the step's source and target.

use crate::index::TransformIndex;
use crate::model::{TransformOptions, TransformerKind};
use crate::stack::{LevelBuilder, LevelKind, Step};
use std::fmt;

/// Default limit on how deeply composites may nest.
pub const DEFAULT_MAX_DEPTH: usize = 10;

/// A node in an expanded plan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlanNode {
    pub step: Step,
    /// The level this step opens, if it is a pipeline or failover.
    pub level: Option<(LevelKind, Vec<PlanNode>)>,
}

impl PlanNode {
    /// Number of engine steps reachable from this node.
    pub fn engine_steps(&self) -> usize {
        match &self.level {
            None => 1,
            Some((_, children)) => children.iter().map(PlanNode::engine_steps).sum(),
        }
    }

    fn render(&self, f: &mut fmt::Formatter<'_>, depth: usize) -> fmt::Result {
        write!(f, "{:indent$}{}", "", self.step, indent = depth * 2)?;
        match &self.level {
            None => writeln!(f),
            Some((kind, children)) => {
                writeln!(f, " [{}]", kind)?;
                children.iter().try_for_each(|c| c.render(f, depth + 1))
            }
        }
    }
}

/// A fully expanded plan for one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Plan {
    pub root: PlanNode,
}

impl fmt::Display for Plan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.root.render(f, 0)
    }
}

/// Errors expanding a step.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PlanError {
    #[error("unknown transformer: {0}")]
    UnknownTransformer(String),

    #[error("pipeline {pipeline} step {step} has no target type")]
    MissingIntermediate { pipeline: String, step: usize },

    #[error("plan nests deeper than {0} levels")]
    TooDeep(usize),
}

/// Expands steps using a capability index.
pub struct Planner<'a> {
    index: &'a TransformIndex,
    max_depth: usize,
}

impl<'a> Planner<'a> {
    pub fn new(index: &'a TransformIndex) -> Self {
        Self {
            index,
            max_depth: DEFAULT_MAX_DEPTH,
        }
    }

    pub fn with_max_depth(mut self, depth: usize) -> Self {
        self.max_depth = depth;
        self
    }

    /// Select a transformer for the request and expand it.
    ///
    /// Returns `Ok(None)` when no transformer supports the request.
    pub fn plan(
        &self,
        source: &str,
        size: i64,
        target: &str,
        options: &TransformOptions,
        rendition: Option<&str>,
    ) -> Result<Option<Plan>, PlanError> {
        let Some(name) = self
            .index
            .find_transformer_name(source, size, target, options, rendition)
        else {
            return Ok(None);
        };
        let root = self.expand(Step::new(name, source, target), 0)?;
        Ok(Some(Plan { root }))
    }

    fn expand(&self, step: Step, depth: usize) -> Result<PlanNode, PlanError> {
        if depth > self.max_depth {
            return Err(PlanError::TooDeep(self.max_depth));
        }
        let level = match self.level_for(&step)? {
            None => None,
            Some(builder) => {
                let children = builder
                    .steps()
                    .iter()
                    .map(|s| self.expand(s.clone(), depth + 1))
                    .collect::<Result<Vec<_>, _>>()?;
                Some((builder.kind(), children))
            }
        };
        Ok(PlanNode { step, level })
    }

    /// The level a step opens, or `None` if an engine performs it directly.
    pub fn level_for(&self, step: &Step) -> Result<Option<LevelBuilder>, PlanError> {
        let transformer = self
            .index
            .transformer(&step.transformer_name)
            .ok_or_else(|| PlanError::UnknownTransformer(step.transformer_name.clone()))?;

        match &transformer.kind {
            TransformerKind::Engine => Ok(None),
            TransformerKind::Failover { alternatives } => {
                let level = alternatives.iter().fold(LevelBuilder::failover(), |level, name| {
                    level.step(
                        name.clone(),
                        step.source_media_type.clone(),
                        step.target_media_type.clone(),
                    )
                });
                Ok(Some(level))
            }
            TransformerKind::Pipeline { steps } => {
                let mut level = LevelBuilder::pipeline();
                let mut source = step.source_media_type.clone();
                let last = steps.len().saturating_sub(1);
                for (i, pipeline_step) in steps.iter().enumerate() {
                    let target = if i == last {
                        step.target_media_type.clone()
                    } else {
                        pipeline_step.target_media_type.clone().ok_or_else(|| {
                            PlanError::MissingIntermediate {
                                pipeline: transformer.name.clone(),
                                step: i,
                            }
                        })?
                    };
                    level.push(Step::new(
                        pipeline_step.transformer_name.clone(),
                        source,
                        target.clone(),
                    ));
                    source = target;
                }
                Ok(Some(level))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TransformConfig;
    use crate::merge::ConfigMerger;
    use crate::model::{SupportedSourceAndTarget, TransformerDecl};

    fn make_test_index() -> TransformIndex {
        let config = TransformConfig::new()
            .transformer(TransformerDecl::new("office").supported(SupportedSourceAndTarget::new("doc", "pdf")))
            .transformer(TransformerDecl::new("renderer").supported(SupportedSourceAndTarget::new("pdf", "png")))
            .transformer(TransformerDecl::new("direct").supported(SupportedSourceAndTarget::new("doc", "png")))
            .transformer(
                TransformerDecl::new("doc-to-png")
                    .pipeline_step("office", Some("pdf"))
                    .pipeline_step("renderer", None),
            )
            .transformer(TransformerDecl::new("best-png").failover("doc-to-png").failover("direct"));
        let mut merger = ConfigMerger::new();
        merger.ingest(&config, "test");
        TransformIndex::build(&merger.build())
    }

    #[test]
    fn test_plan_expands_tree() {
        let index = make_test_index();
        let plan = Planner::new(&index)
            .plan("doc", 10, "png", &TransformOptions::new(), None)
            .unwrap()
            .unwrap();

        assert_eq!(plan.root.step, Step::new("best-png", "doc", "png"));
        let (kind, alternatives) = plan.root.level.as_ref().unwrap();
        assert_eq!(*kind, LevelKind::Failover);
        assert_eq!(alternatives.len(), 2);

        let (kind, steps) = alternatives[0].level.as_ref().unwrap();
        assert_eq!(*kind, LevelKind::Pipeline);
        assert_eq!(steps[0].step, Step::new("office", "doc", "pdf"));
        assert_eq!(steps[1].step, Step::new("renderer", "pdf", "png"));
        assert_eq!(plan.root.engine_steps(), 3);
    }

    #[test]
    fn test_plan_display() {
        let index = make_test_index();
        let plan = Planner::new(&index)
            .plan("doc", 10, "png", &TransformOptions::new(), None)
            .unwrap()
            .unwrap();
        assert_eq!(
            plan.to_string(),
            "best-png (doc -> png) [failover]\n  \
             doc-to-png (doc -> png) [pipeline]\n    \
             office (doc -> pdf)\n    \
             renderer (pdf -> png)\n  \
             direct (doc -> png)\n"
        );
    }

    #[test]
    fn test_plan_none_when_unsupported() {
        let index = make_test_index();
        let plan = Planner::new(&index)
            .plan("png", 10, "doc", &TransformOptions::new(), None)
            .unwrap();
        assert!(plan.is_none());
    }

    #[test]
    fn test_level_for_engine() {
        let index = make_test_index();
        let planner = Planner::new(&index);
        assert_eq!(planner.level_for(&Step::new("office", "doc", "pdf")), Ok(None));
        assert_eq!(
            planner.level_for(&Step::new("nope", "doc", "pdf")),
            Err(PlanError::UnknownTransformer("nope".into()))
        );
    }

    #[test]
    fn test_max_depth() {
        let index = make_test_index();
        let err = Planner::new(&index)
            .with_max_depth(1)
            .plan("doc", 10, "png", &TransformOptions::new(), None)
            .unwrap_err();
        assert_eq!(err, PlanError::TooDeep(1));
    }
}
