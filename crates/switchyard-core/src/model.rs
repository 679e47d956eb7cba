//! Transformer declarations and the resolved transformer model.
//!
//! A [`TransformerDecl`] is what a worker advertises in its config fragment.
//! Size limits and priorities may be omitted there and are filled in from the
//! supported defaults when the merged config is built, producing a
//! [`Transformer`] whose [`SupportedConversion`]s are fully resolved.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Size limit meaning "any size".
pub const UNLIMITED: i64 = -1;

/// Built-in size limit used when no supported default applies.
pub const DEFAULT_MAX_SOURCE_SIZE_BYTES: i64 = UNLIMITED;

/// Built-in priority used when no supported default applies.
pub const DEFAULT_PRIORITY: i32 = 50;

/// Options supplied with a transform request.
pub type TransformOptions = IndexMap<String, String>;

/// A source/target pair as declared in a fragment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SupportedSourceAndTarget {
    pub source_media_type: String,
    pub target_media_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_source_size_bytes: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<i32>,
}

impl SupportedSourceAndTarget {
    /// A pair that takes its size limit and priority from the defaults.
    pub fn new(source: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            source_media_type: source.into(),
            target_media_type: target.into(),
            max_source_size_bytes: None,
            priority: None,
        }
    }

    /// Set an explicit size limit.
    pub fn max_source_size_bytes(mut self, bytes: i64) -> Self {
        self.max_source_size_bytes = Some(bytes);
        self
    }

    /// Set an explicit priority.
    pub fn priority(mut self, priority: i32) -> Self {
        self.priority = Some(priority);
        self
    }

    pub(crate) fn is(&self, source: &str, target: &str) -> bool {
        self.source_media_type == source && self.target_media_type == target
    }
}

/// One step of a pipeline transformer.
///
/// Every step except the last names the intermediate type it produces. The
/// last step produces whatever the request asked for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineStep {
    pub transformer_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_media_type: Option<String>,
}

impl PipelineStep {
    pub fn new(transformer_name: impl Into<String>, target: Option<&str>) -> Self {
        Self {
            transformer_name: transformer_name.into(),
            target_media_type: target.map(str::to_string),
        }
    }
}

/// A transformer as advertised in a config fragment.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransformerDecl {
    #[serde(default)]
    pub transformer_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub core_version: Option<String>,
    /// Names of option sets in the `transformOptions` catalogue.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub transform_options: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub supported_source_and_target_list: Vec<SupportedSourceAndTarget>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub transformer_pipeline: Vec<PipelineStep>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub transformer_failover: Vec<String>,
}

impl TransformerDecl {
    /// Create an engine transformer declaration with nothing supported yet.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            transformer_name: name.into(),
            ..Default::default()
        }
    }

    pub fn core_version(mut self, version: impl Into<String>) -> Self {
        self.core_version = Some(version.into());
        self
    }

    /// Reference an option set from the catalogue.
    pub fn option_set(mut self, name: impl Into<String>) -> Self {
        self.transform_options.push(name.into());
        self
    }

    /// Add a supported source/target pair.
    pub fn supported(mut self, supported: SupportedSourceAndTarget) -> Self {
        self.supported_source_and_target_list.push(supported);
        self
    }

    /// Append a pipeline step.
    pub fn pipeline_step(mut self, transformer_name: impl Into<String>, target: Option<&str>) -> Self {
        self.transformer_pipeline
            .push(PipelineStep::new(transformer_name, target));
        self
    }

    /// Append a failover alternative.
    pub fn failover(mut self, transformer_name: impl Into<String>) -> Self {
        self.transformer_failover.push(transformer_name.into());
        self
    }

    pub fn is_pipeline(&self) -> bool {
        !self.transformer_pipeline.is_empty()
    }

    pub fn is_failover(&self) -> bool {
        !self.transformer_failover.is_empty()
    }

    /// Names of the transformers this one delegates to, in step order.
    pub fn step_names(&self) -> Vec<&str> {
        if self.is_pipeline() {
            self.transformer_pipeline
                .iter()
                .map(|s| s.transformer_name.as_str())
                .collect()
        } else {
            self.transformer_failover.iter().map(String::as_str).collect()
        }
    }
}

/// A supported conversion with its size limit and priority resolved.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SupportedConversion {
    pub source_media_type: String,
    pub target_media_type: String,
    pub max_source_size_bytes: i64,
    pub priority: i32,
}

impl SupportedConversion {
    pub fn new(
        source: impl Into<String>,
        target: impl Into<String>,
        max_source_size_bytes: i64,
        priority: i32,
    ) -> Self {
        Self {
            source_media_type: source.into(),
            target_media_type: target.into(),
            max_source_size_bytes,
            priority,
        }
    }

    /// Whether a source of `size` bytes is within the limit.
    pub fn accepts(&self, size: i64) -> bool {
        self.max_source_size_bytes == UNLIMITED || self.max_source_size_bytes >= size
    }

    pub(crate) fn is(&self, source: &str, target: &str) -> bool {
        self.source_media_type == source && self.target_media_type == target
    }
}

impl fmt::Display for SupportedConversion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {} (", self.source_media_type, self.target_media_type)?;
        if self.max_source_size_bytes == UNLIMITED {
            write!(f, "unlimited")?;
        } else {
            write!(f, "max {} bytes", self.max_source_size_bytes)?;
        }
        write!(f, ", priority {})", self.priority)
    }
}

/// How a transformer does its work.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum TransformerKind {
    /// Performed directly by a single engine.
    Engine,
    /// Every step must succeed, in order.
    Pipeline { steps: Vec<PipelineStep> },
    /// The first alternative to succeed wins.
    Failover { alternatives: Vec<String> },
}

impl TransformerKind {
    pub fn label(&self) -> &'static str {
        match self {
            TransformerKind::Engine => "engine",
            TransformerKind::Pipeline { .. } => "pipeline",
            TransformerKind::Failover { .. } => "failover",
        }
    }

    pub fn is_composite(&self) -> bool {
        !matches!(self, TransformerKind::Engine)
    }
}

/// A transformer in the merged config.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transformer {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub core_version: Option<String>,
    /// Names of the option sets this transformer recognizes.
    #[serde(default)]
    pub transform_options: Vec<String>,
    pub supported: Vec<SupportedConversion>,
    #[serde(flatten)]
    pub kind: TransformerKind,
    /// Origin label of the fragment that defined it.
    pub read_from: String,
}

impl Transformer {
    /// Whether this transformer converts `source` to `target` for a source of `size` bytes.
    pub fn supports(&self, source: &str, target: &str, size: i64) -> bool {
        self.supported
            .iter()
            .any(|s| s.is(source, target) && s.accepts(size))
    }

    /// Convert back to the fragment form, with every value resolved.
    pub fn to_decl(&self) -> TransformerDecl {
        let (pipeline, failover) = match &self.kind {
            TransformerKind::Engine => (Vec::new(), Vec::new()),
            TransformerKind::Pipeline { steps } => (steps.clone(), Vec::new()),
            TransformerKind::Failover { alternatives } => (Vec::new(), alternatives.clone()),
        };
        TransformerDecl {
            transformer_name: self.name.clone(),
            core_version: self.core_version.clone(),
            transform_options: self.transform_options.clone(),
            supported_source_and_target_list: self
                .supported
                .iter()
                .map(|s| SupportedSourceAndTarget {
                    source_media_type: s.source_media_type.clone(),
                    target_media_type: s.target_media_type.clone(),
                    max_source_size_bytes: Some(s.max_source_size_bytes),
                    priority: Some(s.priority),
                })
                .collect(),
            transformer_pipeline: pipeline,
            transformer_failover: failover,
        }
    }
}
