//! Config fragments.
//!
//! Each worker advertises one fragment describing the transformers it offers.
//! Fragments may also carry directives that adjust what earlier fragments
//! declared. Fragments are JSON, YAML or TOML with camelCase field names.

use crate::defaults::SupportedDefaults;
use crate::model::TransformerDecl;
use crate::options::OptionCatalogue;
use serde::{Deserialize, Serialize};
use std::fmt;

/// One capability fragment.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TransformConfig {
    #[serde(skip_serializing_if = "indexmap::IndexMap::is_empty")]
    pub transform_options: OptionCatalogue,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub transformers: Vec<TransformerDecl>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub remove_transformers: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub add_supported: Vec<SupportedDirective>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub remove_supported: Vec<SupportedDirective>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub override_supported: Vec<SupportedDirective>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub supported_defaults: Vec<SupportedDefaults>,
}

impl TransformConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn transformer(mut self, transformer: TransformerDecl) -> Self {
        self.transformers.push(transformer);
        self
    }

    pub fn remove_transformer(mut self, name: impl Into<String>) -> Self {
        self.remove_transformers.push(name.into());
        self
    }

    pub fn add_supported(mut self, directive: SupportedDirective) -> Self {
        self.add_supported.push(directive);
        self
    }

    pub fn remove_supported(mut self, directive: SupportedDirective) -> Self {
        self.remove_supported.push(directive);
        self
    }

    pub fn override_supported(mut self, directive: SupportedDirective) -> Self {
        self.override_supported.push(directive);
        self
    }

    pub fn supported_default(mut self, defaults: SupportedDefaults) -> Self {
        self.supported_defaults.push(defaults);
        self
    }

    pub fn option_set(
        mut self,
        name: impl Into<String>,
        options: Vec<crate::options::TransformOption>,
    ) -> Self {
        self.transform_options.insert(name.into(), options);
        self
    }

    /// Parse a fragment, detecting the format from the path's extension.
    ///
    /// Defaults to JSON when there is no path or the extension is unknown.
    pub fn from_bytes(data: &[u8], path: Option<&str>) -> Result<Self, ConfigError> {
        let format = path.and_then(detect_format).unwrap_or("json");
        Self::from_bytes_format(data, format)
    }

    /// Parse a fragment in an explicit format.
    pub fn from_bytes_format(data: &[u8], format: &str) -> Result<Self, ConfigError> {
        match format {
            "json" => serde_json::from_slice(data).map_err(|e| ConfigError::Parse(e.to_string())),
            "yaml" | "yml" => {
                serde_yaml::from_slice(data).map_err(|e| ConfigError::Parse(e.to_string()))
            }
            "toml" => {
                let s = std::str::from_utf8(data)
                    .map_err(|e| ConfigError::Parse(format!("invalid UTF-8: {}", e)))?;
                toml::from_str(s).map_err(|e| ConfigError::Parse(e.to_string()))
            }
            _ => Err(ConfigError::UnsupportedFormat(format.to_string())),
        }
    }

    /// Serialize the fragment.
    pub fn to_bytes(&self, format: &str) -> Result<Vec<u8>, ConfigError> {
        match format {
            "json" => {
                serde_json::to_vec_pretty(self).map_err(|e| ConfigError::Serialize(e.to_string()))
            }
            "yaml" | "yml" => serde_yaml::to_string(self)
                .map(String::into_bytes)
                .map_err(|e| ConfigError::Serialize(e.to_string())),
            "toml" => toml::to_string_pretty(self)
                .map(String::into_bytes)
                .map_err(|e| ConfigError::Serialize(e.to_string())),
            _ => Err(ConfigError::UnsupportedFormat(format.to_string())),
        }
    }
}

/// An `addSupported`, `removeSupported` or `overrideSupported` entry.
///
/// All fields are optional on the wire so that incomplete entries can be
/// reported instead of failing the whole fragment.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SupportedDirective {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transformer_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_media_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_media_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_source_size_bytes: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<i32>,
}

impl SupportedDirective {
    /// A directive for `(transformer, source, target)`.
    pub fn new(
        transformer: impl Into<String>,
        source: impl Into<String>,
        target: impl Into<String>,
    ) -> Self {
        Self {
            transformer_name: Some(transformer.into()),
            source_media_type: Some(source.into()),
            target_media_type: Some(target.into()),
            max_source_size_bytes: None,
            priority: None,
        }
    }

    pub fn max_source_size_bytes(mut self, bytes: i64) -> Self {
        self.max_source_size_bytes = Some(bytes);
        self
    }

    pub fn priority(mut self, priority: i32) -> Self {
        self.priority = Some(priority);
        self
    }

    /// The `(transformer, source, target)` key, if every part is present.
    pub fn key(&self) -> Option<(&str, &str, &str)> {
        Some((
            self.transformer_name.as_deref()?,
            self.source_media_type.as_deref()?,
            self.target_media_type.as_deref()?,
        ))
    }
}

impl fmt::Display for SupportedDirective {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut fields = Vec::new();
        if let Some(name) = &self.transformer_name {
            fields.push(format!("\"transformerName\": \"{name}\""));
        }
        if let Some(source) = &self.source_media_type {
            fields.push(format!("\"sourceMediaType\": \"{source}\""));
        }
        if let Some(target) = &self.target_media_type {
            fields.push(format!("\"targetMediaType\": \"{target}\""));
        }
        if let Some(bytes) = self.max_source_size_bytes {
            fields.push(format!("\"maxSourceSizeBytes\": \"{bytes}\""));
        }
        if let Some(priority) = self.priority {
            fields.push(format!("\"priority\": \"{priority}\""));
        }
        write!(f, "{{{}}}", fields.join(", "))
    }
}

/// Errors reading or writing fragments.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to parse config: {0}")]
    Parse(String),

    #[error("failed to serialize config: {0}")]
    Serialize(String),

    #[error("unsupported config format: {0}")]
    UnsupportedFormat(String),
}

/// Detect the fragment format from a path's extension.
pub fn detect_format(path: &str) -> Option<&'static str> {
    let ext = path.rsplit('.').next()?.to_lowercase();
    match ext.as_str() {
        "json" => Some("json"),
        "yaml" | "yml" => Some("yaml"),
        "toml" => Some("toml"),
        _ => None,
    }
}
