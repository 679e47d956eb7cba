//! Supported defaults: fallback size limits and priorities.
//!
//! Defaults are keyed by an optional transformer name and an optional source
//! type. A lookup for `(transformer, source)` tries, in order:
//!
//! 1. `(transformer, source)`
//! 2. `(transformer, -)`
//! 3. `(-, source)`
//! 4. `(-, -)` (system-wide)
//!
//! and falls back to [`DEFAULT_MAX_SOURCE_SIZE_BYTES`] / [`DEFAULT_PRIORITY`].
//! Each field is resolved independently, so a key that only sets a priority
//! leaves the size limit to a less specific key.

use crate::model::{DEFAULT_MAX_SOURCE_SIZE_BYTES, DEFAULT_PRIORITY};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A `supportedDefaults` entry as it appears in a fragment.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SupportedDefaults {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transformer_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_media_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_source_size_bytes: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<i32>,
}

impl SupportedDefaults {
    /// A system-wide entry.
    pub fn system() -> Self {
        Self::default()
    }

    pub fn transformer(mut self, name: impl Into<String>) -> Self {
        self.transformer_name = Some(name.into());
        self
    }

    pub fn source(mut self, source: impl Into<String>) -> Self {
        self.source_media_type = Some(source.into());
        self
    }

    pub fn max_source_size_bytes(mut self, bytes: i64) -> Self {
        self.max_source_size_bytes = Some(bytes);
        self
    }

    pub fn priority(mut self, priority: i32) -> Self {
        self.priority = Some(priority);
        self
    }

    fn key(&self) -> DefaultsKey {
        DefaultsKey {
            transformer_name: self.transformer_name.clone(),
            source_media_type: self.source_media_type.clone(),
        }
    }
}

impl fmt::Display for SupportedDefaults {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut fields = Vec::new();
        if let Some(name) = &self.transformer_name {
            fields.push(format!("\"transformerName\": \"{name}\""));
        }
        if let Some(source) = &self.source_media_type {
            fields.push(format!("\"sourceMediaType\": \"{source}\""));
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

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct DefaultsKey {
    transformer_name: Option<String>,
    source_media_type: Option<String>,
}

impl DefaultsKey {
    fn new(transformer_name: Option<&str>, source_media_type: Option<&str>) -> Self {
        Self {
            transformer_name: transformer_name.map(str::to_string),
            source_media_type: source_media_type.map(str::to_string),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
struct DefaultValues {
    max_source_size_bytes: Option<i64>,
    priority: Option<i32>,
}

/// Accumulated supported defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Defaults {
    entries: IndexMap<DefaultsKey, DefaultValues>,
}

impl Defaults {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply one fragment's `supportedDefaults`.
    ///
    /// Entries sharing a key within the batch combine field-wise, later fields
    /// winning. The combined value then replaces whatever an earlier batch set
    /// for that key. Entries setting neither field are returned unapplied.
    pub fn apply_batch<'a>(&mut self, batch: &'a [SupportedDefaults]) -> Vec<&'a SupportedDefaults> {
        let mut combined: IndexMap<DefaultsKey, DefaultValues> = IndexMap::new();
        let mut unprocessed = Vec::new();
        for entry in batch {
            if entry.max_source_size_bytes.is_none() && entry.priority.is_none() {
                unprocessed.push(entry);
                continue;
            }
            let values = combined.entry(entry.key()).or_default();
            if entry.max_source_size_bytes.is_some() {
                values.max_source_size_bytes = entry.max_source_size_bytes;
            }
            if entry.priority.is_some() {
                values.priority = entry.priority;
            }
        }
        for (key, values) in combined {
            self.entries.insert(key, values);
        }
        unprocessed
    }

    /// The size limit for a conversion by `transformer` from `source`.
    pub fn max_source_size_bytes(&self, transformer: &str, source: &str) -> i64 {
        self.lookup(transformer, source, |v| v.max_source_size_bytes)
            .unwrap_or(DEFAULT_MAX_SOURCE_SIZE_BYTES)
    }

    /// The priority for a conversion by `transformer` from `source`.
    pub fn priority(&self, transformer: &str, source: &str) -> i32 {
        self.lookup(transformer, source, |v| v.priority)
            .unwrap_or(DEFAULT_PRIORITY)
    }

    /// Resolve declared values, using defaults for any that are missing.
    pub fn resolve(
        &self,
        transformer: &str,
        source: &str,
        max_source_size_bytes: Option<i64>,
        priority: Option<i32>,
    ) -> (i64, i32) {
        (
            max_source_size_bytes.unwrap_or_else(|| self.max_source_size_bytes(transformer, source)),
            priority.unwrap_or_else(|| self.priority(transformer, source)),
        )
    }

    fn lookup<T>(
        &self,
        transformer: &str,
        source: &str,
        field: impl Fn(&DefaultValues) -> Option<T>,
    ) -> Option<T> {
        [
            DefaultsKey::new(Some(transformer), Some(source)),
            DefaultsKey::new(Some(transformer), None),
            DefaultsKey::new(None, Some(source)),
            DefaultsKey::new(None, None),
        ]
        .iter()
        .find_map(|key| self.entries.get(key).and_then(&field))
    }

    /// The current defaults in fragment form.
    ///
    /// A system-wide entry equal to the built-in values is left out.
    pub fn to_supported_defaults(&self) -> Vec<SupportedDefaults> {
        self.entries
            .iter()
            .filter(|(key, values)| {
                let built_in = key.transformer_name.is_none()
                    && key.source_media_type.is_none()
                    && values.max_source_size_bytes.unwrap_or(DEFAULT_MAX_SOURCE_SIZE_BYTES)
                        == DEFAULT_MAX_SOURCE_SIZE_BYTES
                    && values.priority.unwrap_or(DEFAULT_PRIORITY) == DEFAULT_PRIORITY;
                !built_in
            })
            .map(|(key, values)| SupportedDefaults {
                transformer_name: key.transformer_name.clone(),
                source_media_type: key.source_media_type.clone(),
                max_source_size_bytes: values.max_source_size_bytes,
                priority: values.priority,
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_built_in_values() {
        let defaults = Defaults::new();
        assert_eq!(defaults.max_source_size_bytes("1", "mimetype/a"), -1);
        assert_eq!(defaults.priority("1", "mimetype/a"), 50);
    }

    #[test]
    fn test_precedence_most_specific_wins() {
        let mut defaults = Defaults::new();
        defaults.apply_batch(&[
            SupportedDefaults::system()
                .transformer("1")
                .source("mimetype/a")
                .max_source_size_bytes(100),
            SupportedDefaults::system()
                .transformer("2")
                .source("mimetype/a")
                .priority(45),
            SupportedDefaults::system().transformer("3").max_source_size_bytes(400),
            SupportedDefaults::system().max_source_size_bytes(600),
        ]);

        assert_eq!(defaults.max_source_size_bytes("1", "mimetype/a"), 100);
        assert_eq!(defaults.priority("1", "mimetype/a"), 50);
        assert_eq!(defaults.priority("2", "mimetype/a"), 45);
        assert_eq!(defaults.max_source_size_bytes("2", "mimetype/a"), 600);
        assert_eq!(defaults.max_source_size_bytes("3", "mimetype/b"), 400);
        assert_eq!(defaults.max_source_size_bytes("4", "mimetype/b"), 600);
    }

    #[test]
    fn test_source_only_key() {
        let mut defaults = Defaults::new();
        defaults.apply_batch(&[
            SupportedDefaults::system().source("mimetype/a").priority(30),
            SupportedDefaults::system().priority(60),
        ]);
        assert_eq!(defaults.priority("9", "mimetype/a"), 30);
        assert_eq!(defaults.priority("9", "mimetype/b"), 60);
    }

    #[test]
    fn test_batch_combines_fieldwise() {
        let mut defaults = Defaults::new();
        defaults.apply_batch(&[
            SupportedDefaults::system().max_source_size_bytes(600),
            SupportedDefaults::system().priority(45),
        ]);
        assert_eq!(defaults.max_source_size_bytes("1", "a"), 600);
        assert_eq!(defaults.priority("1", "a"), 45);
    }

    #[test]
    fn test_later_batch_replaces_key() {
        let mut defaults = Defaults::new();
        defaults.apply_batch(&[SupportedDefaults::system()
            .max_source_size_bytes(600)
            .priority(45)]);
        defaults.apply_batch(&[SupportedDefaults::system().priority(50)]);

        // The size limit from the first batch does not survive.
        assert_eq!(defaults.max_source_size_bytes("1", "a"), -1);
        assert_eq!(defaults.priority("1", "a"), 50);
        assert!(defaults.to_supported_defaults().is_empty());
    }

    #[test]
    fn test_entry_without_values_unprocessed() {
        let mut defaults = Defaults::new();
        let batch = [
            SupportedDefaults::system().transformer("1"),
            SupportedDefaults::system().priority(10),
        ];
        let unprocessed = defaults.apply_batch(&batch);
        assert_eq!(unprocessed, vec![&batch[0]]);
        assert_eq!(defaults.len(), 1);
    }

    #[test]
    fn test_resolve_prefers_declared() {
        let mut defaults = Defaults::new();
        defaults.apply_batch(&[SupportedDefaults::system().max_source_size_bytes(600)]);
        assert_eq!(defaults.resolve("1", "a", Some(10), None), (10, 50));
        assert_eq!(defaults.resolve("1", "a", None, Some(5)), (600, 5));
    }

    #[test]
    fn test_display() {
        let entry = SupportedDefaults::system()
            .transformer("1")
            .max_source_size_bytes(100)
            .priority(23);
        assert_eq!(
            entry.to_string(),
            r#"{"transformerName": "1", "maxSourceSizeBytes": "100", "priority": "23"}"#
        );
    }
}
