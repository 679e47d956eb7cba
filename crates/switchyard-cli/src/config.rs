//! Configuration file support.

use indexmap::IndexMap;
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Main configuration structure.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Fragment files, directories or glob patterns, ingested in order.
    pub fragments: Vec<String>,
    /// Default CLI options.
    pub defaults: Defaults,
    /// Named renditions.
    pub renditions: IndexMap<String, Rendition>,
}

/// Default CLI options.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Defaults {
    /// Enable verbose output by default.
    pub verbose: bool,
    /// Output format for `merge` (json, yaml or toml).
    pub format: Option<String>,
}

/// Options that always go with a rendition.
///
/// ```toml
/// [renditions.doclib]
/// options = { resizeWidth = "100", resizeHeight = "100" }
/// ```
#[derive(Debug, Default, Clone, Deserialize)]
#[serde(default)]
pub struct Rendition {
    pub options: IndexMap<String, String>,
}

impl Config {
    /// Load config from the default location (~/.config/switchyard/config.toml).
    pub fn load() -> Self {
        Self::load_from_path(Self::default_path())
    }

    /// Load config from a specific path.
    pub fn load_from_path(path: Option<PathBuf>) -> Self {
        let Some(path) = path else {
            return Self::default();
        };

        if !path.exists() {
            return Self::default();
        }

        match std::fs::read_to_string(&path) {
            Ok(contents) => match toml::from_str::<Config>(&contents) {
                Ok(config) => config.relative_to(path.parent()),
                Err(e) => {
                    tracing::warn!(path = %path.display(), "failed to parse config file: {}", e);
                    Self::default()
                }
            },
            Err(e) => {
                tracing::warn!(path = %path.display(), "failed to read config file: {}", e);
                Self::default()
            }
        }
    }

    /// Get the default config file path.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("switchyard").join("config.toml"))
    }

    /// Options for a rendition, if it is defined.
    pub fn rendition_options(&self, name: &str) -> Option<&IndexMap<String, String>> {
        self.renditions.get(name).map(|r| &r.options)
    }

    // Relative fragment paths are taken from the config file's directory.
    fn relative_to(mut self, dir: Option<&Path>) -> Self {
        if let Some(dir) = dir {
            for fragment in &mut self.fragments {
                if Path::new(fragment.as_str()).is_relative() {
                    *fragment = dir.join(fragment.as_str()).to_string_lossy().to_string();
                }
            }
        }
        self
    }
}
