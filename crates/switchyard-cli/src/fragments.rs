//! Locating and loading config fragments.

use anyhow::{Context, Result};
use rhi_switchyard_core::{ConfigMerger, MergedConfig, TransformConfig, detect_format};
use std::path::PathBuf;

/// Expand fragment sources into files, in ingest order.
///
/// A directory contributes every fragment file below it, sorted by path. A
/// pattern containing `*`, `?` or `[` is expanded as a glob. Anything else is
/// taken as a file.
pub fn collect_fragments(sources: &[String]) -> Vec<PathBuf> {
    let mut files = Vec::new();

    for source in sources {
        let path = PathBuf::from(source);

        if path.is_dir() {
            let mut found: Vec<PathBuf> = walkdir::WalkDir::new(&path)
                .into_iter()
                .filter_map(|e| e.ok())
                .filter(|e| e.file_type().is_file())
                .map(|e| e.into_path())
                .filter(|p| is_fragment(p))
                .collect();
            found.sort();
            files.extend(found);
        } else if source.contains('*') || source.contains('?') || source.contains('[') {
            files.extend(expand_glob_pattern(source));
        } else {
            files.push(path);
        }
    }

    files
}

fn is_fragment(path: &std::path::Path) -> bool {
    detect_format(&path.to_string_lossy()).is_some()
}

fn expand_glob_pattern(pattern: &str) -> Vec<PathBuf> {
    match glob::glob(pattern) {
        Ok(paths) => {
            let files: Vec<PathBuf> = paths.flatten().filter(|p| p.is_file()).collect();
            if files.is_empty() {
                tracing::warn!(pattern, "pattern matched no fragments");
            }
            files
        }
        Err(e) => {
            tracing::warn!(pattern, "invalid glob pattern: {}", e);
            Vec::new()
        }
    }
}

/// Read and merge fragment files in order.
pub fn load_merged(files: &[PathBuf]) -> Result<MergedConfig> {
    let mut merger = ConfigMerger::new();
    for file in files {
        let label = file.to_string_lossy();
        let data = std::fs::read(file)
            .with_context(|| format!("Failed to read fragment {}", label))?;
        let config = TransformConfig::from_bytes(&data, Some(label.as_ref()))
            .with_context(|| format!("Failed to parse fragment {}", label))?;
        merger.ingest(&config, &label);
    }
    Ok(merger.build())
}
