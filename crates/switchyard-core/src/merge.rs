//! Merging config fragments into one transformer set.
//!
//! Fragments are ingested one at a time. Within an ingest the directives run
//! in a fixed order, each acting on what earlier ingests accumulated:
//!
//! 1. `removeTransformers`
//! 2. `supportedDefaults`
//! 3. `addSupported`
//! 4. `removeSupported`
//! 5. `overrideSupported`
//!
//! after which the fragment's option sets and transformers are added. A
//! transformer with the same name as an existing one replaces it.
//!
//! Directives never fail. Entries that cannot be applied are collected into a
//! single warning per directive kind:
//!
//! ```text
//! Unable to process "removeSupported": [{"transformerName": "1", ...}]. Read from engine.json
//! ```
//!
//! [`ConfigMerger::build`] resolves defaults, validates transformers, derives
//! supported types for pipelines and failovers that declare none, and returns
//! a [`MergedConfig`].

use crate::config::{SupportedDirective, TransformConfig};
use crate::defaults::{Defaults, SupportedDefaults};
use crate::model::{
    SupportedConversion, SupportedSourceAndTarget, Transformer, TransformerDecl, TransformerKind,
};
use crate::options::OptionCatalogue;
use std::collections::HashSet;
use std::fmt::Display;

/// Targets never offered through a pipeline's derived supported list.
const METADATA_TARGETS: [&str; 2] = ["alfresco-metadata-extract", "alfresco-metadata-embed"];

#[derive(Debug, Clone)]
struct Entry {
    decl: TransformerDecl,
    read_from: String,
}

/// Accumulates fragments and builds the merged transformer set.
#[derive(Debug, Clone, Default)]
pub struct ConfigMerger {
    transform_options: OptionCatalogue,
    transformers: Vec<Entry>,
    defaults: Defaults,
    warnings: Vec<String>,
}

impl ConfigMerger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ingest one fragment read from `read_from`.
    ///
    /// Returns the warnings raised by this fragment. They are also kept on the
    /// merger and logged.
    pub fn ingest(&mut self, config: &TransformConfig, read_from: &str) -> Vec<String> {
        let mut warnings = Vec::new();

        self.remove_transformers(&config.remove_transformers, read_from, &mut warnings);
        self.supported_defaults(&config.supported_defaults, read_from, &mut warnings);
        self.add_supported(&config.add_supported, read_from, &mut warnings);
        self.remove_supported(&config.remove_supported, read_from, &mut warnings);
        self.override_supported(&config.override_supported, read_from, &mut warnings);

        for (name, options) in &config.transform_options {
            self.transform_options.insert(name.clone(), options.clone());
        }

        for decl in &config.transformers {
            if let Some(i) = self.position(&decl.transformer_name) {
                let previous = self.transformers.remove(i);
                tracing::debug!(
                    transformer = %decl.transformer_name,
                    previous = %previous.read_from,
                    read_from,
                    "transformer redefined"
                );
            }
            self.transformers.push(Entry {
                decl: decl.clone(),
                read_from: read_from.to_string(),
            });
        }

        for warning in &warnings {
            tracing::warn!("{}", warning);
        }
        self.warnings.extend(warnings.iter().cloned());
        warnings
    }

    /// Every warning raised so far, in ingest order.
    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }

    /// Number of transformers accumulated so far (before validation).
    pub fn len(&self) -> usize {
        self.transformers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transformers.is_empty()
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.transformers
            .iter()
            .position(|e| e.decl.transformer_name == name)
    }

    fn find_mut(&mut self, name: &str) -> Option<&mut TransformerDecl> {
        self.transformers
            .iter_mut()
            .find(|e| e.decl.transformer_name == name)
            .map(|e| &mut e.decl)
    }

    // ========================================================================
    // Directives
    // ========================================================================

    fn remove_transformers(&mut self, names: &[String], read_from: &str, warnings: &mut Vec<String>) {
        let mut unknown: Vec<String> = Vec::new();
        for name in names {
            if self.position(name).is_none() && !unknown.contains(name) {
                unknown.push(name.clone());
            }
        }
        self.transformers
            .retain(|e| !names.contains(&e.decl.transformer_name));

        let quoted: Vec<String> = unknown.iter().map(|n| format!("\"{n}\"")).collect();
        push_unprocessed(warnings, "removeTransformers", &quoted, read_from);
    }

    fn supported_defaults(
        &mut self,
        batch: &[SupportedDefaults],
        read_from: &str,
        warnings: &mut Vec<String>,
    ) {
        let unprocessed = self.defaults.apply_batch(batch);
        push_unprocessed(warnings, "supportedDefaults", &unprocessed, read_from);
    }

    fn add_supported(
        &mut self,
        directives: &[SupportedDirective],
        read_from: &str,
        warnings: &mut Vec<String>,
    ) {
        let mut unprocessed = Vec::new();
        for directive in directives {
            let Some((name, source, target)) = directive.key() else {
                unprocessed.push(directive);
                continue;
            };
            let Some(decl) = self.find_mut(name) else {
                unprocessed.push(directive);
                continue;
            };
            let list = &mut decl.supported_source_and_target_list;
            match list.iter_mut().find(|s| s.is(source, target)) {
                Some(existing) => {
                    existing.max_source_size_bytes = directive.max_source_size_bytes;
                    existing.priority = directive.priority;
                }
                None => list.push(SupportedSourceAndTarget {
                    source_media_type: source.to_string(),
                    target_media_type: target.to_string(),
                    max_source_size_bytes: directive.max_source_size_bytes,
                    priority: directive.priority,
                }),
            }
        }
        push_unprocessed(warnings, "addSupported", &unprocessed, read_from);
    }

    fn remove_supported(
        &mut self,
        directives: &[SupportedDirective],
        read_from: &str,
        warnings: &mut Vec<String>,
    ) {
        let mut unprocessed = Vec::new();
        for directive in directives {
            let removed = directive.key().is_some_and(|(name, source, target)| {
                self.find_mut(name).is_some_and(|decl| {
                    let list = &mut decl.supported_source_and_target_list;
                    let before = list.len();
                    list.retain(|s| !s.is(source, target));
                    list.len() != before
                })
            });
            if !removed {
                unprocessed.push(directive);
            }
        }
        push_unprocessed(warnings, "removeSupported", &unprocessed, read_from);
    }

    fn override_supported(
        &mut self,
        directives: &[SupportedDirective],
        read_from: &str,
        warnings: &mut Vec<String>,
    ) {
        let mut unprocessed = Vec::new();
        for directive in directives {
            let existing = match directive.key() {
                Some((name, source, target)) => self.find_mut(name).and_then(|decl| {
                    decl.supported_source_and_target_list
                        .iter_mut()
                        .find(|s| s.is(source, target))
                }),
                None => None,
            };
            match existing {
                // Omitted fields go back to the defaults rather than keeping the old value.
                Some(existing) => {
                    existing.max_source_size_bytes = directive.max_source_size_bytes;
                    existing.priority = directive.priority;
                }
                None => unprocessed.push(directive),
            }
        }
        push_unprocessed(warnings, "overrideSupported", &unprocessed, read_from);
    }

    // ========================================================================
    // Build
    // ========================================================================

    /// Build the merged transformer set.
    ///
    /// The merger is left untouched, so ingesting can continue and `build` be
    /// called again.
    pub fn build(&self) -> MergedConfig {
        let mut diagnostics = Vec::new();

        let valid: Vec<&Entry> = self
            .transformers
            .iter()
            .filter(|entry| match self.validate(entry) {
                Ok(()) => true,
                Err(message) => {
                    diagnostics.push(message);
                    false
                }
            })
            .collect();

        let ordered = order_by_dependency(valid, &mut diagnostics);

        let mut transformers: Vec<Transformer> = Vec::with_capacity(ordered.len());
        for entry in ordered {
            let mut transformer = self.resolve(entry);
            if transformer.kind.is_composite() && transformer.supported.is_empty() {
                match derive_supported(&transformer, &transformers) {
                    Ok(supported) => transformer.supported = supported,
                    Err(reason) => diagnostics.push(format!(
                        "No supported source and target mimetypes could be added to the transformer \"{}\" as {}. Read from {}",
                        transformer.name, reason, transformer.read_from
                    )),
                }
            }
            transformers.push(transformer);
        }

        for message in &diagnostics {
            tracing::error!("{}", message);
        }
        tracing::debug!(
            transformers = transformers.len(),
            dropped = self.transformers.len() - transformers.len(),
            "built merged config"
        );

        MergedConfig {
            transformers,
            transform_options: self.transform_options.clone(),
            supported_defaults: self.defaults.to_supported_defaults(),
            warnings: self.warnings.clone(),
            diagnostics,
        }
    }

    fn validate(&self, entry: &Entry) -> Result<(), String> {
        let decl = &entry.decl;
        let read_from = &entry.read_from;
        if decl.transformer_name.trim().is_empty() {
            return Err(format!(
                "Transformer names may not be blank. Read from {read_from}"
            ));
        }
        if decl.is_pipeline() && decl.is_failover() {
            return Err(format!(
                "Transformer \"{}\" cannot have pipeline and failover sections. Read from {read_from}",
                decl.transformer_name
            ));
        }
        if let Some(missing) = decl
            .transform_options
            .iter()
            .find(|name| !self.transform_options.contains_key(*name))
        {
            return Err(format!(
                "Transformer \"{}\" references \"{}\" which do not exist. Read from {read_from}",
                decl.transformer_name, missing
            ));
        }
        Ok(())
    }

    fn resolve(&self, entry: &Entry) -> Transformer {
        let decl = &entry.decl;
        let name = &decl.transformer_name;
        let supported = decl
            .supported_source_and_target_list
            .iter()
            .map(|s| {
                let (max_source_size_bytes, priority) = self.defaults.resolve(
                    name,
                    &s.source_media_type,
                    s.max_source_size_bytes,
                    s.priority,
                );
                SupportedConversion::new(
                    s.source_media_type.clone(),
                    s.target_media_type.clone(),
                    max_source_size_bytes,
                    priority,
                )
            })
            .collect();
        let kind = if decl.is_pipeline() {
            TransformerKind::Pipeline {
                steps: decl.transformer_pipeline.clone(),
            }
        } else if decl.is_failover() {
            TransformerKind::Failover {
                alternatives: decl.transformer_failover.clone(),
            }
        } else {
            TransformerKind::Engine
        };
        Transformer {
            name: name.clone(),
            core_version: decl.core_version.clone(),
            transform_options: decl.transform_options.clone(),
            supported,
            kind,
            read_from: entry.read_from.clone(),
        }
    }
}

fn push_unprocessed<T: Display>(
    warnings: &mut Vec<String>,
    directive: &str,
    entries: &[T],
    read_from: &str,
) {
    if entries.is_empty() {
        return;
    }
    let rendered: Vec<String> = entries.iter().map(ToString::to_string).collect();
    warnings.push(format!(
        "Unable to process \"{directive}\": [{}]. Read from {read_from}",
        rendered.join(", ")
    ));
}

/// Order transformers so that step transformers come before the pipelines and
/// failovers that use them. Composites whose steps never become available are
/// dropped. Otherwise insertion order is kept.
fn order_by_dependency<'a>(pending: Vec<&'a Entry>, diagnostics: &mut Vec<String>) -> Vec<&'a Entry> {
    let mut pending = pending;
    let mut ordered: Vec<&Entry> = Vec::with_capacity(pending.len());
    let mut placed: HashSet<&str> = HashSet::new();

    loop {
        let before = pending.len();
        pending.retain(|entry| {
            let entry: &'a Entry = *entry;
            let ready = entry
                .decl
                .step_names()
                .iter()
                .all(|step| placed.contains(step));
            if ready {
                placed.insert(entry.decl.transformer_name.as_str());
                ordered.push(entry);
            }
            !ready
        });
        if pending.is_empty() || pending.len() == before {
            break;
        }
    }

    for entry in pending {
        let missing: Vec<String> = entry
            .decl
            .step_names()
            .into_iter()
            .filter(|step| !placed.contains(step))
            .map(|step| format!("\"{step}\""))
            .collect();
        diagnostics.push(format!(
            "Transformer \"{}\" ignored as step transforms ({}) do not exist. Read from {}",
            entry.decl.transformer_name,
            missing.join(", "),
            entry.read_from
        ));
    }
    ordered
}

/// Work out supported conversions for a composite that declared none.
///
/// `known` holds every transformer resolved so far, which includes all of the
/// composite's steps. A pipeline skips combinations its first step already
/// offers when both reference the same option set names; the sets' contents
/// are not compared.
fn derive_supported(
    transformer: &Transformer,
    known: &[Transformer],
) -> Result<Vec<SupportedConversion>, String> {
    let lookup = |name: &str| find(known, name);
    match &transformer.kind {
        TransformerKind::Engine => Ok(Vec::new()),
        TransformerKind::Failover { alternatives } => {
            let mut supported: Vec<SupportedConversion> = Vec::new();
            for name in alternatives {
                let step = lookup(name.as_str()).ok_or("one of the step transformers is missing")?;
                for s in &step.supported {
                    // One better than its steps so the failover is picked ahead of them.
                    let derived = SupportedConversion {
                        priority: s.priority.saturating_sub(1),
                        ..s.clone()
                    };
                    if !supported.contains(&derived) {
                        supported.push(derived);
                    }
                }
            }
            if supported.is_empty() {
                return Err("the step transforms don't support any".to_string());
            }
            Ok(supported)
        }
        TransformerKind::Pipeline { steps } => {
            if steps.len() < 2 {
                return Err("a pipeline needs at least two steps".to_string());
            }
            let first = lookup(steps[0].transformer_name.as_str())
                .ok_or("one of the step transformers is missing")?;
            let Some(first_target) = steps[0].target_media_type.as_deref() else {
                return Err("intermediate steps should have a target mimetype".to_string());
            };
            let sources: Vec<&SupportedConversion> = first
                .supported
                .iter()
                .filter(|s| s.target_media_type == first_target)
                .collect();
            if sources.is_empty() {
                return Err(format!(
                    "the first step transformer \"{}\" does not support to \"{}\"",
                    first.name, first_target
                ));
            }

            let mut intermediate = first_target;
            let last = steps.len() - 1;
            for step in &steps[1..last] {
                let step_transformer = lookup(step.transformer_name.as_str())
                    .ok_or("one of the step transformers is missing")?;
                let Some(target) = step.target_media_type.as_deref() else {
                    return Err("intermediate steps should have a target mimetype".to_string());
                };
                if !step_transformer
                    .supported
                    .iter()
                    .any(|s| s.is(intermediate, target))
                {
                    return Err(format!(
                        "the step transformer \"{}\" does not support \"{}\" to \"{}\"",
                        step_transformer.name, intermediate, target
                    ));
                }
                intermediate = target;
            }

            let final_step = &steps[last];
            if final_step.target_media_type.is_some() {
                return Err("the final step should not have a target mimetype".to_string());
            }
            let final_transformer = lookup(final_step.transformer_name.as_str())
                .ok_or("one of the step transformers is missing")?;
            let targets: Vec<&str> = final_transformer
                .supported
                .iter()
                .filter(|s| {
                    s.source_media_type == intermediate
                        && !METADATA_TARGETS.contains(&s.target_media_type.as_str())
                })
                .map(|s| s.target_media_type.as_str())
                .collect();
            if targets.is_empty() {
                return Err(format!(
                    "the final step transformer \"{}\" does not support from \"{}\"",
                    final_transformer.name, intermediate
                ));
            }

            // Only the referenced option set names are compared, not their contents.
            let same_options = transformer.transform_options.iter().collect::<HashSet<_>>()
                == first.transform_options.iter().collect::<HashSet<_>>();
            let mut supported: Vec<SupportedConversion> = Vec::new();
            for source in &sources {
                for target in &targets {
                    if same_options
                        && first
                            .supported
                            .iter()
                            .any(|s| s.is(&source.source_media_type, target))
                    {
                        continue;
                    }
                    let derived = SupportedConversion::new(
                        source.source_media_type.clone(),
                        *target,
                        source.max_source_size_bytes,
                        source.priority,
                    );
                    if !supported.contains(&derived) {
                        supported.push(derived);
                    }
                }
            }
            if supported.is_empty() {
                return Err(format!(
                    "the first transformer \"{}\" in the pipeline already supported all source and target mimetypes that would have been added as wildcards",
                    first.name
                ));
            }
            Ok(supported)
        }
    }
}

fn find<'a>(known: &'a [Transformer], name: &str) -> Option<&'a Transformer> {
    known.iter().find(|t| t.name == name)
}

/// The result of [`ConfigMerger::build`].
#[derive(Debug, Clone, Default)]
pub struct MergedConfig {
    /// Valid transformers, steps before the composites using them.
    pub transformers: Vec<Transformer>,
    /// The option set catalogue.
    pub transform_options: OptionCatalogue,
    /// Supported defaults in effect.
    pub supported_defaults: Vec<SupportedDefaults>,
    /// Unprocessable directive warnings from every ingest.
    pub warnings: Vec<String>,
    /// Transformers dropped or left without supported types.
    pub diagnostics: Vec<String>,
}

impl MergedConfig {
    pub fn transformer(&self, name: &str) -> Option<&Transformer> {
        self.transformers.iter().find(|t| t.name == name)
    }

    /// The merged result as a single fragment with every value resolved.
    pub fn to_config(&self) -> TransformConfig {
        TransformConfig {
            transform_options: self.transform_options.clone(),
            transformers: self.transformers.iter().map(Transformer::to_decl).collect(),
            supported_defaults: self.supported_defaults.clone(),
            ..Default::default()
        }
    }
}
