//! Capability index and transformer selection.
//!
//! The index maps `source type → target type →` candidate transforms, each
//! list ordered by priority and then by the order transformers appear in the
//! merged config. It is immutable once built. Candidate lists filtered by
//! request options can be memoized per rendition; the memo belongs to the
//! index and disappears with it.

use crate::merge::MergedConfig;
use crate::model::{TransformOptions, Transformer, UNLIMITED};
use crate::options::{OptionGroup, options_match, possible_options};
use dashmap::DashMap;
use indexmap::IndexMap;
use std::collections::HashMap;
use std::sync::Arc;

/// One transformer's offer for a source/target pair.
#[derive(Debug, Clone)]
pub struct SupportedTransform {
    pub transformer_name: String,
    pub options: Arc<OptionGroup>,
    pub max_source_size_bytes: i64,
    pub priority: i32,
}

impl SupportedTransform {
    fn accepts(&self, size: i64) -> bool {
        self.max_source_size_bytes == UNLIMITED || self.max_source_size_bytes >= size
    }
}

type Candidates = Arc<Vec<SupportedTransform>>;

/// An immutable snapshot of what every transformer supports.
#[derive(Debug, Default)]
pub struct TransformIndex {
    transforms: HashMap<String, HashMap<String, Vec<SupportedTransform>>>,
    transformers: IndexMap<String, Transformer>,
    /// Option-filtered candidates keyed by (rendition, source type).
    renditions: DashMap<(String, String), Candidates>,
    transform_count: usize,
}

impl TransformIndex {
    /// An index with nothing in it.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Build an index from a merged config.
    pub fn build(config: &MergedConfig) -> Self {
        let mut transforms: HashMap<String, HashMap<String, Vec<SupportedTransform>>> =
            HashMap::new();
        let mut transformers = IndexMap::new();
        let mut transform_count = 0;

        for transformer in &config.transformers {
            let (options, missing) =
                OptionGroup::resolve(&transformer.transform_options, &config.transform_options);
            for name in missing {
                tracing::error!(
                    "transformOptions in {} with the name {} does not exist. Ignored",
                    transformer.read_from,
                    name
                );
            }
            let options = Arc::new(options);

            for supported in &transformer.supported {
                transforms
                    .entry(supported.source_media_type.clone())
                    .or_default()
                    .entry(supported.target_media_type.clone())
                    .or_default()
                    .push(SupportedTransform {
                        transformer_name: transformer.name.clone(),
                        options: Arc::clone(&options),
                        max_source_size_bytes: supported.max_source_size_bytes,
                        priority: supported.priority,
                    });
                transform_count += 1;
            }
            transformers.insert(transformer.name.clone(), transformer.clone());
        }

        // Stable, so equal priorities keep config order.
        for targets in transforms.values_mut() {
            for candidates in targets.values_mut() {
                candidates.sort_by_key(|c| c.priority);
            }
        }

        tracing::debug!(
            transformers = transformers.len(),
            transforms = transform_count,
            "built transform index"
        );

        Self {
            transforms,
            transformers,
            renditions: DashMap::new(),
            transform_count,
        }
    }

    /// Pick the transformer for a request, or `None` if nothing fits.
    ///
    /// With a `rendition`, the option-filtered candidates are memoized by
    /// `(rendition, source)`; a rendition must therefore always be used with
    /// the same target type and options.
    pub fn find_transformer_name(
        &self,
        source: &str,
        size: i64,
        target: &str,
        options: &TransformOptions,
        rendition: Option<&str>,
    ) -> Option<String> {
        self.candidates(source, target, options, rendition)
            .iter()
            .find(|c| c.accepts(size))
            .map(|c| c.transformer_name.clone())
    }

    /// The largest source any candidate accepts.
    ///
    /// `-1` when some candidate is unlimited, `0` when there are no candidates.
    pub fn find_max_size(
        &self,
        source: &str,
        target: &str,
        options: &TransformOptions,
        rendition: Option<&str>,
    ) -> i64 {
        let candidates = self.candidates(source, target, options, rendition);
        if candidates.iter().any(|c| c.max_source_size_bytes == UNLIMITED) {
            return UNLIMITED;
        }
        candidates
            .iter()
            .map(|c| c.max_source_size_bytes)
            .max()
            .unwrap_or(0)
    }

    /// Whether some transformer can handle the request.
    pub fn is_supported(
        &self,
        source: &str,
        size: i64,
        target: &str,
        options: &TransformOptions,
        rendition: Option<&str>,
    ) -> bool {
        let max = self.find_max_size(source, target, options, rendition);
        max != 0 && (max == UNLIMITED || max >= size)
    }

    fn candidates(
        &self,
        source: &str,
        target: &str,
        options: &TransformOptions,
        rendition: Option<&str>,
    ) -> Candidates {
        let Some(rendition) = rendition else {
            return Arc::new(self.filter(source, target, options));
        };
        let key = (rendition.to_string(), source.to_string());
        if let Some(hit) = self.renditions.get(&key) {
            tracing::debug!(rendition, source, "rendition cache hit");
            return Arc::clone(hit.value());
        }
        let candidates = Arc::new(self.filter(source, target, options));
        self.renditions.insert(key, Arc::clone(&candidates));
        candidates
    }

    fn filter(&self, source: &str, target: &str, options: &TransformOptions) -> Vec<SupportedTransform> {
        self.transforms
            .get(source)
            .and_then(|targets| targets.get(target))
            .map(|candidates| {
                candidates
                    .iter()
                    .filter(|c| options_match(&possible_options(&c.options, options), options))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Whether the named transformer converts `source` to `target` for a
    /// source of `size` bytes.
    pub fn supports(&self, transformer: &str, source: &str, target: &str, size: i64) -> bool {
        self.transformers
            .get(transformer)
            .is_some_and(|t| t.supports(source, target, size))
    }

    /// Look up a transformer by name.
    pub fn transformer(&self, name: &str) -> Option<&Transformer> {
        self.transformers.get(name)
    }

    /// The named transformer's version tag.
    pub fn core_version(&self, name: &str) -> Option<&str> {
        self.transformers.get(name)?.core_version.as_deref()
    }

    /// Iterate over transformers in config order.
    pub fn transformers(&self) -> impl Iterator<Item = &Transformer> {
        self.transformers.values()
    }

    /// Number of transformers.
    pub fn len(&self) -> usize {
        self.transformers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transformers.is_empty()
    }

    /// Number of (transformer, source, target) offers.
    pub fn transform_count(&self) -> usize {
        self.transform_count
    }

    /// Number of memoized (rendition, source) candidate lists.
    pub fn cached_renditions(&self) -> usize {
        self.renditions.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TransformConfig;
    use crate::merge::ConfigMerger;
    use crate::model::{SupportedSourceAndTarget, TransformerDecl};
    use crate::options::TransformOption;

    fn no_options() -> TransformOptions {
        TransformOptions::new()
    }

    fn make_test_index() -> TransformIndex {
        let config = TransformConfig::new()
            .option_set(
                "resize",
                vec![TransformOption::group(
                    false,
                    vec![TransformOption::required("width"), TransformOption::required("height")],
                )],
            )
            .transformer(
                TransformerDecl::new("small-fast").supported(
                    SupportedSourceAndTarget::new("doc", "pdf")
                        .max_source_size_bytes(100)
                        .priority(10),
                ),
            )
            .transformer(
                TransformerDecl::new("big-slow").supported(
                    SupportedSourceAndTarget::new("doc", "pdf")
                        .max_source_size_bytes(10_000)
                        .priority(20),
                ),
            )
            .transformer(
                TransformerDecl::new("fallback-a").supported(SupportedSourceAndTarget::new("doc", "txt")),
            )
            .transformer(
                TransformerDecl::new("fallback-b").supported(SupportedSourceAndTarget::new("doc", "txt")),
            )
            .transformer(
                TransformerDecl::new("imagemagick")
                    .option_set("resize")
                    .supported(SupportedSourceAndTarget::new("png", "jpg").priority(40)),
            )
            .transformer(
                TransformerDecl::new("basic-image")
                    .supported(SupportedSourceAndTarget::new("png", "jpg").max_source_size_bytes(5000)),
            );
        let mut merger = ConfigMerger::new();
        merger.ingest(&config, "test");
        TransformIndex::build(&merger.build())
    }

    #[test]
    fn test_priority_then_size() {
        let index = make_test_index();
        let name = |size| index.find_transformer_name("doc", size, "pdf", &no_options(), None);
        assert_eq!(name(50).as_deref(), Some("small-fast"));
        assert_eq!(name(100).as_deref(), Some("small-fast"));
        assert_eq!(name(101).as_deref(), Some("big-slow"));
        assert_eq!(name(10_001), None);
    }

    #[test]
    fn test_selection_is_deterministic() {
        let index = make_test_index();
        let first = index.find_transformer_name("doc", 10, "txt", &no_options(), None);
        for _ in 0..10 {
            assert_eq!(
                index.find_transformer_name("doc", 10, "txt", &no_options(), None),
                first
            );
        }
        // Equal priority: config order decides.
        assert_eq!(first.as_deref(), Some("fallback-a"));
    }

    #[test]
    fn test_unknown_pair() {
        let index = make_test_index();
        assert_eq!(
            index.find_transformer_name("doc", 1, "png", &no_options(), None),
            None
        );
        assert_eq!(index.find_max_size("xyz", "pdf", &no_options(), None), 0);
        assert!(!index.is_supported("doc", 1, "png", &no_options(), None));
    }

    #[test]
    fn test_required_options() {
        let index = make_test_index();
        let mut options = no_options();
        assert_eq!(
            index.find_transformer_name("png", 10, "jpg", &options, None).as_deref(),
            Some("imagemagick")
        );

        // Using the resize group makes both of its options required.
        options.insert("width".into(), "100".into());
        assert_eq!(
            index.find_transformer_name("png", 10, "jpg", &options, None).as_deref(),
            Some("basic-image")
        );

        options.insert("height".into(), "100".into());
        assert_eq!(
            index.find_transformer_name("png", 10, "jpg", &options, None).as_deref(),
            Some("imagemagick")
        );
    }

    #[test]
    fn test_any_one_of_several_option_sets() {
        let config = TransformConfig::new()
            .option_set("resize", vec![TransformOption::required("width")])
            .option_set("paging", vec![TransformOption::optional("page")])
            .transformer(
                TransformerDecl::new("pdf-pages")
                    .option_set("resize")
                    .option_set("paging")
                    .supported(SupportedSourceAndTarget::new("pdf", "png")),
            );
        let mut merger = ConfigMerger::new();
        merger.ingest(&config, "test");
        let index = TransformIndex::build(&merger.build());

        let mut options = no_options();
        options.insert("page".into(), "2".into());
        assert_eq!(
            index.find_transformer_name("pdf", 10, "png", &options, None).as_deref(),
            Some("pdf-pages")
        );
        assert_eq!(
            index.find_transformer_name("pdf", 10, "png", &no_options(), None).as_deref(),
            Some("pdf-pages")
        );
    }

    #[test]
    fn test_extra_options_ignored() {
        let index = make_test_index();
        let mut options = no_options();
        options.insert("unrelated".into(), "x".into());
        assert_eq!(
            index.find_transformer_name("doc", 10, "pdf", &options, None).as_deref(),
            Some("small-fast")
        );
    }

    #[test]
    fn test_find_max_size() {
        let index = make_test_index();
        assert_eq!(index.find_max_size("doc", "pdf", &no_options(), None), 10_000);
        assert_eq!(index.find_max_size("png", "jpg", &no_options(), None), UNLIMITED);

        let mut options = no_options();
        options.insert("width".into(), "1".into());
        assert_eq!(index.find_max_size("png", "jpg", &options, None), 5000);
    }

    #[test]
    fn test_is_supported_matches_selection() {
        let index = make_test_index();
        for size in [0, 100, 5000, 10_000, 10_001] {
            assert_eq!(
                index.is_supported("doc", size, "pdf", &no_options(), None),
                index
                    .find_transformer_name("doc", size, "pdf", &no_options(), None)
                    .is_some(),
                "size {size}"
            );
        }
    }

    #[test]
    fn test_rendition_cache() {
        let index = make_test_index();
        assert_eq!(index.cached_renditions(), 0);
        let small = index.find_transformer_name("doc", 10, "pdf", &no_options(), Some("pdf"));
        assert_eq!(small.as_deref(), Some("small-fast"));
        assert_eq!(index.cached_renditions(), 1);

        // Size is applied after the cache.
        let big = index.find_transformer_name("doc", 1000, "pdf", &no_options(), Some("pdf"));
        assert_eq!(big.as_deref(), Some("big-slow"));
        assert_eq!(index.cached_renditions(), 1);

        index.find_transformer_name("png", 10, "jpg", &no_options(), Some("pdf"));
        assert_eq!(index.cached_renditions(), 2);
    }

    #[test]
    fn test_supports_named_transformer() {
        let index = make_test_index();
        assert!(index.supports("small-fast", "doc", "pdf", 100));
        assert!(!index.supports("small-fast", "doc", "pdf", 101));
        assert!(!index.supports("missing", "doc", "pdf", 1));
        assert_eq!(index.len(), 6);
        assert_eq!(index.transform_count(), 6);
    }
}
