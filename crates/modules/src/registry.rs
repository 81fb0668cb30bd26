//! Registry of installed downloader plugins and URL capability scoring.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::Path;
use std::sync::Arc;

use pix360_core::certainty::CertaintyScore;
use pix360_core::error::{DispatchError, InstallError};
use pix360_core::http::Fetcher;

use crate::catalog::ModuleCatalog;
use crate::downloader::Downloader;
use crate::manifest::ModuleManifest;

/// A downloader together with its score for one URL.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub downloader: Arc<dyn Downloader>,
    pub score: CertaintyScore,
}

/// Installed downloaders, in registration order.
///
/// Registration order matters: it breaks ties between equal scores.
#[derive(Debug, Default)]
pub struct ModuleRegistry {
    downloaders: Vec<Arc<dyn Downloader>>,
}

impl ModuleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an already-built downloader.
    pub fn register(&mut self, downloader: Arc<dyn Downloader>) -> Result<(), InstallError> {
        if self.resolve_by_identifier(downloader.identifier()).is_some() {
            return Err(InstallError::Duplicate {
                identifier: downloader.identifier().to_string(),
            });
        }
        tracing::info!(
            identifier = downloader.identifier(),
            name = downloader.name(),
            "Downloader module installed",
        );
        self.downloaders.push(downloader);
        Ok(())
    }

    /// Build and register one plugin inside its own failure boundary.
    ///
    /// Errors and panics are logged and the plugin is skipped.
    fn install<F>(&mut self, identifier: &str, build: F)
    where
        F: FnOnce() -> Result<Arc<dyn Downloader>, InstallError>,
    {
        let result = catch_unwind(AssertUnwindSafe(build))
            .unwrap_or_else(|_| {
                Err(InstallError::Panicked {
                    identifier: identifier.to_string(),
                })
            })
            .and_then(|downloader| self.register(downloader));

        if let Err(e) = result {
            tracing::warn!(identifier, error = %e, "Skipping downloader module");
        }
    }

    /// Install every enabled manifest entry through `catalog`.
    pub fn load(manifest: &ModuleManifest, catalog: &ModuleCatalog, fetcher: &Fetcher) -> Self {
        let mut registry = Self::new();
        for entry in manifest.enabled() {
            registry.install(&entry.identifier, || {
                catalog.build(&entry.identifier, &entry.settings, fetcher)
            });
        }
        registry
    }

    /// Every built-in downloader with default settings.
    pub fn with_builtins(fetcher: &Fetcher) -> Self {
        let catalog = ModuleCatalog::builtin();
        let mut registry = Self::new();
        for identifier in catalog.identifiers() {
            registry.install(identifier, || {
                catalog.build(identifier, &serde_json::Value::Null, fetcher)
            });
        }
        registry
    }

    /// Load from a manifest file, or register the built-ins when no
    /// manifest is configured. Only an unreadable manifest is fatal.
    pub fn from_manifest_path(
        path: Option<&Path>,
        fetcher: &Fetcher,
    ) -> Result<Self, InstallError> {
        match path {
            Some(path) => {
                let manifest = ModuleManifest::from_path(path)?;
                Ok(Self::load(&manifest, &ModuleCatalog::builtin(), fetcher))
            }
            None => Ok(Self::with_builtins(fetcher)),
        }
    }

    pub fn len(&self) -> usize {
        self.downloaders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.downloaders.is_empty()
    }

    /// Installed downloaders in registration order.
    pub fn descriptors(&self) -> impl Iterator<Item = &Arc<dyn Downloader>> {
        self.downloaders.iter()
    }

    /// The downloader registered under `identifier`, if any.
    pub fn resolve_by_identifier(&self, identifier: &str) -> Option<Arc<dyn Downloader>> {
        self.downloaders
            .iter()
            .find(|d| d.identifier() == identifier)
            .cloned()
    }

    /// Score `url` against every downloader.
    ///
    /// Downloaders at or below [`CertaintyScore::UNSUPPORTED`] are dropped;
    /// the rest come back best first, ties in registration order. The first
    /// scoring failure aborts the whole call.
    pub fn find_candidates(&self, url: &str) -> Result<Vec<Candidate>, DispatchError> {
        let mut candidates = Vec::new();

        for downloader in &self.downloaders {
            let score = downloader
                .test_url(url)
                .map_err(|source| DispatchError::ScoringFailed {
                    identifier: downloader.identifier().to_string(),
                    source,
                })?;

            tracing::debug!(identifier = downloader.identifier(), %score, url, "Scored URL");

            if score.is_supported() {
                candidates.push(Candidate {
                    downloader: Arc::clone(downloader),
                    score,
                });
            }
        }

        // `sort_by` is stable, which keeps registration order among ties.
        candidates.sort_by(|a, b| b.score.cmp(&a.score));
        Ok(candidates)
    }

    /// The best candidate for `url`.
    pub fn select(&self, url: &str) -> Result<Candidate, DispatchError> {
        self.find_candidates(url)?
            .into_iter()
            .next()
            .ok_or_else(|| DispatchError::NoCapableDownloader {
                url: url.to_string(),
            })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use assert_matches::assert_matches;
    use async_trait::async_trait;
    use pix360_core::error::{BoxError, ConversionError};
    use pix360_core::http::RetryPolicy;
    use pix360_db::models::conversion::Conversion;

    use super::*;
    use crate::downloader::Download;
    use crate::testing::StaticClient;

    /// Downloader with a fixed score (or scoring error) for every URL.
    struct Fixed {
        identifier: &'static str,
        score: Result<i32, &'static str>,
    }

    fn fixed(identifier: &'static str, score: i32) -> Arc<dyn Downloader> {
        Arc::new(Fixed {
            identifier,
            score: Ok(score),
        })
    }

    #[async_trait]
    impl Downloader for Fixed {
        fn identifier(&self) -> &str {
            self.identifier
        }

        fn name(&self) -> &str {
            "Fixed"
        }

        fn test_url(&self, _url: &str) -> Result<CertaintyScore, BoxError> {
            match self.score {
                Ok(score) => Ok(CertaintyScore::new(score)),
                Err(message) => Err(message.into()),
            }
        }

        async fn process(&self, _conversion: &Conversion) -> Result<Download, ConversionError> {
            Err(ConversionError::Other("not used".to_string()))
        }
    }

    fn registry(downloaders: Vec<Arc<dyn Downloader>>) -> ModuleRegistry {
        let mut registry = ModuleRegistry::new();
        for downloader in downloaders {
            registry.register(downloader).unwrap();
        }
        registry
    }

    fn identifiers(candidates: &[Candidate]) -> Vec<&str> {
        candidates.iter().map(|c| c.downloader.identifier()).collect()
    }

    fn fetcher() -> Fetcher {
        Fetcher::new(Arc::new(StaticClient::default()), RetryPolicy::default())
    }

    #[test]
    fn higher_score_wins() {
        let registry = registry(vec![fixed("probable", 50), fixed("certain", 100)]);

        let candidates = registry.find_candidates("https://example.com").unwrap();
        assert_eq!(identifiers(&candidates), vec!["certain", "probable"]);
        assert_eq!(
            registry.select("https://example.com").unwrap().downloader.identifier(),
            "certain"
        );
    }

    #[test]
    fn ties_keep_registration_order() {
        let registry = registry(vec![
            fixed("first", 50),
            fixed("better", 60),
            fixed("second", 50),
        ]);

        let candidates = registry.find_candidates("https://example.com").unwrap();
        assert_eq!(identifiers(&candidates), vec!["better", "first", "second"]);
    }

    #[test]
    fn unsupported_and_below_are_excluded() {
        let registry = registry(vec![
            fixed("unsupported", -100),
            fixed("way-below", -150),
            fixed("barely", -99),
        ]);

        let candidates = registry.find_candidates("https://example.com").unwrap();
        assert_eq!(identifiers(&candidates), vec!["barely"]);
    }

    #[test]
    fn no_candidates_is_a_dispatch_error() {
        let registry = registry(vec![fixed("unsupported", -100)]);
        assert_matches!(
            registry.select("https://example.com/x"),
            Err(DispatchError::NoCapableDownloader { url }) if url == "https://example.com/x"
        );
    }

    #[test]
    fn scoring_failure_names_the_plugin() {
        let registry = registry(vec![
            fixed("fine", 100),
            Arc::new(Fixed {
                identifier: "broken",
                score: Err("regex exploded"),
            }),
        ]);

        let err = registry.find_candidates("https://example.com").unwrap_err();
        assert_matches!(
            &err,
            DispatchError::ScoringFailed { identifier, .. } if identifier == "broken"
        );
        assert!(err.to_string().contains("regex exploded"));
    }

    #[test]
    fn resolve_by_identifier_is_optional() {
        let registry = registry(vec![fixed("a", 0)]);
        assert!(registry.resolve_by_identifier("a").is_some());
        assert!(registry.resolve_by_identifier("b").is_none());
    }

    #[test]
    fn duplicate_identifiers_are_rejected() {
        let mut registry = registry(vec![fixed("a", 0)]);
        assert_matches!(
            registry.register(fixed("a", 100)),
            Err(InstallError::Duplicate { identifier }) if identifier == "a"
        );
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn broken_plugins_are_skipped_at_load() {
        let mut catalog = ModuleCatalog::new();
        catalog.add("good", |_, _| Ok(fixed("good", 0)));
        catalog.add("rejects-settings", |_, _| {
            Err(InstallError::InvalidSettings {
                identifier: "rejects-settings".to_string(),
                reason: "nope".to_string(),
            })
        });
        catalog.add("panics", |_, _| panic!("plugin crashed during load"));

        let manifest = ModuleManifest::from_json(
            r#"{"modules": [
                {"identifier": "panics"},
                {"identifier": "missing"},
                {"identifier": "rejects-settings"},
                {"identifier": "good"},
                {"identifier": "good", "enabled": false}
            ]}"#,
        )
        .unwrap();

        let registry = ModuleRegistry::load(&manifest, &catalog, &fetcher());
        let installed: Vec<&str> = registry.descriptors().map(|d| d.identifier()).collect();
        assert_eq!(installed, vec!["good"]);
    }

    #[test]
    fn disabled_entries_are_never_built() {
        let built = Arc::new(AtomicUsize::new(0));
        let mut catalog = ModuleCatalog::new();
        let counter = Arc::clone(&built);
        catalog.add("legacy", move |_, _| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(fixed("legacy", 0))
        });
        catalog.add("good", |_, _| Ok(fixed("good", 0)));

        let manifest = ModuleManifest::from_json(
            r#"{"modules": [
                {"identifier": "legacy", "enabled": false},
                {"identifier": "good"}
            ]}"#,
        )
        .unwrap();

        let registry = ModuleRegistry::load(&manifest, &catalog, &fetcher());
        assert_eq!(built.load(Ordering::SeqCst), 0);
        assert!(registry.resolve_by_identifier("legacy").is_none());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn builtins_route_templates_and_images() {
        let registry = ModuleRegistry::with_builtins(&fetcher());
        assert_eq!(registry.len(), 2);

        let template = registry.select("https://x.example.com/{face}.jpg").unwrap();
        assert_eq!(template.downloader.identifier(), "cubemap-template");
        assert_eq!(template.score, CertaintyScore::CERTAIN);

        let image = registry.select("https://x.example.com/pano.jpg").unwrap();
        assert_eq!(image.downloader.identifier(), "direct");
        assert_eq!(image.score, CertaintyScore::PROBABLE);

        assert_matches!(
            registry.select("https://x.example.com/viewer"),
            Err(DispatchError::NoCapableDownloader { .. })
        );
    }

    #[test]
    fn manifest_path_falls_back_to_builtins() {
        let registry = ModuleRegistry::from_manifest_path(None, &fetcher()).unwrap();
        assert_eq!(registry.len(), 2);

        assert_matches!(
            ModuleRegistry::from_manifest_path(Some(Path::new("/nonexistent.json")), &fetcher()),
            Err(InstallError::ManifestIo { .. })
        );
    }
}
