//! Known downloader implementations, by identifier.
//!
//! The manifest names plugins; the catalog knows how to build them.

use std::sync::Arc;

use pix360_core::error::InstallError;
use pix360_core::http::Fetcher;

use crate::builtin::{cubemap, direct, CubemapTemplateDownloader, DirectDownloader};
use crate::downloader::Downloader;

/// Builds a plugin from its manifest settings.
pub type ModuleFactory = Box<
    dyn Fn(&serde_json::Value, &Fetcher) -> Result<Arc<dyn Downloader>, InstallError>
        + Send
        + Sync,
>;

/// Ordered identifier → factory table.
#[derive(Default)]
pub struct ModuleCatalog {
    factories: Vec<(String, ModuleFactory)>,
}

impl ModuleCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Catalog of every built-in downloader, most specific first.
    pub fn builtin() -> Self {
        let mut catalog = Self::new();
        catalog.add(cubemap::IDENTIFIER, |settings, fetcher| {
            let downloader: Arc<dyn Downloader> = Arc::new(
                CubemapTemplateDownloader::from_settings(settings, fetcher.clone())?,
            );
            Ok(downloader)
        });
        catalog.add(direct::IDENTIFIER, |settings, fetcher| {
            let downloader: Arc<dyn Downloader> =
                Arc::new(DirectDownloader::from_settings(settings, fetcher.clone())?);
            Ok(downloader)
        });
        catalog
    }

    /// Add a factory. Lookups return the first entry with a given identifier.
    pub fn add<F>(&mut self, identifier: &str, factory: F)
    where
        F: Fn(&serde_json::Value, &Fetcher) -> Result<Arc<dyn Downloader>, InstallError>
            + Send
            + Sync
            + 'static,
    {
        self.factories.push((identifier.to_string(), Box::new(factory)));
    }

    /// Identifiers in catalog order.
    pub fn identifiers(&self) -> impl Iterator<Item = &str> {
        self.factories.iter().map(|(identifier, _)| identifier.as_str())
    }

    /// Instantiate `identifier` with `settings`.
    pub fn build(
        &self,
        identifier: &str,
        settings: &serde_json::Value,
        fetcher: &Fetcher,
    ) -> Result<Arc<dyn Downloader>, InstallError> {
        let (_, factory) = self
            .factories
            .iter()
            .find(|(known, _)| known == identifier)
            .ok_or_else(|| InstallError::UnknownModule {
                identifier: identifier.to_string(),
            })?;
        factory(settings, fetcher)
    }
}
