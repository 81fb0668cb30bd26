//! Plugin manifest: which downloaders to install, with what settings.
//!
//! ```json
//! {
//!   "modules": [
//!     { "identifier": "direct" },
//!     { "identifier": "cubemap-template", "settings": { "face_names": { "up": "top" } } },
//!     { "identifier": "legacy", "enabled": false }
//!   ]
//! }
//! ```

use std::path::Path;

use pix360_core::error::InstallError;
use serde::Deserialize;

/// One manifest entry.
#[derive(Debug, Clone, Deserialize)]
pub struct ManifestEntry {
    pub identifier: String,
    #[serde(default = "enabled_by_default")]
    pub enabled: bool,
    /// Plugin-specific settings, handed to the plugin's factory.
    #[serde(default)]
    pub settings: serde_json::Value,
}

fn enabled_by_default() -> bool {
    true
}

/// The whole manifest, loaded once at process start.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ModuleManifest {
    #[serde(default)]
    pub modules: Vec<ManifestEntry>,
}

impl ModuleManifest {
    pub fn from_json(json: &str) -> Result<Self, InstallError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_path(path: &Path) -> Result<Self, InstallError> {
        let json = std::fs::read_to_string(path).map_err(|source| InstallError::ManifestIo {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json(&json)
    }

    /// Entries that are switched on, in manifest order.
    pub fn enabled(&self) -> impl Iterator<Item = &ManifestEntry> {
        self.modules.iter().filter(|entry| entry.enabled)
    }
}
