//! The downloader plugin contract.

use std::fmt;

use async_trait::async_trait;
use pix360_core::asset::AssetData;
use pix360_core::certainty::CertaintyScore;
use pix360_core::error::{BoxError, ConversionError};
use pix360_core::stitching::StitchRequest;
use pix360_db::models::conversion::Conversion;

/// What a downloader hands back for a conversion.
#[derive(Debug, Clone)]
pub enum Download {
    /// The provider served a finished panorama; stitching is skipped.
    Assembled(AssetData),
    /// Raw faces or tiles the stitching engine must assemble.
    Stitch(StitchRequest),
}

impl Download {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Assembled(_) => "assembled",
            Self::Stitch(request) => request.kind(),
        }
    }
}

/// A content provider integration.
///
/// `test_url` must be cheap: it only judges whether a URL looks like
/// something this plugin handles, it never touches the network.
#[async_trait]
pub trait Downloader: Send + Sync {
    /// Unique, stable identifier (persisted onto conversions).
    fn identifier(&self) -> &str;

    /// Human-friendly name.
    fn name(&self) -> &str;

    /// How certain this plugin is that it handles `url`.
    fn test_url(&self, url: &str) -> Result<CertaintyScore, BoxError>;

    /// Fetch the content for `conversion`.
    async fn process(&self, conversion: &Conversion) -> Result<Download, ConversionError>;
}

impl fmt::Debug for dyn Downloader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Downloader")
            .field("identifier", &self.identifier())
            .field("name", &self.name())
            .finish()
    }
}
