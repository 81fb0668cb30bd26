//! Downloader for URLs that point straight at a finished panorama image.

use std::sync::LazyLock;

use async_trait::async_trait;
use pix360_core::asset::MIME_OCTET_STREAM;
use pix360_core::certainty::CertaintyScore;
use pix360_core::error::{BoxError, ConversionError, DownloadError, InstallError};
use pix360_core::http::Fetcher;
use pix360_db::models::conversion::Conversion;
use regex::Regex;
use reqwest::Url;
use serde::Deserialize;

use crate::downloader::{Download, Downloader};

pub const IDENTIFIER: &str = "direct";

/// Default extensions: JPEG, PNG and WebP.
static DEFAULT_EXTENSION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\.(?:jpe?g|png|webp)$").expect("valid regex"));

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct Settings {
    #[serde(default)]
    extensions: Option<Vec<String>>,
}

/// Fetches an equirectangular image as-is.
pub struct DirectDownloader {
    fetcher: Fetcher,
    extension: Regex,
}

impl DirectDownloader {
    /// Accept the default image extensions.
    pub fn new(fetcher: Fetcher) -> Self {
        Self {
            fetcher,
            extension: DEFAULT_EXTENSION_RE.clone(),
        }
    }

    /// Build from manifest settings: `{ "extensions": ["jpg", ...] }`.
    pub fn from_settings(
        settings: &serde_json::Value,
        fetcher: Fetcher,
    ) -> Result<Self, InstallError> {
        let invalid = |reason: String| InstallError::InvalidSettings {
            identifier: IDENTIFIER.to_string(),
            reason,
        };

        if settings.is_null() {
            return Ok(Self::new(fetcher));
        }
        let settings: Settings =
            serde_json::from_value(settings.clone()).map_err(|e| invalid(e.to_string()))?;

        match settings.extensions {
            None => Ok(Self::new(fetcher)),
            Some(extensions) if extensions.is_empty() => {
                Err(invalid("extensions must not be empty".to_string()))
            }
            Some(extensions) => {
                let extension =
                    extension_pattern(&extensions).map_err(|e| invalid(e.to_string()))?;
                Ok(Self { fetcher, extension })
            }
        }
    }
}

/// Case-insensitive match on the final path extension.
fn extension_pattern(extensions: &[String]) -> Result<Regex, regex::Error> {
    let alternatives: Vec<String> = extensions
        .iter()
        .map(|e| regex::escape(e.trim_start_matches('.')))
        .collect();
    Regex::new(&format!(r"(?i)\.(?:{})$", alternatives.join("|")))
}

#[async_trait]
impl Downloader for DirectDownloader {
    fn identifier(&self) -> &str {
        IDENTIFIER
    }

    fn name(&self) -> &str {
        "Direct image"
    }

    fn test_url(&self, url: &str) -> Result<CertaintyScore, BoxError> {
        let Ok(parsed) = Url::parse(url) else {
            return Ok(CertaintyScore::UNSUPPORTED);
        };
        if !matches!(parsed.scheme(), "http" | "https") {
            return Ok(CertaintyScore::UNSUPPORTED);
        }

        if self.extension.is_match(parsed.path()) {
            Ok(CertaintyScore::PROBABLE)
        } else {
            Ok(CertaintyScore::UNSUPPORTED)
        }
    }

    async fn process(&self, conversion: &Conversion) -> Result<Download, ConversionError> {
        let mut content = self.fetcher.fetch(&conversion.url).await?;

        let format = image::guess_format(&content.bytes).map_err(|source| {
            DownloadError::InvalidContent {
                url: conversion.url.clone(),
                source,
            }
        })?;
        content
            .decode()
            .map_err(|source| DownloadError::InvalidContent {
                url: conversion.url.clone(),
                source,
            })?;

        if content.mime_type == MIME_OCTET_STREAM || !content.mime_type.starts_with("image/") {
            content.mime_type = format.to_mime_type().to_string();
        }

        tracing::debug!(
            conversion_id = %conversion.id,
            mime_type = %content.mime_type,
            bytes = content.len(),
            "Direct image fetched",
        );
        Ok(Download::Assembled(content))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use pix360_core::http::RetryPolicy;

    use super::*;
    use crate::testing::{conversion, png_bytes, StaticClient};

    fn downloader(client: StaticClient) -> DirectDownloader {
        DirectDownloader::new(Fetcher::new(Arc::new(client), RetryPolicy::default()))
    }

    #[test]
    fn image_urls_are_probable() {
        let d = downloader(StaticClient::default());
        for url in [
            "https://example.com/pano.jpg",
            "https://example.com/a/b/PANO.JPEG?size=large",
            "http://example.com/x.webp",
        ] {
            assert_eq!(d.test_url(url).unwrap(), CertaintyScore::PROBABLE, "{url}");
        }
    }

    #[test]
    fn other_urls_are_unsupported() {
        let d = downloader(StaticClient::default());
        for url in [
            "https://example.com/viewer?id=3",
            "https://example.com/pano.jpg/",
            "ftp://example.com/pano.jpg",
            "not a url",
        ] {
            assert_eq!(d.test_url(url).unwrap(), CertaintyScore::UNSUPPORTED, "{url}");
        }
    }

    #[test]
    fn settings_replace_extension_list() {
        let fetcher = Fetcher::new(Arc::new(StaticClient::default()), RetryPolicy::default());
        let d = DirectDownloader::from_settings(
            &serde_json::json!({"extensions": [".tif"]}),
            fetcher,
        )
        .unwrap();

        assert_eq!(
            d.test_url("https://example.com/a.tif").unwrap(),
            CertaintyScore::PROBABLE
        );
        assert_eq!(
            d.test_url("https://example.com/a.jpg").unwrap(),
            CertaintyScore::UNSUPPORTED
        );
    }

    #[test]
    fn bad_settings_are_install_errors() {
        let fetcher = Fetcher::new(Arc::new(StaticClient::default()), RetryPolicy::default());
        for settings in [
            serde_json::json!({"extensions": []}),
            serde_json::json!({"extension": ["jpg"]}),
            serde_json::json!({"extensions": "jpg"}),
        ] {
            assert!(matches!(
                DirectDownloader::from_settings(&settings, fetcher.clone()),
                Err(InstallError::InvalidSettings { .. })
            ));
        }
    }

    #[tokio::test]
    async fn process_returns_assembled_image() {
        let client = StaticClient::default().with("https://example.com/pano.png", png_bytes(8, 4));
        let d = downloader(client);

        let download = d
            .process(&conversion("https://example.com/pano.png"))
            .await
            .unwrap();

        match download {
            Download::Assembled(asset) => {
                assert_eq!(asset.mime_type, "image/png");
                assert_eq!(asset.decode().unwrap().width(), 8);
            }
            other => panic!("unexpected download: {other:?}"),
        }
    }

    #[tokio::test]
    async fn undecodable_content_is_a_download_error() {
        let client =
            StaticClient::default().with("https://example.com/pano.jpg", b"<html>".to_vec());
        let d = downloader(client);

        let err = d
            .process(&conversion("https://example.com/pano.jpg"))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ConversionError::Download(DownloadError::InvalidContent { .. })
        ));
    }
}
