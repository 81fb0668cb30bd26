//! Downloader for providers that serve cube faces under a URL template.
//!
//! The conversion URL contains a `{face}` placeholder, for example
//! `https://tiles.example.com/pano/42/{face}.jpg`. Face names default to
//! `back`, `right`, `front`, `left`, `up`, `down` and can be renamed per
//! plugin (manifest settings) or per conversion (properties).
//!
//! Recognized conversion properties:
//!
//! | Key          | Shape                          | Meaning |
//! |--------------|--------------------------------|---------|
//! | `rotation`   | `[x, y, z]` degrees            | cubemap rotation |
//! | `face_names` | `{ "up": "top", ... }`         | per-face name overrides |
//! | `tiles`      | `{ "rows": 2, "columns": 2 }`  | each face is a grid addressed by `{row}` / `{col}` |

use std::collections::HashMap;
use std::sync::LazyLock;

use async_trait::async_trait;
use futures::future::try_join_all;
use pix360_core::asset::AssetData;
use pix360_core::certainty::CertaintyScore;
use pix360_core::error::{BoxError, ConversionError, DownloadError, InstallError};
use pix360_core::http::Fetcher;
use pix360_core::stitching::{Rotation, StitchRequest, TileGrid, CUBEMAP_ORDER, CUBE_FACE_COUNT};
use pix360_db::models::conversion::Conversion;
use regex::{Captures, Regex};
use reqwest::Url;
use serde::Deserialize;

use crate::downloader::{Download, Downloader};

pub const IDENTIFIER: &str = "cubemap-template";

/// Upper bound on tiles per face.
pub const MAX_TILES_PER_FACE: u32 = 256;

/// Regex matching the `{face}`, `{row}` and `{col}` template tokens.
static PLACEHOLDER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{(face|row|col)\}").expect("valid regex"));

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct Settings {
    #[serde(default)]
    face_names: HashMap<String, String>,
}

#[derive(Debug, Default, Deserialize)]
struct Properties {
    #[serde(default)]
    rotation: Option<[f64; 3]>,
    #[serde(default)]
    face_names: HashMap<String, String>,
    #[serde(default)]
    tiles: Option<TileLayout>,
}

#[derive(Debug, Clone, Copy, Deserialize)]
struct TileLayout {
    rows: u32,
    columns: u32,
}

/// Fill the template tokens. Tile tokens are left alone without a tile.
pub fn expand(template: &str, face: &str, tile: Option<(u32, u32)>) -> String {
    PLACEHOLDER_RE
        .replace_all(template, |caps: &Captures| match (&caps[1], tile) {
            ("face", _) => face.to_string(),
            ("row", Some((row, _))) => row.to_string(),
            ("col", Some((_, col))) => col.to_string(),
            _ => caps[0].to_string(),
        })
        .into_owned()
}

/// Apply name overrides onto `names`, rejecting unknown face keys.
fn apply_face_names(
    names: &mut [String; CUBE_FACE_COUNT],
    overrides: &HashMap<String, String>,
) -> Result<(), String> {
    for (face, name) in overrides {
        let index = CUBEMAP_ORDER
            .iter()
            .position(|known| known == face)
            .ok_or_else(|| format!("unknown cube face '{face}'"))?;
        if name.is_empty() {
            return Err(format!("empty name for cube face '{face}'"));
        }
        names[index] = name.clone();
    }
    Ok(())
}

/// Fetches six cube faces (optionally tiled) from a URL template.
pub struct CubemapTemplateDownloader {
    fetcher: Fetcher,
    face_names: [String; CUBE_FACE_COUNT],
}

impl std::fmt::Debug for CubemapTemplateDownloader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CubemapTemplateDownloader")
            .field("face_names", &self.face_names)
            .finish_non_exhaustive()
    }
}

impl CubemapTemplateDownloader {
    pub fn new(fetcher: Fetcher) -> Self {
        Self {
            fetcher,
            face_names: CUBEMAP_ORDER.map(String::from),
        }
    }

    /// Build from manifest settings: `{ "face_names": { "up": "top" } }`.
    pub fn from_settings(
        settings: &serde_json::Value,
        fetcher: Fetcher,
    ) -> Result<Self, InstallError> {
        let invalid = |reason: String| InstallError::InvalidSettings {
            identifier: IDENTIFIER.to_string(),
            reason,
        };

        let mut downloader = Self::new(fetcher);
        if settings.is_null() {
            return Ok(downloader);
        }

        let settings: Settings =
            serde_json::from_value(settings.clone()).map_err(|e| invalid(e.to_string()))?;
        apply_face_names(&mut downloader.face_names, &settings.face_names).map_err(invalid)?;
        Ok(downloader)
    }

    fn properties(conversion: &Conversion) -> Result<Properties, DownloadError> {
        if conversion.properties.is_null() {
            return Ok(Properties::default());
        }
        serde_json::from_value(conversion.properties.clone())
            .map_err(|e| DownloadError::InvalidProperties(e.to_string()))
    }

    async fn fetch_faces(
        &self,
        template: &str,
        names: &[String; CUBE_FACE_COUNT],
    ) -> Result<Vec<AssetData>, DownloadError> {
        let urls: Vec<String> = names.iter().map(|name| expand(template, name, None)).collect();
        try_join_all(urls.iter().map(|url| self.fetcher.fetch(url))).await
    }

    async fn fetch_tiled_faces(
        &self,
        template: &str,
        names: &[String; CUBE_FACE_COUNT],
        layout: TileLayout,
    ) -> Result<Vec<TileGrid>, DownloadError> {
        let mut grids = Vec::with_capacity(CUBE_FACE_COUNT);
        for name in names {
            let mut rows = Vec::with_capacity(layout.rows as usize);
            for row in 0..layout.rows {
                let urls: Vec<String> = (0..layout.columns)
                    .map(|col| expand(template, name, Some((row, col))))
                    .collect();
                rows.push(try_join_all(urls.iter().map(|url| self.fetcher.fetch(url))).await?);
            }
            tracing::debug!(
                face = %name,
                rows = layout.rows,
                columns = layout.columns,
                "Fetched face tiles",
            );
            grids.push(TileGrid::new(rows));
        }
        Ok(grids)
    }
}

fn validate_layout(template: &str, layout: TileLayout) -> Result<(), DownloadError> {
    if layout.rows == 0 || layout.columns == 0 {
        return Err(DownloadError::InvalidProperties(
            "tiles.rows and tiles.columns must be at least 1".to_string(),
        ));
    }
    if layout.rows.saturating_mul(layout.columns) > MAX_TILES_PER_FACE {
        return Err(DownloadError::InvalidProperties(format!(
            "at most {MAX_TILES_PER_FACE} tiles per face are supported"
        )));
    }
    if !template.contains("{row}") || !template.contains("{col}") {
        return Err(DownloadError::InvalidProperties(
            "tiled cubemaps need {row} and {col} in the URL".to_string(),
        ));
    }
    Ok(())
}

#[async_trait]
impl Downloader for CubemapTemplateDownloader {
    fn identifier(&self) -> &str {
        IDENTIFIER
    }

    fn name(&self) -> &str {
        "Cubemap URL template"
    }

    fn test_url(&self, url: &str) -> Result<CertaintyScore, BoxError> {
        if !url.contains("{face}") {
            return Ok(CertaintyScore::UNSUPPORTED);
        }

        let sample = expand(url, &self.face_names[0], Some((0, 0)));
        match Url::parse(&sample) {
            Ok(parsed) if matches!(parsed.scheme(), "http" | "https") => {
                Ok(CertaintyScore::CERTAIN)
            }
            _ => Ok(CertaintyScore::UNSUPPORTED),
        }
    }

    async fn process(&self, conversion: &Conversion) -> Result<Download, ConversionError> {
        let properties = Self::properties(conversion)?;

        let mut names = self.face_names.clone();
        apply_face_names(&mut names, &properties.face_names)
            .map_err(DownloadError::InvalidProperties)?;

        let rotation = properties
            .rotation
            .map(|[x, y, z]| Rotation::new(x, y, z))
            .unwrap_or_default();

        let request = match properties.tiles {
            None => StitchRequest::Cubemap {
                faces: self.fetch_faces(&conversion.url, &names).await?,
                rotation,
            },
            Some(layout) => {
                validate_layout(&conversion.url, layout)?;
                StitchRequest::TiledCubemap {
                    faces: self.fetch_tiled_faces(&conversion.url, &names, layout).await?,
                    rotation,
                }
            }
        };

        tracing::debug!(
            conversion_id = %conversion.id,
            request = request.kind(),
            inputs = request.inputs().len(),
            "Cubemap fetched",
        );
        Ok(Download::Stitch(request))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use assert_matches::assert_matches;
    use pix360_core::http::RetryPolicy;

    use super::*;
    use crate::testing::{conversion, conversion_with, png_bytes, StaticClient};

    const TEMPLATE: &str = "https://tiles.example.com/pano/{face}.jpg";

    fn downloader(client: Arc<StaticClient>) -> CubemapTemplateDownloader {
        CubemapTemplateDownloader::new(Fetcher::new(client, RetryPolicy::default()))
    }

    /// Serve a distinct 4px image for every default face.
    fn faces_client() -> StaticClient {
        CUBEMAP_ORDER
            .iter()
            .enumerate()
            .fold(StaticClient::default(), |client, (i, face)| {
                client.with(&expand(TEMPLATE, face, None), png_bytes(4, 4 + i as u32))
            })
    }

    #[test]
    fn expand_fills_known_tokens() {
        assert_eq!(
            expand("https://x/{face}/{row}_{col}.jpg", "up", Some((1, 2))),
            "https://x/up/1_2.jpg"
        );
        assert_eq!(
            expand("https://x/{face}/{row}.jpg", "up", None),
            "https://x/up/{row}.jpg"
        );
        assert_eq!(expand("https://x/{other}.jpg", "up", None), "https://x/{other}.jpg");
    }

    #[test]
    fn templates_are_certain() {
        let d = downloader(Arc::new(StaticClient::default()));
        assert_eq!(d.test_url(TEMPLATE).unwrap(), CertaintyScore::CERTAIN);
        assert_eq!(
            d.test_url("https://x/{face}/{row}_{col}.png").unwrap(),
            CertaintyScore::CERTAIN
        );
    }

    #[test]
    fn non_templates_are_unsupported() {
        let d = downloader(Arc::new(StaticClient::default()));
        for url in [
            "https://example.com/pano.jpg",
            "file:///tmp/{face}.jpg",
            "{face}",
        ] {
            assert_eq!(d.test_url(url).unwrap(), CertaintyScore::UNSUPPORTED, "{url}");
        }
    }

    #[tokio::test]
    async fn fetches_six_faces_in_cubemap_order() {
        let client = Arc::new(faces_client());
        let d = downloader(Arc::clone(&client));

        let download = d
            .process(&conversion_with(
                TEMPLATE,
                serde_json::json!({"rotation": [0, 90, 0]}),
            ))
            .await
            .unwrap();

        assert_matches!(
            download,
            Download::Stitch(StitchRequest::Cubemap { faces, rotation }) => {
                assert_eq!(faces.len(), 6);
                for (i, face) in faces.iter().enumerate() {
                    assert_eq!(face.decode().unwrap().height(), 4 + i as u32);
                }
                assert_eq!(rotation, Rotation::new(0.0, 90.0, 0.0));
            }
        );
        assert_eq!(client.requested().len(), 6);
    }

    #[tokio::test]
    async fn face_names_can_be_overridden_per_conversion() {
        let client = Arc::new(
            faces_client().with("https://tiles.example.com/pano/top.jpg", png_bytes(4, 4)),
        );
        let d = downloader(Arc::clone(&client));

        d.process(&conversion_with(
            TEMPLATE,
            serde_json::json!({"face_names": {"up": "top"}}),
        ))
        .await
        .unwrap();

        let requested = client.requested();
        assert!(requested.contains(&"https://tiles.example.com/pano/top.jpg".to_string()));
        assert!(!requested.contains(&"https://tiles.example.com/pano/up.jpg".to_string()));
    }

    #[tokio::test]
    async fn tiled_faces_are_fetched_as_grids() {
        let template = "https://tiles.example.com/{face}_{row}_{col}.png";
        let mut client = StaticClient::default();
        for face in CUBEMAP_ORDER {
            for row in 0..2 {
                for col in 0..3 {
                    let url = expand(template, face, Some((row, col)));
                    client = client.with(&url, png_bytes(2, 2));
                }
            }
        }
        let d = downloader(Arc::new(client));

        let download = d
            .process(&conversion_with(
                template,
                serde_json::json!({"tiles": {"rows": 2, "columns": 3}}),
            ))
            .await
            .unwrap();

        assert_matches!(
            download,
            Download::Stitch(StitchRequest::TiledCubemap { faces, .. }) => {
                assert_eq!(faces.len(), 6);
                assert!(faces.iter().all(|g| g.row_count() == 2 && g.column_count() == 3));
            }
        );
    }

    #[tokio::test]
    async fn invalid_properties_are_download_errors() {
        let d = downloader(Arc::new(faces_client()));
        for properties in [
            serde_json::json!({"face_names": {"north": "n"}}),
            serde_json::json!({"rotation": [1, 2]}),
            serde_json::json!({"tiles": {"rows": 0, "columns": 2}}),
            serde_json::json!({"tiles": {"rows": 2, "columns": 2}}),
        ] {
            let err = d
                .process(&conversion_with(TEMPLATE, properties.clone()))
                .await
                .unwrap_err();
            assert_matches!(
                err,
                ConversionError::Download(DownloadError::InvalidProperties(_)),
                "{properties}"
            );
        }
    }

    #[tokio::test]
    async fn missing_face_fails_the_download() {
        let d = downloader(Arc::new(StaticClient::default()));
        let err = d.process(&conversion(TEMPLATE)).await.unwrap_err();
        assert_matches!(
            err,
            ConversionError::Download(DownloadError::Exhausted { attempts: 3, .. })
        );
    }

    #[test]
    fn settings_rename_faces() {
        let fetcher = Fetcher::new(Arc::new(StaticClient::default()), RetryPolicy::default());
        let d = CubemapTemplateDownloader::from_settings(
            &serde_json::json!({"face_names": {"up": "top", "down": "bottom"}}),
            fetcher.clone(),
        )
        .unwrap();
        assert_eq!(d.face_names[4], "top");
        assert_eq!(d.face_names[5], "bottom");

        assert_matches!(
            CubemapTemplateDownloader::from_settings(
                &serde_json::json!({"face_names": {"sideways": "x"}}),
                fetcher,
            ),
            Err(InstallError::InvalidSettings { .. })
        );
    }
}
