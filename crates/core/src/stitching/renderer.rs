//! Adapter for the external `cube2sphere` renderer.
//!
//! The faces are written into a scratch directory, the renderer is run
//! there, and its single output image is read back. The call blocks the
//! calling task until the child exits: there is no timeout, no
//! cancellation and no internal retry.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use uuid::Uuid;

use super::projection::equirectangular_size;
use super::{ensure_cube_faces, CubemapProjector, Rotation, CUBEMAP_ORDER};
use crate::asset::{AssetData, MIME_PNG};
use crate::error::StitchingError;

/// Renderer looked up on `PATH` when no explicit path is configured.
pub const DEFAULT_BINARY: &str = "cube2sphere";

/// Output name prefix passed with `-o`.
pub const OUTPUT_PREFIX: &str = "out";

/// File the renderer writes for a single-frame render.
pub const OUTPUT_FILE: &str = "out0001.png";

/// Face order expected on the renderer's command line.
pub const CLI_FACE_ORDER: [&str; 6] = ["front", "back", "right", "left", "up", "down"];

/// File name a face is written to inside the working directory.
pub fn face_file_name(face: &str) -> String {
    format!("{face}.png")
}

/// Command-line arguments for one render.
pub fn build_args(rotation: &Rotation, (width, height): (u32, u32)) -> Vec<String> {
    let mut args: Vec<String> = CLI_FACE_ORDER.iter().map(|f| face_file_name(f)).collect();
    args.extend([
        "-R".to_string(),
        rotation.x.to_string(),
        rotation.y.to_string(),
        rotation.z.to_string(),
        "-o".to_string(),
        OUTPUT_PREFIX.to_string(),
        "-f".to_string(),
        "png".to_string(),
        "-r".to_string(),
        width.to_string(),
        height.to_string(),
    ]);
    args
}

/// [`CubemapProjector`] that shells out to `cube2sphere`.
#[derive(Debug, Clone)]
pub struct ExternalRenderer {
    binary: PathBuf,
    failure_backoff: Option<Duration>,
}

impl Default for ExternalRenderer {
    fn default() -> Self {
        Self::new(None)
    }
}

impl ExternalRenderer {
    /// Use `binary`, or [`DEFAULT_BINARY`] from `PATH` when `None`.
    pub fn new(binary: Option<PathBuf>) -> Self {
        Self {
            binary: binary.unwrap_or_else(|| PathBuf::from(DEFAULT_BINARY)),
            failure_backoff: None,
        }
    }

    /// Pause for `backoff` after a failed render before reporting it.
    pub fn with_failure_backoff(mut self, backoff: Option<Duration>) -> Self {
        self.failure_backoff = backoff;
        self
    }

    pub fn binary(&self) -> &Path {
        &self.binary
    }

    async fn write_faces(&self, dir: &Path, faces: &[AssetData]) -> Result<(), StitchingError> {
        for (name, face) in CUBEMAP_ORDER.iter().zip(faces) {
            let path = dir.join(face_file_name(name));
            if face.is_png() {
                tokio::fs::write(&path, &face.bytes).await?;
            } else {
                let png = AssetData::encode_png(&face.decode()?)?;
                tokio::fs::write(&path, &png.bytes).await?;
            }
        }
        Ok(())
    }
}

#[async_trait]
impl CubemapProjector for ExternalRenderer {
    fn name(&self) -> &'static str {
        "cube2sphere"
    }

    async fn cubemap_to_equirectangular(
        &self,
        conversion_id: Uuid,
        faces: Vec<AssetData>,
        rotation: Rotation,
    ) -> Result<AssetData, StitchingError> {
        ensure_cube_faces(faces.len())?;

        let (width, height) = faces[0].dimensions()?;
        let resolution = equirectangular_size(width, height);

        let workdir = tempfile::tempdir()?;
        self.write_faces(workdir.path(), &faces).await?;

        let args = build_args(&rotation, resolution);
        let binary = self.binary.display().to_string();
        tracing::info!(
            %conversion_id,
            binary = %binary,
            width = resolution.0,
            height = resolution.1,
            "Invoking renderer",
        );

        let output = tokio::process::Command::new(&self.binary)
            .args(&args)
            .current_dir(workdir.path())
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|source| StitchingError::RendererUnavailable {
                binary: binary.clone(),
                source,
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
            let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
            tracing::error!(
                %conversion_id,
                binary = %binary,
                args = ?args,
                exit_code = ?output.status.code(),
                stderr = %stderr,
                stdout = %stdout,
                workdir = %workdir.path().display(),
                "Renderer failed",
            );

            if let Some(backoff) = self.failure_backoff {
                tracing::warn!(
                    %conversion_id,
                    backoff_secs = backoff.as_secs(),
                    "Pausing after renderer failure",
                );
                tokio::time::sleep(backoff).await;
            }

            return Err(StitchingError::RendererFailed {
                conversion_id,
                exit_code: output.status.code(),
                stderr,
                stdout,
            });
        }

        let output_path = workdir.path().join(OUTPUT_FILE);
        let bytes = match tokio::fs::read(&output_path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StitchingError::MissingOutput(
                    output_path.display().to_string(),
                ));
            }
            Err(e) => return Err(e.into()),
        };

        tracing::debug!(%conversion_id, bytes = bytes.len(), "Renderer output read");
        Ok(AssetData::new(bytes, MIME_PNG))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
