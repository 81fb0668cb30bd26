//! Stitching engine: grid compositing and cubemap-to-equirectangular
//! reprojection.
//!
//! Both capabilities sit behind traits so the dispatcher does not care
//! which implementation is configured:
//!
//! - [`Compositor`] concatenates tile grids ([`compositor::ImageCompositor`]).
//! - [`CubemapProjector`] turns six cube faces into one panorama, either by
//!   delegating to the `cube2sphere` binary ([`renderer::ExternalRenderer`])
//!   or in software ([`projection::SoftwareProjector`]).
//!
//! [`StitchingEngine`] routes a [`StitchRequest`] to the right capability and
//! keeps CPU-bound work off the async executor.

pub mod compositor;
pub mod projection;
pub mod renderer;

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::asset::AssetData;
use crate::error::StitchingError;

/// Number of faces in a cubemap.
pub const CUBE_FACE_COUNT: usize = 6;

/// Fixed order of cube faces in every request.
pub const CUBEMAP_ORDER: [&str; CUBE_FACE_COUNT] = ["back", "right", "front", "left", "up", "down"];

/// Rotation of the cubemap around the x, y and z axes, in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Rotation {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Rotation {
    pub const fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    pub fn is_identity(&self) -> bool {
        self.x == 0.0 && self.y == 0.0 && self.z == 0.0
    }
}

/// Rows of equally sized tiles, in row/column order.
#[derive(Debug, Clone, Default)]
pub struct TileGrid {
    pub rows: Vec<Vec<AssetData>>,
}

impl TileGrid {
    pub fn new(rows: Vec<Vec<AssetData>>) -> Self {
        Self { rows }
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn column_count(&self) -> usize {
        self.rows.first().map_or(0, Vec::len)
    }

    pub fn tiles(&self) -> impl Iterator<Item = &AssetData> {
        self.rows.iter().flatten()
    }
}

/// Raw material a downloader hands back when it cannot assemble the
/// panorama itself.
#[derive(Debug, Clone)]
pub enum StitchRequest {
    /// A single tile grid; the composited image is the result.
    Grid(TileGrid),
    /// Six faces in [`CUBEMAP_ORDER`].
    Cubemap {
        faces: Vec<AssetData>,
        rotation: Rotation,
    },
    /// Six tile grids, one per face in [`CUBEMAP_ORDER`]. Each grid is
    /// composited into its face before projection.
    TiledCubemap {
        faces: Vec<TileGrid>,
        rotation: Rotation,
    },
}

impl StitchRequest {
    /// Every raw input of the request, in request order.
    pub fn inputs(&self) -> Vec<&AssetData> {
        match self {
            Self::Grid(grid) => grid.tiles().collect(),
            Self::Cubemap { faces, .. } => faces.iter().collect(),
            Self::TiledCubemap { faces, .. } => faces.iter().flat_map(TileGrid::tiles).collect(),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Grid(_) => "grid",
            Self::Cubemap { .. } => "cubemap",
            Self::TiledCubemap { .. } => "tiled_cubemap",
        }
    }
}

/// Reject anything but exactly six faces.
pub fn ensure_cube_faces(count: usize) -> Result<(), StitchingError> {
    if count == CUBE_FACE_COUNT {
        Ok(())
    } else {
        Err(StitchingError::InvalidFaceCount(count))
    }
}

/// Composites tile grids into single images.
pub trait Compositor: Send + Sync {
    /// Concatenate each row horizontally, then stack the rows vertically.
    fn stitch(&self, grid: &TileGrid) -> Result<AssetData, StitchingError>;

    /// Stitch every grid, in input order.
    ///
    /// Fails fast: the first grid that cannot be stitched aborts the batch
    /// and is reported with its index.
    fn multistitch(&self, grids: &[TileGrid]) -> Result<Vec<AssetData>, StitchingError> {
        grids
            .iter()
            .enumerate()
            .map(|(index, grid)| {
                self.stitch(grid).map_err(|e| StitchingError::Batch {
                    index,
                    source: Box::new(e),
                })
            })
            .collect()
    }
}

/// Reprojects six cube faces into an equirectangular panorama.
#[async_trait]
pub trait CubemapProjector: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    /// `faces` must hold exactly six images in [`CUBEMAP_ORDER`];
    /// implementations reject any other count before doing work.
    async fn cubemap_to_equirectangular(
        &self,
        conversion_id: Uuid,
        faces: Vec<AssetData>,
        rotation: Rotation,
    ) -> Result<AssetData, StitchingError>;
}

/// Entry point used by the dispatcher.
#[derive(Clone)]
pub struct StitchingEngine {
    compositor: Arc<dyn Compositor>,
    projector: Arc<dyn CubemapProjector>,
}

impl StitchingEngine {
    pub fn new(compositor: Arc<dyn Compositor>, projector: Arc<dyn CubemapProjector>) -> Self {
        Self {
            compositor,
            projector,
        }
    }

    pub fn projector_name(&self) -> &'static str {
        self.projector.name()
    }

    /// Produce the result panorama for `request`.
    pub async fn stitch(
        &self,
        conversion_id: Uuid,
        request: StitchRequest,
    ) -> Result<AssetData, StitchingError> {
        tracing::info!(
            %conversion_id,
            request = request.kind(),
            projector = self.projector.name(),
            "Stitching",
        );

        match request {
            StitchRequest::Grid(grid) => {
                let mut stitched = self.composite(vec![grid]).await?;
                stitched.pop().ok_or(StitchingError::EmptyGrid)
            }
            StitchRequest::Cubemap { faces, rotation } => {
                ensure_cube_faces(faces.len())?;
                self.projector
                    .cubemap_to_equirectangular(conversion_id, faces, rotation)
                    .await
            }
            StitchRequest::TiledCubemap { faces, rotation } => {
                ensure_cube_faces(faces.len())?;
                let faces = self.composite(faces).await?;
                self.projector
                    .cubemap_to_equirectangular(conversion_id, faces, rotation)
                    .await
            }
        }
    }

    /// Run the compositor on the blocking pool, inside the caller's span.
    async fn composite(&self, grids: Vec<TileGrid>) -> Result<Vec<AssetData>, StitchingError> {
        let compositor = Arc::clone(&self.compositor);
        let span = tracing::Span::current();

        tokio::task::spawn_blocking(move || {
            span.in_scope(|| {
                if grids.len() == 1 {
                    compositor.stitch(&grids[0]).map(|image| vec![image])
                } else {
                    compositor.multistitch(&grids)
                }
            })
        })
        .await
        .map_err(|e| StitchingError::Aborted(e.to_string()))?
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
