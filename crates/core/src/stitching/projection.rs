//! Software cubemap-to-equirectangular projection.
//!
//! Approximate fallback for hosts without the external renderer. For every
//! destination pixel a unit view direction is built from its longitude and
//! latitude, the cube face is chosen by the dominant axis, and the face is
//! sampled nearest-neighbor at the tangent-space UV of that direction.
//!
//! Coordinate frame: +z looks at the front face, +x at the right face and
//! +y at the up face. The panorama's horizontal center is the front face;
//! its left and right edges meet in the middle of the back face. The up
//! face's bottom edge and the down face's top edge adjoin the front face.

use std::f64::consts::{FRAC_PI_2, PI, TAU};

use async_trait::async_trait;
use image::{DynamicImage, Rgb, RgbImage};
use uuid::Uuid;

use super::{ensure_cube_faces, CubemapProjector, Rotation};
use crate::asset::AssetData;
use crate::error::StitchingError;

/// Faces in request order; the discriminant is the index into the face list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CubeFace {
    Back = 0,
    Right = 1,
    Front = 2,
    Left = 3,
    Up = 4,
    Down = 5,
}

/// Output resolution for faces of the given size.
pub fn equirectangular_size(face_width: u32, face_height: u32) -> (u32, u32) {
    (face_width * 4, face_height * 2)
}

/// Unit view direction through the center of destination pixel `(x, y)`.
pub fn direction(x: u32, y: u32, width: u32, height: u32) -> [f64; 3] {
    let longitude = (f64::from(x) + 0.5) / f64::from(width) * TAU - PI;
    let latitude = FRAC_PI_2 - (f64::from(y) + 0.5) / f64::from(height) * PI;
    spherical(longitude, latitude)
}

fn spherical(longitude: f64, latitude: f64) -> [f64; 3] {
    [
        latitude.cos() * longitude.sin(),
        latitude.sin(),
        latitude.cos() * longitude.cos(),
    ]
}

/// Rotate a direction around x, then y, then z (degrees).
///
/// Axes are the y-up frame above. `cube2sphere` receives the same triple
/// through `-R` but interprets it in Blender's z-up frame, where yaw is a
/// rotation about z. The two projectors only agree on the identity
/// rotation; matching a non-zero rotation against the renderer means
/// mapping y here onto z there.
pub fn rotate(direction: [f64; 3], rotation: &Rotation) -> [f64; 3] {
    if rotation.is_identity() {
        return direction;
    }
    let [mut x, mut y, mut z] = direction;

    let (sin, cos) = rotation.x.to_radians().sin_cos();
    (y, z) = (y * cos - z * sin, y * sin + z * cos);

    let (sin, cos) = rotation.y.to_radians().sin_cos();
    (x, z) = (x * cos + z * sin, -x * sin + z * cos);

    let (sin, cos) = rotation.z.to_radians().sin_cos();
    (x, y) = (x * cos - y * sin, x * sin + y * cos);

    [x, y, z]
}

/// Face hit by `direction` and the face-local `(u, v)` in `[0, 1]`, with
/// `u` growing to the right and `v` growing downwards in the face image.
///
/// Ties between axes resolve in x, y, z order so every direction maps to
/// exactly one face.
pub fn face_uv(direction: [f64; 3]) -> (CubeFace, f64, f64) {
    let [x, y, z] = direction;
    let (ax, ay, az) = (x.abs(), y.abs(), z.abs());

    let (face, s, t, major) = if ax >= ay && ax >= az {
        if x > 0.0 {
            (CubeFace::Right, -z, -y, ax)
        } else {
            (CubeFace::Left, z, -y, ax)
        }
    } else if ay >= az {
        if y > 0.0 {
            (CubeFace::Up, x, z, ay)
        } else {
            (CubeFace::Down, x, -z, ay)
        }
    } else if z > 0.0 {
        (CubeFace::Front, x, -y, az)
    } else {
        (CubeFace::Back, -x, -y, az)
    };

    (face, (s / major + 1.0) / 2.0, (t / major + 1.0) / 2.0)
}

/// Nearest-neighbor texel for a normalized coordinate, clamped to the face.
fn texel(coordinate: f64, size: u32) -> u32 {
    let max = i64::from(size.saturating_sub(1));
    ((coordinate * f64::from(size)).floor() as i64).clamp(0, max) as u32
}

/// Project decoded faces (in request order) onto a new panorama canvas.
pub fn project(faces: &[RgbImage], rotation: &Rotation) -> Result<RgbImage, StitchingError> {
    ensure_cube_faces(faces.len())?;
    let (width, height) = equirectangular_size(faces[0].width(), faces[0].height());

    let longitudes: Vec<(f64, f64)> = (0..width)
        .map(|x| ((f64::from(x) + 0.5) / f64::from(width) * TAU - PI).sin_cos())
        .collect();

    let mut canvas = RgbImage::new(width, height);
    for y in 0..height {
        let latitude = FRAC_PI_2 - (f64::from(y) + 0.5) / f64::from(height) * PI;
        let (lat_sin, lat_cos) = latitude.sin_cos();

        for (x, (lon_sin, lon_cos)) in longitudes.iter().enumerate() {
            let view = rotate([lat_cos * lon_sin, lat_sin, lat_cos * lon_cos], rotation);
            let (face, u, v) = face_uv(view);
            let source = &faces[face as usize];
            let pixel: Rgb<u8> =
                *source.get_pixel(texel(u, source.width()), texel(v, source.height()));
            canvas.put_pixel(x as u32, y, pixel);
        }
    }

    Ok(canvas)
}

/// Pure-software [`CubemapProjector`].
#[derive(Debug, Clone, Copy, Default)]
pub struct SoftwareProjector;

#[async_trait]
impl CubemapProjector for SoftwareProjector {
    fn name(&self) -> &'static str {
        "software"
    }

    async fn cubemap_to_equirectangular(
        &self,
        conversion_id: Uuid,
        faces: Vec<AssetData>,
        rotation: Rotation,
    ) -> Result<AssetData, StitchingError> {
        ensure_cube_faces(faces.len())?;
        let span = tracing::Span::current();

        tokio::task::spawn_blocking(move || {
            span.in_scope(|| -> Result<AssetData, StitchingError> {
                let decoded = faces
                    .iter()
                    .map(|face| face.decode().map(|image| image.to_rgb8()))
                    .collect::<Result<Vec<_>, _>>()?;

                let canvas = project(&decoded, &rotation)?;
                tracing::debug!(
                    %conversion_id,
                    width = canvas.width(),
                    height = canvas.height(),
                    "Projected cubemap in software",
                );
                Ok(AssetData::encode_png(&DynamicImage::ImageRgb8(canvas))?)
            })
        })
        .await
        .map_err(|e| StitchingError::Aborted(e.to_string()))?
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
