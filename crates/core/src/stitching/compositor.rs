//! Tile grid compositor backed by the `image` crate.

use image::{imageops, DynamicImage, GenericImageView, RgbImage};

use super::{Compositor, TileGrid};
use crate::asset::AssetData;
use crate::error::StitchingError;

/// Pastes decoded tiles onto one canvas and encodes it as PNG.
#[derive(Debug, Clone, Copy, Default)]
pub struct ImageCompositor;

impl Compositor for ImageCompositor {
    fn stitch(&self, grid: &TileGrid) -> Result<AssetData, StitchingError> {
        let columns = grid.column_count();
        if grid.rows.is_empty() || columns == 0 {
            return Err(StitchingError::EmptyGrid);
        }

        // Shape first, so a ragged grid fails before anything is decoded.
        for (row, tiles) in grid.rows.iter().enumerate() {
            if tiles.len() != columns {
                return Err(StitchingError::RaggedGrid {
                    row,
                    expected: columns,
                    found: tiles.len(),
                });
            }
        }

        let decoded = grid
            .rows
            .iter()
            .map(|tiles| tiles.iter().map(AssetData::decode).collect())
            .collect::<Result<Vec<Vec<DynamicImage>>, _>>()?;

        let (width, height) = decoded[0][0].dimensions();
        for (row, tiles) in decoded.iter().enumerate() {
            for (column, tile) in tiles.iter().enumerate() {
                let (found_width, found_height) = tile.dimensions();
                if (found_width, found_height) != (width, height) {
                    return Err(StitchingError::TileSizeMismatch {
                        row,
                        column,
                        expected_width: width,
                        expected_height: height,
                        found_width,
                        found_height,
                    });
                }
            }
        }

        let mut canvas = RgbImage::new(width * columns as u32, height * decoded.len() as u32);
        for (row, tiles) in decoded.iter().enumerate() {
            for (column, tile) in tiles.iter().enumerate() {
                let x = i64::from(width) * column as i64;
                let y = i64::from(height) * row as i64;
                imageops::replace(&mut canvas, &tile.to_rgb8(), x, y);
            }
        }

        tracing::debug!(
            rows = decoded.len(),
            columns,
            width = canvas.width(),
            height = canvas.height(),
            "Composited tile grid",
        );

        Ok(AssetData::encode_png(&DynamicImage::ImageRgb8(canvas))?)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use image::Rgb;

    use super::*;
    use crate::stitching::tests::solid_png;

    const RED: [u8; 3] = [255, 0, 0];
    const GREEN: [u8; 3] = [0, 255, 0];
    const BLUE: [u8; 3] = [0, 0, 255];
    const WHITE: [u8; 3] = [255, 255, 255];

    #[test]
    fn two_by_two_grid_of_10px_tiles_is_20px() {
        let grid = TileGrid::new(vec![
            vec![solid_png(10, 10, RED), solid_png(10, 10, GREEN)],
            vec![solid_png(10, 10, BLUE), solid_png(10, 10, WHITE)],
        ]);

        let result = ImageCompositor.stitch(&grid).unwrap();
        let image = result.decode().unwrap().to_rgb8();

        assert_eq!(image.dimensions(), (20, 20));
        assert_eq!(image.get_pixel(0, 0), &Rgb(RED));
        assert_eq!(image.get_pixel(19, 0), &Rgb(GREEN));
        assert_eq!(image.get_pixel(0, 19), &Rgb(BLUE));
        assert_eq!(image.get_pixel(19, 19), &Rgb(WHITE));
        assert_eq!(image.get_pixel(9, 9), &Rgb(RED));
        assert_eq!(image.get_pixel(10, 10), &Rgb(WHITE));
    }

    #[test]
    fn non_square_tiles_keep_row_column_order() {
        let grid = TileGrid::new(vec![
            vec![solid_png(4, 2, RED)],
            vec![solid_png(4, 2, GREEN)],
            vec![solid_png(4, 2, BLUE)],
        ]);

        let image = ImageCompositor.stitch(&grid).unwrap().decode().unwrap().to_rgb8();
        assert_eq!(image.dimensions(), (4, 6));
        assert_eq!(image.get_pixel(0, 0), &Rgb(RED));
        assert_eq!(image.get_pixel(0, 3), &Rgb(GREEN));
        assert_eq!(image.get_pixel(3, 5), &Rgb(BLUE));
    }

    #[test]
    fn ragged_rows_are_rejected() {
        let grid = TileGrid::new(vec![
            vec![solid_png(10, 10, RED), solid_png(10, 10, GREEN)],
            vec![solid_png(10, 10, BLUE)],
        ]);

        assert!(matches!(
            ImageCompositor.stitch(&grid),
            Err(StitchingError::RaggedGrid {
                row: 1,
                expected: 2,
                found: 1
            })
        ));
    }

    #[test]
    fn mismatched_tile_sizes_are_rejected() {
        let grid = TileGrid::new(vec![
            vec![solid_png(10, 10, RED), solid_png(10, 10, GREEN)],
            vec![solid_png(10, 10, BLUE), solid_png(10, 12, WHITE)],
        ]);

        assert!(matches!(
            ImageCompositor.stitch(&grid),
            Err(StitchingError::TileSizeMismatch {
                row: 1,
                column: 1,
                found_height: 12,
                ..
            })
        ));
    }

    #[test]
    fn empty_grids_are_rejected() {
        assert!(matches!(
            ImageCompositor.stitch(&TileGrid::default()),
            Err(StitchingError::EmptyGrid)
        ));
        assert!(matches!(
            ImageCompositor.stitch(&TileGrid::new(vec![vec![]])),
            Err(StitchingError::EmptyGrid)
        ));
    }

    #[test]
    fn multistitch_returns_one_image_per_grid_in_order() {
        let grids = vec![
            TileGrid::new(vec![vec![solid_png(2, 2, RED); 3]]),
            TileGrid::new(vec![vec![solid_png(2, 2, GREEN)]; 2]),
        ];

        let results = ImageCompositor.multistitch(&grids).unwrap();
        assert_eq!(results.len(), 2);

        let first = results[0].decode().unwrap().to_rgb8();
        let second = results[1].decode().unwrap().to_rgb8();
        assert_eq!(first.dimensions(), (6, 2));
        assert_eq!(second.dimensions(), (2, 4));
        assert_eq!(second.get_pixel(1, 3), &Rgb(GREEN));
    }

    #[test]
    fn multistitch_reports_failing_grid_index() {
        let grids = vec![
            TileGrid::new(vec![vec![solid_png(2, 2, RED)]]),
            TileGrid::new(vec![vec![solid_png(2, 2, RED)], vec![]]),
        ];

        match ImageCompositor.multistitch(&grids) {
            Err(StitchingError::Batch { index, source }) => {
                assert_eq!(index, 1);
                assert!(matches!(*source, StitchingError::RaggedGrid { .. }));
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }
}
