//! Tile matrix definitions for tiled map sources.

use serde::{Deserialize, Serialize};

use crate::{BoundingBox, CrsCode};

/// A tile coordinate (z/x/y).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TileCoord {
    pub z: u32,
    pub x: u32,
    pub y: u32,
}

impl TileCoord {
    pub fn new(z: u32, x: u32, y: u32) -> Self {
        Self { z, x, y }
    }
}

/// A single tile matrix (zoom level).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TileMatrix {
    /// WMTS TileMatrix identifier (usually the zoom level as a string).
    pub identifier: String,

    /// Units per pixel at this level.
    pub resolution: f64,

    /// Top-left corner of the grid.
    pub top_left: (f64, f64),

    pub tile_size: u32,
}

impl TileMatrix {
    /// Bounding box of the tile at (col, row) in this matrix.
    pub fn tile_bbox(&self, col: u32, row: u32) -> BoundingBox {
        let span = self.resolution * self.tile_size as f64;
        let min_x = self.top_left.0 + col as f64 * span;
        let max_y = self.top_left.1 - row as f64 * span;
        BoundingBox::new(min_x, max_y - span, min_x + span, max_y)
    }
}

/// A complete tile matrix set: the grid a WMTS or XYZ source addresses.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TileMatrixSet {
    pub identifier: String,
    pub crs: CrsCode,
    pub bounding_box: BoundingBox,
    pub matrices: Vec<TileMatrix>,
}

impl TileMatrixSet {
    pub fn matrix(&self, identifier: &str) -> Option<&TileMatrix> {
        self.matrices.iter().find(|m| m.identifier == identifier)
    }

    pub fn matrix_by_zoom(&self, zoom: u32) -> Option<&TileMatrix> {
        self.matrices.get(zoom as usize)
    }

    pub fn matrix_ids(&self) -> Vec<String> {
        self.matrices.iter().map(|m| m.identifier.clone()).collect()
    }

    pub fn resolutions(&self) -> Vec<f64> {
        self.matrices.iter().map(|m| m.resolution).collect()
    }

    /// Build a set from explicit matrix ids and resolutions, as parsed
    /// out of a WMTS capabilities document.
    pub fn from_parts(
        identifier: impl Into<String>,
        crs: CrsCode,
        origin: (f64, f64),
        extent: BoundingBox,
        matrix_ids: &[String],
        resolutions: &[f64],
    ) -> Self {
        let matrices = matrix_ids
            .iter()
            .zip(resolutions)
            .map(|(id, res)| TileMatrix {
                identifier: id.clone(),
                resolution: *res,
                top_left: origin,
                tile_size: 256,
            })
            .collect();

        Self {
            identifier: identifier.into(),
            crs,
            bounding_box: extent,
            matrices,
        }
    }
}

pub const WEB_MERCATOR_EXTENT: f64 = 20037508.342789244;

/// Number of zoom levels in the synthesized fallback grid.
pub const FALLBACK_LEVELS: u32 = 22;

/// The default 22-level Web-Mercator tile grid, synthesized when a WMTS
/// layer carries no matrix-set data from capabilities. Resolutions halve
/// per level starting from one 256px tile covering the full extent.
pub fn web_mercator_matrix_set() -> TileMatrixSet {
    let top_left = (-WEB_MERCATOR_EXTENT, WEB_MERCATOR_EXTENT);
    let base_resolution = (WEB_MERCATOR_EXTENT * 2.0) / 256.0;

    let matrices = (0..FALLBACK_LEVELS)
        .map(|z| TileMatrix {
            identifier: z.to_string(),
            resolution: base_resolution / 2f64.powi(z as i32),
            top_left,
            tile_size: 256,
        })
        .collect();

    TileMatrixSet {
        identifier: "WebMercatorQuad".to_string(),
        crs: CrsCode::web_mercator(),
        bounding_box: BoundingBox::new(
            -WEB_MERCATOR_EXTENT,
            -WEB_MERCATOR_EXTENT,
            WEB_MERCATOR_EXTENT,
            WEB_MERCATOR_EXTENT,
        ),
        matrices,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fallback_grid_shape() {
        let set = web_mercator_matrix_set();
        assert_eq!(set.matrices.len(), FALLBACK_LEVELS as usize);
        assert_eq!(set.matrices[0].identifier, "0");
        assert_eq!(set.matrices[21].identifier, "21");

        // Monotonically halving resolutions
        for pair in set.matrices.windows(2) {
            assert!((pair[0].resolution / pair[1].resolution - 2.0).abs() < 1e-9);
        }
    }

    #[test]
    fn test_zoom_zero_covers_world() {
        let set = web_mercator_matrix_set();
        let bbox = set.matrix_by_zoom(0).unwrap().tile_bbox(0, 0);
        assert!((bbox.min_x - (-WEB_MERCATOR_EXTENT)).abs() < 1.0);
        assert!((bbox.max_x - WEB_MERCATOR_EXTENT).abs() < 1.0);
    }

    #[test]
    fn test_from_parts_zips_ids_and_resolutions() {
        let set = TileMatrixSet::from_parts(
            "custom",
            CrsCode::parse("EPSG:2056"),
            (2420000.0, 1350000.0),
            BoundingBox::new(2420000.0, 1030000.0, 2900000.0, 1350000.0),
            &["0".to_string(), "1".to_string()],
            &[4000.0, 2000.0],
        );
        assert_eq!(set.matrices.len(), 2);
        assert_eq!(set.matrix("1").unwrap().resolution, 2000.0);
    }
}
