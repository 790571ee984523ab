//! Elevation grids and terrain mesh generation

use crate::core::geo::{BoundingBox, LatLng};
use crate::core::projection::Projection;
use crate::data::element::Mesh;
use crate::runtime::partition_rows;
use crate::{MapError, Result};

/// Sample value marking a missing measurement in `.ele` files.
pub const VOID_SAMPLE: i16 = -32768;

/// Name of the accumulated terrain mesh of a tile.
pub const TERRAIN_MESH_NAME: &str = "terrain";

/// Row-major height samples (metres) spread evenly over a bounding box,
/// first row at the northern edge.
#[derive(Debug, Clone, PartialEq)]
pub struct ElevationGrid {
    pub bounding_box: BoundingBox,
    pub rows: usize,
    pub cols: usize,
    pub heights: Vec<f32>,
}

impl ElevationGrid {
    pub fn new(bounding_box: BoundingBox, rows: usize, cols: usize, heights: Vec<f32>) -> Result<Self> {
        if rows < 2 || cols < 2 || heights.len() != rows * cols {
            return Err(MapError::ParseFailure(format!(
                "elevation grid {}x{} with {} samples",
                rows,
                cols,
                heights.len()
            )));
        }
        Ok(Self {
            bounding_box,
            rows,
            cols,
            heights,
        })
    }

    /// Decodes a square grid of big-endian `i16` samples (SRTM `hgt` layout).
    pub fn from_ele_bytes(bytes: &[u8], bounding_box: BoundingBox) -> Result<Self> {
        if bytes.len() % 2 != 0 {
            return Err(MapError::ParseFailure(format!(
                "elevation data has odd length {}",
                bytes.len()
            )));
        }
        let samples = bytes.len() / 2;
        let side = (samples as f64).sqrt().round() as usize;
        if side * side != samples {
            return Err(MapError::ParseFailure(format!(
                "elevation data with {} samples is not square",
                samples
            )));
        }
        let heights = bytes
            .chunks_exact(2)
            .map(|pair| match i16::from_be_bytes([pair[0], pair[1]]) {
                VOID_SAMPLE => 0.0,
                h => f32::from(h),
            })
            .collect();
        Self::new(bounding_box, side, side, heights)
    }

    pub fn height_at(&self, row: usize, col: usize) -> f32 {
        self.heights[row * self.cols + col]
    }

    pub fn coordinate(&self, row: usize, col: usize) -> LatLng {
        let bbox = &self.bounding_box;
        let lat_step = (bbox.max.lat - bbox.min.lat) / (self.rows - 1) as f64;
        let lng_step = (bbox.max.lng - bbox.min.lng) / (self.cols - 1) as f64;
        LatLng::new(
            bbox.max.lat - row as f64 * lat_step,
            bbox.min.lng + col as f64 * lng_step,
        )
    }

    /// Splits the grid into bands of at most `band_rows` rows. Neighbouring
    /// bands share their boundary row so their meshes join without gaps.
    pub fn row_bands(&self, band_rows: usize) -> Vec<ElevationGrid> {
        let band_rows = band_rows.max(2);
        if self.rows <= band_rows {
            return vec![self.clone()];
        }
        let mut bands = Vec::new();
        let mut start = 0;
        while start < self.rows - 1 {
            let end = (start + band_rows).min(self.rows);
            let north = self.coordinate(start, 0).lat;
            let south = self.coordinate(end - 1, 0).lat;
            bands.push(ElevationGrid {
                bounding_box: BoundingBox::from_coords(
                    south,
                    self.bounding_box.min.lng,
                    north,
                    self.bounding_box.max.lng,
                ),
                rows: end - start,
                cols: self.cols,
                heights: self.heights[start * self.cols..end * self.cols].to_vec(),
            });
            start = end - 1;
        }
        bands
    }
}

/// Builds a regular triangulated mesh over `grid`. Vertex positions are
/// projected in parallel, one block of rows per worker.
pub fn build_terrain_mesh(grid: &ElevationGrid, projection: &dyn Projection) -> Result<Mesh> {
    let row_len = grid.cols * 3;
    let mut positions = vec![0.0f64; grid.rows * row_len];

    partition_rows(&mut positions, row_len, |first_row, block| {
        for (offset, row) in block.chunks_mut(row_len).enumerate() {
            let r = first_row + offset;
            for c in 0..grid.cols {
                let p = projection.project(grid.coordinate(r, c), f64::from(grid.height_at(r, c)));
                row[c * 3] = f64::from(p.x);
                row[c * 3 + 1] = f64::from(p.y);
                row[c * 3 + 2] = f64::from(p.z);
            }
        }
    });

    let cols = grid.cols as i32;
    let mut triangles = Vec::with_capacity((grid.rows - 1) * (grid.cols - 1) * 6);
    for r in 0..(grid.rows as i32 - 1) {
        for c in 0..(cols - 1) {
            let i = r * cols + c;
            triangles.extend_from_slice(&[i, i + cols, i + 1, i + 1, i + cols, i + cols + 1]);
        }
    }

    Mesh::from_raw(TERRAIN_MESH_NAME, &positions, &triangles, &[])
}
