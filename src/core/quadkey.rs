//! Hierarchical tile addressing over the global mercator world.
//!
//! A [`QuadKey`] names one square tile of a recursive quadrant subdivision:
//! at level of detail `z` the world is `2^z` tiles wide and tall, and every
//! tile edge spans [`TILE_SIZE`] world units at its own level. The textual
//! form interleaves the bits of the tile column and row into one base-4 digit
//! per level, so a key's string is always prefixed by its parent's string.

use std::f64::consts::PI;
use std::fmt;

use super::constants::{MAX_LATITUDE, MAX_LEVEL_OF_DETAIL, MAX_LONGITUDE, TILE_SIZE};
use super::geo::{BoundingBox, LatLng, Rectangle};
use super::projection::Projection;
use crate::{MapError, Result};

/// Address of a single tile: column, row and level of detail.
///
/// Ordering compares `tile_x`, then `tile_y`, then `level_of_detail`, which
/// is total and stable so keys can index ordered maps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct QuadKey {
    tile_x: u32,
    tile_y: u32,
    level_of_detail: u8,
}

impl QuadKey {
    /// Creates a key, checking `tile_x, tile_y < 2^level_of_detail`.
    pub fn new(tile_x: u32, tile_y: u32, level_of_detail: u8) -> Result<Self> {
        if level_of_detail > MAX_LEVEL_OF_DETAIL {
            return Err(MapError::InvalidQuadKey(format!(
                "level of detail {} exceeds {}",
                level_of_detail, MAX_LEVEL_OF_DETAIL
            )));
        }
        let tiles = Self::tile_count(level_of_detail);
        if tile_x >= tiles || tile_y >= tiles {
            return Err(MapError::InvalidQuadKey(format!(
                "tile ({}, {}) out of range at level {}",
                tile_x, tile_y, level_of_detail
            )));
        }
        Ok(Self {
            tile_x,
            tile_y,
            level_of_detail,
        })
    }

    pub fn tile_x(&self) -> u32 {
        self.tile_x
    }

    pub fn tile_y(&self) -> u32 {
        self.tile_y
    }

    pub fn level_of_detail(&self) -> u8 {
        self.level_of_detail
    }

    /// Number of tiles along one axis at the given level.
    pub fn tile_count(level_of_detail: u8) -> u32 {
        1u32 << level_of_detail
    }

    /// Returns the key of the tile containing `coord` at `level_of_detail`.
    ///
    /// Latitudes beyond the mercator limit are clipped onto the first/last
    /// row; only coordinates outside `[-90, 90] x [-180, 180]` are rejected.
    pub fn from_coordinate(coord: LatLng, level_of_detail: u8) -> Result<Self> {
        if !coord.lat.is_finite() || !coord.lng.is_finite() || !coord.is_valid() {
            return Err(MapError::InvalidCoordinate {
                lat: coord.lat,
                lng: coord.lng,
            });
        }
        if level_of_detail > MAX_LEVEL_OF_DETAIL {
            return Err(MapError::InvalidQuadKey(format!(
                "level of detail {} exceeds {}",
                level_of_detail, MAX_LEVEL_OF_DETAIL
            )));
        }

        let lat = coord.lat.clamp(-MAX_LATITUDE, MAX_LATITUDE);
        let lng = coord.lng.clamp(-MAX_LONGITUDE, MAX_LONGITUDE);

        let x = (lng + 180.0) / 360.0;
        let sin_lat = lat.to_radians().sin();
        let y = 0.5 - ((1.0 + sin_lat) / (1.0 - sin_lat)).ln() / (4.0 * PI);

        let map_size = f64::from(TILE_SIZE) * f64::from(Self::tile_count(level_of_detail));
        let max_pixel = map_size - 1.0;
        let pixel_x = (x * map_size).floor().clamp(0.0, max_pixel);
        let pixel_y = (y * map_size).floor().clamp(0.0, max_pixel);

        Ok(Self {
            tile_x: (pixel_x / f64::from(TILE_SIZE)) as u32,
            tile_y: (pixel_y / f64::from(TILE_SIZE)) as u32,
            level_of_detail,
        })
    }

    /// Geographic extent of the tile.
    ///
    /// The first and last rows reach the poles, since coordinates beyond the
    /// mercator limit are clipped into them.
    pub fn to_bounding_box(&self) -> BoundingBox {
        let tiles = Self::tile_count(self.level_of_detail);
        let n = f64::from(tiles);
        let west = f64::from(self.tile_x) / n * 360.0 - 180.0;
        let east = f64::from(self.tile_x + 1) / n * 360.0 - 180.0;
        let north = if self.tile_y == 0 {
            90.0
        } else {
            Self::row_to_latitude(f64::from(self.tile_y), n)
        };
        let south = if self.tile_y + 1 == tiles {
            -90.0
        } else {
            Self::row_to_latitude(f64::from(self.tile_y + 1), n)
        };
        BoundingBox::from_coords(south, west, north, east)
    }

    fn row_to_latitude(row: f64, n: f64) -> f64 {
        let y = 0.5 - row / n;
        90.0 - 360.0 * (-y * 2.0 * PI).exp().atan() / PI
    }

    /// World-space footprint of the tile under `projection`.
    pub fn to_rectangle(&self, projection: &dyn Projection) -> Rectangle {
        let bbox = self.to_bounding_box();
        let min = projection.project(bbox.min, 0.0);
        let max = projection.project(bbox.max, 0.0);
        Rectangle::from_corners(min.ground(), max.ground())
    }

    pub fn parent(&self) -> Option<QuadKey> {
        if self.level_of_detail == 0 {
            return None;
        }
        Some(Self {
            tile_x: self.tile_x / 2,
            tile_y: self.tile_y / 2,
            level_of_detail: self.level_of_detail - 1,
        })
    }

    /// The four tiles one level deeper, in quadkey digit order.
    pub fn children(&self) -> Vec<QuadKey> {
        if self.level_of_detail >= MAX_LEVEL_OF_DETAIL {
            return Vec::new();
        }
        let level_of_detail = self.level_of_detail + 1;
        let (x, y) = (self.tile_x * 2, self.tile_y * 2);
        vec![
            Self { tile_x: x, tile_y: y, level_of_detail },
            Self { tile_x: x + 1, tile_y: y, level_of_detail },
            Self { tile_x: x, tile_y: y + 1, level_of_detail },
            Self { tile_x: x + 1, tile_y: y + 1, level_of_detail },
        ]
    }

    /// The other children of this tile's parent.
    pub fn siblings(&self) -> Vec<QuadKey> {
        self.parent()
            .map(|parent| {
                parent
                    .children()
                    .into_iter()
                    .filter(|child| child != self)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Tiles sharing an edge or corner with this one. No wrap-around at the
    /// antimeridian or the poles.
    pub fn neighbours(&self) -> Vec<QuadKey> {
        let tiles = i64::from(Self::tile_count(self.level_of_detail));
        let mut result = Vec::with_capacity(8);
        for dy in -1i64..=1 {
            for dx in -1i64..=1 {
                if dx == 0 && dy == 0 {
                    continue;
                }
                let x = i64::from(self.tile_x) + dx;
                let y = i64::from(self.tile_y) + dy;
                if (0..tiles).contains(&x) && (0..tiles).contains(&y) {
                    result.push(Self {
                        tile_x: x as u32,
                        tile_y: y as u32,
                        level_of_detail: self.level_of_detail,
                    });
                }
            }
        }
        result
    }

    /// Chebyshev distance in tiles, `None` when the levels differ.
    pub fn distance(&self, other: &QuadKey) -> Option<u32> {
        if self.level_of_detail != other.level_of_detail {
            return None;
        }
        let dx = self.tile_x.abs_diff(other.tile_x);
        let dy = self.tile_y.abs_diff(other.tile_y);
        Some(dx.max(dy))
    }

    /// Base-4 digit string, one digit per level (empty at level 0).
    pub fn to_quadkey_string(&self) -> String {
        (1..=self.level_of_detail)
            .rev()
            .map(|level| {
                let mask = 1u32 << (level - 1);
                let mut digit = b'0';
                if self.tile_x & mask != 0 {
                    digit += 1;
                }
                if self.tile_y & mask != 0 {
                    digit += 2;
                }
                digit as char
            })
            .collect()
    }

    pub fn from_quadkey_string(quadkey: &str) -> Result<Self> {
        if quadkey.len() > MAX_LEVEL_OF_DETAIL as usize {
            return Err(MapError::InvalidQuadKey(quadkey.to_string()));
        }
        let level_of_detail = quadkey.len() as u8;
        let (mut tile_x, mut tile_y) = (0u32, 0u32);
        for (i, digit) in quadkey.chars().enumerate() {
            let mask = 1u32 << (level_of_detail as usize - i - 1);
            match digit {
                '0' => {}
                '1' => tile_x |= mask,
                '2' => tile_y |= mask,
                '3' => {
                    tile_x |= mask;
                    tile_y |= mask;
                }
                _ => return Err(MapError::InvalidQuadKey(quadkey.to_string())),
            }
        }
        Ok(Self {
            tile_x,
            tile_y,
            level_of_detail,
        })
    }
}

impl fmt::Display for QuadKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_quadkey_string())
    }
}
