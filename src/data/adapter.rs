//! Turns decoded records into emitted values for one tile
//!
//! The adapter owns the tile's dedup registry: a non-terrain record whose
//! [`DedupKey`] was already seen is dropped. Terrain chunks are never
//! deduplicated; they are merged into one mesh handed out by
//! [`TileAdapter::finish`]. The registry goes away with the adapter, which
//! lives exactly as long as the tile's pipeline.

use std::sync::Arc;

use crate::core::geo::LatLng;
use crate::core::projection::Projection;
use crate::data::element::{Color, DedupKey, Element, MapData, Mesh};
use crate::data::parser::RawRecord;
use crate::data::stylesheet::props;
use crate::data::terrain::build_terrain_mesh;
use crate::prelude::HashSet;
use crate::tiles::tile::Tile;
use crate::{MapError, Result};

const DEFAULT_BUILDING_HEIGHT: f64 = 10.0;
const LEVEL_HEIGHT: f64 = 3.0;

pub struct TileAdapter {
    tile: Arc<Tile>,
    registry: HashSet<DedupKey>,
    terrain: Option<Mesh>,
}

impl TileAdapter {
    pub fn new(tile: Arc<Tile>) -> Self {
        Self {
            tile,
            registry: HashSet::default(),
            terrain: None,
        }
    }

    pub fn tile(&self) -> &Arc<Tile> {
        &self.tile
    }

    /// Number of distinct records emitted so far.
    pub fn registered(&self) -> usize {
        self.registry.len()
    }

    /// Adapts one record. `Ok(None)` means nothing to emit: a terrain chunk
    /// was accumulated, the record is unstyled, or it is a duplicate.
    pub fn adapt(&mut self, record: RawRecord) -> Result<Option<MapData>> {
        match record {
            RawRecord::Terrain(grid) => {
                let mesh = build_terrain_mesh(&grid, self.tile.projection().as_ref())?;
                match self.terrain.as_mut() {
                    Some(terrain) => terrain.merge(mesh),
                    None => self.terrain = Some(mesh),
                }
                Ok(None)
            }
            RawRecord::Element(element) => self.adapt_element(element),
        }
    }

    fn adapt_element(&mut self, element: Element) -> Result<Option<MapData>> {
        let styles = self.tile.stylesheet().resolve(&element.tags);
        if styles.is_empty() {
            return Ok(None);
        }
        let element = element.with_styles(styles);

        let builder = element.style(props::BUILDER).map(str::to_string);
        let key = match &builder {
            Some(builder) => DedupKey::new(
                format!("{}:{}", builder, element.qualified_id()),
                element.id,
            ),
            None => DedupKey::new(element.qualified_id(), element.id),
        };
        if self.registry.contains(&key) {
            log::debug!("tile {}: {} already emitted", self.tile.quad_key(), key.name);
            return Ok(None);
        }

        let data = match builder {
            Some(builder) => MapData::Mesh(build_mesh(
                &builder,
                &key.name,
                &element,
                self.tile.projection().as_ref(),
            )?),
            None => MapData::Element(element),
        };
        self.registry.insert(key);
        Ok(Some(data))
    }

    /// Hands out the accumulated terrain mesh, if any terrain was adapted.
    pub fn finish(&mut self) -> Option<MapData> {
        self.terrain.take().map(MapData::Mesh)
    }
}

fn build_mesh(
    builder: &str,
    name: &str,
    element: &Element,
    projection: &dyn Projection,
) -> Result<Mesh> {
    let ring = outline(element)?;
    let color = element.style(props::COLOR).and_then(Color::from_hex);
    match builder {
        "building" => {
            let min_height = numeric(element.tags.get("min_height").map(String::as_str)).unwrap_or(0.0);
            extrude(name, &ring, min_height, building_height(element), color, projection)
        }
        "flat" => {
            let height = numeric(element.style(props::HEIGHT)).unwrap_or(0.0);
            extrude(name, &ring, height, height, color, projection)
        }
        other => Err(MapError::ParseFailure(format!(
            "element {}: unknown mesh builder '{}'",
            element.id, other
        ))),
    }
}

/// Distinct ring points of an element; the closing duplicate is dropped.
fn outline(element: &Element) -> Result<Vec<LatLng>> {
    let mut ring = element.geometry.clone();
    if ring.len() > 1 && ring.first() == ring.last() {
        ring.pop();
    }
    if ring.len() < 3 {
        return Err(MapError::ParseFailure(format!(
            "element {} has {} outline points, need 3",
            element.id,
            ring.len()
        )));
    }
    Ok(ring)
}

fn building_height(element: &Element) -> f64 {
    numeric(element.tags.get("height").map(String::as_str))
        .or_else(|| numeric(element.style(props::HEIGHT)))
        .or_else(|| {
            numeric(element.tags.get("building:levels").map(String::as_str))
                .map(|levels| levels * LEVEL_HEIGHT)
        })
        .unwrap_or(DEFAULT_BUILDING_HEIGHT)
}

/// Parses `12`, `12.5` or `12 m`.
fn numeric(value: Option<&str>) -> Option<f64> {
    value?
        .trim()
        .trim_end_matches('m')
        .trim()
        .parse()
        .ok()
        .filter(|v: &f64| v.is_finite())
}

/// Walls from `bottom` to `top` plus a roof polygon at `top`. Degenerates to
/// the roof alone when both heights are equal.
fn extrude(
    name: &str,
    ring: &[LatLng],
    bottom: f64,
    top: f64,
    color: Option<Color>,
    projection: &dyn Projection,
) -> Result<Mesh> {
    let mut vertices: Vec<f64> = Vec::new();
    let mut triangles: Vec<i32> = Vec::new();
    let push = |coord: LatLng, height: f64, vertices: &mut Vec<f64>| -> i32 {
        let p = projection.project(coord, height);
        vertices.extend_from_slice(&[f64::from(p.x), f64::from(p.y), f64::from(p.z)]);
        (vertices.len() / 3 - 1) as i32
    };

    if top > bottom {
        for i in 0..ring.len() {
            let (a, b) = (ring[i], ring[(i + 1) % ring.len()]);
            let v0 = push(a, bottom, &mut vertices);
            let v1 = push(b, bottom, &mut vertices);
            let v2 = push(b, top, &mut vertices);
            let v3 = push(a, top, &mut vertices);
            triangles.extend_from_slice(&[v0, v1, v2, v0, v2, v3]);
        }
    }

    let roof_base = (vertices.len() / 3) as i32;
    let mut footprint = Vec::with_capacity(ring.len());
    for coord in ring {
        push(*coord, top, &mut vertices);
        let ground = projection.project(*coord, 0.0).ground();
        footprint.push((ground.x, ground.y));
    }
    triangles.extend(triangulate(&footprint).into_iter().map(|i| roof_base + i as i32));

    let colors: Vec<f64> = match color {
        Some(c) => {
            let rgba = [c.r, c.g, c.b, c.a].map(|ch| f64::from(ch) / 255.0);
            (0..vertices.len() / 3).flat_map(|_| rgba).collect()
        }
        None => Vec::new(),
    };

    Mesh::from_raw(name, &vertices, &triangles, &colors)
}

/// Ear clipping triangulation of a simple polygon. Returns index triples.
fn triangulate(points: &[(f64, f64)]) -> Vec<usize> {
    let n = points.len();
    if n < 3 {
        return Vec::new();
    }
    let mut polygon: Vec<usize> = (0..n).collect();
    if signed_area(points) < 0.0 {
        polygon.reverse();
    }

    let mut result = Vec::with_capacity((n - 2) * 3);
    while polygon.len() > 3 {
        let m = polygon.len();
        let ear = (0..m).find(|&i| {
            let (a, b, c) = (polygon[(i + m - 1) % m], polygon[i], polygon[(i + 1) % m]);
            cross(points[a], points[b], points[c]) > 0.0
                && !polygon.iter().any(|&k| {
                    k != a && k != b && k != c && in_triangle(points[k], points[a], points[b], points[c])
                })
        });
        match ear {
            Some(i) => {
                let (a, b, c) = (polygon[(i + m - 1) % m], polygon[i], polygon[(i + 1) % m]);
                result.extend_from_slice(&[a, b, c]);
                polygon.remove(i);
            }
            // Self-intersecting or degenerate: fan whatever is left.
            None => break,
        }
    }
    for k in 1..polygon.len().saturating_sub(1) {
        result.extend_from_slice(&[polygon[0], polygon[k], polygon[k + 1]]);
    }
    result
}

fn signed_area(points: &[(f64, f64)]) -> f64 {
    let n = points.len();
    (0..n)
        .map(|i| {
            let (a, b) = (points[i], points[(i + 1) % n]);
            a.0 * b.1 - b.0 * a.1
        })
        .sum::<f64>()
        / 2.0
}

fn cross(a: (f64, f64), b: (f64, f64), c: (f64, f64)) -> f64 {
    (b.0 - a.0) * (c.1 - a.1) - (b.1 - a.1) * (c.0 - a.0)
}

fn in_triangle(p: (f64, f64), a: (f64, f64), b: (f64, f64), c: (f64, f64)) -> bool {
    cross(a, b, p) >= 0.0 && cross(b, c, p) >= 0.0 && cross(c, a, p) >= 0.0
}
