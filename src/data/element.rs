//! Values produced by the load pipeline.

use serde::{Deserialize, Serialize};

use crate::core::geo::{LatLng, Vec3};
use crate::prelude::HashMap;
use crate::{MapError, Result};

/// RGBA colour, 8 bits per channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

impl Color {
    pub const WHITE: Color = Color::rgb(255, 255, 255);

    pub const fn rgb(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b, a: 255 }
    }

    /// Parses `#rrggbb` or `#rrggbbaa`.
    pub fn from_hex(hex: &str) -> Option<Self> {
        let digits = hex.trim().strip_prefix('#')?;
        let channel = |i: usize| u8::from_str_radix(digits.get(i..i + 2)?, 16).ok();
        match digits.len() {
            6 => Some(Self::rgb(channel(0)?, channel(2)?, channel(4)?)),
            8 => Some(Self {
                r: channel(0)?,
                g: channel(2)?,
                b: channel(4)?,
                a: channel(6)?,
            }),
            _ => None,
        }
    }
}

impl Default for Color {
    fn default() -> Self {
        Self::WHITE
    }
}

/// Id space an element id belongs to. OSM numbers nodes, ways and relations
/// independently, so the same id can name three different features.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ElementKind {
    Node,
    Way,
    Relation,
    /// A feature with no OSM identity, e.g. plain GeoJSON.
    #[default]
    Feature,
}

impl ElementKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Node => "node",
            Self::Way => "way",
            Self::Relation => "relation",
            Self::Feature => "feature",
        }
    }

    /// Parses an OSM type name (`node`, `way`, `relation`, or the `n`/`w`/`r`
    /// abbreviations).
    pub fn from_osm_type(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "node" | "n" => Some(Self::Node),
            "way" | "w" => Some(Self::Way),
            "relation" | "r" => Some(Self::Relation),
            _ => None,
        }
    }
}

impl std::fmt::Display for ElementKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A tagged geographic feature with its resolved style.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Element {
    pub id: i64,
    pub kind: ElementKind,
    pub geometry: Vec<LatLng>,
    pub tags: HashMap<String, String>,
    pub styles: HashMap<String, String>,
}

impl Element {
    pub fn new(id: i64, geometry: Vec<LatLng>, tags: HashMap<String, String>) -> Self {
        Self {
            id,
            kind: ElementKind::default(),
            geometry,
            tags,
            styles: HashMap::default(),
        }
    }

    pub fn with_kind(mut self, kind: ElementKind) -> Self {
        self.kind = kind;
        self
    }

    /// `kind:id`, unique across id spaces.
    pub fn qualified_id(&self) -> String {
        format!("{}:{}", self.kind, self.id)
    }

    pub fn with_styles(mut self, styles: HashMap<String, String>) -> Self {
        self.styles = styles;
        self
    }

    /// Closed ring: at least four points with the first repeated last.
    pub fn is_closed(&self) -> bool {
        self.geometry.len() >= 4 && self.geometry.first() == self.geometry.last()
    }

    pub fn style(&self, key: &str) -> Option<&str> {
        self.styles.get(key).map(String::as_str)
    }
}

/// Triangle mesh in world space. Always valid once constructed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Mesh {
    name: String,
    vertices: Vec<Vec3>,
    triangles: Vec<i32>,
    colors: Vec<Color>,
}

impl Mesh {
    pub fn new(
        name: impl Into<String>,
        vertices: Vec<Vec3>,
        triangles: Vec<i32>,
        colors: Vec<Color>,
    ) -> Result<Self> {
        let name = name.into();
        if triangles.len() % 3 != 0 {
            return Err(MapError::ParseFailure(format!(
                "mesh {}: {} indices is not a multiple of 3",
                name,
                triangles.len()
            )));
        }
        if let Some(bad) = triangles
            .iter()
            .find(|&&i| i < 0 || i as usize >= vertices.len())
        {
            return Err(MapError::ParseFailure(format!(
                "mesh {}: index {} out of range for {} vertices",
                name,
                bad,
                vertices.len()
            )));
        }
        if !colors.is_empty() && colors.len() != vertices.len() {
            return Err(MapError::ParseFailure(format!(
                "mesh {}: {} colors for {} vertices",
                name,
                colors.len(),
                vertices.len()
            )));
        }
        Ok(Self {
            name,
            vertices,
            triangles,
            colors,
        })
    }

    /// Builds a mesh from raw double precision buffers: `xyz` triples for the
    /// vertices and an optional `rgba` quadruple (0..=1) per vertex.
    pub fn from_raw(
        name: impl Into<String>,
        vertices: &[f64],
        triangles: &[i32],
        colors: &[f64],
    ) -> Result<Self> {
        let name = name.into();
        if vertices.len() % 3 != 0 || colors.len() % 4 != 0 {
            return Err(MapError::ParseFailure(format!(
                "mesh {}: ragged vertex or colour buffer",
                name
            )));
        }
        let vertices = vertices
            .chunks_exact(3)
            .map(|v| Vec3::new(v[0] as f32, v[1] as f32, v[2] as f32))
            .collect();
        let to_channel = |c: f64| (c.clamp(0.0, 1.0) * 255.0).round() as u8;
        let colors = colors
            .chunks_exact(4)
            .map(|c| Color {
                r: to_channel(c[0]),
                g: to_channel(c[1]),
                b: to_channel(c[2]),
                a: to_channel(c[3]),
            })
            .collect();
        Self::new(name, vertices, triangles.to_vec(), colors)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn vertices(&self) -> &[Vec3] {
        &self.vertices
    }

    pub fn triangles(&self) -> &[i32] {
        &self.triangles
    }

    pub fn colors(&self) -> &[Color] {
        &self.colors
    }

    pub fn triangle_count(&self) -> usize {
        self.triangles.len() / 3
    }

    /// Appends `other`, offsetting its indices. Colours are kept only when
    /// both meshes carry them.
    pub fn merge(&mut self, other: Mesh) {
        let base = self.vertices.len() as i32;
        let keep_colors = (self.colors.len() == self.vertices.len() || self.vertices.is_empty())
            && other.colors.len() == other.vertices.len()
            && !other.colors.is_empty();
        if keep_colors {
            self.colors.extend(other.colors);
        } else {
            self.colors.clear();
        }
        self.vertices.extend(other.vertices);
        self.triangles
            .extend(other.triangles.into_iter().map(|i| i + base));
    }
}

/// One emitted pipeline value.
#[derive(Debug, Clone, PartialEq)]
pub enum MapData {
    Element(Element),
    Mesh(Mesh),
}

impl MapData {
    pub fn name(&self) -> String {
        match self {
            MapData::Element(element) => element.qualified_id(),
            MapData::Mesh(mesh) => mesh.name().to_string(),
        }
    }
}

/// Identity of a non-terrain record within one tile.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DedupKey {
    pub name: String,
    pub element_id: i64,
}

impl DedupKey {
    pub fn new(name: impl Into<String>, element_id: i64) -> Self {
        Self {
            name: name.into(),
            element_id,
        }
    }
}
