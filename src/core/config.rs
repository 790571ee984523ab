//! Configuration lookups and typed component settings
//!
//! Components never parse configuration files themselves. They receive a
//! [`ConfigSource`] that answers `(path, default) -> value` lookups, and the
//! builder turns those into the typed structs below.

use std::path::Path;

use serde_json::Value;

use crate::{MapError, Result};

/// Well-known key paths.
pub mod keys {
    pub const CACHE_ROOT: &str = "data/cache";
    pub const STORE_FILE: &str = "data/store";
    pub const MAX_TILE_DISTANCE: &str = "tiles/max_tile_distance";
    pub const SENSITIVITY: &str = "tiles/sensitivity";
    pub const OFFSET: &str = "tiles/offset";
    pub const LEVEL_OF_DETAIL: &str = "tiles/level_of_detail";
    pub const WORLD_ZERO_LAT: &str = "world/zero_point/lat";
    pub const WORLD_ZERO_LNG: &str = "world/zero_point/lng";
    pub const MAX_CONCURRENT: &str = "loader/max_concurrent";
    pub const MEMORY_CACHE_SIZE: &str = "loader/memory_cache_size";
    pub const MAP_DATA_PROVIDER: &str = "providers/map_data";
    pub const ELEVATION_PROVIDER: &str = "providers/elevation";
    pub const STYLESHEET: &str = "stylesheet";
}

/// Generic key-path lookup capability.
pub trait ConfigSource: Send + Sync {
    fn contains(&self, path: &str) -> bool;

    fn get_string(&self, path: &str, default: &str) -> String;

    fn get_int(&self, path: &str, default: i64) -> i64;

    fn get_float(&self, path: &str, default: f64) -> f64;

    fn get_bool(&self, path: &str, default: bool) -> bool;

    /// Like [`get_string`](Self::get_string) but fails when the key is absent.
    fn require_string(&self, path: &str) -> Result<String> {
        if self.contains(path) {
            Ok(self.get_string(path, ""))
        } else {
            Err(MapError::ConfigurationError(format!(
                "missing required key '{}'",
                path
            )))
        }
    }
}

/// JSON-document backed configuration navigated with `/`-separated paths.
#[derive(Debug, Clone, Default)]
pub struct JsonConfig {
    root: Value,
}

impl JsonConfig {
    pub fn from_value(root: Value) -> Self {
        Self { root }
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(Self::from_value(serde_json::from_str(json)?))
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_json(&contents)
    }

    /// Node at `path`, if any. Empty segments are ignored.
    pub fn lookup(&self, path: &str) -> Option<&Value> {
        path.split('/')
            .filter(|segment| !segment.is_empty())
            .try_fold(&self.root, |node, segment| match node {
                Value::Object(map) => map.get(segment),
                Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
                _ => None,
            })
    }

    /// Sub-tree at `path` as its own config, used for provider sections.
    pub fn section(&self, path: &str) -> Option<JsonConfig> {
        self.lookup(path).cloned().map(Self::from_value)
    }
}

impl ConfigSource for JsonConfig {
    fn contains(&self, path: &str) -> bool {
        !matches!(self.lookup(path), None | Some(Value::Null))
    }

    fn get_string(&self, path: &str, default: &str) -> String {
        match self.lookup(path) {
            Some(Value::String(s)) => s.clone(),
            Some(Value::Number(n)) => n.to_string(),
            Some(Value::Bool(b)) => b.to_string(),
            _ => default.to_string(),
        }
    }

    fn get_int(&self, path: &str, default: i64) -> i64 {
        match self.lookup(path) {
            Some(Value::Number(n)) => n
                .as_i64()
                .or_else(|| n.as_f64().map(|f| f as i64))
                .unwrap_or(default),
            Some(Value::String(s)) => s.trim().parse().unwrap_or(default),
            _ => default,
        }
    }

    fn get_float(&self, path: &str, default: f64) -> f64 {
        match self.lookup(path) {
            Some(Value::Number(n)) => n.as_f64().unwrap_or(default),
            Some(Value::String(s)) => s.trim().parse().unwrap_or(default),
            _ => default,
        }
    }

    fn get_bool(&self, path: &str, default: bool) -> bool {
        match self.lookup(path) {
            Some(Value::Bool(b)) => *b,
            Some(Value::String(s)) => s.trim().parse().unwrap_or(default),
            _ => default,
        }
    }
}

/// View of the keys below `prefix` in another source.
pub struct ConfigSection<'a> {
    source: &'a dyn ConfigSource,
    prefix: String,
}

impl<'a> ConfigSection<'a> {
    pub fn new(source: &'a dyn ConfigSource, prefix: &str) -> Self {
        Self {
            source,
            prefix: prefix.trim_end_matches('/').to_string(),
        }
    }

    fn path(&self, key: &str) -> String {
        format!("{}/{}", self.prefix, key)
    }
}

impl ConfigSource for ConfigSection<'_> {
    fn contains(&self, path: &str) -> bool {
        self.source.contains(&self.path(path))
    }

    fn get_string(&self, path: &str, default: &str) -> String {
        self.source.get_string(&self.path(path), default)
    }

    fn get_int(&self, path: &str, default: i64) -> i64 {
        self.source.get_int(&self.path(path), default)
    }

    fn get_float(&self, path: &str, default: f64) -> f64 {
        self.source.get_float(&self.path(path), default)
    }

    fn get_bool(&self, path: &str, default: bool) -> bool {
        self.source.get_bool(&self.path(path), default)
    }

    fn require_string(&self, path: &str) -> Result<String> {
        self.source.require_string(&self.path(path))
    }
}

/// Settings of the tile lifecycle state machine.
#[derive(Debug, Clone, PartialEq)]
pub struct TileControllerConfig {
    /// Minimum planar movement (metres) that forces a re-evaluation.
    pub sensitivity: f64,
    /// Chebyshev distance in tiles beyond which a tile is retired.
    pub max_tile_distance: u32,
    /// Containment margin (metres) applied to the current tile's rectangle.
    pub offset: f64,
}

impl Default for TileControllerConfig {
    fn default() -> Self {
        Self {
            sensitivity: 100.0,
            max_tile_distance: 2,
            offset: 10.0,
        }
    }
}

impl TileControllerConfig {
    pub fn from_config(config: &dyn ConfigSource) -> Self {
        let defaults = Self::default();
        Self {
            sensitivity: config.get_float(keys::SENSITIVITY, defaults.sensitivity),
            max_tile_distance: config
                .get_int(keys::MAX_TILE_DISTANCE, i64::from(defaults.max_tile_distance))
                .max(0) as u32,
            offset: config.get_float(keys::OFFSET, defaults.offset),
        }
    }
}

/// Settings of the per-tile loading pipeline.
#[derive(Debug, Clone, PartialEq)]
pub struct LoaderConfig {
    /// Maximum number of tile pipelines running at once
    pub max_concurrent: usize,
    /// Entries kept in the in-memory front of each provider cache
    pub memory_cache_size: usize,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 8,
            memory_cache_size: 64,
        }
    }
}

/// Unified configuration presets for LoaderConfig
impl LoaderConfig {
    pub fn low_resource() -> Self {
        Self {
            max_concurrent: 2,
            memory_cache_size: 16,
        }
    }

    pub fn high_performance() -> Self {
        Self {
            max_concurrent: 32,
            memory_cache_size: 512,
        }
    }

    pub fn for_testing() -> Self {
        Self {
            max_concurrent: 2,
            memory_cache_size: 4,
        }
    }

    pub fn from_config(config: &dyn ConfigSource) -> Self {
        let defaults = Self::default();
        Self {
            max_concurrent: config
                .get_int(keys::MAX_CONCURRENT, defaults.max_concurrent as i64)
                .max(1) as usize,
            memory_cache_size: config
                .get_int(keys::MEMORY_CACHE_SIZE, defaults.memory_cache_size as i64)
                .max(0) as usize,
        }
    }
}
