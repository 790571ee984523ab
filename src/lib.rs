//! # mapstream
//!
//! Streaming map-data core for 3D map viewers.
//!
//! As the viewer moves, a [`TileController`] decides which quadkey tiles are
//! relevant, a [`MapDataLoader`] runs one asynchronous fetch → parse → adapt
//! pipeline per tile, and far-away tiles are retired. Consumers receive tile
//! lifecycle events and the resulting [`Element`]s and [`Mesh`]es; turning
//! them into on-screen objects is up to them.

pub mod core;
pub mod data;
pub mod events;
pub mod prelude;
pub mod providers;
pub mod runtime;
pub mod streamer;
pub mod tiles;
pub use crate::core::constants;

// Re-export public API
pub use core::{
    builder::MapStreamBuilder,
    config::{ConfigSource, JsonConfig, LoaderConfig, TileControllerConfig},
    geo::{BoundingBox, LatLng, Point, Rectangle, Vec3},
    projection::{CartesianProjection, Projection, SphericalProjection},
    quadkey::QuadKey,
};

pub use data::{
    adapter::TileAdapter,
    element::{Color, DedupKey, Element, ElementKind, MapData, Mesh},
    loader::{LoadEvent, LoadHandle, LoadResult, MapDataLoader},
    parser::DataFormat,
    store::ElementStore,
    stylesheet::{RuleStylesheet, Stylesheet},
};

pub use events::{EventBus, Subscription};
pub use providers::{
    cache::{DiskCache, MemoryCache},
    http::{HttpClient, ReqwestClient},
    remote::{FetchedData, ProviderProfile, RemoteDataProvider},
};
pub use streamer::TileStreamer;
pub use tiles::{
    controller::{TileController, TileEvent},
    tile::Tile,
};

/// Result type used throughout the library
pub type Result<T> = std::result::Result<T, MapError>;

/// Common error types
#[derive(Debug, thiserror::Error)]
pub enum MapError {
    #[error("Invalid coordinates: ({lat}, {lng})")]
    InvalidCoordinate { lat: f64, lng: f64 },

    #[error("Invalid quadkey: {0}")]
    InvalidQuadKey(String),

    #[error("Fetch failed: {0}")]
    FetchFailure(String),

    #[error("Parse error: {0}")]
    ParseFailure(String),

    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    #[error("Not supported: {0}")]
    NotSupported(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Storage error: {0}")]
    Storage(#[from] bincode::Error),

    #[error("Operation cancelled")]
    Cancelled,
}

impl MapError {
    /// Whether the error ends a tile's stream, as opposed to a skipped record.
    pub fn is_fatal_for_tile(&self) -> bool {
        !matches!(self, MapError::ParseFailure(_))
    }
}

/// Installs `env_logger` honouring `RUST_LOG`. Safe to call more than once.
#[cfg(feature = "debug")]
pub fn init_logging() {
    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .try_init();
}
