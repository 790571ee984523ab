//! Prelude module for common mapstream types and traits
//!
//! This module re-exports the most commonly used types, traits, and functions
//! for easy importing with `use mapstream::prelude::*;`

pub use crate::core::{
    builder::MapStreamBuilder,
    config::{ConfigSection, ConfigSource, JsonConfig, LoaderConfig, TileControllerConfig},
    geo::{BoundingBox, LatLng, Point, Rectangle, Vec3},
    projection::{CartesianProjection, Projection, SphericalProjection},
    quadkey::QuadKey,
};

pub use crate::data::{
    element::{Color, Element, ElementKind, MapData, Mesh},
    loader::{LoadEvent, LoadHandle, LoadResult, MapDataLoader},
    parser::DataFormat,
    store::ElementStore,
    stylesheet::{RuleStylesheet, Stylesheet},
};

pub use crate::events::{EventBus, Subscription};

pub use crate::providers::{
    http::{HttpClient, ReqwestClient},
    remote::{ProviderProfile, RemoteDataProvider},
};

pub use crate::runtime::{spawn, AsyncHandle, AsyncSpawner, TokioSpawner};

pub use crate::streamer::TileStreamer;
pub use crate::tiles::{TileController, TileEvent, Tile};

pub use crate::{MapError, Result};

pub use std::sync::Arc;

pub use fxhash::{FxHashMap as HashMap, FxHashSet as HashSet};
