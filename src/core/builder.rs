//! Builder assembling a [`TileStreamer`] from configuration
//!
//! Everything comes from a [`ConfigSource`] unless overridden. Missing or
//! invalid settings fail the build with [`MapError::ConfigurationError`].

use std::path::PathBuf;
use std::sync::{Arc, RwLock};

use crate::core::config::{keys, ConfigSection, ConfigSource, LoaderConfig, TileControllerConfig};
use crate::core::constants::MAX_LEVEL_OF_DETAIL;
use crate::core::geo::LatLng;
use crate::core::projection::{CartesianProjection, Projection};
use crate::data::loader::MapDataLoader;
use crate::data::parser::DataFormat;
use crate::data::store::ElementStore;
use crate::data::stylesheet::{RuleStylesheet, Stylesheet};
use crate::providers::cache::DiskCache;
use crate::providers::http::{HttpClient, ReqwestClient};
use crate::providers::remote::{ProviderProfile, RemoteDataProvider};
use crate::runtime::{AsyncSpawner, TokioSpawner};
use crate::streamer::TileStreamer;
use crate::tiles::controller::TileController;
use crate::{MapError, Result};

const DEFAULT_LEVEL_OF_DETAIL: i64 = 16;

/// Builder for creating and configuring [`TileStreamer`] instances
pub struct MapStreamBuilder {
    config: Box<dyn ConfigSource>,
    world_zero_point: Option<LatLng>,
    level_of_detail: Option<u8>,
    controller_config: Option<TileControllerConfig>,
    loader_config: Option<LoaderConfig>,
    projection: Option<Arc<dyn Projection>>,
    stylesheet: Option<Arc<dyn Stylesheet>>,
    http_client: Option<Arc<dyn HttpClient>>,
    spawner: Option<Arc<dyn AsyncSpawner>>,
    store: Option<Arc<RwLock<ElementStore>>>,
}

impl MapStreamBuilder {
    pub fn new(config: impl ConfigSource + 'static) -> Self {
        Self {
            config: Box::new(config),
            world_zero_point: None,
            level_of_detail: None,
            controller_config: None,
            loader_config: None,
            projection: None,
            stylesheet: None,
            http_client: None,
            spawner: None,
            store: None,
        }
    }

    /// Origin of the planar world frame; defaults to `world/zero_point`.
    pub fn with_world_zero_point(mut self, zero_point: LatLng) -> Self {
        self.world_zero_point = Some(zero_point);
        self
    }

    pub fn with_level_of_detail(mut self, level_of_detail: u8) -> Self {
        self.level_of_detail = Some(level_of_detail);
        self
    }

    pub fn with_controller_config(mut self, config: TileControllerConfig) -> Self {
        self.controller_config = Some(config);
        self
    }

    pub fn with_loader_config(mut self, config: LoaderConfig) -> Self {
        self.loader_config = Some(config);
        self
    }

    /// Projection for tile geometry; defaults to a Cartesian frame at the
    /// world zero point.
    pub fn with_projection(mut self, projection: Arc<dyn Projection>) -> Self {
        self.projection = Some(projection);
        self
    }

    pub fn with_stylesheet(mut self, stylesheet: Arc<dyn Stylesheet>) -> Self {
        self.stylesheet = Some(stylesheet);
        self
    }

    pub fn with_http_client(mut self, client: Arc<dyn HttpClient>) -> Self {
        self.http_client = Some(client);
        self
    }

    /// Runtime the pipelines run on; defaults to the caller's tokio runtime.
    pub fn with_spawner(mut self, spawner: Arc<dyn AsyncSpawner>) -> Self {
        self.spawner = Some(spawner);
        self
    }

    pub fn with_store(mut self, store: Arc<RwLock<ElementStore>>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn build(self) -> Result<TileStreamer> {
        let config = self.config.as_ref();

        let level_of_detail = match self.level_of_detail {
            Some(lod) => lod,
            None => {
                let lod = config.get_int(keys::LEVEL_OF_DETAIL, DEFAULT_LEVEL_OF_DETAIL);
                u8::try_from(lod).map_err(|_| {
                    MapError::ConfigurationError(format!("invalid level of detail {}", lod))
                })?
            }
        };
        if level_of_detail > MAX_LEVEL_OF_DETAIL {
            return Err(MapError::ConfigurationError(format!(
                "level of detail {} exceeds {}",
                level_of_detail, MAX_LEVEL_OF_DETAIL
            )));
        }

        let zero_point = match self.world_zero_point {
            Some(zero_point) => zero_point,
            None => world_zero_point(config)?,
        };
        if !zero_point.is_valid() {
            return Err(MapError::ConfigurationError(format!(
                "world zero point ({}, {}) is not a valid coordinate",
                zero_point.lat, zero_point.lng
            )));
        }

        let stylesheet = match self.stylesheet {
            Some(stylesheet) => stylesheet,
            None => {
                let path = config.require_string(keys::STYLESHEET)?;
                let stylesheet = RuleStylesheet::from_file(&path).map_err(|e| {
                    MapError::ConfigurationError(format!("stylesheet {}: {}", path, e))
                })?;
                Arc::new(stylesheet) as Arc<dyn Stylesheet>
            }
        };
        let projection = self
            .projection
            .unwrap_or_else(|| Arc::new(CartesianProjection::new(zero_point)));
        let spawner: Arc<dyn AsyncSpawner> = match self.spawner {
            Some(spawner) => spawner,
            None => Arc::new(TokioSpawner::current()?),
        };
        let http_client = self
            .http_client
            .unwrap_or_else(|| Arc::new(ReqwestClient) as Arc<dyn HttpClient>);

        let controller_config = self
            .controller_config
            .unwrap_or_else(|| TileControllerConfig::from_config(config));
        let loader_config = self
            .loader_config
            .unwrap_or_else(|| LoaderConfig::from_config(config));

        let store = match self.store {
            Some(store) => Some(store),
            None if config.contains(keys::STORE_FILE) => {
                let path = config.get_string(keys::STORE_FILE, "");
                let store = ElementStore::load(&path).map_err(|e| {
                    MapError::ConfigurationError(format!("element store {}: {}", path, e))
                })?;
                log::info!("loaded element store {} ({} elements)", path, store.len());
                Some(Arc::new(RwLock::new(store)))
            }
            None => None,
        };

        let build_provider = |name: &str,
                              path: &str,
                              default_format: Option<DataFormat>|
         -> Result<Option<Arc<RemoteDataProvider>>> {
            if !config.contains(path) {
                return Ok(None);
            }
            let section = ConfigSection::new(config, path);
            let profile = ProviderProfile::from_config(name, &section, default_format)?;
            let cache_root = PathBuf::from(config.require_string(keys::CACHE_ROOT)?);
            log::debug!("{} provider: {}", name, profile.url_template);
            Ok(Some(Arc::new(RemoteDataProvider::new(
                profile,
                DiskCache::new(cache_root),
                Arc::clone(&http_client),
                loader_config.memory_cache_size,
            ))))
        };
        let map_data = build_provider("map_data", keys::MAP_DATA_PROVIDER, None)?;
        let elevation =
            build_provider("elevation", keys::ELEVATION_PROVIDER, Some(DataFormat::Elevation))?;

        if map_data.is_none() && store.is_none() {
            return Err(MapError::ConfigurationError(
                "no map data source: configure providers/map_data or data/store".to_string(),
            ));
        }

        let mut loader = MapDataLoader::new(spawner, loader_config);
        if let Some(store) = store {
            loader = loader.with_store(store);
        }
        if let Some(provider) = map_data {
            loader = loader.with_map_data_provider(provider);
        }
        if let Some(provider) = elevation {
            loader = loader.with_elevation_provider(provider);
        }

        let controller = TileController::new(controller_config, zero_point, projection, stylesheet);
        Ok(TileStreamer::new(controller, loader, level_of_detail))
    }
}

fn world_zero_point(config: &dyn ConfigSource) -> Result<LatLng> {
    if !config.contains(keys::WORLD_ZERO_LAT) || !config.contains(keys::WORLD_ZERO_LNG) {
        return Err(MapError::ConfigurationError(
            "missing world zero point (world/zero_point/lat, world/zero_point/lng)".to_string(),
        ));
    }
    Ok(LatLng::new(
        config.get_float(keys::WORLD_ZERO_LAT, f64::NAN),
        config.get_float(keys::WORLD_ZERO_LNG, f64::NAN),
    ))
}
