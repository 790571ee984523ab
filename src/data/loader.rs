//! Per-tile asynchronous load pipeline
//!
//! [`MapDataLoader::load`] spawns one task per tile that resolves a source,
//! fetches (or reads from cache), parses and adapts its data. Results travel
//! over a channel and are drained on the main context with
//! [`MapDataLoader::try_recv_results`]. A semaphore bounds how many
//! pipelines run at once.

use std::ops::ControlFlow;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use crossbeam_channel::{unbounded, Receiver, Sender};
use tokio::sync::Semaphore;

use crate::core::config::LoaderConfig;
use crate::core::quadkey::QuadKey;
use crate::data::adapter::TileAdapter;
use crate::data::element::{Element, MapData};
use crate::data::parser::{self, DataFormat, RawRecord, RecordSink};
use crate::data::store::ElementStore;
use crate::providers::remote::RemoteDataProvider;
use crate::runtime::{self, execute_blocking, AsyncHandle, AsyncSpawner};
use crate::tiles::tile::Tile;
use crate::{MapError, Result};

/// One step of a tile's load stream.
#[derive(Debug)]
pub enum LoadEvent {
    Data(MapData),
    /// The tile finished loading; nothing follows.
    Completed,
    /// The tile's data could not be fetched; nothing follows.
    Failed(MapError),
}

/// A load event together with the tile it belongs to.
#[derive(Debug)]
pub struct LoadResult {
    pub tile: Arc<Tile>,
    pub event: LoadEvent,
}

impl LoadResult {
    pub fn quad_key(&self) -> QuadKey {
        self.tile.quad_key()
    }

    /// Whether this is the last event of the tile's stream.
    pub fn is_terminal(&self) -> bool {
        matches!(self.event, LoadEvent::Completed | LoadEvent::Failed(_))
    }
}

/// Handle of a running pipeline.
pub struct LoadHandle {
    cancelled: Arc<AtomicBool>,
    task: Box<dyn AsyncHandle>,
}

impl LoadHandle {
    /// Stops the pipeline: nothing more is emitted and the task is aborted.
    /// Cache writes already under way still complete.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
        self.task.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

impl std::fmt::Debug for LoadHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoadHandle")
            .field("cancelled", &self.is_cancelled())
            .field("finished", &self.is_finished())
            .finish()
    }
}

#[derive(Clone, Default)]
struct Sources {
    store: Option<Arc<RwLock<ElementStore>>>,
    map_data: Option<Arc<RemoteDataProvider>>,
    elevation: Option<Arc<RemoteDataProvider>>,
}

/// Runs load pipelines for tiles.
pub struct MapDataLoader {
    spawner: Arc<dyn AsyncSpawner>,
    config: LoaderConfig,
    semaphore: Arc<Semaphore>,
    sources: Arc<Sources>,
    result_tx: Sender<LoadResult>,
    result_rx: Receiver<LoadResult>,
}

impl MapDataLoader {
    pub fn new(spawner: Arc<dyn AsyncSpawner>, config: LoaderConfig) -> Self {
        let (result_tx, result_rx) = unbounded();
        Self {
            spawner,
            semaphore: Arc::new(Semaphore::new(config.max_concurrent.max(1))),
            config,
            sources: Arc::new(Sources::default()),
            result_tx,
            result_rx,
        }
    }

    /// Elements from `store` take precedence over the map-data provider for
    /// every tile the store has data for.
    pub fn with_store(self, store: Arc<RwLock<ElementStore>>) -> Self {
        self.with_sources(|sources| sources.store = Some(store))
    }

    pub fn with_map_data_provider(self, provider: Arc<RemoteDataProvider>) -> Self {
        self.with_sources(|sources| sources.map_data = Some(provider))
    }

    /// Terrain from `provider` is loaded before the tile's map data.
    pub fn with_elevation_provider(self, provider: Arc<RemoteDataProvider>) -> Self {
        self.with_sources(|sources| sources.elevation = Some(provider))
    }

    fn with_sources(mut self, update: impl FnOnce(&mut Sources)) -> Self {
        let mut sources = (*self.sources).clone();
        update(&mut sources);
        self.sources = Arc::new(sources);
        self
    }

    pub fn config(&self) -> &LoaderConfig {
        &self.config
    }

    /// Starts the pipeline of `tile`.
    pub fn load(&self, tile: Arc<Tile>) -> LoadHandle {
        let cancelled = Arc::new(AtomicBool::new(false));
        let emitter = Emitter {
            tile,
            cancelled: Arc::clone(&cancelled),
            tx: self.result_tx.clone(),
        };
        let semaphore = Arc::clone(&self.semaphore);
        let sources = Arc::clone(&self.sources);

        let task = runtime::spawn(self.spawner.as_ref(), async move {
            let Ok(_permit) = semaphore.acquire_owned().await else {
                return;
            };
            if emitter.is_stopped() {
                return;
            }
            let quad_key = emitter.tile.quad_key();
            log::debug!("loading tile {}", quad_key);

            match run_pipeline(&sources, &emitter).await {
                Ok(()) => {
                    emitter.emit(LoadEvent::Completed);
                }
                Err(MapError::Cancelled) => {}
                Err(e) => {
                    log::warn!("tile {} failed: {}", quad_key, e);
                    emitter.emit(LoadEvent::Failed(e));
                }
            }
        });

        LoadHandle { cancelled, task }
    }

    /// Drains every result received so far, dropping those of disposed tiles.
    pub fn try_recv_results(&self) -> Vec<LoadResult> {
        let mut results = Vec::new();
        while let Ok(result) = self.result_rx.try_recv() {
            if !result.tile.is_disposed() {
                results.push(result);
            }
        }
        results
    }

    pub fn has_pending_results(&self) -> bool {
        !self.result_rx.is_empty()
    }
}

impl std::fmt::Debug for MapDataLoader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MapDataLoader")
            .field("config", &self.config)
            .field("has_store", &self.sources.store.is_some())
            .field("map_data", &self.sources.map_data)
            .field("elevation", &self.sources.elevation)
            .finish()
    }
}

/// Sends results for one tile unless it was cancelled or disposed.
#[derive(Clone)]
struct Emitter {
    tile: Arc<Tile>,
    cancelled: Arc<AtomicBool>,
    tx: Sender<LoadResult>,
}

impl Emitter {
    fn is_stopped(&self) -> bool {
        self.cancelled.load(Ordering::Acquire) || self.tile.is_disposed()
    }

    /// Returns `false` once nothing more should be produced.
    fn emit(&self, event: LoadEvent) -> bool {
        if self.is_stopped() {
            return false;
        }
        self.tx
            .send(LoadResult {
                tile: Arc::clone(&self.tile),
                event,
            })
            .is_ok()
    }
}

async fn run_pipeline(sources: &Sources, emitter: &Emitter) -> Result<()> {
    let quad_key = emitter.tile.quad_key();
    let mut adapter = TileAdapter::new(Arc::clone(&emitter.tile));

    if let Some(elevation) = &sources.elevation {
        let fetched = elevation.get(&quad_key).await?;
        let format = elevation.profile().format.unwrap_or(DataFormat::Elevation);
        adapter = adapt_bytes(adapter, format, fetched.bytes, emitter.clone()).await?;
    }

    if let Some(elements) = sources.store.as_ref().and_then(|store| query_store(store, &quad_key)) {
        log::debug!("tile {}: {} elements from store", quad_key, elements.len());
        let emitter = emitter.clone();
        adapter = execute_blocking(move || {
            let mut sink = AdaptingSink {
                adapter,
                emitter: &emitter,
            };
            for element in elements {
                if sink.on_record(RawRecord::Element(element)).is_break() {
                    break;
                }
            }
            Ok(sink.adapter)
        })
        .await?;
    } else if let Some(map_data) = &sources.map_data {
        let fetched = map_data.get(&quad_key).await?;
        let format = map_data.profile().format.ok_or_else(|| {
            MapError::NotSupported(format!(
                "provider '{}' has no data format",
                map_data.profile().name
            ))
        })?;
        adapter = adapt_bytes(adapter, format, fetched.bytes, emitter.clone()).await?;
    }

    if emitter.is_stopped() {
        return Err(MapError::Cancelled);
    }
    if let Some(terrain) = adapter.finish() {
        emitter.emit(LoadEvent::Data(terrain));
    }
    Ok(())
}

fn query_store(store: &RwLock<ElementStore>, quad_key: &QuadKey) -> Option<Vec<Element>> {
    let store = store.read().ok()?;
    store.has_data(quad_key).then(|| store.query(quad_key))
}

/// Parses `bytes` on the blocking pool, adapting and emitting each record
/// as soon as it is decoded.
async fn adapt_bytes(
    adapter: TileAdapter,
    format: DataFormat,
    bytes: Arc<Vec<u8>>,
    emitter: Emitter,
) -> Result<TileAdapter> {
    execute_blocking(move || {
        let quad_key = adapter.tile().quad_key();
        let bounds = adapter.tile().bounding_box();
        let mut sink = AdaptingSink {
            adapter,
            emitter: &emitter,
        };
        match parser::parse(format, &bytes, bounds, &mut sink) {
            Ok(stats) => log::debug!(
                "tile {}: {} records, {} skipped",
                quad_key,
                stats.records,
                stats.skipped
            ),
            Err(e) if e.is_fatal_for_tile() => return Err(e),
            Err(e) => log::warn!("tile {}: unreadable {:?} data: {}", quad_key, format, e),
        }
        Ok(sink.adapter)
    })
    .await
}

struct AdaptingSink<'a> {
    adapter: TileAdapter,
    emitter: &'a Emitter,
}

impl RecordSink for AdaptingSink<'_> {
    fn on_record(&mut self, record: RawRecord) -> ControlFlow<()> {
        if self.emitter.is_stopped() {
            return ControlFlow::Break(());
        }
        match self.adapter.adapt(record) {
            Ok(Some(data)) => {
                if !self.emitter.emit(LoadEvent::Data(data)) {
                    return ControlFlow::Break(());
                }
            }
            Ok(None) => {}
            Err(e) => self.on_malformed(e),
        }
        ControlFlow::Continue(())
    }
}
