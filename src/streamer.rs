//! Wires tile lifecycle to load pipelines
//!
//! A [`TileStreamer`] owns the [`TileController`] and the [`MapDataLoader`].
//! Every created tile gets a pipeline, every retired tile has its pipeline
//! cancelled, and [`TileStreamer::poll`] forwards pipeline results to data
//! subscribers on the caller's context.

use std::collections::BTreeMap;

use crossbeam_channel::{unbounded, Receiver};

use crate::core::geo::LatLng;
use crate::core::quadkey::QuadKey;
use crate::data::loader::{LoadHandle, LoadResult, MapDataLoader};
use crate::events::{EventBus, Subscription};
use crate::tiles::controller::{TileController, TileEvent};
use crate::Result;

pub struct TileStreamer {
    controller: TileController,
    loader: MapDataLoader,
    level_of_detail: u8,
    handles: BTreeMap<QuadKey, LoadHandle>,
    lifecycle_rx: Receiver<TileEvent>,
    lifecycle_subscription: Subscription,
    data_events: EventBus<LoadResult>,
}

impl TileStreamer {
    pub fn new(controller: TileController, loader: MapDataLoader, level_of_detail: u8) -> Self {
        let (lifecycle_tx, lifecycle_rx) = unbounded();
        let lifecycle_subscription = controller.subscribe(move |event: &TileEvent| {
            let _ = lifecycle_tx.send(event.clone());
        });
        Self {
            controller,
            loader,
            level_of_detail,
            handles: BTreeMap::new(),
            lifecycle_rx,
            lifecycle_subscription,
            data_events: EventBus::new(),
        }
    }

    /// Level of detail used by [`update_position`](Self::update_position).
    pub fn level_of_detail(&self) -> u8 {
        self.level_of_detail
    }

    pub fn set_level_of_detail(&mut self, level_of_detail: u8) {
        self.level_of_detail = level_of_detail;
    }

    pub fn controller(&self) -> &TileController {
        &self.controller
    }

    pub fn loader(&self) -> &MapDataLoader {
        &self.loader
    }

    /// Registers a consumer of tile lifecycle events.
    pub fn subscribe_tiles<F>(&self, consumer: F) -> Subscription
    where
        F: Fn(&TileEvent) + Send + Sync + 'static,
    {
        self.controller.subscribe(consumer)
    }

    /// Registers a consumer of load results, delivered from [`poll`](Self::poll).
    pub fn subscribe_data<F>(&self, consumer: F) -> Subscription
    where
        F: Fn(&LoadResult) + Send + Sync + 'static,
    {
        self.data_events.subscribe(consumer)
    }

    /// Moves the viewer at the configured level of detail.
    pub fn update_position(&mut self, position: LatLng) -> Result<()> {
        self.on_position(position, self.level_of_detail)
    }

    /// Moves the viewer, starting pipelines for created tiles and cancelling
    /// those of retired ones.
    pub fn on_position(&mut self, position: LatLng, level_of_detail: u8) -> Result<()> {
        self.controller.on_position(position, level_of_detail)?;
        self.apply_lifecycle();
        Ok(())
    }

    fn apply_lifecycle(&mut self) {
        while let Ok(event) = self.lifecycle_rx.try_recv() {
            match event {
                TileEvent::Created(tile) => {
                    let key = tile.quad_key();
                    let handle = self.loader.load(tile);
                    if let Some(previous) = self.handles.insert(key, handle) {
                        previous.cancel();
                    }
                }
                TileEvent::Retired(tile) => {
                    if let Some(handle) = self.handles.remove(&tile.quad_key()) {
                        handle.cancel();
                    }
                }
            }
        }
    }

    /// Publishes every load result received so far to data subscribers.
    /// Returns how many were delivered.
    pub fn poll(&mut self) -> usize {
        let results = self.loader.try_recv_results();
        for result in &results {
            self.data_events.publish(result);
        }
        self.handles.retain(|_, handle| !handle.is_finished());
        results.len()
    }

    /// Tiles whose pipeline is still running.
    pub fn pending_loads(&self) -> usize {
        self.handles
            .values()
            .filter(|handle| !handle.is_finished())
            .count()
    }

    pub fn is_idle(&self) -> bool {
        self.pending_loads() == 0 && !self.loader.has_pending_results()
    }

    /// Cancels every pipeline and retires every tile.
    pub fn shutdown(&mut self) {
        for (_, handle) in std::mem::take(&mut self.handles) {
            handle.cancel();
        }
        self.controller.retire_all();
        while self.lifecycle_rx.try_recv().is_ok() {}
        self.loader.try_recv_results();
        log::debug!("streamer shut down");
    }
}

impl Drop for TileStreamer {
    fn drop(&mut self) {
        self.lifecycle_subscription.cancel();
        for handle in self.handles.values() {
            handle.cancel();
        }
    }
}

impl std::fmt::Debug for TileStreamer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TileStreamer")
            .field("controller", &self.controller)
            .field("level_of_detail", &self.level_of_detail)
            .field("pending_loads", &self.pending_loads())
            .finish()
    }
}
