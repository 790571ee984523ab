//! Position driven tile lifecycle
//!
//! [`TileController::on_position`] is the only transition. It runs on the
//! caller's context and publishes every lifecycle event before returning.
//! Within one call a newly relevant tile is always announced before any tile
//! is retired, so consumers never observe a gap in coverage.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::core::config::TileControllerConfig;
use crate::core::geo::{LatLng, Point};
use crate::core::projection::{CartesianProjection, Projection};
use crate::core::quadkey::QuadKey;
use crate::data::stylesheet::Stylesheet;
use crate::events::{EventBus, Subscription};
use crate::tiles::tile::Tile;
use crate::{MapError, Result};

/// Tile lifecycle notification.
#[derive(Debug, Clone)]
pub enum TileEvent {
    Created(Arc<Tile>),
    /// The tile is already disposed when this is published.
    Retired(Arc<Tile>),
}

impl TileEvent {
    pub fn tile(&self) -> &Arc<Tile> {
        match self {
            TileEvent::Created(tile) | TileEvent::Retired(tile) => tile,
        }
    }
}

pub struct TileController {
    config: TileControllerConfig,
    /// Projection handed to tiles for their world rectangles
    projection: Arc<dyn Projection>,
    /// Planar frame for the debounce test, independent of the world projection
    planar: CartesianProjection,
    stylesheet: Arc<dyn Stylesheet>,
    current_quad_key: Option<QuadKey>,
    last_position: Option<Point>,
    active_tiles: BTreeMap<QuadKey, Arc<Tile>>,
    events: EventBus<TileEvent>,
}

impl TileController {
    pub fn new(
        config: TileControllerConfig,
        world_zero_point: LatLng,
        projection: Arc<dyn Projection>,
        stylesheet: Arc<dyn Stylesheet>,
    ) -> Self {
        Self {
            config,
            projection,
            planar: CartesianProjection::new(world_zero_point),
            stylesheet,
            current_quad_key: None,
            last_position: None,
            active_tiles: BTreeMap::new(),
            events: EventBus::new(),
        }
    }

    /// Registers a lifecycle consumer.
    pub fn subscribe<F>(&self, consumer: F) -> Subscription
    where
        F: Fn(&TileEvent) + Send + Sync + 'static,
    {
        self.events.subscribe(consumer)
    }

    pub fn current_quad_key(&self) -> Option<QuadKey> {
        self.current_quad_key
    }

    pub fn active_tiles(&self) -> impl Iterator<Item = &Arc<Tile>> {
        self.active_tiles.values()
    }

    pub fn active_tile(&self, quad_key: &QuadKey) -> Option<&Arc<Tile>> {
        self.active_tiles.get(quad_key)
    }

    pub fn config(&self) -> &TileControllerConfig {
        &self.config
    }

    /// Re-evaluates which tiles are relevant for the viewer at `position`.
    pub fn on_position(&mut self, position: LatLng, level_of_detail: u8) -> Result<()> {
        if !position.lat.is_finite() || !position.lng.is_finite() || !position.is_valid() {
            return Err(MapError::InvalidCoordinate {
                lat: position.lat,
                lng: position.lng,
            });
        }
        let point = self.planar.project(position, 0.0).ground();

        if self.is_debounced(point, level_of_detail) {
            return Ok(());
        }

        let new_key = QuadKey::from_coordinate(position, level_of_detail)?;

        if !self.active_tiles.contains_key(&new_key) {
            let tile = Arc::new(Tile::new(
                new_key,
                Arc::clone(&self.stylesheet),
                Arc::clone(&self.projection),
            ));
            self.active_tiles.insert(new_key, Arc::clone(&tile));
            log::debug!("tile {} created ({:?})", new_key, new_key);
            self.events.publish(&TileEvent::Created(tile));
        }

        let max_distance = self.config.max_tile_distance;
        let stale: Vec<QuadKey> = self
            .active_tiles
            .keys()
            .filter(|key| match key.distance(&new_key) {
                Some(distance) => distance > max_distance,
                // Different zoom: distances are meaningless, retire now.
                None => true,
            })
            .copied()
            .collect();
        for key in stale {
            self.retire(&key);
        }

        self.current_quad_key = Some(new_key);
        self.last_position = Some(point);
        Ok(())
    }

    fn is_debounced(&self, point: Point, level_of_detail: u8) -> bool {
        let (Some(current), Some(last)) = (self.current_quad_key, self.last_position) else {
            return false;
        };
        if current.level_of_detail() != level_of_detail {
            return false;
        }
        let inner = current.to_rectangle(&self.planar).inset(self.config.offset);
        inner.contains(&point) && point.distance_to(&last) < self.config.sensitivity
    }

    fn retire(&mut self, key: &QuadKey) {
        if let Some(tile) = self.active_tiles.remove(key) {
            tile.dispose();
            log::debug!("tile {} retired", key);
            self.events.publish(&TileEvent::Retired(tile));
        }
    }

    /// Retires every active tile, e.g. on shutdown.
    pub fn retire_all(&mut self) {
        let keys: Vec<QuadKey> = self.active_tiles.keys().copied().collect();
        for key in keys {
            self.retire(&key);
        }
        self.current_quad_key = None;
        self.last_position = None;
    }
}

impl std::fmt::Debug for TileController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TileController")
            .field("config", &self.config)
            .field("current_quad_key", &self.current_quad_key)
            .field("active_tiles", &self.active_tiles.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::stylesheet::RuleStylesheet;
    use std::sync::Mutex;

    const BERLIN: LatLng = LatLng {
        lat: 52.5317429,
        lng: 13.3871987,
    };

    fn controller(max_tile_distance: u32) -> (TileController, Arc<Mutex<Vec<TileEvent>>>) {
        let config = TileControllerConfig {
            sensitivity: 50.0,
            max_tile_distance,
            offset: 5.0,
        };
        let controller = TileController::new(
            config,
            BERLIN,
            Arc::new(CartesianProjection::new(BERLIN)),
            Arc::new(RuleStylesheet::default()),
        );
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&events);
        let _ = controller.subscribe(move |event| sink.lock().unwrap().push(event.clone()));
        (controller, events)
    }

    fn tile_height_degrees(key: QuadKey) -> f64 {
        let bbox = key.to_bounding_box();
        bbox.max.lat - bbox.min.lat
    }

    #[test]
    fn test_same_position_twice_creates_once() {
        let (mut controller, events) = controller(1);
        controller.on_position(BERLIN, 15).unwrap();
        controller.on_position(BERLIN, 15).unwrap();

        let events = events.lock().unwrap();
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], TileEvent::Created(_)));
        assert_eq!(
            controller.current_quad_key(),
            Some(QuadKey::from_coordinate(BERLIN, 15).unwrap())
        );
    }

    #[test]
    fn test_moving_north_creates_neighbour_then_retires_origin() {
        let (mut controller, events) = controller(1);
        controller.on_position(BERLIN, 15).unwrap();
        let origin = controller.current_quad_key().unwrap();
        let step = tile_height_degrees(origin) * 1.2;

        let one_north = LatLng::new(BERLIN.lat + step, BERLIN.lng);
        controller.on_position(one_north, 15).unwrap();
        let neighbour = controller.current_quad_key().unwrap();
        assert_eq!(neighbour.tile_x(), origin.tile_x());
        assert_eq!(neighbour.tile_y(), origin.tile_y() - 1);
        assert_eq!(controller.active_tiles().count(), 2);

        let origin_tile = Arc::clone(controller.active_tile(&origin).unwrap());
        controller
            .on_position(LatLng::new(BERLIN.lat + 2.0 * step, BERLIN.lng), 15)
            .unwrap();

        let events = events.lock().unwrap();
        let created: Vec<QuadKey> = events
            .iter()
            .filter(|e| matches!(e, TileEvent::Created(_)))
            .map(|e| e.tile().quad_key())
            .collect();
        assert_eq!(created.len(), 3);
        assert_eq!(created[1], neighbour);

        let retired: Vec<&Arc<Tile>> = events
            .iter()
            .filter_map(|e| match e {
                TileEvent::Retired(tile) => Some(tile),
                _ => None,
            })
            .collect();
        assert_eq!(retired.len(), 1);
        assert_eq!(retired[0].quad_key(), origin);
        assert!(retired[0].is_disposed());
        assert!(origin_tile.is_disposed());
        assert!(controller.active_tile(&origin).is_none());
    }

    #[test]
    fn test_created_before_retired_in_one_call() {
        let (mut controller, events) = controller(0);
        controller.on_position(BERLIN, 15).unwrap();
        let step = tile_height_degrees(controller.current_quad_key().unwrap()) * 1.5;
        controller
            .on_position(LatLng::new(BERLIN.lat + step, BERLIN.lng), 15)
            .unwrap();

        let events = events.lock().unwrap();
        assert_eq!(events.len(), 3);
        assert!(matches!(events[1], TileEvent::Created(_)));
        assert!(matches!(events[2], TileEvent::Retired(_)));
        assert_eq!(controller.active_tiles().count(), 1);
    }

    #[test]
    fn test_zoom_change_retires_stale_level() {
        let (mut controller, events) = controller(5);
        controller.on_position(BERLIN, 15).unwrap();
        controller.on_position(BERLIN, 16).unwrap();

        let events = events.lock().unwrap();
        assert_eq!(events.len(), 3);
        assert_eq!(events[1].tile().quad_key().level_of_detail(), 16);
        assert!(matches!(events[2], TileEvent::Retired(_)));
        assert_eq!(events[2].tile().quad_key().level_of_detail(), 15);
        assert!(controller
            .active_tiles()
            .all(|t| t.quad_key().level_of_detail() == 16));
    }

    #[test]
    fn test_large_move_inside_tile_is_not_debounced() {
        let (mut controller, events) = controller(1);
        controller.on_position(BERLIN, 10).unwrap();
        // Still in the same ~24km tile, but well beyond the sensitivity.
        controller
            .on_position(LatLng::new(BERLIN.lat + 0.005, BERLIN.lng), 10)
            .unwrap();
        assert_eq!(events.lock().unwrap().len(), 1);
        assert_eq!(controller.active_tiles().count(), 1);
    }

    #[test]
    fn test_invalid_position_rejected_without_events() {
        let (mut controller, events) = controller(1);
        let err = controller.on_position(LatLng::new(95.0, 0.0), 15);
        assert!(matches!(err, Err(MapError::InvalidCoordinate { .. })));
        assert!(events.lock().unwrap().is_empty());
        assert!(controller.current_quad_key().is_none());
    }

    #[test]
    fn test_retire_all() {
        let (mut controller, events) = controller(3);
        controller.on_position(BERLIN, 15).unwrap();
        controller.retire_all();
        assert_eq!(controller.active_tiles().count(), 0);
        assert!(controller.current_quad_key().is_none());
        let events = events.lock().unwrap();
        assert!(matches!(events.last(), Some(TileEvent::Retired(t)) if t.is_disposed()));
    }

    #[test]
    fn test_cancelled_subscription_receives_nothing() {
        let (mut controller, _) = controller(1);
        let seen = Arc::new(Mutex::new(0usize));
        let counter = Arc::clone(&seen);
        let subscription = controller.subscribe(move |_| *counter.lock().unwrap() += 1);
        subscription.cancel();
        controller.on_position(BERLIN, 15).unwrap();
        assert_eq!(*seen.lock().unwrap(), 0);
    }
}
