use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use mapstream::core::config::keys;
use mapstream::prelude::*;

/// Metres moved per simulated step.
const STEP_METERS: f64 = 150.0;
const STEP_INTERVAL: Duration = Duration::from_millis(250);

/// Headless streaming driver: walks north-east from the world zero point and
/// reports what the streamer produces.
///
/// Usage: `mapstream-app <config.json> [steps]`
#[tokio::main]
async fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
    mapstream::init_logging();

    let mut args = std::env::args().skip(1);
    let config_path = args
        .next()
        .ok_or("usage: mapstream-app <config.json> [steps]")?;
    let steps: usize = args.next().map(|s| s.parse()).transpose()?.unwrap_or(40);

    let config = JsonConfig::from_file(&config_path)?;
    let start = LatLng::new(
        config.get_float(keys::WORLD_ZERO_LAT, 0.0),
        config.get_float(keys::WORLD_ZERO_LNG, 0.0),
    );
    let mut streamer = MapStreamBuilder::new(config).build()?;

    let stats = Arc::new(Stats::default());
    let tile_stats = Arc::clone(&stats);
    let _tiles = streamer.subscribe_tiles(move |event| match event {
        TileEvent::Created(tile) => {
            tile_stats.created.fetch_add(1, Ordering::Relaxed);
            log::info!("tile {} created", tile.quad_key());
        }
        TileEvent::Retired(tile) => {
            tile_stats.retired.fetch_add(1, Ordering::Relaxed);
            log::info!("tile {} retired", tile.quad_key());
        }
    });
    let data_stats = Arc::clone(&stats);
    let _data = streamer.subscribe_data(move |result| match &result.event {
        LoadEvent::Data(MapData::Element(_)) => {
            data_stats.elements.fetch_add(1, Ordering::Relaxed);
        }
        LoadEvent::Data(MapData::Mesh(mesh)) => {
            data_stats.meshes.fetch_add(1, Ordering::Relaxed);
            log::debug!("mesh {} ({} triangles)", mesh.name(), mesh.triangle_count());
        }
        LoadEvent::Completed => log::info!("tile {} loaded", result.quad_key()),
        LoadEvent::Failed(e) => {
            data_stats.failed.fetch_add(1, Ordering::Relaxed);
            log::warn!("tile {} failed: {}", result.quad_key(), e);
        }
    });

    let mut position = start;
    for step in 0..steps {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                log::info!("interrupted at step {}", step);
                break;
            }
            _ = tokio::time::sleep(STEP_INTERVAL) => {}
        }
        streamer.update_position(position)?;
        streamer.poll();
        position = advance(position, STEP_METERS);
    }

    // Let running pipelines finish before reporting.
    for _ in 0..40 {
        streamer.poll();
        if streamer.is_idle() {
            break;
        }
        tokio::time::sleep(STEP_INTERVAL).await;
    }
    streamer.shutdown();

    log::info!(
        "done: {} tiles created, {} retired, {} elements, {} meshes, {} failures",
        stats.created.load(Ordering::Relaxed),
        stats.retired.load(Ordering::Relaxed),
        stats.elements.load(Ordering::Relaxed),
        stats.meshes.load(Ordering::Relaxed),
        stats.failed.load(Ordering::Relaxed),
    );
    Ok(())
}

#[derive(Default)]
struct Stats {
    created: AtomicUsize,
    retired: AtomicUsize,
    elements: AtomicUsize,
    meshes: AtomicUsize,
    failed: AtomicUsize,
}

/// Moves `meters` north and the same distance east.
fn advance(position: LatLng, meters: f64) -> LatLng {
    let dlat = meters / mapstream::constants::METERS_PER_DEGREE;
    let dlng = dlat / position.lat.to_radians().cos().max(0.01);
    LatLng::new(position.lat + dlat, position.lng + dlng)
}
