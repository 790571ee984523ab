pub mod controller;
pub mod tile;

// Re-exports for convenience
pub use controller::{TileController, TileEvent};
pub use tile::Tile;
