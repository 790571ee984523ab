//! Core constants for the global mercator tiling scheme and the world frame.
//! Keeping them in a single place makes it easier to tweak engine-wide magic numbers.

/// World units covered by one tile edge at its own level of detail.
pub const TILE_SIZE: u32 = 256;

/// Latitude limit of the square mercator world.
pub const MAX_LATITUDE: f64 = 85.051_128_78;

/// Longitude limit of the mercator world.
pub const MAX_LONGITUDE: f64 = 180.0;

/// Deepest level of detail a `QuadKey` can address (`256 << 23` still fits in `u32`).
pub const MAX_LEVEL_OF_DETAIL: u8 = 23;

/// Mean earth radius in metres, used by the planar and spherical projections.
pub const EARTH_RADIUS: f64 = 6_378_137.0;

/// Metres per degree of latitude on the mean sphere.
pub const METERS_PER_DEGREE: f64 = EARTH_RADIUS * std::f64::consts::PI / 180.0;
