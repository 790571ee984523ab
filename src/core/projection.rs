//! Transforms between geographic coordinates and the viewer's world frame.

use super::constants::{EARTH_RADIUS, MAX_LATITUDE, METERS_PER_DEGREE};
use super::geo::{LatLng, Vec3};
use crate::{MapError, Result};

/// Pluggable coordinate transform. Implementations hold no mutable state.
pub trait Projection: Send + Sync + std::fmt::Debug {
    /// Maps a coordinate and a height in metres to a world position.
    fn project(&self, coord: LatLng, height: f64) -> Vec3;

    /// Maps a world position back to a coordinate.
    fn project_inverse(&self, point: Vec3) -> Result<LatLng>;
}

/// Planar projection: metres east (`x`) and north (`z`) of a fixed zero point,
/// height on `y`.
///
/// The east-west scale is taken at the zero point's latitude, capped at the
/// mercator limit so it never collapses to zero and the inverse always exists.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CartesianProjection {
    world_zero_point: LatLng,
    meters_per_degree_lng: f64,
}

impl CartesianProjection {
    pub fn new(world_zero_point: LatLng) -> Self {
        Self {
            world_zero_point,
            meters_per_degree_lng: METERS_PER_DEGREE
                * world_zero_point
                    .lat
                    .clamp(-MAX_LATITUDE, MAX_LATITUDE)
                    .to_radians()
                    .cos(),
        }
    }

    pub fn world_zero_point(&self) -> LatLng {
        self.world_zero_point
    }
}

impl Projection for CartesianProjection {
    fn project(&self, coord: LatLng, height: f64) -> Vec3 {
        let x = (coord.lng - self.world_zero_point.lng) * self.meters_per_degree_lng;
        let z = (coord.lat - self.world_zero_point.lat) * METERS_PER_DEGREE;
        Vec3::new(x as f32, height as f32, z as f32)
    }

    fn project_inverse(&self, point: Vec3) -> Result<LatLng> {
        Ok(LatLng::new(
            self.world_zero_point.lat + f64::from(point.z) / METERS_PER_DEGREE,
            self.world_zero_point.lng + f64::from(point.x) / self.meters_per_degree_lng,
        ))
    }
}

/// Projects onto a sphere centred on the world origin, `y` pointing north.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SphericalProjection {
    radius: f64,
}

impl SphericalProjection {
    pub fn new(radius: f64) -> Self {
        Self { radius }
    }

    pub fn radius(&self) -> f64 {
        self.radius
    }
}

impl Default for SphericalProjection {
    fn default() -> Self {
        Self::new(EARTH_RADIUS)
    }
}

impl Projection for SphericalProjection {
    fn project(&self, coord: LatLng, height: f64) -> Vec3 {
        let r = self.radius + height;
        let lat = coord.lat.to_radians();
        let lng = coord.lng.to_radians();
        Vec3::new(
            (r * lat.cos() * lng.cos()) as f32,
            (r * lat.sin()) as f32,
            (r * lat.cos() * lng.sin()) as f32,
        )
    }

    fn project_inverse(&self, _point: Vec3) -> Result<LatLng> {
        Err(MapError::NotSupported(
            "spherical projection has no inverse".to_string(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cartesian_zero_point_is_origin() {
        let zero = LatLng::new(52.53, 13.38);
        let projection = CartesianProjection::new(zero);
        assert_eq!(projection.project(zero, 0.0), Vec3::new(0.0, 0.0, 0.0));
        assert_eq!(projection.project(zero, 12.5).y, 12.5);
    }

    #[test]
    fn test_cartesian_axes() {
        let projection = CartesianProjection::new(LatLng::new(0.0, 0.0));
        let north = projection.project(LatLng::new(0.01, 0.0), 0.0);
        assert!(north.z > 1100.0 && north.z < 1120.0);
        assert_eq!(north.x, 0.0);

        let east = projection.project(LatLng::new(0.0, 0.01), 0.0);
        assert!(east.x > 1100.0 && east.x < 1120.0);
    }

    #[test]
    fn test_cartesian_inverse() {
        let projection = CartesianProjection::new(LatLng::new(52.53, 13.38));
        let coord = LatLng::new(52.5317429, 13.3871987);
        let back = projection
            .project_inverse(projection.project(coord, 0.0))
            .unwrap();
        assert!((back.lat - coord.lat).abs() < 1e-6);
        assert!((back.lng - coord.lng).abs() < 1e-6);
    }

    #[test]
    fn test_cartesian_inverse_at_the_poles() {
        for pole in [LatLng::new(90.0, 0.0), LatLng::new(-90.0, 45.0)] {
            let projection = CartesianProjection::new(pole);
            let coord = LatLng::new(pole.lat.signum() * 89.99, pole.lng + 0.5);
            let point = projection.project(coord, 0.0);
            assert!(point.x.is_finite() && point.x != 0.0);
            let back = projection.project_inverse(point).unwrap();
            assert!((back.lat - coord.lat).abs() < 1e-4);
            assert!((back.lng - coord.lng).abs() < 1e-4);
        }
    }

    #[test]
    fn test_spherical_inverse_not_supported() {
        let projection = SphericalProjection::default();
        let point = projection.project(LatLng::new(10.0, 20.0), 0.0);
        let len = (f64::from(point.x).powi(2)
            + f64::from(point.y).powi(2)
            + f64::from(point.z).powi(2))
        .sqrt();
        assert!((len - EARTH_RADIUS).abs() < 1.0);
        assert!(matches!(
            projection.project_inverse(point),
            Err(MapError::NotSupported(_))
        ));
    }
}
