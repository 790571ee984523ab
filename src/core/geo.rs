use serde::{Deserialize, Serialize};

/// Represents a geographical coordinate with latitude and longitude
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LatLng {
    pub lat: f64,
    pub lng: f64,
}

impl LatLng {
    /// Creates a new LatLng coordinate
    pub fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }

    /// Validates that the coordinates are within valid ranges
    pub fn is_valid(&self) -> bool {
        self.lat >= -90.0 && self.lat <= 90.0 && self.lng >= -180.0 && self.lng <= 180.0
    }
}

impl Default for LatLng {
    fn default() -> Self {
        Self::new(0.0, 0.0)
    }
}

/// A point on the planar world frame (x east, y north)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn distance_to(&self, other: &Point) -> f64 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        (dx * dx + dy * dy).sqrt()
    }
}

impl Default for Point {
    fn default() -> Self {
        Self::new(0.0, 0.0)
    }
}

/// A 3D world-space vector. `y` is up; the ground plane is `x`/`z`.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Vec3 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Vec3 {
    pub fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }

    /// Projection onto the ground plane.
    pub fn ground(&self) -> Point {
        Point::new(self.x as f64, self.z as f64)
    }
}

/// Represents a bounding box of geographical coordinates
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub min: LatLng,
    pub max: LatLng,
}

impl BoundingBox {
    pub fn new(min: LatLng, max: LatLng) -> Self {
        Self { min, max }
    }

    /// Creates bounds from individual coordinates
    pub fn from_coords(south: f64, west: f64, north: f64, east: f64) -> Self {
        Self::new(LatLng::new(south, west), LatLng::new(north, east))
    }

    /// Smallest box containing every coordinate, `None` for an empty slice.
    pub fn from_points(points: &[LatLng]) -> Option<Self> {
        let (first, rest) = points.split_first()?;
        let mut bbox = Self::new(*first, *first);
        for point in rest {
            bbox.extend(point);
        }
        Some(bbox)
    }

    /// Checks if the bounds contain a point
    pub fn contains(&self, point: &LatLng) -> bool {
        point.lat >= self.min.lat
            && point.lat <= self.max.lat
            && point.lng >= self.min.lng
            && point.lng <= self.max.lng
    }

    /// Extends the bounds to include a point
    pub fn extend(&mut self, point: &LatLng) {
        self.min.lat = self.min.lat.min(point.lat);
        self.min.lng = self.min.lng.min(point.lng);
        self.max.lat = self.max.lat.max(point.lat);
        self.max.lng = self.max.lng.max(point.lng);
    }

    /// Gets the center point of the bounds
    pub fn center(&self) -> LatLng {
        LatLng::new(
            (self.min.lat + self.max.lat) / 2.0,
            (self.min.lng + self.max.lng) / 2.0,
        )
    }

    pub fn is_valid(&self) -> bool {
        self.min.lat <= self.max.lat && self.min.lng <= self.max.lng
    }
}

/// Axis-aligned rectangle on the planar world frame
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Rectangle {
    pub left: f64,
    pub bottom: f64,
    pub width: f64,
    pub height: f64,
}

impl Rectangle {
    pub fn new(left: f64, bottom: f64, width: f64, height: f64) -> Self {
        Self {
            left,
            bottom,
            width,
            height,
        }
    }

    /// Builds a rectangle from two opposite corners in any order.
    pub fn from_corners(a: Point, b: Point) -> Self {
        let left = a.x.min(b.x);
        let bottom = a.y.min(b.y);
        Self::new(left, bottom, (a.x - b.x).abs(), (a.y - b.y).abs())
    }

    pub fn right(&self) -> f64 {
        self.left + self.width
    }

    pub fn top(&self) -> f64 {
        self.bottom + self.height
    }

    pub fn center(&self) -> Point {
        Point::new(self.left + self.width / 2.0, self.bottom + self.height / 2.0)
    }

    pub fn contains(&self, point: &Point) -> bool {
        point.x >= self.left
            && point.x <= self.right()
            && point.y >= self.bottom
            && point.y <= self.top()
    }

    /// Rectangle shrunk by `margin` on every side. A margin larger than half
    /// the extent collapses that axis onto the center.
    pub fn inset(&self, margin: f64) -> Rectangle {
        let dx = margin.min(self.width / 2.0);
        let dy = margin.min(self.height / 2.0);
        Rectangle::new(
            self.left + dx,
            self.bottom + dy,
            self.width - 2.0 * dx,
            self.height - 2.0 * dy,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bounds_contains() {
        let bounds = BoundingBox::from_coords(40.0, -75.0, 41.0, -73.0);
        assert!(bounds.contains(&LatLng::new(40.5, -74.0)));
        assert!(!bounds.contains(&LatLng::new(42.0, -74.0)));
    }

    #[test]
    fn test_bounds_from_points() {
        let bbox = BoundingBox::from_points(&[
            LatLng::new(1.0, 5.0),
            LatLng::new(-2.0, 7.0),
            LatLng::new(0.5, 4.0),
        ])
        .unwrap();
        assert_eq!(bbox, BoundingBox::from_coords(-2.0, 4.0, 1.0, 7.0));
        assert!(BoundingBox::from_points(&[]).is_none());
    }

    #[test]
    fn test_rectangle_inset() {
        let rect = Rectangle::from_corners(Point::new(10.0, 10.0), Point::new(0.0, 0.0));
        assert_eq!(rect, Rectangle::new(0.0, 0.0, 10.0, 10.0));

        let inner = rect.inset(2.0);
        assert!(inner.contains(&Point::new(5.0, 5.0)));
        assert!(!inner.contains(&Point::new(1.0, 5.0)));

        let collapsed = rect.inset(50.0);
        assert_eq!(collapsed.width, 0.0);
        assert_eq!(collapsed.center(), rect.center());
    }
}
