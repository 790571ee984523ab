use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::core::geo::{BoundingBox, Rectangle};
use crate::core::projection::Projection;
use crate::core::quadkey::QuadKey;
use crate::data::stylesheet::Stylesheet;

/// The unit of spatial loading, bound to one quadkey.
///
/// Shared as `Arc<Tile>` between the controller, the tile's load pipeline and
/// consumers. Once [`is_disposed`](Tile::is_disposed) reports `true` it never
/// goes back, and consumers should release anything built from the tile.
pub struct Tile {
    quad_key: QuadKey,
    rectangle: Rectangle,
    bounding_box: BoundingBox,
    stylesheet: Arc<dyn Stylesheet>,
    projection: Arc<dyn Projection>,
    disposed: AtomicBool,
}

impl Tile {
    pub fn new(
        quad_key: QuadKey,
        stylesheet: Arc<dyn Stylesheet>,
        projection: Arc<dyn Projection>,
    ) -> Self {
        Self {
            quad_key,
            rectangle: quad_key.to_rectangle(projection.as_ref()),
            bounding_box: quad_key.to_bounding_box(),
            stylesheet,
            projection,
            disposed: AtomicBool::new(false),
        }
    }

    pub fn quad_key(&self) -> QuadKey {
        self.quad_key
    }

    pub fn rectangle(&self) -> Rectangle {
        self.rectangle
    }

    pub fn bounding_box(&self) -> BoundingBox {
        self.bounding_box
    }

    pub fn stylesheet(&self) -> &Arc<dyn Stylesheet> {
        &self.stylesheet
    }

    pub fn projection(&self) -> &Arc<dyn Projection> {
        &self.projection
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }

    /// Marks the tile disposed. Returns `true` only for the call that did it.
    pub(crate) fn dispose(&self) -> bool {
        !self.disposed.swap(true, Ordering::AcqRel)
    }
}

impl fmt::Debug for Tile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tile")
            .field("quad_key", &self.quad_key)
            .field("rectangle", &self.rectangle)
            .field("bounding_box", &self.bounding_box)
            .field("disposed", &self.is_disposed())
            .finish()
    }
}
