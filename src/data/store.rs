//! Persistent element index queried by quadkey
//!
//! Bulk datasets are ingested once with [`ElementStore::add_to_store`]; the
//! load pipeline then prefers the store over remote providers for every tile
//! the store covers.

use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::ops::{ControlFlow, RangeInclusive};
use std::path::Path;

use rstar::{RTree, RTreeObject, AABB};
use serde::{Deserialize, Serialize};

use crate::core::geo::BoundingBox;
use crate::core::quadkey::QuadKey;
use crate::data::element::Element;
use crate::data::parser::{self, DataFormat, RawRecord, RecordSink};
use crate::data::stylesheet::Stylesheet;
use crate::{MapError, Result};

/// An element together with its extent and the zoom levels it serves.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct StoredElement {
    element: Element,
    bounds: BoundingBox,
    min_lod: u8,
    max_lod: u8,
}

impl StoredElement {
    fn serves(&self, level_of_detail: u8) -> bool {
        (self.min_lod..=self.max_lod).contains(&level_of_detail)
    }
}

// --- rstar integration -------------------------------------------------------------------------

impl RTreeObject for StoredElement {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        AABB::from_corners(
            [self.bounds.min.lng, self.bounds.min.lat],
            [self.bounds.max.lng, self.bounds.max.lat],
        )
    }
}

fn envelope_of(bbox: &BoundingBox) -> AABB<[f64; 2]> {
    AABB::from_corners([bbox.min.lng, bbox.min.lat], [bbox.max.lng, bbox.max.lat])
}

/// R-tree backed element index.
#[derive(Default)]
pub struct ElementStore {
    rtree: RTree<StoredElement>,
}

impl ElementStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses the dataset at `path` and indexes every element `stylesheet`
    /// styles, serving the levels of detail in `lod_range`. Returns how many
    /// elements were added.
    pub fn add_to_store(
        &mut self,
        kind: DataFormat,
        path: impl AsRef<Path>,
        stylesheet: &dyn Stylesheet,
        lod_range: RangeInclusive<u8>,
    ) -> Result<usize> {
        if kind == DataFormat::Elevation {
            return Err(MapError::NotSupported(
                "elevation data cannot be stored as elements".to_string(),
            ));
        }
        let path = path.as_ref();
        let bytes = std::fs::read(path)?;

        struct Styled<'a> {
            stylesheet: &'a dyn Stylesheet,
            elements: Vec<Element>,
        }
        impl RecordSink for Styled<'_> {
            fn on_record(&mut self, record: RawRecord) -> ControlFlow<()> {
                if let RawRecord::Element(element) = record {
                    if self.stylesheet.is_styled(&element.tags) {
                        self.elements.push(element);
                    }
                }
                ControlFlow::Continue(())
            }
        }

        let mut sink = Styled {
            stylesheet,
            elements: Vec::new(),
        };
        let world = BoundingBox::from_coords(-90.0, -180.0, 90.0, 180.0);
        let stats = parser::parse(kind, &bytes, world, &mut sink)?;
        let added = self.add_elements(sink.elements, lod_range);
        log::info!(
            "stored {} of {} elements from {} ({} skipped)",
            added,
            stats.records,
            path.display(),
            stats.skipped
        );
        Ok(added)
    }

    /// Indexes already decoded elements.
    pub fn add_elements(
        &mut self,
        elements: impl IntoIterator<Item = Element>,
        lod_range: RangeInclusive<u8>,
    ) -> usize {
        let (min_lod, max_lod) = (*lod_range.start(), *lod_range.end());
        let mut added = 0;
        for element in elements {
            let Some(bounds) = BoundingBox::from_points(&element.geometry) else {
                continue;
            };
            self.rtree.insert(StoredElement {
                element,
                bounds,
                min_lod,
                max_lod,
            });
            added += 1;
        }
        added
    }

    /// Elements intersecting the tile, if the store serves its level of detail.
    pub fn query(&self, quad_key: &QuadKey) -> Vec<Element> {
        let envelope = envelope_of(&quad_key.to_bounding_box());
        self.rtree
            .locate_in_envelope_intersecting(&envelope)
            .filter(|stored| stored.serves(quad_key.level_of_detail()))
            .map(|stored| stored.element.clone())
            .collect()
    }

    pub fn has_data(&self, quad_key: &QuadKey) -> bool {
        let envelope = envelope_of(&quad_key.to_bounding_box());
        self.rtree
            .locate_in_envelope_intersecting(&envelope)
            .any(|stored| stored.serves(quad_key.level_of_detail()))
    }

    pub fn len(&self) -> usize {
        self.rtree.size()
    }

    pub fn is_empty(&self) -> bool {
        self.rtree.size() == 0
    }

    pub fn clear(&mut self) {
        self.rtree = RTree::new();
    }

    /// Writes the index to `path` (bincode).
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let items: Vec<&StoredElement> = self.rtree.iter().collect();
        let writer = BufWriter::new(File::create(path)?);
        bincode::serialize_into(writer, &items)?;
        Ok(())
    }

    /// Reads an index written by [`save`](Self::save).
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let reader = BufReader::new(File::open(path)?);
        let items: Vec<StoredElement> = bincode::deserialize_from(reader)?;
        Ok(Self {
            rtree: RTree::bulk_load(items),
        })
    }
}

impl std::fmt::Debug for ElementStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ElementStore")
            .field("elements", &self.len())
            .finish()
    }
}
