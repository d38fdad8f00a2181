//! In-memory R-tree of ward polygons for point-to-ward lookups.

use geo::{BoundingRect, Contains, MultiPolygon, Point};
use health_access_facility_models::Ward;
use rstar::{AABB, RTree, RTreeObject};

/// A ward polygon stored in the R-tree with its name.
struct WardEntry {
    name: String,
    envelope: AABB<[f64; 2]>,
    polygon: MultiPolygon<f64>,
}

impl RTreeObject for WardEntry {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        self.envelope
    }
}

/// Spatial index over ward boundaries.
///
/// Wards tile the county without overlap, so the first containing ward
/// wins.
pub struct WardIndex {
    wards: RTree<WardEntry>,
}

impl WardIndex {
    /// Builds the index from the wards that have a boundary.
    #[must_use]
    pub fn from_wards(wards: &[Ward]) -> Self {
        let entries: Vec<WardEntry> = wards
            .iter()
            .filter_map(|ward| {
                let Some(polygon) = &ward.geometry else {
                    log::debug!("Ward {} has no boundary, not indexed", ward.name);
                    return None;
                };
                let Some(envelope) = compute_envelope(polygon) else {
                    log::warn!("Ward {} has an empty boundary, not indexed", ward.name);
                    return None;
                };
                Some(WardEntry {
                    name: ward.name.clone(),
                    envelope,
                    polygon: polygon.clone(),
                })
            })
            .collect();

        log::debug!("Indexed {} ward boundaries", entries.len());

        Self {
            wards: RTree::bulk_load(entries),
        }
    }

    /// Number of indexed wards.
    #[must_use]
    pub fn len(&self) -> usize {
        self.wards.size()
    }

    /// Whether no ward was indexed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.wards.size() == 0
    }

    /// Looks up the name of the ward containing a point.
    #[must_use]
    pub fn lookup(&self, lng: f64, lat: f64) -> Option<&str> {
        self.ward_at(Point::new(lng, lat)).map(|(name, _)| name)
    }

    /// Returns the name and boundary of the ward containing `point`.
    #[must_use]
    pub fn ward_at(&self, point: Point<f64>) -> Option<(&str, &MultiPolygon<f64>)> {
        let query_env = AABB::from_point([point.x(), point.y()]);

        self.wards
            .locate_in_envelope_intersecting(&query_env)
            .find(|entry| entry.polygon.contains(&point))
            .map(|entry| (entry.name.as_str(), &entry.polygon))
    }
}

fn compute_envelope(mp: &MultiPolygon<f64>) -> Option<AABB<[f64; 2]>> {
    mp.bounding_rect()
        .map(|rect| AABB::from_corners([rect.min().x, rect.min().y], [rect.max().x, rect.max().y]))
}
