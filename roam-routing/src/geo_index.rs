//! In-memory spatial index over WGS84 points.
//!
//! A bulk-loaded R-tree narrows candidates through a padded degree
//! envelope; exact haversine distances order and filter the result. The
//! same index serves graph nodes and the address table.

use rstar::{PointDistance, RTree, RTreeObject, AABB};

use roam_core::haversine_m;

// Metres per degree of latitude (slightly under the true minimum, so the
// candidate envelope always over-covers the requested radius).
const M_PER_DEG_LAT: f64 = 110_540.0;
const M_PER_DEG_LON_EQUATOR: f64 = 111_320.0;
const ENVELOPE_MARGIN: f64 = 1.1;

#[derive(Debug, Clone, Copy)]
struct IndexedPoint {
    id: u32,
    lat: f64,
    lon: f64,
}

impl RTreeObject for IndexedPoint {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        AABB::from_point([self.lon, self.lat])
    }
}

impl PointDistance for IndexedPoint {
    fn distance_2(&self, point: &[f64; 2]) -> f64 {
        let dx = self.lon - point[0];
        let dy = self.lat - point[1];
        dx * dx + dy * dy
    }
}

/// Spatial index answering nearest and radius queries in metres.
///
/// # Examples
/// ```rust
/// use roam_routing::GeoPointIndex;
///
/// let index = GeoPointIndex::build([(0, 52.0907, 5.1214), (1, 52.0860, 5.1207)]);
/// let (id, distance_m) = index.find_nearest_within(52.0905, 5.1213, 500.0).expect("hit");
/// assert_eq!(id, 0);
/// assert!(distance_m < 50.0);
/// ```
#[derive(Debug)]
pub struct GeoPointIndex {
    tree: RTree<IndexedPoint>,
}

impl GeoPointIndex {
    /// Bulk-load the index from `(id, lat, lon)` triples.
    #[must_use]
    pub fn build<I>(points: I) -> Self
    where
        I: IntoIterator<Item = (u32, f64, f64)>,
    {
        let entries: Vec<IndexedPoint> = points
            .into_iter()
            .map(|(id, lat, lon)| IndexedPoint { id, lat, lon })
            .collect();
        Self {
            tree: RTree::bulk_load(entries),
        }
    }

    /// Number of indexed points.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tree.size()
    }

    /// Report whether the index is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Closest point within `radius_m`, as `(id, distance_m)`.
    #[must_use]
    pub fn find_nearest_within(&self, lat: f64, lon: f64, radius_m: f64) -> Option<(u32, f64)> {
        self.candidates_within(lat, lon, radius_m)
            .into_iter()
            .min_by(|a, b| a.1.total_cmp(&b.1))
    }

    /// Every point within `radius_m`, as `(id, distance_m)` sorted by
    /// ascending distance.
    #[must_use]
    pub fn find_all_within(&self, lat: f64, lon: f64, radius_m: f64) -> Vec<(u32, f64)> {
        let mut hits = self.candidates_within(lat, lon, radius_m);
        hits.sort_by(|a, b| a.1.total_cmp(&b.1).then(a.0.cmp(&b.0)));
        hits
    }

    fn candidates_within(&self, lat: f64, lon: f64, radius_m: f64) -> Vec<(u32, f64)> {
        let lat_pad = radius_m / M_PER_DEG_LAT * ENVELOPE_MARGIN;
        let lon_scale = lat.to_radians().cos().abs().max(0.01);
        let lon_pad = radius_m / (M_PER_DEG_LON_EQUATOR * lon_scale) * ENVELOPE_MARGIN;

        let envelope = AABB::from_corners(
            [lon - lon_pad, lat - lat_pad],
            [lon + lon_pad, lat + lat_pad],
        );
        self.tree
            .locate_in_envelope_intersecting(&envelope)
            .filter_map(|point| {
                let distance_m = haversine_m(lat, lon, point.lat, point.lon);
                (distance_m <= radius_m).then_some((point.id, distance_m))
            })
            .collect()
    }
}
