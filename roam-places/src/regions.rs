//! NUTS region lookup.
//!
//! Regions load from a GeoJSON FeatureCollection of Polygon/MultiPolygon
//! features. Polygons are kept in Web Mercator; collections delivered in
//! WGS84 are projected at load time. Queries hit a bulk-loaded (STR-packed)
//! envelope R-tree first, then run the exact point-in-polygon test on the
//! candidates.

use std::path::{Path, PathBuf};

use geo::{Contains, Coord, LineString, Point, Polygon};
use geojson::{GeoJson, Value as GeoJsonValue};
use log::warn;
use rstar::{RTree, RTreeObject, AABB};
use thiserror::Error;

use roam_core::wgs84_to_web_mercator;

/// One region with its polygons in Web Mercator.
#[derive(Debug, Clone)]
struct Region {
    nuts_id: String,
    #[allow(dead_code)]
    name: String,
    polygons: Vec<Polygon<f64>>,
}

/// Envelope entry pointing back into the region table.
#[derive(Debug, Clone)]
struct RegionEnvelope {
    region_index: usize,
    aabb: AABB<[f64; 2]>,
}

impl RTreeObject for RegionEnvelope {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        self.aabb
    }
}

/// Errors when loading a region collection.
#[derive(Debug, Error)]
pub enum RegionIndexError {
    /// The GeoJSON file could not be read.
    #[error("failed to read regions GeoJSON at {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    /// The document is not valid GeoJSON.
    #[error("invalid GeoJSON: {source}")]
    Parse {
        #[source]
        source: geojson::Error,
    },
    /// The document is valid GeoJSON but not a FeatureCollection.
    #[error("regions document must be a FeatureCollection")]
    NotFeatureCollection,
    /// No usable region survived loading.
    #[error("regions document contains no usable Polygon or MultiPolygon features")]
    NoRegions,
}

/// Spatially indexed NUTS regions.
#[derive(Debug)]
pub struct RegionIndex {
    regions: Vec<Region>,
    tree: RTree<RegionEnvelope>,
    skipped_features: u64,
}

impl RegionIndex {
    /// Load from a GeoJSON file.
    pub fn from_geojson_file(path: &Path) -> Result<Self, RegionIndexError> {
        let text = std::fs::read_to_string(path).map_err(|source| RegionIndexError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_geojson_str(&text)
    }

    /// Load from GeoJSON text.
    pub fn from_geojson_str(text: &str) -> Result<Self, RegionIndexError> {
        let geojson: GeoJson = text
            .parse()
            .map_err(|source| RegionIndexError::Parse { source })?;
        let GeoJson::FeatureCollection(collection) = geojson else {
            return Err(RegionIndexError::NotFeatureCollection);
        };

        let mut skipped_features = 0_u64;
        let mut raw: Vec<(String, String, Vec<Vec<Vec<(f64, f64)>>>)> = Vec::new();
        for feature in collection.features {
            let Some(nuts_id) = property_string(&feature, &["id", "NUTS_ID"]) else {
                skipped_features += 1;
                continue;
            };
            let name =
                property_string(&feature, &["na", "NUTS_NAME", "NAME_LATN"]).unwrap_or_default();

            let Some(geometry) = feature.geometry else {
                skipped_features += 1;
                continue;
            };
            let polygons = match geometry.value {
                GeoJsonValue::Polygon(rings) => vec![convert_rings(&rings)],
                GeoJsonValue::MultiPolygon(parts) => {
                    parts.iter().map(|rings| convert_rings(rings)).collect()
                }
                other => {
                    warn!(
                        "region {nuts_id}: unsupported geometry type {}, feature skipped",
                        other.type_name()
                    );
                    skipped_features += 1;
                    continue;
                }
            };
            let polygons: Vec<Vec<Vec<(f64, f64)>>> = polygons
                .into_iter()
                .filter(|rings| rings.first().is_some_and(|outer| outer.len() >= 3))
                .collect();
            if polygons.is_empty() {
                skipped_features += 1;
                continue;
            }
            raw.push((nuts_id, name, polygons));
        }

        // WGS84 collections carry no coordinate outside the lon/lat domain;
        // anything beyond it must already be Web Mercator metres.
        let already_mercator = raw.iter().any(|(_, _, polygons)| {
            polygons
                .iter()
                .flatten()
                .flatten()
                .any(|&(x, y)| x.abs() > 180.0 || y.abs() > 90.0)
        });

        let mut regions = Vec::with_capacity(raw.len());
        let mut envelopes = Vec::new();
        for (nuts_id, name, polygon_rings) in raw {
            let polygons: Vec<Polygon<f64>> = polygon_rings
                .into_iter()
                .map(|rings| build_polygon(rings, already_mercator))
                .collect();

            let region_index = regions.len();
            for polygon in &polygons {
                if let Some(aabb) = polygon_envelope(polygon) {
                    envelopes.push(RegionEnvelope { region_index, aabb });
                }
            }
            regions.push(Region {
                nuts_id,
                name,
                polygons,
            });
        }

        if regions.is_empty() {
            return Err(RegionIndexError::NoRegions);
        }
        Ok(Self {
            regions,
            tree: RTree::bulk_load(envelopes),
            skipped_features,
        })
    }

    /// Region containing a WGS84 coordinate, if any.
    #[must_use]
    pub fn lookup_wgs84(&self, lat: f64, lon: f64) -> Option<&str> {
        let (x, y) = wgs84_to_web_mercator(lat, lon);
        self.lookup_mercator(x, y)
    }

    /// Region containing a Web Mercator coordinate, if any.
    #[must_use]
    pub fn lookup_mercator(&self, x: f64, y: f64) -> Option<&str> {
        let point = Point::new(x, y);
        let probe = AABB::from_point([x, y]);
        for candidate in self.tree.locate_in_envelope_intersecting(&probe) {
            let region = &self.regions[candidate.region_index];
            if region.polygons.iter().any(|p| p.contains(&point)) {
                return Some(region.nuts_id.as_str());
            }
        }
        None
    }

    /// Number of loaded regions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.regions.len()
    }

    /// Report whether no region loaded (never true after construction).
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.regions.is_empty()
    }

    /// Features skipped for unsupported geometry or missing ids.
    #[must_use]
    pub fn skipped_features(&self) -> u64 {
        self.skipped_features
    }
}

fn property_string(feature: &geojson::Feature, keys: &[&str]) -> Option<String> {
    let properties = feature.properties.as_ref()?;
    for key in keys {
        if let Some(serde_json::Value::String(value)) = properties.get(*key) {
            return Some(value.clone());
        }
    }
    None
}

fn convert_rings(rings: &[Vec<Vec<f64>>]) -> Vec<Vec<(f64, f64)>> {
    rings
        .iter()
        .map(|ring| {
            ring.iter()
                .filter(|position| position.len() >= 2)
                .map(|position| (position[0], position[1]))
                .collect()
        })
        .collect()
}

fn build_polygon(mut rings: Vec<Vec<(f64, f64)>>, already_mercator: bool) -> Polygon<f64> {
    for ring in &mut rings {
        if !already_mercator {
            for position in ring.iter_mut() {
                // GeoJSON positions are (lon, lat).
                let (x, y) = wgs84_to_web_mercator(position.1, position.0);
                *position = (x, y);
            }
        }
        // Unclosed exterior and interior rings are auto-closed.
        if ring.first() != ring.last() {
            if let Some(&first) = ring.first() {
                ring.push(first);
            }
        }
    }

    let mut iter = rings.into_iter();
    let exterior = ring_to_line_string(iter.next().unwrap_or_default());
    let holes: Vec<LineString<f64>> = iter.map(ring_to_line_string).collect();
    Polygon::new(exterior, holes)
}

fn ring_to_line_string(ring: Vec<(f64, f64)>) -> LineString<f64> {
    LineString::from(
        ring.into_iter()
            .map(|(x, y)| Coord { x, y })
            .collect::<Vec<_>>(),
    )
}

fn polygon_envelope(polygon: &Polygon<f64>) -> Option<AABB<[f64; 2]>> {
    let mut coords = polygon.exterior().coords();
    let first = coords.next()?;
    let mut min = [first.x, first.y];
    let mut max = [first.x, first.y];
    for coord in coords {
        min[0] = min[0].min(coord.x);
        min[1] = min[1].min(coord.y);
        max[0] = max[0].max(coord.x);
        max[1] = max[1].max(coord.y);
    }
    Some(AABB::from_corners(min, max))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::{fixture, rstest};

    // Two adjacent 1°×1° squares around Utrecht ("NL31") and a square with
    // a hole ("NL32"), in WGS84.
    #[fixture]
    fn index() -> RegionIndex {
        RegionIndex::from_geojson_str(
            r#"{
  "type": "FeatureCollection",
  "features": [
    {
      "type": "Feature",
      "properties": { "id": "NL31", "na": "Utrecht" },
      "geometry": {
        "type": "Polygon",
        "coordinates": [[[5.0, 52.0], [6.0, 52.0], [6.0, 53.0], [5.0, 53.0]]]
      }
    },
    {
      "type": "Feature",
      "properties": { "NUTS_ID": "NL32", "NUTS_NAME": "Noord-Holland" },
      "geometry": {
        "type": "MultiPolygon",
        "coordinates": [[[
          [4.0, 52.0], [5.0, 52.0], [5.0, 53.0], [4.0, 53.0], [4.0, 52.0]
        ], [
          [4.4, 52.4], [4.6, 52.4], [4.6, 52.6], [4.4, 52.6], [4.4, 52.4]
        ]]]
      }
    },
    {
      "type": "Feature",
      "properties": { "id": "SKIP" },
      "geometry": { "type": "Point", "coordinates": [5.0, 52.0] }
    },
    {
      "type": "Feature",
      "properties": { "note": "no id" },
      "geometry": {
        "type": "Polygon",
        "coordinates": [[[0.0, 0.0], [1.0, 0.0], [1.0, 1.0], [0.0, 0.0]]]
      }
    }
  ]
}"#,
        )
        .expect("valid regions")
    }

    #[rstest]
    fn loads_polygons_and_counts_skips(index: RegionIndex) {
        assert_eq!(index.len(), 2);
        assert_eq!(index.skipped_features(), 2);
    }

    #[rstest]
    fn finds_containing_region(index: RegionIndex) {
        assert_eq!(index.lookup_wgs84(52.5, 5.5), Some("NL31"));
        assert_eq!(index.lookup_wgs84(52.2, 4.2), Some("NL32"));
    }

    #[rstest]
    fn outside_every_region_is_none(index: RegionIndex) {
        assert_eq!(index.lookup_wgs84(48.0, 11.0), None);
    }

    #[rstest]
    fn holes_are_excluded(index: RegionIndex) {
        assert_eq!(index.lookup_wgs84(52.5, 4.5), None);
    }

    #[rstest]
    fn unclosed_rings_are_auto_closed(index: RegionIndex) {
        // NL31's ring above is written without the closing vertex.
        assert_eq!(index.lookup_wgs84(52.9, 5.9), Some("NL31"));
    }

    #[rstest]
    fn mercator_collections_are_detected() {
        // The same square as NL31 but pre-projected to Web Mercator.
        let (x0, y0) = wgs84_to_web_mercator(52.0, 5.0);
        let (x1, y1) = wgs84_to_web_mercator(53.0, 6.0);
        let text = format!(
            r#"{{
  "type": "FeatureCollection",
  "features": [{{
    "type": "Feature",
    "properties": {{ "id": "NL31" }},
    "geometry": {{
      "type": "Polygon",
      "coordinates": [[[{x0}, {y0}], [{x1}, {y0}], [{x1}, {y1}], [{x0}, {y1}], [{x0}, {y0}]]]
    }}
  }}]
}}"#
        );
        let index = RegionIndex::from_geojson_str(&text).expect("valid regions");
        assert_eq!(index.lookup_wgs84(52.5, 5.5), Some("NL31"));
    }

    #[rstest]
    fn non_feature_collection_is_rejected() {
        let err = RegionIndex::from_geojson_str(
            r#"{ "type": "Point", "coordinates": [1.0, 2.0] }"#,
        )
        .expect_err("not a collection");
        assert!(matches!(err, RegionIndexError::NotFeatureCollection));
    }

    #[rstest]
    fn collection_without_polygons_is_rejected() {
        let err = RegionIndex::from_geojson_str(
            r#"{ "type": "FeatureCollection", "features": [] }"#,
        )
        .expect_err("no regions");
        assert!(matches!(err, RegionIndexError::NoRegions));
    }
}
