//! Shortest-path query engine.
//!
//! Coordinates snap to the nearest graph node within one kilometre; the
//! contraction hierarchy answers the node-to-node query; cumulative time
//! and distance accumulate arc by arc. When a query coordinate differs
//! from its snapped node, synthetic walking legs at 6 km/h bracket the
//! route. An optional speed cap recomputes per-arc times without touching
//! distances.

use std::path::Path;

use log::info;
use thiserror::Error;

use roam_core::geodesy::haversine_m;
use roam_core::profile::WALKING_SPEED_KMH;
use roam_osm::snapshot::{GraphSnapshot, SnapshotError};

use crate::ch::{ChPath, ContractionIndex};
use crate::geo_index::GeoPointIndex;
use crate::graph::{GraphBuildError, RoutingGraph};

/// Snap radius from a query coordinate to the graph, in metres.
pub const SNAP_RADIUS_M: f64 = 1_000.0;

/// Per-query options.
#[derive(Debug, Clone, Copy, Default)]
pub struct RouteOptions {
    /// Cap applied to every arc speed, in km/h. Walking legs ignore it.
    pub max_speed_kmh: Option<f64>,
}

/// One point along a computed route.
#[derive(Debug, Clone, PartialEq)]
pub struct RoutePoint {
    pub lat: f64,
    pub lon: f64,
    /// OSM node id; `None` for synthetic walking endpoints.
    pub node_id: Option<i64>,
    /// Cumulative travel time from the start, in milliseconds.
    pub time_ms: u64,
    /// Cumulative distance from the start, in metres.
    pub distance_m: u64,
    /// Effective speed on the arc arriving at this point, in km/h.
    pub max_speed_kmh: u32,
    /// Whether the incoming leg is a synthetic walking segment.
    pub is_walking_segment: bool,
}

/// A computed route.
#[derive(Debug, Clone, PartialEq)]
pub struct RouteResult {
    pub travel_time_ms: u64,
    pub distance_m: u64,
    pub points: Vec<RoutePoint>,
}

/// Failures of a single routing query.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RouteError {
    /// A coordinate snapped to nothing, or the target is unreachable.
    #[error("no route found between the requested coordinates")]
    NoRoute,
}

/// Failures while constructing the engine.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Snapshot(#[from] SnapshotError),
    #[error(transparent)]
    Graph(#[from] GraphBuildError),
}

/// Immutable routing engine shared by all request handlers.
pub struct RoutingEngine {
    graph: RoutingGraph,
    ch: ContractionIndex,
    node_index: GeoPointIndex,
}

impl RoutingEngine {
    /// Assemble an engine from prebuilt parts.
    #[must_use]
    pub fn new(graph: RoutingGraph, ch: ContractionIndex) -> Self {
        let node_index = GeoPointIndex::build(graph.coordinates());
        Self {
            graph,
            ch,
            node_index,
        }
    }

    /// Load a snapshot, flatten it and load or build its hierarchy.
    pub fn from_snapshot_path(path: &Path) -> Result<Self, EngineError> {
        let snapshot = GraphSnapshot::read(path)?;
        let graph = RoutingGraph::from_snapshot(&snapshot)?;
        info!(
            "routing graph ready: {} nodes, {} arcs",
            graph.node_count(),
            graph.arc_count()
        );
        let ch = ContractionIndex::load_or_build(&graph, path);
        Ok(Self::new(graph, ch))
    }

    /// Number of graph nodes.
    #[must_use]
    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    /// Number of directed arcs.
    #[must_use]
    pub fn arc_count(&self) -> usize {
        self.graph.arc_count()
    }

    /// Route between two WGS84 coordinates.
    ///
    /// # Errors
    ///
    /// [`RouteError::NoRoute`] when either endpoint snaps to nothing within
    /// [`SNAP_RADIUS_M`] or the snapped pair is disconnected.
    pub fn route(
        &self,
        from: (f64, f64),
        to: (f64, f64),
        options: RouteOptions,
    ) -> Result<RouteResult, RouteError> {
        let (source, _) = self
            .node_index
            .find_nearest_within(from.0, from.1, SNAP_RADIUS_M)
            .ok_or(RouteError::NoRoute)?;
        let (target, _) = self
            .node_index
            .find_nearest_within(to.0, to.1, SNAP_RADIUS_M)
            .ok_or(RouteError::NoRoute)?;

        let node_path = if source == target {
            ChPath {
                distance_m: 0,
                nodes: vec![source],
            }
        } else {
            self.ch.query(source, target).ok_or(RouteError::NoRoute)?
        };

        Ok(self.assemble(from, to, &node_path, options))
    }

    /// Two-leg route through a via point, with an optional multiplier on
    /// all travel times.
    ///
    /// # Errors
    ///
    /// [`RouteError::NoRoute`] when either leg fails.
    pub fn route_via(
        &self,
        from: (f64, f64),
        via: (f64, f64),
        to: (f64, f64),
        options: RouteOptions,
        speed_multiplier: Option<f64>,
    ) -> Result<RouteResult, RouteError> {
        let first = self.route(from, via, options)?;
        let second = self.route(via, to, options)?;

        let mut points = first.points;
        // The second leg re-emits the via point; skip it when stitching.
        for point in second.points.into_iter().skip(1) {
            points.push(RoutePoint {
                time_ms: point.time_ms + first.travel_time_ms,
                distance_m: point.distance_m + first.distance_m,
                ..point
            });
        }

        let mut travel_time_ms = first.travel_time_ms + second.travel_time_ms;
        let distance_m = first.distance_m + second.distance_m;
        if let Some(multiplier) = speed_multiplier {
            travel_time_ms = scale_ms(travel_time_ms, multiplier);
            for point in &mut points {
                point.time_ms = scale_ms(point.time_ms, multiplier);
            }
        }

        Ok(RouteResult {
            travel_time_ms,
            distance_m,
            points,
        })
    }

    fn assemble(
        &self,
        from: (f64, f64),
        to: (f64, f64),
        path: &ChPath,
        options: RouteOptions,
    ) -> RouteResult {
        let mut points: Vec<RoutePoint> = Vec::with_capacity(path.nodes.len() + 2);
        let mut time_ms = 0.0_f64;
        let mut distance_m = 0.0_f64;

        let first_node = path.nodes[0];
        let first_coord = self.graph.node_coord(first_node);
        let start_walk = from != first_coord;
        if start_walk {
            points.push(RoutePoint {
                lat: from.0,
                lon: from.1,
                node_id: None,
                time_ms: 0,
                distance_m: 0,
                max_speed_kmh: WALKING_SPEED_KMH as u32,
                is_walking_segment: true,
            });
            let walk_m = haversine_m(from.0, from.1, first_coord.0, first_coord.1);
            distance_m += walk_m;
            time_ms += walking_ms(walk_m);
        }

        points.push(RoutePoint {
            lat: first_coord.0,
            lon: first_coord.1,
            node_id: Some(self.graph.osm_node_id(first_node)),
            time_ms: time_ms.round() as u64,
            distance_m: distance_m.round() as u64,
            max_speed_kmh: if start_walk { WALKING_SPEED_KMH as u32 } else { 0 },
            is_walking_segment: false,
        });

        for pair in path.nodes.windows(2) {
            let (tail, head) = (pair[0], pair[1]);
            let (arc_m, speed) = match self.graph.arc_between(tail, head) {
                Some(arc) => (
                    f64::from(self.graph.arc_distance_m(arc)),
                    effective_speed(self.graph.arc_speed_kmh(arc), options.max_speed_kmh),
                ),
                // The hierarchy only emits adjacent pairs; an absent arc
                // falls back to the geodesic at walking speed.
                None => {
                    let (tail_lat, tail_lon) = self.graph.node_coord(tail);
                    let (head_lat, head_lon) = self.graph.node_coord(head);
                    (
                        haversine_m(tail_lat, tail_lon, head_lat, head_lon),
                        WALKING_SPEED_KMH,
                    )
                }
            };
            distance_m += arc_m;
            time_ms += arc_m / 1000.0 / speed * 3_600_000.0;

            let coord = self.graph.node_coord(head);
            points.push(RoutePoint {
                lat: coord.0,
                lon: coord.1,
                node_id: Some(self.graph.osm_node_id(head)),
                time_ms: time_ms.round() as u64,
                distance_m: distance_m.round() as u64,
                max_speed_kmh: speed.round() as u32,
                is_walking_segment: false,
            });
        }

        let last_node = path.nodes[path.nodes.len() - 1];
        let last_coord = self.graph.node_coord(last_node);
        if to != last_coord {
            let walk_m = haversine_m(last_coord.0, last_coord.1, to.0, to.1);
            distance_m += walk_m;
            time_ms += walking_ms(walk_m);
            points.push(RoutePoint {
                lat: to.0,
                lon: to.1,
                node_id: None,
                time_ms: time_ms.round() as u64,
                distance_m: distance_m.round() as u64,
                max_speed_kmh: WALKING_SPEED_KMH as u32,
                is_walking_segment: true,
            });
        }

        RouteResult {
            travel_time_ms: time_ms.round() as u64,
            distance_m: distance_m.round() as u64,
            points,
        }
    }
}

fn effective_speed(arc_speed_kmh: u32, cap: Option<f64>) -> f64 {
    let base = if arc_speed_kmh == 0 {
        WALKING_SPEED_KMH
    } else {
        f64::from(arc_speed_kmh)
    };
    match cap {
        Some(cap) if cap > 0.0 => base.min(cap),
        _ => base,
    }
}

fn walking_ms(distance_m: f64) -> f64 {
    distance_m / 1000.0 / WALKING_SPEED_KMH * 3_600_000.0
}

fn scale_ms(time_ms: u64, multiplier: f64) -> u64 {
    (time_ms as f64 * multiplier).round() as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use roam_core::TagList;
    use roam_osm::snapshot::{SnapshotNode, SnapshotWay};
    use rstest::{fixture, rstest};

    const LAT_1: f64 = 52.0907;
    const LON_1: f64 = 5.1214;
    const LAT_2: f64 = 52.0860;
    const LON_2: f64 = 5.1207;
    const LAT_3: f64 = 52.0800;
    const LON_3: f64 = 5.1200;

    fn engine_from(ways: Vec<SnapshotWay>) -> RoutingEngine {
        let snapshot = GraphSnapshot {
            nodes: vec![
                SnapshotNode {
                    id: 1,
                    lat: LAT_1,
                    lon: LON_1,
                },
                SnapshotNode {
                    id: 2,
                    lat: LAT_2,
                    lon: LON_2,
                },
                SnapshotNode {
                    id: 3,
                    lat: LAT_3,
                    lon: LON_3,
                },
            ],
            ways,
        };
        let graph = RoutingGraph::from_snapshot(&snapshot).expect("build graph");
        let ch = ContractionIndex::build(&graph);
        RoutingEngine::new(graph, ch)
    }

    fn residential(id: i64, refs: &[i64]) -> SnapshotWay {
        SnapshotWay {
            id,
            tags: TagList::from_pairs([("highway", "residential")]),
            refs: refs.to_vec(),
        }
    }

    #[fixture]
    fn engine() -> RoutingEngine {
        engine_from(vec![residential(10, &[1, 2, 3])])
    }

    #[rstest]
    fn straight_route_matches_haversine(engine: RoutingEngine) {
        let result = engine
            .route((LAT_1, LON_1), (LAT_2, LON_2), RouteOptions::default())
            .expect("route");
        let expected = haversine_m(LAT_1, LON_1, LAT_2, LON_2);
        assert!((result.distance_m as f64 - expected).abs() < 2.0);
        assert!(result.travel_time_ms > 0);
        assert_eq!(result.points.len(), 2);
        assert_eq!(result.points[0].node_id, Some(1));
        assert_eq!(result.points[1].node_id, Some(2));
        // 50 km/h residential arc.
        assert_eq!(result.points[1].max_speed_kmh, 50);
    }

    #[rstest]
    fn identical_endpoints_yield_zero_route(engine: RoutingEngine) {
        let result = engine
            .route((LAT_1, LON_1), (LAT_1, LON_1), RouteOptions::default())
            .expect("route");
        assert_eq!(result.travel_time_ms, 0);
        assert_eq!(result.distance_m, 0);
        assert_eq!(result.points.len(), 1);
        assert_eq!(result.points[0].node_id, Some(1));
    }

    #[rstest]
    fn offset_coordinates_get_walking_legs(engine: RoutingEngine) {
        // ~20 m east of node 1 and ~20 m west of node 2.
        let from = (LAT_1, LON_1 + 0.0003);
        let to = (LAT_2, LON_2 - 0.0003);
        let result = engine
            .route(from, to, RouteOptions::default())
            .expect("route");

        assert_eq!(result.points.len(), 4);
        assert!(result.points[0].is_walking_segment);
        assert!(result.points[3].is_walking_segment);
        assert_eq!(result.points[0].node_id, None);
        assert_eq!(result.points[1].node_id, Some(1));
        assert!(result.points[1].time_ms > 0, "walking leg takes time");
        assert_eq!(result.points[1].max_speed_kmh, 6);
    }

    #[rstest]
    fn cumulative_values_are_monotonic(engine: RoutingEngine) {
        let result = engine
            .route((LAT_1, LON_1), (LAT_3, LON_3), RouteOptions::default())
            .expect("route");
        for window in result.points.windows(2) {
            assert!(window[0].time_ms <= window[1].time_ms);
            assert!(window[0].distance_m <= window[1].distance_m);
        }
        assert_eq!(
            result.points.last().map(|p| p.distance_m),
            Some(result.distance_m)
        );
    }

    #[rstest]
    fn max_speed_cap_slows_without_changing_distance(engine: RoutingEngine) {
        let unlimited = engine
            .route((LAT_1, LON_1), (LAT_3, LON_3), RouteOptions::default())
            .expect("route");
        let capped = engine
            .route(
                (LAT_1, LON_1),
                (LAT_3, LON_3),
                RouteOptions {
                    max_speed_kmh: Some(25.0),
                },
            )
            .expect("route");
        assert_eq!(unlimited.distance_m, capped.distance_m);
        assert!(capped.travel_time_ms > unlimited.travel_time_ms);
        assert_eq!(capped.points.last().map(|p| p.max_speed_kmh), Some(25));
    }

    #[rstest]
    fn snap_misses_far_coordinates(engine: RoutingEngine) {
        let err = engine
            .route((53.5, 7.0), (LAT_1, LON_1), RouteOptions::default())
            .expect_err("snap miss");
        assert_eq!(err, RouteError::NoRoute);
    }

    #[rstest]
    fn disconnected_pairs_have_no_route() {
        let engine = engine_from(vec![residential(10, &[1, 2])]);
        // Node 3 exists but no way reaches it.
        let err = engine
            .route((LAT_1, LON_1), (LAT_3, LON_3), RouteOptions::default())
            .expect_err("unreachable");
        assert_eq!(err, RouteError::NoRoute);
    }

    #[rstest]
    fn via_route_concatenates_and_multiplies(engine: RoutingEngine) {
        let leg1 = engine
            .route((LAT_1, LON_1), (LAT_2, LON_2), RouteOptions::default())
            .expect("leg 1");
        let leg2 = engine
            .route((LAT_2, LON_2), (LAT_3, LON_3), RouteOptions::default())
            .expect("leg 2");

        let combined = engine
            .route_via(
                (LAT_1, LON_1),
                (LAT_2, LON_2),
                (LAT_3, LON_3),
                RouteOptions::default(),
                Some(2.0),
            )
            .expect("via route");

        assert_eq!(
            combined.travel_time_ms,
            scale_ms(leg1.travel_time_ms + leg2.travel_time_ms, 2.0)
        );
        // Distances are unaffected by the multiplier.
        assert_eq!(combined.distance_m, leg1.distance_m + leg2.distance_m);
        // The via node appears once.
        let via_count = combined
            .points
            .iter()
            .filter(|p| p.node_id == Some(2))
            .count();
        assert_eq!(via_count, 1);
    }

    #[rstest]
    fn one_way_routes_only_forward() {
        let engine = engine_from(vec![SnapshotWay {
            id: 10,
            tags: TagList::from_pairs([("highway", "residential"), ("oneway", "yes")]),
            refs: vec![1, 2],
        }]);
        assert!(engine
            .route((LAT_1, LON_1), (LAT_2, LON_2), RouteOptions::default())
            .is_ok());
        assert_eq!(
            engine
                .route((LAT_2, LON_2), (LAT_1, LON_1), RouteOptions::default())
                .expect_err("reverse blocked"),
            RouteError::NoRoute
        );
    }
}
