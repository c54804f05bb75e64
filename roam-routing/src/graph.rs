//! Flat CSR routing graph derived from a snapshot.
//!
//! Node ids become dense indices in snapshot order; each way expands into
//! directed arcs per the profile's direction category, weighted by the
//! haversine length of the segment. Way speeds are kept once per way and
//! referenced from arcs.

use std::collections::HashMap;

use log::warn;
use thiserror::Error;

use roam_core::geodesy::haversine_m;
use roam_core::{direction_category, effective_speed_kmh, DirectionCategory};
use roam_osm::snapshot::GraphSnapshot;

/// Errors when flattening a snapshot into a graph.
#[derive(Debug, Error)]
pub enum GraphBuildError {
    /// The snapshot holds no nodes.
    #[error("snapshot contains no nodes")]
    EmptyGraph,
}

/// Immutable CSR routing graph.
///
/// Invariants: `first_out[0] == 0`, `first_out[node_count] == arc_count`,
/// every `head[a] < node_count`, every `way_speed[way[a]]` is defined.
#[derive(Debug, Clone)]
pub struct RoutingGraph {
    lat: Vec<f64>,
    lon: Vec<f64>,
    first_out: Vec<u32>,
    head: Vec<u32>,
    way: Vec<u32>,
    geo_distance: Vec<u32>,
    way_speed: Vec<u32>,
    osm_node_ids: Vec<i64>,
    /// Way refs skipped because the node was absent from the snapshot.
    pub missing_node_refs: u64,
}

impl RoutingGraph {
    /// Flatten `snapshot` into CSR arrays.
    ///
    /// # Errors
    ///
    /// Fails when the snapshot holds no nodes. Way refs pointing at unknown
    /// nodes are skipped and counted in `missing_node_refs`.
    pub fn from_snapshot(snapshot: &GraphSnapshot) -> Result<Self, GraphBuildError> {
        if snapshot.nodes.is_empty() {
            return Err(GraphBuildError::EmptyGraph);
        }

        let node_count = snapshot.nodes.len();
        let mut lat = Vec::with_capacity(node_count);
        let mut lon = Vec::with_capacity(node_count);
        let mut osm_node_ids = Vec::with_capacity(node_count);
        let mut index_of: HashMap<i64, u32> = HashMap::with_capacity(node_count);
        for (idx, node) in snapshot.nodes.iter().enumerate() {
            lat.push(node.lat);
            lon.push(node.lon);
            osm_node_ids.push(node.id);
            index_of.insert(node.id, idx as u32);
        }

        let mut way_speed = Vec::with_capacity(snapshot.ways.len());
        let mut arcs: Vec<(u32, u32, u32, u32)> = Vec::new();
        let mut missing_node_refs = 0_u64;

        for (way_idx, snapshot_way) in snapshot.ways.iter().enumerate() {
            let speed = effective_speed_kmh(&snapshot_way.tags);
            way_speed.push(speed);
            let direction = direction_category(&snapshot_way.tags);

            for pair in snapshot_way.refs.windows(2) {
                let (Some(&tail), Some(&head_idx)) =
                    (index_of.get(&pair[0]), index_of.get(&pair[1]))
                else {
                    missing_node_refs += 1;
                    continue;
                };
                let distance_m = haversine_m(
                    lat[tail as usize],
                    lon[tail as usize],
                    lat[head_idx as usize],
                    lon[head_idx as usize],
                )
                .round() as u32;

                match direction {
                    DirectionCategory::ForwardOnly => {
                        arcs.push((tail, head_idx, way_idx as u32, distance_m));
                    }
                    DirectionCategory::BackwardOnly => {
                        arcs.push((head_idx, tail, way_idx as u32, distance_m));
                    }
                    DirectionCategory::Both => {
                        arcs.push((tail, head_idx, way_idx as u32, distance_m));
                        arcs.push((head_idx, tail, way_idx as u32, distance_m));
                    }
                }
            }
        }

        if missing_node_refs > 0 {
            warn!("{missing_node_refs} way node refs were absent from the snapshot");
        }

        arcs.sort_by_key(|&(tail, head, _, _)| (tail, head));

        let mut first_out = vec![0_u32; node_count + 1];
        let mut head = Vec::with_capacity(arcs.len());
        let mut way = Vec::with_capacity(arcs.len());
        let mut geo_distance = Vec::with_capacity(arcs.len());
        for &(tail, arc_head, arc_way, distance_m) in &arcs {
            first_out[tail as usize + 1] += 1;
            head.push(arc_head);
            way.push(arc_way);
            geo_distance.push(distance_m);
        }
        for i in 1..first_out.len() {
            first_out[i] += first_out[i - 1];
        }

        Ok(Self {
            lat,
            lon,
            first_out,
            head,
            way,
            geo_distance,
            way_speed,
            osm_node_ids,
            missing_node_refs,
        })
    }

    /// Number of nodes.
    #[must_use]
    pub fn node_count(&self) -> usize {
        self.lat.len()
    }

    /// Number of directed arcs.
    #[must_use]
    pub fn arc_count(&self) -> usize {
        self.head.len()
    }

    /// WGS84 coordinate of a node.
    #[must_use]
    pub fn node_coord(&self, node: u32) -> (f64, f64) {
        (self.lat[node as usize], self.lon[node as usize])
    }

    /// OSM id of a node.
    #[must_use]
    pub fn osm_node_id(&self, node: u32) -> i64 {
        self.osm_node_ids[node as usize]
    }

    /// Arc index range leaving `node`.
    #[must_use]
    pub fn arcs_from(&self, node: u32) -> std::ops::Range<usize> {
        self.first_out[node as usize] as usize..self.first_out[node as usize + 1] as usize
    }

    /// Target node of an arc.
    #[must_use]
    pub fn arc_head(&self, arc: usize) -> u32 {
        self.head[arc]
    }

    /// Length of an arc in metres.
    #[must_use]
    pub fn arc_distance_m(&self, arc: usize) -> u32 {
        self.geo_distance[arc]
    }

    /// Speed of the way an arc belongs to, in km/h.
    #[must_use]
    pub fn arc_speed_kmh(&self, arc: usize) -> u32 {
        self.way_speed[self.way[arc] as usize]
    }

    /// Shortest arc from `tail` to `head`, if the pair is adjacent.
    #[must_use]
    pub fn arc_between(&self, tail: u32, head: u32) -> Option<usize> {
        self.arcs_from(tail)
            .filter(|&arc| self.head[arc] == head)
            .min_by_key(|&arc| self.geo_distance[arc])
    }

    /// Iterate `(node, lat, lon)` for spatial indexing.
    pub fn coordinates(&self) -> impl Iterator<Item = (u32, f64, f64)> + '_ {
        (0..self.node_count() as u32).map(|node| {
            let (lat, lon) = self.node_coord(node);
            (node, lat, lon)
        })
    }

    /// All arcs as `(tail, head, weight)` triples for CH construction.
    pub fn weighted_arcs(&self) -> impl Iterator<Item = (u32, u32, u32)> + '_ {
        (0..self.node_count() as u32).flat_map(move |tail| {
            self.arcs_from(tail)
                .map(move |arc| (tail, self.head[arc], self.geo_distance[arc]))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use roam_core::TagList;
    use roam_osm::snapshot::{SnapshotNode, SnapshotWay};
    use rstest::rstest;

    fn snapshot(ways: Vec<SnapshotWay>) -> GraphSnapshot {
        GraphSnapshot {
            nodes: vec![
                SnapshotNode {
                    id: 1,
                    lat: 52.0907,
                    lon: 5.1214,
                },
                SnapshotNode {
                    id: 2,
                    lat: 52.0860,
                    lon: 5.1207,
                },
                SnapshotNode {
                    id: 3,
                    lat: 52.0800,
                    lon: 5.1200,
                },
            ],
            ways,
        }
    }

    fn residential_way(id: i64, refs: &[i64], extra: &[(&str, &str)]) -> SnapshotWay {
        let mut tags = TagList::from_pairs([("highway", "residential")]);
        for (k, v) in extra {
            tags.push(*k, *v);
        }
        SnapshotWay {
            id,
            tags,
            refs: refs.to_vec(),
        }
    }

    #[rstest]
    fn bidirectional_way_yields_two_arcs_per_segment() {
        let graph =
            RoutingGraph::from_snapshot(&snapshot(vec![residential_way(10, &[1, 2, 3], &[])]))
                .expect("build graph");
        assert_eq!(graph.node_count(), 3);
        assert_eq!(graph.arc_count(), 4);
    }

    #[rstest]
    fn oneway_yields_single_direction() {
        let graph = RoutingGraph::from_snapshot(&snapshot(vec![residential_way(
            10,
            &[1, 2],
            &[("oneway", "yes")],
        )]))
        .expect("build graph");
        assert_eq!(graph.arc_count(), 1);
        let arc = graph.arc_between(0, 1).expect("forward arc");
        assert_eq!(graph.arc_head(arc), 1);
        assert!(graph.arc_between(1, 0).is_none());
    }

    #[rstest]
    fn reverse_oneway_points_backward() {
        let graph = RoutingGraph::from_snapshot(&snapshot(vec![residential_way(
            10,
            &[1, 2],
            &[("oneway", "-1")],
        )]))
        .expect("build graph");
        assert_eq!(graph.arc_count(), 1);
        assert!(graph.arc_between(1, 0).is_some());
        assert!(graph.arc_between(0, 1).is_none());
    }

    #[rstest]
    fn csr_invariants_hold() {
        let graph = RoutingGraph::from_snapshot(&snapshot(vec![
            residential_way(10, &[1, 2], &[]),
            residential_way(11, &[2, 3], &[]),
        ]))
        .expect("build graph");
        assert_eq!(graph.first_out[0], 0);
        assert_eq!(graph.first_out[graph.node_count()] as usize, graph.arc_count());
        for arc in 0..graph.arc_count() {
            assert!((graph.arc_head(arc) as usize) < graph.node_count());
            assert!(graph.arc_speed_kmh(arc) > 0);
        }
    }

    #[rstest]
    fn arc_distance_matches_haversine() {
        let graph =
            RoutingGraph::from_snapshot(&snapshot(vec![residential_way(10, &[1, 2], &[])]))
                .expect("build graph");
        let arc = graph.arc_between(0, 1).expect("arc");
        let expected = haversine_m(52.0907, 5.1214, 52.0860, 5.1207).round() as u32;
        assert_eq!(graph.arc_distance_m(arc), expected);
    }

    #[rstest]
    fn unknown_refs_are_counted_not_fatal() {
        let graph =
            RoutingGraph::from_snapshot(&snapshot(vec![residential_way(10, &[1, 99], &[])]))
                .expect("build graph");
        assert_eq!(graph.arc_count(), 0);
        assert_eq!(graph.missing_node_refs, 1);
    }

    #[rstest]
    fn empty_snapshot_is_rejected() {
        let err = RoutingGraph::from_snapshot(&GraphSnapshot::default()).expect_err("empty");
        assert!(matches!(err, GraphBuildError::EmptyGraph));
    }
}
