//! Connectivity repair for the trimmed routable graph.
//!
//! Streams the snapshot's ways through union-find, enumerates connected
//! components, and bridges every non-primary component to the primary one
//! with a synthetic way between the closest node pair found through the
//! disk grid index. The rewritten snapshot keeps all original nodes and
//! ways and appends the synthetic bridges, so a rebuild of connectivity
//! yields exactly one component.

use std::path::{Path, PathBuf};

use log::{debug, info};
use thiserror::Error;

use roam_core::grid::DEFAULT_MAX_RADIUS_M;
use roam_core::{
    unique_scratch_path, DiskGridIndex, GridIndexError, NodeLocationStore, NodeStoreError,
    TagList, UnionFind,
};

use crate::snapshot::{GraphSnapshot, SnapshotError, SnapshotWay};

/// Bridge statistics and skip counters of a connect run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConnectSummary {
    pub components: u64,
    pub primary_component_nodes: u64,
    pub synthetic_ways: u64,
    /// Components that could not be bridged within the search radius.
    pub unbridged_components: u64,
    /// Nodes skipped because the location store had no entry for them.
    pub nodes_without_location: u64,
    pub total_bridge_m: f64,
    pub max_bridge_m: f64,
    pub written_nodes: u64,
    pub written_ways: u64,
}

impl ConnectSummary {
    /// Mean bridge length in metres, zero when nothing was bridged.
    #[must_use]
    pub fn avg_bridge_m(&self) -> f64 {
        if self.synthetic_ways == 0 {
            0.0
        } else {
            self.total_bridge_m / self.synthetic_ways as f64
        }
    }
}

/// Errors of the connect pipeline.
#[derive(Debug, Error)]
pub enum ConnectError {
    #[error(transparent)]
    Snapshot(#[from] SnapshotError),
    #[error(transparent)]
    NodeStore(#[from] NodeStoreError),
    #[error(transparent)]
    Grid(#[from] GridIndexError),
    /// The snapshot holds no routable nodes at all.
    #[error("no connected components found in {path}")]
    NoComponents { path: PathBuf },
}

/// Bridge all components of the snapshot at `input` into one, writing the
/// connected snapshot to `output`.
///
/// # Errors
///
/// Fails on unreadable artefacts or I/O failure of the temporary indices.
/// Missing node locations are counted, never fatal.
pub fn connect_components(input: &Path, output: &Path) -> Result<ConnectSummary, ConnectError> {
    let snapshot = GraphSnapshot::read(input)?;
    let mut summary = ConnectSummary::default();

    let store_path = unique_scratch_path("connect_nodes").with_extension("bin");
    let mut store = NodeLocationStore::create(&store_path)?;
    for node in &snapshot.nodes {
        if let Ok(id) = u64::try_from(node.id) {
            store.set(id, node.lat, node.lon)?;
        }
    }

    // Union consecutive node ids of every way; the trim stage already
    // filtered for routability.
    let mut union_find = UnionFind::new();
    for way in &snapshot.ways {
        for pair in way.refs.windows(2) {
            union_find.unite(pair[0], pair[1]);
        }
        if way.refs.len() == 1 {
            union_find.find(way.refs[0]);
        }
    }

    let mut components = union_find.components();
    if components.is_empty() {
        return Err(ConnectError::NoComponents {
            path: input.to_path_buf(),
        });
    }
    summary.components = components.len() as u64;
    info!("found {} connected components", components.len());

    // Primary component: most nodes, ties broken by smallest minimum id.
    for component in &mut components {
        component.sort_unstable();
    }
    let primary_idx = components
        .iter()
        .enumerate()
        .max_by(|(_, a), (_, b)| a.len().cmp(&b.len()).then(b[0].cmp(&a[0])))
        .map(|(idx, _)| idx)
        .unwrap_or(0);
    summary.primary_component_nodes = components[primary_idx].len() as u64;
    info!(
        "primary component holds {} of {} nodes",
        components[primary_idx].len(),
        union_find.len()
    );

    let grid_dir = unique_scratch_path("spatial_index");
    let mut grid = DiskGridIndex::create(&grid_dir)?;
    for &node_id in &components[primary_idx] {
        match lookup(&store, node_id) {
            Some((lat, lon)) => grid.insert(node_id, lat, lon)?,
            None => summary.nodes_without_location += 1,
        }
    }
    debug!("indexed {} primary nodes", grid.len());

    let mut synthetic_ways: Vec<SnapshotWay> = Vec::new();
    let mut next_synthetic_id = -1_i64;
    for (idx, component) in components.iter().enumerate() {
        if idx == primary_idx {
            continue;
        }

        let mut best: Option<(i64, i64, f64)> = None;
        for &node_id in component {
            let Some((lat, lon)) = lookup(&store, node_id) else {
                summary.nodes_without_location += 1;
                continue;
            };
            if let Some(hit) = grid.find_nearest(lat, lon, DEFAULT_MAX_RADIUS_M)? {
                if best.map_or(true, |(_, _, d)| hit.distance_m < d) {
                    best = Some((node_id, hit.id, hit.distance_m));
                }
            }
        }

        match best {
            Some((node1, node2, distance_m)) => {
                synthetic_ways.push(SnapshotWay {
                    id: next_synthetic_id,
                    tags: TagList::from_pairs([
                        ("highway", "service"),
                        ("synthetic", "yes"),
                        ("bridge_component", "yes"),
                    ]),
                    refs: vec![node1, node2],
                });
                next_synthetic_id -= 1;
                summary.total_bridge_m += distance_m;
                summary.max_bridge_m = summary.max_bridge_m.max(distance_m);
            }
            None => summary.unbridged_components += 1,
        }
    }
    grid.cleanup()?;

    // A synthetic way is only written when both endpoints have locations.
    let mut connected = GraphSnapshot {
        nodes: snapshot.nodes,
        ways: snapshot.ways,
    };
    for way in synthetic_ways {
        let resolvable = way
            .refs
            .iter()
            .all(|&node_id| lookup(&store, node_id).is_some());
        if resolvable {
            summary.synthetic_ways += 1;
            connected.ways.push(way);
        } else {
            summary.nodes_without_location += 1;
        }
    }

    summary.written_nodes = connected.nodes.len() as u64;
    summary.written_ways = connected.ways.len() as u64;
    connected.write(output)?;

    info!(
        "bridged {} components with {} synthetic ways (total {:.1} km, max {:.1} km, avg {:.1} km)",
        summary.components - 1,
        summary.synthetic_ways,
        summary.total_bridge_m / 1000.0,
        summary.max_bridge_m / 1000.0,
        summary.avg_bridge_m() / 1000.0,
    );
    Ok(summary)
}

fn lookup(store: &NodeLocationStore, node_id: i64) -> Option<(f64, f64)> {
    u64::try_from(node_id)
        .ok()
        .and_then(|id| store.get(id).ok().flatten())
}
