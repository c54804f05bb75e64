//! Two-pass routable-way extractor.
//!
//! Pass 1 streams the source extract once, harvesting address-tagged nodes
//! into the CSV sink and collecting the node ids referenced by routable
//! ways. Pass 2 streams the file again, writing minimal nodes and routable
//! ways into the snapshot artefact while resolving way and relation
//! centroids for the remaining address records. Memory stays bounded by the
//! disk-backed node-location store; only id sets live on the heap.

use std::collections::{HashMap, HashSet};
use std::path::Path;

use log::{info, warn};
use thiserror::Error;

use roam_core::geodesy::{haversine_m, is_valid_coordinate};
use roam_core::{
    is_routable, parse_maxspeed_kmh, unique_scratch_path, NodeLocationStore, NodeStoreError,
    TagList,
};

use crate::addresses::{
    is_address_object, AddressCsvError, AddressCsvWriter, AddressRecord, ObjectKind,
};
use crate::snapshot::{GraphSnapshot, SnapshotError, SnapshotNode, SnapshotWay};
use crate::stream::{Entity, EntitySource, MemberKind, PbfSource, StreamError};

/// Switches of the trim pipeline.
#[derive(Debug, Clone, Copy, Default)]
pub struct TrimOptions {
    /// Keep only endpoints and intersection nodes of each routable way.
    pub simplify: bool,
    /// Also admit any `highway=*` or `route=ferry` way the routability
    /// classifier rejects.
    pub ignore_routability: bool,
}

/// End-of-run statistics, including every silent-skip counter.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TrimSummary {
    pub processed_nodes: u64,
    pub processed_ways: u64,
    pub processed_relations: u64,
    pub written_nodes: u64,
    pub written_ways: u64,
    /// Routable ways dropped because a referenced node was never written.
    pub dropped_ways: u64,
    pub address_nodes: u64,
    pub address_ways: u64,
    pub address_relations: u64,
    /// Address objects skipped because no member location could be resolved.
    pub addresses_without_location: u64,
}

/// Errors of the trim pipeline.
#[derive(Debug, Error)]
pub enum TrimError {
    #[error(transparent)]
    Stream(#[from] StreamError),
    #[error(transparent)]
    Snapshot(#[from] SnapshotError),
    #[error(transparent)]
    AddressCsv(#[from] AddressCsvError),
    #[error(transparent)]
    NodeStore(#[from] NodeStoreError),
}

/// Run the two-pass extractor.
///
/// Writes the trimmed graph to `snapshot_out` and the gzipped address CSV to
/// `csv_out`. On failure both outputs are removed.
///
/// # Errors
///
/// Fails on unreadable or malformed input, or when any output cannot be
/// written. Missing node locations are never fatal; they are counted in the
/// returned [`TrimSummary`].
pub fn trim_and_extract(
    input: &Path,
    snapshot_out: &Path,
    csv_out: &Path,
    options: TrimOptions,
) -> Result<TrimSummary, TrimError> {
    trim_source(&PbfSource::new(input), snapshot_out, csv_out, options)
}

/// Run the two-pass extractor over any replayable entity source.
///
/// # Errors
///
/// Same contract as [`trim_and_extract`].
pub fn trim_source(
    source: &dyn EntitySource,
    snapshot_out: &Path,
    csv_out: &Path,
    options: TrimOptions,
) -> Result<TrimSummary, TrimError> {
    let mut sink = AddressCsvWriter::create(csv_out)?;

    match run_passes(source, snapshot_out, options, &mut sink) {
        Ok(summary) => {
            let rows = sink.finish()?;
            info!(
                "trim complete: {} nodes / {} ways written, {} address rows",
                summary.written_nodes, summary.written_ways, rows
            );
            Ok(summary)
        }
        Err(err) => {
            sink.discard();
            if snapshot_out.exists() {
                let _ = std::fs::remove_file(snapshot_out);
            }
            Err(err)
        }
    }
}

fn should_include(tags: &TagList, options: TrimOptions) -> bool {
    if is_routable(tags) {
        return true;
    }
    options.ignore_routability && (tags.get("route") == Some("ferry") || tags.has("highway"))
}

/// Pass-1 harvest: address nodes plus the node ids routable ways need.
#[derive(Default)]
struct Pass1 {
    needed: HashSet<i64>,
    // Simplify mode keeps endpoints and nodes shared by several ways.
    endpoints: HashSet<i64>,
    seen_by_one_way: HashSet<i64>,
    intersections: HashSet<i64>,
    address_ways: HashMap<i64, TagList>,
    address_relations: Vec<AddressRelation>,
    relation_outer_ways: HashSet<i64>,
}

struct AddressRelation {
    id: i64,
    tags: TagList,
    outer_ways: Vec<i64>,
}

fn run_passes(
    source: &dyn EntitySource,
    snapshot_out: &Path,
    options: TrimOptions,
    sink: &mut AddressCsvWriter,
) -> Result<TrimSummary, TrimError> {
    let mut summary = TrimSummary::default();
    let mut pass1 = Pass1::default();
    let mut sink_error: Option<AddressCsvError> = None;

    info!("pass 1/2: collecting routable node ids and address nodes");
    source.stream(&mut |entity| match entity {
        Entity::Node(node) => {
            summary.processed_nodes += 1;
            if sink_error.is_none()
                && is_address_object(&node.tags)
                && is_valid_coordinate(node.lat, node.lon)
            {
                let record =
                    AddressRecord::from_tags(node.id, ObjectKind::Node, node.lat, node.lon, &node.tags);
                if let Err(err) = sink.write(&record) {
                    sink_error = Some(err);
                } else {
                    summary.address_nodes += 1;
                }
            }
        }
        Entity::Way(way) => {
            summary.processed_ways += 1;
            if should_include(&way.tags, options) {
                if options.simplify {
                    if let (Some(first), Some(last)) = (way.refs.first(), way.refs.last()) {
                        pass1.endpoints.insert(*first);
                        pass1.endpoints.insert(*last);
                    }
                    let mut in_this_way = HashSet::new();
                    for &node_id in &way.refs {
                        if !in_this_way.insert(node_id) {
                            continue;
                        }
                        if !pass1.seen_by_one_way.insert(node_id) {
                            pass1.intersections.insert(node_id);
                        }
                    }
                } else {
                    pass1.needed.extend(way.refs.iter().copied());
                }
            }
            if is_address_object(&way.tags) {
                pass1.address_ways.insert(way.id, way.tags);
            }
        }
        Entity::Relation(relation) => {
            summary.processed_relations += 1;
            if is_address_object(&relation.tags) {
                let outer_ways: Vec<i64> = relation
                    .members
                    .iter()
                    .filter(|m| m.kind == MemberKind::Way && m.role == "outer")
                    .map(|m| m.member_ref)
                    .collect();
                if !outer_ways.is_empty() {
                    pass1.relation_outer_ways.extend(outer_ways.iter().copied());
                    pass1.address_relations.push(AddressRelation {
                        id: relation.id,
                        tags: relation.tags,
                        outer_ways,
                    });
                }
            }
        }
    })?;
    if let Some(err) = sink_error {
        return Err(err.into());
    }

    let needed: HashSet<i64> = if options.simplify {
        pass1.endpoints.union(&pass1.intersections).copied().collect()
    } else {
        std::mem::take(&mut pass1.needed)
    };
    info!(
        "pass 1 complete: {} nodes needed, {} address nodes",
        needed.len(),
        summary.address_nodes
    );

    run_pass2(source, snapshot_out, options, sink, &mut summary, pass1, &needed)?;
    Ok(summary)
}

#[allow(clippy::too_many_arguments)]
fn run_pass2(
    source: &dyn EntitySource,
    snapshot_out: &Path,
    options: TrimOptions,
    sink: &mut AddressCsvWriter,
    summary: &mut TrimSummary,
    pass1: Pass1,
    needed: &HashSet<i64>,
) -> Result<(), TrimError> {
    let store_path = unique_scratch_path("node_locations").with_extension("bin");
    let mut store = NodeLocationStore::create(&store_path)?;

    let mut snapshot = GraphSnapshot::default();
    let mut written: HashSet<i64> = HashSet::with_capacity(needed.len());
    // Centroids of relation outer ways: (lat, lon, member node count).
    let mut way_centroids: HashMap<i64, (f64, f64, u32)> = HashMap::new();

    let mut store_error: Option<NodeStoreError> = None;
    let mut sink_error: Option<AddressCsvError> = None;

    info!("pass 2/2: writing nodes and routable ways");
    source.stream(&mut |entity| {
        if store_error.is_some() || sink_error.is_some() {
            return;
        }
        match entity {
            Entity::Node(node) => {
                if !is_valid_coordinate(node.lat, node.lon) {
                    return;
                }
                if let Ok(id) = u64::try_from(node.id) {
                    if let Err(err) = store.set(id, node.lat, node.lon) {
                        store_error = Some(err);
                        return;
                    }
                }
                if needed.contains(&node.id) {
                    snapshot.nodes.push(SnapshotNode {
                        id: node.id,
                        lat: node.lat,
                        lon: node.lon,
                    });
                    written.insert(node.id);
                }
            }
            Entity::Way(way) => {
                if should_include(&way.tags, options) {
                    emit_way(&way, options, needed, &written, &store, &mut snapshot, summary);
                }
                let is_relation_outer = pass1.relation_outer_ways.contains(&way.id);
                let address_tags = pass1.address_ways.get(&way.id);
                if is_relation_outer || address_tags.is_some() {
                    let centroid = way_centroid(&way.refs, &store);
                    if let Some((lat, lon)) = centroid {
                        if is_relation_outer {
                            way_centroids.insert(way.id, (lat, lon, way.refs.len() as u32));
                        }
                        if let Some(tags) = address_tags {
                            let record = AddressRecord::from_tags(
                                way.id,
                                ObjectKind::Way,
                                lat,
                                lon,
                                tags,
                            );
                            if let Err(err) = sink.write(&record) {
                                sink_error = Some(err);
                            } else {
                                summary.address_ways += 1;
                            }
                        }
                    } else if address_tags.is_some() {
                        summary.addresses_without_location += 1;
                    }
                }
            }
            Entity::Relation(_) => {}
        }
    })?;
    if let Some(err) = store_error {
        return Err(err.into());
    }
    if let Some(err) = sink_error {
        return Err(err.into());
    }

    for relation in &pass1.address_relations {
        match relation_centroid(&relation.outer_ways, &way_centroids) {
            Some((lat, lon)) => {
                let record =
                    AddressRecord::from_tags(relation.id, ObjectKind::Relation, lat, lon, &relation.tags);
                sink.write(&record)?;
                summary.address_relations += 1;
            }
            None => summary.addresses_without_location += 1,
        }
    }

    summary.written_nodes = snapshot.nodes.len() as u64;
    summary.written_ways = snapshot.ways.len() as u64;
    if summary.dropped_ways > 0 {
        warn!(
            "dropped {} routable ways referencing unwritten nodes",
            summary.dropped_ways
        );
    }

    snapshot.write(snapshot_out)?;
    Ok(())
}

fn emit_way(
    way: &crate::stream::RawWay,
    options: TrimOptions,
    needed: &HashSet<i64>,
    written: &HashSet<i64>,
    store: &NodeLocationStore,
    snapshot: &mut GraphSnapshot,
    summary: &mut TrimSummary,
) {
    if !options.simplify {
        if way.refs.iter().any(|r| !written.contains(r)) {
            summary.dropped_ways += 1;
            return;
        }
        snapshot.ways.push(SnapshotWay {
            id: way.id,
            tags: way.tags.clone(),
            refs: way.refs.clone(),
        });
        return;
    }

    if way.refs.len() < 2 {
        summary.dropped_ways += 1;
        return;
    }

    // Endpoints always survive; interior nodes only when they intersect
    // another routable way. Original order is preserved and consecutive
    // duplicates collapsed.
    let first = way.refs[0];
    let last = way.refs[way.refs.len() - 1];
    let mut kept: Vec<i64> = vec![first];
    for &node_id in &way.refs[1..way.refs.len() - 1] {
        if needed.contains(&node_id) && kept.last() != Some(&node_id) {
            kept.push(node_id);
        }
    }
    if kept.last() != Some(&last) {
        kept.push(last);
    }
    if kept.len() < 2 || kept.iter().any(|r| !written.contains(r)) {
        summary.dropped_ways += 1;
        return;
    }

    // True polyline length across all original nodes, not just kept ones.
    let mut length_m = 0.0;
    for pair in way.refs.windows(2) {
        let a = u64::try_from(pair[0]).ok().and_then(|id| store.get(id).ok().flatten());
        let b = u64::try_from(pair[1]).ok().and_then(|id| store.get(id).ok().flatten());
        if let (Some((lat_a, lon_a)), Some((lat_b, lon_b))) = (a, b) {
            length_m += haversine_m(lat_a, lon_a, lat_b, lon_b);
        }
    }
    let length_m = length_m.round() as u64;

    let mut tags = way.tags.clone();
    tags.push("length_m", length_m.to_string());
    tags.push("orig_nodes", way.refs.len().to_string());
    tags.push("kept_nodes", kept.len().to_string());
    if let Some(speed_kmh) = parse_maxspeed_kmh(&way.tags) {
        let duration_s = (length_m as f64 / 1000.0) / speed_kmh * 3600.0;
        tags.push("duration_s", (duration_s.round() as u64).to_string());
    }

    snapshot.ways.push(SnapshotWay {
        id: way.id,
        tags,
        refs: kept,
    });
}

fn way_centroid(refs: &[i64], store: &NodeLocationStore) -> Option<(f64, f64)> {
    let mut sum_lat = 0.0;
    let mut sum_lon = 0.0;
    let mut count = 0_u32;
    for &node_id in refs {
        let location = u64::try_from(node_id)
            .ok()
            .and_then(|id| store.get(id).ok().flatten());
        if let Some((lat, lon)) = location {
            sum_lat += lat;
            sum_lon += lon;
            count += 1;
        }
    }
    (count > 0).then(|| (sum_lat / f64::from(count), sum_lon / f64::from(count)))
}

fn relation_centroid(
    outer_ways: &[i64],
    way_centroids: &HashMap<i64, (f64, f64, u32)>,
) -> Option<(f64, f64)> {
    let mut sum_lat = 0.0;
    let mut sum_lon = 0.0;
    let mut total_weight = 0_u64;
    for way_id in outer_ways {
        if let Some(&(lat, lon, node_count)) = way_centroids.get(way_id) {
            let weight = f64::from(node_count);
            sum_lat += lat * weight;
            sum_lon += lon * weight;
            total_weight += u64::from(node_count);
        }
    }
    (total_weight > 0).then(|| {
        let w = total_weight as f64;
        (sum_lat / w, sum_lon / w)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    fn ignore_routability_widens_the_filter() {
        let odd = TagList::from_pairs([("highway", "completely_unknown_value")]);
        assert!(!should_include(&odd, TrimOptions::default()));
        assert!(should_include(
            &odd,
            TrimOptions {
                ignore_routability: true,
                ..Default::default()
            }
        ));

        let ferry = TagList::from_pairs([("route", "ferry"), ("access", "no")]);
        assert!(should_include(
            &ferry,
            TrimOptions {
                ignore_routability: true,
                ..Default::default()
            }
        ));
    }

    #[rstest]
    fn relation_centroid_weights_by_node_count() {
        let mut centroids = HashMap::new();
        centroids.insert(1_i64, (0.0, 0.0, 1_u32));
        centroids.insert(2_i64, (3.0, 3.0, 3_u32));
        let (lat, lon) = relation_centroid(&[1, 2], &centroids).expect("centroid");
        assert!((lat - 2.25).abs() < 1e-12);
        assert!((lon - 2.25).abs() < 1e-12);
    }

    #[rstest]
    fn relation_centroid_without_resolved_ways_is_none() {
        assert!(relation_centroid(&[1, 2], &HashMap::new()).is_none());
    }
}
