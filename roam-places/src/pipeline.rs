//! Single-pass place extraction pipeline.
//!
//! Streams the extract once: matched nodes are sampled directly; ways
//! resolve a centroid through the disk-backed node-location store; address
//! relations aggregate the node-count-weighted centroids of their outer
//! ways. Region assignment falls back to a majority vote over member
//! regions when a centroid lands outside every polygon. Samples live in
//! per-(category, region) reservoirs until the final CSV drain.

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::os::unix::fs::FileExt;
use std::path::{Path, PathBuf};

use log::info;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use thiserror::Error;

use roam_core::geodesy::is_valid_coordinate;
use roam_core::{
    unique_scratch_path, wgs84_to_web_mercator, NodeLocationStore, NodeStoreError,
};
use roam_osm::gzip;
use roam_osm::stream::{Entity, EntitySource, MemberKind, PbfSource, StreamError};

use crate::categories::CategorySet;
use crate::regions::RegionIndex;
use crate::reservoir::Reservoir;

/// Switches of the place pipeline.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlaceOptions {
    /// Seed for the reservoir keys; random when absent.
    pub seed: Option<u64>,
}

/// End-of-run statistics, including every silent-skip counter.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PlaceSummary {
    pub processed_nodes: u64,
    pub processed_ways: u64,
    pub processed_relations: u64,
    pub matched_nodes: u64,
    pub matched_ways: u64,
    pub matched_relations: u64,
    /// Matched objects outside every region polygon and without a fallback.
    pub outside_regions: u64,
    /// Matched ways/relations whose centroid could not be resolved.
    pub without_centroid: u64,
    pub written_rows: u64,
}

/// Errors of the place pipeline.
#[derive(Debug, Error)]
pub enum PlaceError {
    #[error(transparent)]
    Stream(#[from] StreamError),
    #[error(transparent)]
    NodeStore(#[from] NodeStoreError),
    /// The way-centroid scratch store failed.
    #[error("way-centroid store I/O failed at {path}: {source}")]
    CentroidStore {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    /// The output CSV could not be written.
    #[error("failed to write places CSV at {path}: {source}")]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },
    /// Finalising the gzipped artefact failed.
    #[error("failed to finalise places CSV at {path}: {source}")]
    Finalise {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Clone)]
struct PlacePayload {
    osm_id: i64,
    lat: f64,
    lon: f64,
    x: f64,
    y: f64,
    region: u32,
    tags_json: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum SampleKind {
    Node,
    Way,
    Relation,
}

/// Sparse disk store of way centroids: biased nano-degree lat/lon plus the
/// member node count used as the relation-centroid weight. A zero count
/// marks an absent slot.
struct WayCentroidStore {
    file: File,
    path: PathBuf,
    len_bytes: u64,
}

const CENTROID_SLOT: u64 = 12;
const COORD_BIAS: i64 = 2_000_000_000;
const NANO_DEG: f64 = 1e7;

impl WayCentroidStore {
    fn create(path: PathBuf) -> Result<Self, PlaceError> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)
            .map_err(|source| PlaceError::CentroidStore {
                path: path.clone(),
                source,
            })?;
        Ok(Self {
            file,
            path,
            len_bytes: 0,
        })
    }

    fn set(&mut self, way_id: u64, lat: f64, lon: f64, count: u32) -> Result<(), PlaceError> {
        let lat_enc = (((lat * NANO_DEG).round() as i64) + COORD_BIAS) as u32;
        let lon_enc = (((lon * NANO_DEG).round() as i64) + COORD_BIAS) as u32;
        let mut buf = [0_u8; CENTROID_SLOT as usize];
        buf[..4].copy_from_slice(&lat_enc.to_le_bytes());
        buf[4..8].copy_from_slice(&lon_enc.to_le_bytes());
        buf[8..].copy_from_slice(&count.to_le_bytes());

        let offset = way_id * CENTROID_SLOT;
        self.file
            .write_all_at(&buf, offset)
            .map_err(|source| PlaceError::CentroidStore {
                path: self.path.clone(),
                source,
            })?;
        self.len_bytes = self.len_bytes.max(offset + CENTROID_SLOT);
        Ok(())
    }

    fn get(&self, way_id: u64) -> Result<Option<(f64, f64, u32)>, PlaceError> {
        let offset = way_id * CENTROID_SLOT;
        if offset + CENTROID_SLOT > self.len_bytes {
            return Ok(None);
        }
        let mut buf = [0_u8; CENTROID_SLOT as usize];
        self.file
            .read_exact_at(&mut buf, offset)
            .map_err(|source| PlaceError::CentroidStore {
                path: self.path.clone(),
                source,
            })?;
        let count = u32::from_le_bytes([buf[8], buf[9], buf[10], buf[11]]);
        if count == 0 {
            return Ok(None);
        }
        let lat_enc = u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]);
        let lon_enc = u32::from_le_bytes([buf[4], buf[5], buf[6], buf[7]]);
        let lat = (i64::from(lat_enc) - COORD_BIAS) as f64 / NANO_DEG;
        let lon = (i64::from(lon_enc) - COORD_BIAS) as f64 / NANO_DEG;
        Ok(Some((lat, lon, count)))
    }
}

impl Drop for WayCentroidStore {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

struct Pipeline<'a> {
    categories: &'a CategorySet,
    regions: &'a RegionIndex,
    rng: ChaCha8Rng,
    region_codes: Vec<String>,
    region_lookup: HashMap<String, u32>,
    node_regions: HashMap<i64, u32>,
    way_regions: HashMap<i64, u32>,
    reservoirs: HashMap<(SampleKind, usize, u32), Reservoir<PlacePayload>>,
    summary: PlaceSummary,
}

impl<'a> Pipeline<'a> {
    fn intern_region(&mut self, code: &str) -> u32 {
        if let Some(&idx) = self.region_lookup.get(code) {
            return idx;
        }
        let idx = self.region_codes.len() as u32;
        self.region_codes.push(code.to_owned());
        self.region_lookup.insert(code.to_owned(), idx);
        idx
    }

    fn offer(
        &mut self,
        kind: SampleKind,
        category_idx: usize,
        region: u32,
        payload: PlacePayload,
    ) {
        let capacity = self
            .categories
            .get(category_idx)
            .map_or(0, |c| c.max_per_region);
        let key = self.rng.gen::<f64>();
        self.reservoirs
            .entry((kind, category_idx, region))
            .or_insert_with(|| Reservoir::new(capacity))
            .offer(key, payload);
    }

    fn majority_region<I: IntoIterator<Item = i64>>(
        map: &HashMap<i64, u32>,
        ids: I,
    ) -> Option<u32> {
        let mut counts: HashMap<u32, u32> = HashMap::new();
        for id in ids {
            if let Some(&region) = map.get(&id) {
                *counts.entry(region).or_insert(0) += 1;
            }
        }
        counts
            .into_iter()
            .max_by_key(|&(region, count)| (count, std::cmp::Reverse(region)))
            .map(|(region, _)| region)
    }
}

/// Run the place-extraction pipeline, writing the gzipped CSV to `output`.
///
/// # Errors
///
/// Fails on unreadable input or any output I/O failure. Objects without a
/// resolvable centroid or containing region are counted, never fatal.
pub fn extract_places(
    input: &Path,
    categories: &CategorySet,
    regions: &RegionIndex,
    output: &Path,
    options: PlaceOptions,
) -> Result<PlaceSummary, PlaceError> {
    extract_places_from_source(&PbfSource::new(input), categories, regions, output, options)
}

/// Run the place pipeline over any replayable entity source.
///
/// # Errors
///
/// Same contract as [`extract_places`].
pub fn extract_places_from_source(
    source: &dyn EntitySource,
    categories: &CategorySet,
    regions: &RegionIndex,
    output: &Path,
    options: PlaceOptions,
) -> Result<PlaceSummary, PlaceError> {
    let node_store_path = unique_scratch_path("place_nodes").with_extension("bin");
    let mut node_store = NodeLocationStore::create(&node_store_path)?;
    let mut way_store =
        WayCentroidStore::create(unique_scratch_path("place_ways").with_extension("bin"))?;

    let rng = match options.seed {
        Some(seed) => ChaCha8Rng::seed_from_u64(seed),
        None => ChaCha8Rng::from_entropy(),
    };
    let mut pipeline = Pipeline {
        categories,
        regions,
        rng,
        region_codes: Vec::new(),
        region_lookup: HashMap::new(),
        node_regions: HashMap::new(),
        way_regions: HashMap::new(),
        reservoirs: HashMap::new(),
        summary: PlaceSummary::default(),
    };

    let mut fatal: Option<PlaceError> = None;
    source.stream(&mut |entity| {
        if fatal.is_some() {
            return;
        }
        let result = match entity {
            Entity::Node(node) => process_node(&mut pipeline, &mut node_store, node),
            Entity::Way(way) => process_way(&mut pipeline, &node_store, &mut way_store, way),
            Entity::Relation(relation) => process_relation(&mut pipeline, &way_store, relation),
        };
        if let Err(err) = result {
            fatal = Some(err);
        }
    })?;
    if let Some(err) = fatal {
        return Err(err);
    }

    let summary = write_csv(pipeline, output)?;
    info!(
        "places complete: {} rows written ({} nodes, {} ways, {} relations matched)",
        summary.written_rows, summary.matched_nodes, summary.matched_ways, summary.matched_relations
    );
    Ok(summary)
}

fn process_node(
    pipeline: &mut Pipeline<'_>,
    node_store: &mut NodeLocationStore,
    node: roam_osm::stream::RawNode,
) -> Result<(), PlaceError> {
    pipeline.summary.processed_nodes += 1;
    if !is_valid_coordinate(node.lat, node.lon) {
        return Ok(());
    }
    if let Ok(id) = u64::try_from(node.id) {
        node_store.set(id, node.lat, node.lon)?;
    }

    let Some((category_idx, _)) = pipeline.categories.match_tags(&node.tags) else {
        return Ok(());
    };
    pipeline.summary.matched_nodes += 1;

    let Some(code) = pipeline.regions.lookup_wgs84(node.lat, node.lon) else {
        pipeline.summary.outside_regions += 1;
        return Ok(());
    };
    let code = code.to_owned();
    let region = pipeline.intern_region(&code);
    pipeline.node_regions.insert(node.id, region);

    let (x, y) = wgs84_to_web_mercator(node.lat, node.lon);
    pipeline.offer(
        SampleKind::Node,
        category_idx,
        region,
        PlacePayload {
            osm_id: node.id,
            lat: node.lat,
            lon: node.lon,
            x,
            y,
            region,
            tags_json: node.tags.to_json(),
        },
    );
    Ok(())
}

fn process_way(
    pipeline: &mut Pipeline<'_>,
    node_store: &NodeLocationStore,
    way_store: &mut WayCentroidStore,
    way: roam_osm::stream::RawWay,
) -> Result<(), PlaceError> {
    pipeline.summary.processed_ways += 1;

    let centroid = way_centroid(node_store, &way.refs)?;
    if let (Ok(id), Some((lat, lon, count))) = (u64::try_from(way.id), centroid) {
        way_store.set(id, lat, lon, count)?;
    }

    let Some((category_idx, _)) = pipeline.categories.match_tags(&way.tags) else {
        return Ok(());
    };
    pipeline.summary.matched_ways += 1;

    let Some((lat, lon, _)) = centroid else {
        pipeline.summary.without_centroid += 1;
        return Ok(());
    };

    let region = match pipeline.regions.lookup_wgs84(lat, lon) {
        Some(code) => {
            let code = code.to_owned();
            pipeline.intern_region(&code)
        }
        None => {
            match Pipeline::majority_region(&pipeline.node_regions, way.refs.iter().copied()) {
                Some(region) => region,
                None => {
                    pipeline.summary.outside_regions += 1;
                    return Ok(());
                }
            }
        }
    };
    pipeline.way_regions.insert(way.id, region);

    let (x, y) = wgs84_to_web_mercator(lat, lon);
    pipeline.offer(
        SampleKind::Way,
        category_idx,
        region,
        PlacePayload {
            osm_id: way.id,
            lat,
            lon,
            x,
            y,
            region,
            tags_json: way.tags.to_json(),
        },
    );
    Ok(())
}

fn process_relation(
    pipeline: &mut Pipeline<'_>,
    way_store: &WayCentroidStore,
    relation: roam_osm::stream::RawRelation,
) -> Result<(), PlaceError> {
    pipeline.summary.processed_relations += 1;

    let Some((category_idx, _)) = pipeline.categories.match_tags(&relation.tags) else {
        return Ok(());
    };
    pipeline.summary.matched_relations += 1;

    let outer_ways: Vec<i64> = relation
        .members
        .iter()
        .filter(|m| m.kind == MemberKind::Way && m.role == "outer")
        .map(|m| m.member_ref)
        .collect();

    // Node-count-weighted mean of the outer-way centroids.
    let mut sum_lat = 0.0;
    let mut sum_lon = 0.0;
    let mut total_weight = 0_u64;
    for &way_id in &outer_ways {
        if let Ok(id) = u64::try_from(way_id) {
            if let Some((lat, lon, count)) = way_store.get(id)? {
                let weight = f64::from(count);
                sum_lat += lat * weight;
                sum_lon += lon * weight;
                total_weight += u64::from(count);
            }
        }
    }
    if total_weight == 0 {
        pipeline.summary.without_centroid += 1;
        return Ok(());
    }
    let lat = sum_lat / total_weight as f64;
    let lon = sum_lon / total_weight as f64;

    let region = match pipeline.regions.lookup_wgs84(lat, lon) {
        Some(code) => {
            let code = code.to_owned();
            pipeline.intern_region(&code)
        }
        None => {
            match Pipeline::majority_region(&pipeline.way_regions, outer_ways.iter().copied()) {
                Some(region) => region,
                None => {
                    pipeline.summary.outside_regions += 1;
                    return Ok(());
                }
            }
        }
    };

    let (x, y) = wgs84_to_web_mercator(lat, lon);
    pipeline.offer(
        SampleKind::Relation,
        category_idx,
        region,
        PlacePayload {
            osm_id: relation.id,
            lat,
            lon,
            x,
            y,
            region,
            tags_json: relation.tags.to_json(),
        },
    );
    Ok(())
}

fn way_centroid(
    node_store: &NodeLocationStore,
    refs: &[i64],
) -> Result<Option<(f64, f64, u32)>, PlaceError> {
    let mut sum_lat = 0.0;
    let mut sum_lon = 0.0;
    let mut count = 0_u32;
    for &node_id in refs {
        let Ok(id) = u64::try_from(node_id) else {
            continue;
        };
        if let Some((lat, lon)) = node_store.get(id)? {
            sum_lat += lat;
            sum_lon += lon;
            count += 1;
        }
    }
    Ok((count > 0).then(|| (sum_lat / f64::from(count), sum_lon / f64::from(count), count)))
}

fn write_csv(
    pipeline: Pipeline<'_>,
    output: &Path,
) -> Result<PlaceSummary, PlaceError> {
    let mut summary = pipeline.summary;
    let temp_path = unique_scratch_path("places").with_extension("csv");

    let result = write_rows(
        pipeline.reservoirs,
        pipeline.categories,
        &pipeline.region_codes,
        &temp_path,
        &mut summary,
    )
    .and_then(|()| {
        gzip::compress_file(&temp_path, output).map_err(|source| PlaceError::Finalise {
            path: output.to_path_buf(),
            source,
        })
    });

    if temp_path.exists() {
        let _ = std::fs::remove_file(&temp_path);
    }
    match result {
        Ok(()) => Ok(summary),
        Err(err) => {
            if output.exists() {
                let _ = std::fs::remove_file(output);
            }
            Err(err)
        }
    }
}

fn write_rows(
    mut reservoirs: HashMap<(SampleKind, usize, u32), Reservoir<PlacePayload>>,
    categories: &CategorySet,
    region_codes: &[String],
    temp_path: &Path,
    summary: &mut PlaceSummary,
) -> Result<(), PlaceError> {
    let file = File::create(temp_path).map_err(|source| PlaceError::Finalise {
        path: temp_path.to_path_buf(),
        source,
    })?;
    let mut writer = csv::Writer::from_writer(file);
    writer
        .write_record([
            "id",
            "category",
            "lat",
            "lon",
            "x_mercator",
            "y_mercator",
            "region",
            "is_node",
            "is_way",
            "is_relation",
            "tags",
        ])
        .map_err(|source| PlaceError::Csv {
            path: temp_path.to_path_buf(),
            source,
        })?;

    // Deterministic row grouping: kind, then category, then region.
    let mut keys: Vec<(SampleKind, usize, u32)> = reservoirs.keys().copied().collect();
    keys.sort_by_key(|(kind, category, region)| {
        let kind_rank = match kind {
            SampleKind::Node => 0_u8,
            SampleKind::Way => 1,
            SampleKind::Relation => 2,
        };
        (kind_rank, *category, *region)
    });

    for key in keys {
        let Some(reservoir) = reservoirs.remove(&key) else {
            continue;
        };
        let (kind, category_idx, _) = key;
        let category_name = categories.get(category_idx).map_or("", |c| c.name.as_str());
        let flag = |b: bool| if b { "1" } else { "0" };

        for payload in reservoir.drain() {
            let region_code = region_codes
                .get(payload.region as usize)
                .map_or("", String::as_str);
            writer
                .write_record([
                    payload.osm_id.to_string().as_str(),
                    category_name,
                    format!("{:.7}", payload.lat).as_str(),
                    format!("{:.7}", payload.lon).as_str(),
                    format!("{:.7}", payload.x).as_str(),
                    format!("{:.7}", payload.y).as_str(),
                    region_code,
                    flag(kind == SampleKind::Node),
                    flag(kind == SampleKind::Way),
                    flag(kind == SampleKind::Relation),
                    payload.tags_json.as_str(),
                ])
                .map_err(|source| PlaceError::Csv {
                    path: temp_path.to_path_buf(),
                    source,
                })?;
            summary.written_rows += 1;
        }
    }

    writer.flush().map_err(|source| PlaceError::Finalise {
        path: temp_path.to_path_buf(),
        source,
    })
}
