//! Contraction hierarchy build, persistence and query.
//!
//! The hierarchy is weighted by arc geo-distance; travel times are computed
//! after the fact from way speeds. The prepared structure persists as a
//! versioned artefact (magic + version + bincode payload) next to the
//! snapshot it was built from, or wherever `CH_GEO_FILE` points.

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use fast_paths::{FastGraph, InputGraph};
use log::{info, warn};
use thiserror::Error;

use crate::graph::RoutingGraph;

/// File identifier for persisted hierarchies.
pub const CH_MAGIC: [u8; 4] = *b"RCHG";

/// Supported version of the persisted hierarchy format.
pub const CH_VERSION: u16 = 1;

/// Environment variable overriding the derived artefact path.
pub const CH_GEO_FILE_ENV: &str = "CH_GEO_FILE";

/// Errors when loading or saving a hierarchy artefact.
#[derive(Debug, Error)]
pub enum ContractionIndexError {
    /// The artefact could not be read or written.
    #[error("contraction hierarchy I/O failed at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    /// The payload could not be encoded or decoded.
    #[error("failed to decode contraction hierarchy at {path}: {source}")]
    Codec {
        path: PathBuf,
        #[source]
        source: bincode::Error,
    },
    /// The file does not start with the hierarchy magic.
    #[error("invalid contraction hierarchy magic: expected {expected:?}, found {found:?}")]
    InvalidMagic { expected: [u8; 4], found: [u8; 4] },
    /// The file uses an unsupported format version.
    #[error("unsupported contraction hierarchy version {found}; supported version is {supported}")]
    UnsupportedVersion { found: u16, supported: u16 },
}

/// A shortest path through the original graph nodes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChPath {
    /// Total geo-distance in metres.
    pub distance_m: u64,
    /// Dense node indices from source to target inclusive.
    pub nodes: Vec<u32>,
}

/// Prepared distance-weighted contraction hierarchy.
#[derive(Debug)]
pub struct ContractionIndex {
    fast: FastGraph,
}

impl ContractionIndex {
    /// Build the hierarchy from the graph's weighted arcs.
    ///
    /// Zero-length arcs (duplicate coordinates) are clamped to one metre so
    /// every weight stays positive.
    #[must_use]
    pub fn build(graph: &RoutingGraph) -> Self {
        let mut input = InputGraph::new();
        for (tail, head, weight) in graph.weighted_arcs() {
            input.add_edge(tail as usize, head as usize, (weight as usize).max(1));
        }
        input.freeze();
        info!(
            "building contraction hierarchy over {} nodes / {} arcs",
            graph.node_count(),
            graph.arc_count()
        );
        Self {
            fast: fast_paths::prepare(&input),
        }
    }

    /// Shortest path between two dense node indices, `None` when
    /// unreachable.
    #[must_use]
    pub fn query(&self, source: u32, target: u32) -> Option<ChPath> {
        let source = source as usize;
        let target = target as usize;
        if source >= self.fast.get_num_nodes() || target >= self.fast.get_num_nodes() {
            return None;
        }
        let path = fast_paths::calc_path(&self.fast, source, target)?;
        Some(ChPath {
            distance_m: path.get_weight() as u64,
            nodes: path.get_nodes().iter().map(|&n| n as u32).collect(),
        })
    }

    /// Persist to `path` atomically (temp file + rename), creating parent
    /// directories as needed.
    pub fn save(&self, path: &Path) -> Result<(), ContractionIndexError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|source| ContractionIndexError::Io {
                    path: parent.to_path_buf(),
                    source,
                })?;
            }
        }

        let temp_path = path.with_extension("bin.tmp");
        {
            let file = File::create(&temp_path).map_err(|source| ContractionIndexError::Io {
                path: temp_path.clone(),
                source,
            })?;
            let mut writer = BufWriter::new(file);
            writer
                .write_all(&CH_MAGIC)
                .and_then(|()| writer.write_all(&CH_VERSION.to_le_bytes()))
                .map_err(|source| ContractionIndexError::Io {
                    path: temp_path.clone(),
                    source,
                })?;
            bincode::serialize_into(&mut writer, &self.fast).map_err(|source| {
                ContractionIndexError::Codec {
                    path: temp_path.clone(),
                    source,
                }
            })?;
            writer
                .into_inner()
                .map_err(|err| ContractionIndexError::Io {
                    path: temp_path.clone(),
                    source: err.into_error(),
                })?
                .sync_all()
                .map_err(|source| ContractionIndexError::Io {
                    path: temp_path.clone(),
                    source,
                })?;
        }
        std::fs::rename(&temp_path, path).map_err(|source| ContractionIndexError::Io {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Load a previously saved hierarchy, validating magic and version.
    pub fn load(path: &Path) -> Result<Self, ContractionIndexError> {
        let file = File::open(path).map_err(|source| ContractionIndexError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let mut reader = BufReader::new(file);

        let mut magic = [0_u8; 4];
        reader
            .read_exact(&mut magic)
            .map_err(|source| ContractionIndexError::Io {
                path: path.to_path_buf(),
                source,
            })?;
        if magic != CH_MAGIC {
            return Err(ContractionIndexError::InvalidMagic {
                expected: CH_MAGIC,
                found: magic,
            });
        }

        let mut version_bytes = [0_u8; 2];
        reader
            .read_exact(&mut version_bytes)
            .map_err(|source| ContractionIndexError::Io {
                path: path.to_path_buf(),
                source,
            })?;
        let version = u16::from_le_bytes(version_bytes);
        if version != CH_VERSION {
            return Err(ContractionIndexError::UnsupportedVersion {
                found: version,
                supported: CH_VERSION,
            });
        }

        let fast = bincode::deserialize_from(&mut reader).map_err(|source| {
            ContractionIndexError::Codec {
                path: path.to_path_buf(),
                source,
            }
        })?;
        Ok(Self { fast })
    }

    /// Load the artefact at the derived path when present, else build and
    /// best-effort save.
    ///
    /// A failed save is logged and tolerated; startup proceeds with the
    /// freshly built hierarchy either way.
    #[must_use]
    pub fn load_or_build(graph: &RoutingGraph, snapshot_path: &Path) -> Self {
        let artefact = derived_path(snapshot_path);
        if artefact.exists() {
            match Self::load(&artefact) {
                Ok(index) => {
                    info!("loaded contraction hierarchy from {}", artefact.display());
                    return index;
                }
                Err(err) => {
                    warn!(
                        "failed to load contraction hierarchy from {}: {err}; rebuilding",
                        artefact.display()
                    );
                }
            }
        }

        let index = Self::build(graph);
        match index.save(&artefact) {
            Ok(()) => info!("saved contraction hierarchy to {}", artefact.display()),
            Err(err) => warn!(
                "failed to save contraction hierarchy to {}: {err}",
                artefact.display()
            ),
        }
        index
    }
}

/// Artefact path for a snapshot: `CH_GEO_FILE` when set, otherwise the
/// snapshot base name with a `.ch_geo.bin` suffix.
#[must_use]
pub fn derived_path(snapshot_path: &Path) -> PathBuf {
    if let Ok(env_path) = std::env::var(CH_GEO_FILE_ENV) {
        if !env_path.is_empty() {
            return PathBuf::from(env_path);
        }
    }

    let name = snapshot_path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let base = name.strip_suffix(".graph.bin").unwrap_or(name.as_str());
    snapshot_path.with_file_name(format!("{base}.ch_geo.bin"))
}
