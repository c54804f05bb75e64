//! Persisted graph snapshot artefact.
//!
//! The trimmed and connected stages exchange data through a versioned
//! binary container: a fixed header (magic + version) followed by a
//! `bincode` payload of minimal nodes (id + location, ascending ids as
//! received) and ways kept verbatim (id, tags, node refs). Synthetic
//! bridging ways carry negative ids and follow the original ways.

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use roam_core::TagList;

/// File identifier for graph snapshots.
pub const SNAPSHOT_MAGIC: [u8; 4] = *b"RGPH";

/// Supported snapshot format version.
pub const SNAPSHOT_VERSION: u16 = 1;

/// A minimal node: id and location, no tags.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SnapshotNode {
    pub id: i64,
    pub lat: f64,
    pub lon: f64,
}

/// A way kept verbatim from the source extract.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotWay {
    pub id: i64,
    pub tags: TagList,
    pub refs: Vec<i64>,
}

/// The trimmed routable graph.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GraphSnapshot {
    pub nodes: Vec<SnapshotNode>,
    pub ways: Vec<SnapshotWay>,
}

/// Errors when reading or writing a snapshot artefact.
#[derive(Debug, Error)]
pub enum SnapshotError {
    /// The artefact could not be read or written.
    #[error("snapshot I/O failed at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    /// The payload could not be encoded or decoded.
    #[error("failed to decode snapshot at {path}: {source}")]
    Codec {
        path: PathBuf,
        #[source]
        source: bincode::Error,
    },
    /// The file does not start with the snapshot magic.
    #[error("invalid snapshot magic: expected {expected:?}, found {found:?}")]
    InvalidMagic { expected: [u8; 4], found: [u8; 4] },
    /// The file uses an unsupported format version.
    #[error("unsupported snapshot version {found}; supported version is {supported}")]
    UnsupportedVersion { found: u16, supported: u16 },
}

impl GraphSnapshot {
    /// Number of nodes.
    #[must_use]
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Number of ways, synthetic bridges included.
    #[must_use]
    pub fn way_count(&self) -> usize {
        self.ways.len()
    }

    /// Persist the snapshot to `path`, truncating any existing file.
    pub fn write(&self, path: &Path) -> Result<(), SnapshotError> {
        let file = File::create(path).map_err(|source| SnapshotError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let mut writer = BufWriter::new(file);
        writer
            .write_all(&SNAPSHOT_MAGIC)
            .and_then(|()| writer.write_all(&SNAPSHOT_VERSION.to_le_bytes()))
            .map_err(|source| SnapshotError::Io {
                path: path.to_path_buf(),
                source,
            })?;
        bincode::serialize_into(&mut writer, self).map_err(|source| SnapshotError::Codec {
            path: path.to_path_buf(),
            source,
        })?;
        writer
            .into_inner()
            .map_err(|err| SnapshotError::Io {
                path: path.to_path_buf(),
                source: err.into_error(),
            })?
            .sync_all()
            .map_err(|source| SnapshotError::Io {
                path: path.to_path_buf(),
                source,
            })
    }

    /// Load a snapshot from `path`, validating magic and version.
    pub fn read(path: &Path) -> Result<Self, SnapshotError> {
        let file = File::open(path).map_err(|source| SnapshotError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let mut reader = BufReader::new(file);

        let mut magic = [0_u8; 4];
        reader
            .read_exact(&mut magic)
            .map_err(|source| SnapshotError::Io {
                path: path.to_path_buf(),
                source,
            })?;
        if magic != SNAPSHOT_MAGIC {
            return Err(SnapshotError::InvalidMagic {
                expected: SNAPSHOT_MAGIC,
                found: magic,
            });
        }

        let mut version_bytes = [0_u8; 2];
        reader
            .read_exact(&mut version_bytes)
            .map_err(|source| SnapshotError::Io {
                path: path.to_path_buf(),
                source,
            })?;
        let version = u16::from_le_bytes(version_bytes);
        if version != SNAPSHOT_VERSION {
            return Err(SnapshotError::UnsupportedVersion {
                found: version,
                supported: SNAPSHOT_VERSION,
            });
        }

        bincode::deserialize_from(&mut reader).map_err(|source| SnapshotError::Codec {
            path: path.to_path_buf(),
            source,
        })
    }
}
