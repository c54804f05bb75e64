//! Sparse disk-backed node-location store.
//!
//! Maps an unsigned node id to a WGS84 coordinate through a fixed-slot file:
//! slot `id` lives at byte offset `8 * id` and holds two biased
//! nano-degree (1e-7) fields. Unwritten slots read back as zero bytes, which
//! the bias makes unambiguous, so the file behaves as a sparse map whose
//! resident size is bounded by the pages actually touched.

use std::fs::{File, OpenOptions};
use std::os::unix::fs::FileExt;
use std::path::{Path, PathBuf};

use thiserror::Error;

const SLOT_BYTES: u64 = 8;

// Bias keeps every encoded field non-zero: latitudes span ±0.9e9
// nano-degrees and longitudes ±1.8e9, so adding 2e9 stays within u32.
const COORD_BIAS: i64 = 2_000_000_000;
const NANO_DEG: f64 = 1e7;

/// Errors from [`NodeLocationStore`] operations.
#[derive(Debug, Error)]
pub enum NodeStoreError {
    /// The backing file could not be created.
    #[error("failed to create node-location store at {path}: {source}")]
    Create {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    /// A positioned read or write failed.
    #[error("node-location store I/O failed at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    /// The coordinate lies outside the WGS84 domain.
    #[error("coordinate ({lat}, {lon}) is outside the WGS84 domain")]
    InvalidCoordinate { lat: f64, lon: f64 },
}

/// Disk-backed sparse map from node id to `(lat, lon)`.
///
/// `set` is write-once-latest-wins; `get` is O(1) given OS page cache. The
/// backing file is removed on drop.
///
/// # Examples
/// ```no_run
/// use std::path::Path;
/// use roam_core::NodeLocationStore;
///
/// # fn main() -> Result<(), roam_core::NodeStoreError> {
/// let mut store = NodeLocationStore::create(Path::new("/tmp/nodes.bin"))?;
/// store.set(17, 52.0907, 5.1214)?;
/// assert!(store.get(17)?.is_some());
/// assert!(store.get(18)?.is_none());
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct NodeLocationStore {
    file: File,
    path: PathBuf,
    len_bytes: u64,
    entries: u64,
}

impl NodeLocationStore {
    /// Create (or truncate) the store at `path`.
    pub fn create(path: &Path) -> Result<Self, NodeStoreError> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)
            .map_err(|source| NodeStoreError::Create {
                path: path.to_path_buf(),
                source,
            })?;
        Ok(Self {
            file,
            path: path.to_path_buf(),
            len_bytes: 0,
            entries: 0,
        })
    }

    /// Record the location of `id`. A later `set` for the same id wins.
    pub fn set(&mut self, id: u64, lat: f64, lon: f64) -> Result<(), NodeStoreError> {
        if !crate::geodesy::is_valid_coordinate(lat, lon) {
            return Err(NodeStoreError::InvalidCoordinate { lat, lon });
        }

        let lat_enc = (((lat * NANO_DEG).round() as i64) + COORD_BIAS) as u32;
        let lon_enc = (((lon * NANO_DEG).round() as i64) + COORD_BIAS) as u32;
        let mut buf = [0_u8; SLOT_BYTES as usize];
        buf[..4].copy_from_slice(&lat_enc.to_le_bytes());
        buf[4..].copy_from_slice(&lon_enc.to_le_bytes());

        let offset = id * SLOT_BYTES;
        self.file
            .write_all_at(&buf, offset)
            .map_err(|source| NodeStoreError::Io {
                path: self.path.clone(),
                source,
            })?;
        self.len_bytes = self.len_bytes.max(offset + SLOT_BYTES);
        self.entries += 1;
        Ok(())
    }

    /// Location of `id`, or `None` when never set.
    pub fn get(&self, id: u64) -> Result<Option<(f64, f64)>, NodeStoreError> {
        let offset = id * SLOT_BYTES;
        if offset + SLOT_BYTES > self.len_bytes {
            return Ok(None);
        }

        let mut buf = [0_u8; SLOT_BYTES as usize];
        self.file
            .read_exact_at(&mut buf, offset)
            .map_err(|source| NodeStoreError::Io {
                path: self.path.clone(),
                source,
            })?;

        let lat_enc = u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]);
        let lon_enc = u32::from_le_bytes([buf[4], buf[5], buf[6], buf[7]]);
        if lat_enc == 0 && lon_enc == 0 {
            return Ok(None);
        }

        let lat = (i64::from(lat_enc) - COORD_BIAS) as f64 / NANO_DEG;
        let lon = (i64::from(lon_enc) - COORD_BIAS) as f64 / NANO_DEG;
        Ok(Some((lat, lon)))
    }

    /// Number of `set` calls recorded (re-sets counted again).
    #[must_use]
    pub fn entries(&self) -> u64 {
        self.entries
    }

    /// Path of the backing file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for NodeLocationStore {
    fn drop(&mut self) {
        if let Err(err) = std::fs::remove_file(&self.path) {
            log::debug!(
                "failed to remove node-location store {}: {err}",
                self.path.display()
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::{fixture, rstest};
    use tempfile::TempDir;

    #[fixture]
    fn store() -> (TempDir, NodeLocationStore) {
        let dir = TempDir::new().expect("create temp dir");
        let store =
            NodeLocationStore::create(&dir.path().join("nodes.bin")).expect("create store");
        (dir, store)
    }

    #[rstest]
    fn round_trips_coordinates(#[from(store)] (_dir, mut store): (TempDir, NodeLocationStore)) {
        store.set(5, 52.0907, 5.1214).expect("set");
        let (lat, lon) = store.get(5).expect("get").expect("present");
        assert!((lat - 52.0907).abs() < 1e-7);
        assert!((lon - 5.1214).abs() < 1e-7);
    }

    #[rstest]
    fn absent_ids_read_as_none(#[from(store)] (_dir, mut store): (TempDir, NodeLocationStore)) {
        store.set(1_000, 1.0, 1.0).expect("set");
        // Hole inside the written range and an id beyond the file end.
        assert!(store.get(500).expect("get").is_none());
        assert!(store.get(2_000).expect("get").is_none());
    }

    #[rstest]
    fn null_island_is_distinguishable_from_absence(
        #[from(store)] (_dir, mut store): (TempDir, NodeLocationStore),
    ) {
        store.set(3, 0.0, 0.0).expect("set");
        assert_eq!(store.get(3).expect("get"), Some((0.0, 0.0)));
        assert!(store.get(2).expect("get").is_none());
    }

    #[rstest]
    fn latest_set_wins(#[from(store)] (_dir, mut store): (TempDir, NodeLocationStore)) {
        store.set(9, 1.0, 2.0).expect("set");
        store.set(9, 3.0, 4.0).expect("set");
        assert_eq!(store.get(9).expect("get"), Some((3.0, 4.0)));
    }

    #[rstest]
    fn rejects_out_of_domain_coordinates(
        #[from(store)] (_dir, mut store): (TempDir, NodeLocationStore),
    ) {
        let err = store.set(1, 95.0, 0.0).expect_err("out of domain");
        assert!(matches!(err, NodeStoreError::InvalidCoordinate { .. }));
    }

    #[rstest]
    fn extreme_longitudes_round_trip(
        #[from(store)] (_dir, mut store): (TempDir, NodeLocationStore),
    ) {
        store.set(1, -90.0, -180.0).expect("set");
        store.set(2, 90.0, 180.0).expect("set");
        assert_eq!(store.get(1).expect("get"), Some((-90.0, -180.0)));
        assert_eq!(store.get(2).expect("get"), Some((90.0, 180.0)));
    }

    #[rstest]
    fn backing_file_is_removed_on_drop() {
        let dir = TempDir::new().expect("create temp dir");
        let path = dir.path().join("nodes.bin");
        {
            let mut store = NodeLocationStore::create(&path).expect("create store");
            store.set(1, 1.0, 1.0).expect("set");
            assert!(path.exists());
        }
        assert!(!path.exists());
    }
}
