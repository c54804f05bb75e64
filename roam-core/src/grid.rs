//! Disk-backed grid spatial index.
//!
//! Inserts append fixed-width records to one file per 0.01° cell; queries
//! expand square rings of cells around the query point and scan only
//! occupied cells. The ring expansion returns the best candidate of the
//! first ring that yields any hit, which may be marginally farther than a
//! candidate in the next ring; callers accepting that trade-off get strictly
//! bounded I/O.

use std::collections::HashSet;
use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::geodesy::haversine_m;

/// Cell edge length in degrees (roughly 1 km at the equator).
const CELL_SIZE_DEG: f64 = 0.01;

/// Widest ring ever examined, in cells.
const MAX_RADIUS_CELLS: i32 = 1000;

/// Default search radius in metres.
pub const DEFAULT_MAX_RADIUS_M: f64 = 10_000.0;

const RECORD_BYTES: usize = 24;

/// Errors from [`DiskGridIndex`] operations.
#[derive(Debug, Error)]
pub enum GridIndexError {
    /// The cell directory could not be created.
    #[error("failed to create grid directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    /// A cell file could not be read or appended.
    #[error("grid cell file I/O failed at {path}: {source}")]
    CellIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// A nearest-neighbour hit.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GridMatch {
    /// Id of the matched record.
    pub id: i64,
    /// Haversine distance from the query point, in metres.
    pub distance_m: f64,
}

/// Append-only grid of `(id, lat, lon)` records spilled to per-cell files.
#[derive(Debug)]
pub struct DiskGridIndex {
    dir: PathBuf,
    occupied: HashSet<(i32, i32)>,
    inserted: u64,
}

impl DiskGridIndex {
    /// Create the index under `dir` (created if missing).
    pub fn create(dir: &Path) -> Result<Self, GridIndexError> {
        std::fs::create_dir_all(dir).map_err(|source| GridIndexError::CreateDir {
            path: dir.to_path_buf(),
            source,
        })?;
        Ok(Self {
            dir: dir.to_path_buf(),
            occupied: HashSet::new(),
            inserted: 0,
        })
    }

    /// Append a record to its cell file.
    pub fn insert(&mut self, id: i64, lat: f64, lon: f64) -> Result<(), GridIndexError> {
        let cell = cell_of(lat, lon);
        let path = self.cell_path(cell);

        let mut buf = [0_u8; RECORD_BYTES];
        buf[..8].copy_from_slice(&id.to_le_bytes());
        buf[8..16].copy_from_slice(&lat.to_le_bytes());
        buf[16..].copy_from_slice(&lon.to_le_bytes());

        let mut file = OpenOptions::new()
            .append(true)
            .create(true)
            .open(&path)
            .map_err(|source| GridIndexError::CellIo {
                path: path.clone(),
                source,
            })?;
        file.write_all(&buf)
            .map_err(|source| GridIndexError::CellIo { path, source })?;

        self.occupied.insert(cell);
        self.inserted += 1;
        Ok(())
    }

    /// Number of inserted records.
    #[must_use]
    pub fn len(&self) -> u64 {
        self.inserted
    }

    /// Report whether nothing has been inserted.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inserted == 0
    }

    /// Nearest record within `max_radius_m` of `(lat, lon)`, if any.
    ///
    /// Rings are scanned outwards; once a ring produces a candidate within
    /// the radius, the best candidate of that ring is returned.
    pub fn find_nearest(
        &self,
        lat: f64,
        lon: f64,
        max_radius_m: f64,
    ) -> Result<Option<GridMatch>, GridIndexError> {
        let (center_lat, center_lon) = cell_of(lat, lon);
        let mut best: Option<GridMatch> = None;

        let mut radius_cells = 1_i32;
        while radius_cells <= MAX_RADIUS_CELLS {
            for dlat in -radius_cells..=radius_cells {
                for dlon in -radius_cells..=radius_cells {
                    // Inner cells were already scanned by the previous ring.
                    if radius_cells > 1
                        && dlat.abs() < radius_cells - 1
                        && dlon.abs() < radius_cells - 1
                    {
                        continue;
                    }

                    let cell = (center_lat + dlat, center_lon + dlon);
                    if !self.occupied.contains(&cell) {
                        continue;
                    }

                    for (id, rec_lat, rec_lon) in self.read_cell(cell)? {
                        let distance_m = haversine_m(lat, lon, rec_lat, rec_lon);
                        if distance_m <= max_radius_m
                            && best.map_or(true, |b| distance_m < b.distance_m)
                        {
                            best = Some(GridMatch { id, distance_m });
                        }
                    }
                }
            }

            if best.is_some() {
                return Ok(best);
            }
            radius_cells += 1;
        }

        Ok(None)
    }

    /// Remove every cell file and the directory itself.
    pub fn cleanup(mut self) -> Result<(), GridIndexError> {
        self.remove_files()
    }

    fn remove_files(&mut self) -> Result<(), GridIndexError> {
        for cell in std::mem::take(&mut self.occupied) {
            let path = self.cell_path(cell);
            if path.exists() {
                std::fs::remove_file(&path)
                    .map_err(|source| GridIndexError::CellIo { path, source })?;
            }
        }
        if self.dir.exists() {
            std::fs::remove_dir_all(&self.dir).map_err(|source| GridIndexError::CellIo {
                path: self.dir.clone(),
                source,
            })?;
        }
        Ok(())
    }

    fn cell_path(&self, (lat_cell, lon_cell): (i32, i32)) -> PathBuf {
        self.dir.join(format!("cell_{lat_cell}_{lon_cell}.bin"))
    }

    fn read_cell(&self, cell: (i32, i32)) -> Result<Vec<(i64, f64, f64)>, GridIndexError> {
        let path = self.cell_path(cell);
        if !path.exists() {
            return Ok(Vec::new());
        }

        let mut file = File::open(&path).map_err(|source| GridIndexError::CellIo {
            path: path.clone(),
            source,
        })?;
        let mut bytes = Vec::new();
        file.read_to_end(&mut bytes)
            .map_err(|source| GridIndexError::CellIo {
                path: path.clone(),
                source,
            })?;

        let mut records = Vec::with_capacity(bytes.len() / RECORD_BYTES);
        for chunk in bytes.chunks_exact(RECORD_BYTES) {
            let id = i64::from_le_bytes(chunk[..8].try_into().unwrap_or_default());
            let lat = f64::from_le_bytes(chunk[8..16].try_into().unwrap_or_default());
            let lon = f64::from_le_bytes(chunk[16..].try_into().unwrap_or_default());
            records.push((id, lat, lon));
        }
        Ok(records)
    }
}

impl Drop for DiskGridIndex {
    fn drop(&mut self) {
        if let Err(err) = self.remove_files() {
            log::debug!("failed to clean up grid index {}: {err}", self.dir.display());
        }
    }
}

fn cell_of(lat: f64, lon: f64) -> (i32, i32) {
    (
        (lat / CELL_SIZE_DEG).floor() as i32,
        (lon / CELL_SIZE_DEG).floor() as i32,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::{fixture, rstest};
    use tempfile::TempDir;

    #[fixture]
    fn grid() -> (TempDir, DiskGridIndex) {
        let dir = TempDir::new().expect("create temp dir");
        let grid = DiskGridIndex::create(&dir.path().join("grid")).expect("create grid");
        (dir, grid)
    }

    #[rstest]
    fn finds_record_in_query_cell(#[from(grid)] (_dir, mut grid): (TempDir, DiskGridIndex)) {
        grid.insert(1, 52.0905, 5.1210).expect("insert");
        let hit = grid
            .find_nearest(52.0907, 5.1214, DEFAULT_MAX_RADIUS_M)
            .expect("query")
            .expect("hit");
        assert_eq!(hit.id, 1);
        assert!(hit.distance_m < 50.0);
    }

    #[rstest]
    fn picks_closest_of_several(#[from(grid)] (_dir, mut grid): (TempDir, DiskGridIndex)) {
        grid.insert(1, 52.0950, 5.1214).expect("insert");
        grid.insert(2, 52.0910, 5.1214).expect("insert");
        grid.insert(3, 52.0800, 5.1214).expect("insert");
        let hit = grid
            .find_nearest(52.0907, 5.1214, DEFAULT_MAX_RADIUS_M)
            .expect("query")
            .expect("hit");
        assert_eq!(hit.id, 2);
    }

    #[rstest]
    fn expands_rings_to_distant_records(
        #[from(grid)] (_dir, mut grid): (TempDir, DiskGridIndex),
    ) {
        // ~5.5 km north of the query point, several rings out.
        grid.insert(7, 52.14, 5.12).expect("insert");
        let hit = grid
            .find_nearest(52.09, 5.12, DEFAULT_MAX_RADIUS_M)
            .expect("query")
            .expect("hit");
        assert_eq!(hit.id, 7);
        assert!((hit.distance_m - 5_560.0).abs() < 100.0, "{}", hit.distance_m);
    }

    #[rstest]
    fn respects_max_radius(#[from(grid)] (_dir, mut grid): (TempDir, DiskGridIndex)) {
        grid.insert(1, 52.2, 5.12).expect("insert");
        // Record is ~12 km away; a 10 km budget must miss it.
        let miss = grid.find_nearest(52.09, 5.12, DEFAULT_MAX_RADIUS_M).expect("query");
        assert!(miss.is_none());
    }

    #[rstest]
    fn empty_index_returns_none(#[from(grid)] (_dir, grid): (TempDir, DiskGridIndex)) {
        assert!(grid
            .find_nearest(52.09, 5.12, DEFAULT_MAX_RADIUS_M)
            .expect("query")
            .is_none());
    }

    #[rstest]
    fn negative_coordinates_use_floor_cells(
        #[from(grid)] (_dir, mut grid): (TempDir, DiskGridIndex),
    ) {
        grid.insert(4, -33.8688, -70.0).expect("insert");
        let hit = grid
            .find_nearest(-33.8690, -70.0005, DEFAULT_MAX_RADIUS_M)
            .expect("query")
            .expect("hit");
        assert_eq!(hit.id, 4);
    }

    #[rstest]
    fn cleanup_removes_directory() {
        let dir = TempDir::new().expect("create temp dir");
        let grid_dir = dir.path().join("grid");
        let mut grid = DiskGridIndex::create(&grid_dir).expect("create grid");
        grid.insert(1, 1.0, 1.0).expect("insert");
        assert!(grid_dir.exists());
        grid.cleanup().expect("cleanup");
        assert!(!grid_dir.exists());
    }
}
