//! Address table with spatial lookup and deterministic samplers.
//!
//! Addresses load from `id,lat,lon,street,house_number,postcode,city` CSV
//! (gzipped when the path ends in `.gz`). Internal ids are dense row
//! indices, unrelated to OSM ids. The store is immutable after load and
//! shared read-only by every request handler.

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};

use flate2::read::GzDecoder;
use log::{info, warn};
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::Serialize;
use thiserror::Error;

use crate::geo_index::GeoPointIndex;

/// Search radius for [`AddressStore::closest_to`], in metres.
const CLOSEST_RADIUS_M: f64 = 5_000.0;

/// One loaded address.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Address {
    pub id: u32,
    pub lat: f64,
    pub lon: f64,
    pub street: String,
    pub house_number: String,
    pub postcode: String,
    pub city: String,
}

/// Bounding box over all loaded addresses.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Bbox {
    pub min_lat: f64,
    pub max_lat: f64,
    pub min_lon: f64,
    pub max_lon: f64,
}

/// Page description returned by [`AddressStore::sample`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Pagination {
    pub page_num: u32,
    pub page_size: u32,
    pub total_requested: u32,
    pub returned: u32,
}

/// Errors from loading or querying the address store.
#[derive(Debug, Error)]
pub enum AddressStoreError {
    /// The CSV file could not be opened or read.
    #[error("failed to read address CSV at {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    /// A CSV record failed to parse at all.
    #[error("failed to parse address CSV at {path}: {source}")]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },
    /// Invalid sampling parameters.
    #[error("{message}")]
    InvalidParameter { message: String },
}

/// Immutable address table plus spatial index.
pub struct AddressStore {
    addresses: Vec<Address>,
    index: GeoPointIndex,
    skipped_rows: u64,
}

impl AddressStore {
    /// Load a CSV or CSV.gz file.
    ///
    /// A header row is skipped when its first field is non-numeric. Rows
    /// with unparsable coordinates are counted and skipped.
    pub fn load_csv(path: &Path) -> Result<Self, AddressStoreError> {
        let file = File::open(path).map_err(|source| AddressStoreError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let reader: Box<dyn Read> = if path.extension().is_some_and(|ext| ext == "gz") {
            Box::new(GzDecoder::new(BufReader::new(file)))
        } else {
            Box::new(BufReader::new(file))
        };

        let mut csv_reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .from_reader(reader);

        let mut addresses = Vec::new();
        let mut skipped_rows = 0_u64;
        for (row_index, record) in csv_reader.records().enumerate() {
            let record = record.map_err(|source| AddressStoreError::Csv {
                path: path.to_path_buf(),
                source,
            })?;

            let first = record.get(0).unwrap_or_default();
            if row_index == 0 && first.parse::<f64>().is_err() {
                continue;
            }

            let lat = record.get(1).unwrap_or_default().parse::<f64>();
            let lon = record.get(2).unwrap_or_default().parse::<f64>();
            let (Ok(lat), Ok(lon)) = (lat, lon) else {
                skipped_rows += 1;
                continue;
            };

            let field = |i: usize| record.get(i).unwrap_or_default().to_owned();
            addresses.push(Address {
                id: addresses.len() as u32,
                lat,
                lon,
                street: field(3),
                house_number: field(4),
                postcode: field(5),
                city: field(6),
            });
        }

        if skipped_rows > 0 {
            warn!("skipped {skipped_rows} address rows with bad coordinates");
        }
        info!("loaded {} addresses from {}", addresses.len(), path.display());

        let index = GeoPointIndex::build(
            addresses
                .iter()
                .map(|address| (address.id, address.lat, address.lon)),
        );
        Ok(Self {
            addresses,
            index,
            skipped_rows,
        })
    }

    /// Number of loaded addresses.
    #[must_use]
    pub fn len(&self) -> usize {
        self.addresses.len()
    }

    /// Report whether no address loaded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.addresses.is_empty()
    }

    /// Rows skipped during load.
    #[must_use]
    pub fn skipped_rows(&self) -> u64 {
        self.skipped_rows
    }

    /// Bounding box over all addresses, `None` when empty.
    #[must_use]
    pub fn bbox(&self) -> Option<Bbox> {
        let first = self.addresses.first()?;
        let mut bbox = Bbox {
            min_lat: first.lat,
            max_lat: first.lat,
            min_lon: first.lon,
            max_lon: first.lon,
        };
        for address in &self.addresses[1..] {
            bbox.min_lat = bbox.min_lat.min(address.lat);
            bbox.max_lat = bbox.max_lat.max(address.lat);
            bbox.min_lon = bbox.min_lon.min(address.lon);
            bbox.max_lon = bbox.max_lon.max(address.lon);
        }
        Some(bbox)
    }

    /// Closest address within five kilometres.
    #[must_use]
    pub fn closest_to(&self, lat: f64, lon: f64) -> Option<&Address> {
        self.index
            .find_nearest_within(lat, lon, CLOSEST_RADIUS_M)
            .map(|(id, _)| &self.addresses[id as usize])
    }

    /// Deterministic sample page.
    ///
    /// The full index array is shuffled with `seed`, the first `number`
    /// entries kept and sorted ascending; the requested page of that fixed
    /// sample is returned. Page concatenation therefore reconstructs the
    /// whole sample for the same seed.
    pub fn sample(
        &self,
        number: u32,
        seed: u64,
        page_size: u32,
        page_num: u32,
    ) -> Result<(Vec<&Address>, Pagination), AddressStoreError> {
        if number == 0 {
            return Err(AddressStoreError::InvalidParameter {
                message: "number must be greater than 0".to_owned(),
            });
        }
        if page_size == 0 {
            return Err(AddressStoreError::InvalidParameter {
                message: "page_size must be greater than 0".to_owned(),
            });
        }

        let mut indices: Vec<u32> = (0..self.addresses.len() as u32).collect();
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        indices.shuffle(&mut rng);
        indices.truncate(number as usize);
        indices.sort_unstable();

        let start = (page_num as usize).saturating_mul(page_size as usize);
        let end = start.saturating_add(page_size as usize).min(indices.len());
        let page: Vec<&Address> = if start < indices.len() {
            indices[start..end]
                .iter()
                .map(|&i| &self.addresses[i as usize])
                .collect()
        } else {
            Vec::new()
        };

        let pagination = Pagination {
            page_num,
            page_size,
            total_requested: number,
            returned: page.len() as u32,
        };
        Ok((page, pagination))
    }

    /// Uniformly random address within the annulus `[min_km, max_km)` of
    /// the centre, `None` when the ring holds no address.
    pub fn uniform_in_annulus(
        &self,
        center_lat: f64,
        center_lon: f64,
        min_km: f64,
        max_km: f64,
        seed: u64,
    ) -> Result<Option<&Address>, AddressStoreError> {
        if !(min_km >= 0.0 && max_km > min_km) {
            return Err(AddressStoreError::InvalidParameter {
                message: "annulus requires min_distance >= 0 and max_distance > min_distance"
                    .to_owned(),
            });
        }

        let min_m = min_km * 1000.0;
        let max_m = max_km * 1000.0;
        let candidates: Vec<u32> = self
            .index
            .find_all_within(center_lat, center_lon, max_m)
            .into_iter()
            .filter(|&(_, distance_m)| distance_m >= min_m)
            .map(|(id, _)| id)
            .collect();
        if candidates.is_empty() {
            return Ok(None);
        }

        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let pick = candidates[rng.gen_range(0..candidates.len())];
        Ok(Some(&self.addresses[pick as usize]))
    }
}
