//! Address CSV sink for the two-pass extractor.
//!
//! Records are appended to a temporary plain CSV and only gzipped to the
//! final path once the whole pass succeeds; on failure both files are
//! removed so a broken run never leaves a plausible-looking artefact
//! behind.

use std::fs::File;
use std::path::{Path, PathBuf};

use thiserror::Error;

use roam_core::{unique_scratch_path, TagList};

use crate::gzip;

/// Kind of OSM object an address record came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectKind {
    Node,
    Way,
    Relation,
}

/// One harvested address.
#[derive(Debug, Clone, PartialEq)]
pub struct AddressRecord {
    pub id: i64,
    pub is_building: bool,
    pub is_addr: bool,
    pub kind: ObjectKind,
    pub lat: f64,
    pub lon: f64,
    pub city: String,
    /// Full tag map serialised as a JSON object.
    pub tags_json: String,
}

impl AddressRecord {
    /// Build a record from an object's tags and resolved location.
    #[must_use]
    pub fn from_tags(id: i64, kind: ObjectKind, lat: f64, lon: f64, tags: &TagList) -> Self {
        Self {
            id,
            is_building: tags.has("building"),
            is_addr: tags.has_key_prefix("addr:"),
            kind,
            lat,
            lon,
            city: tags.get("addr:city").unwrap_or_default().to_owned(),
            tags_json: tags.to_json(),
        }
    }
}

/// Report whether an object's tags qualify it as an address record.
#[must_use]
pub fn is_address_object(tags: &TagList) -> bool {
    tags.has_key_prefix("addr:") || tags.has("building")
}

/// Errors from the address CSV sink.
#[derive(Debug, Error)]
pub enum AddressCsvError {
    /// The temporary CSV could not be created.
    #[error("failed to create temporary address CSV at {path}: {source}")]
    CreateTemp {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    /// A row failed to serialise.
    #[error("failed to write address row to {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },
    /// Gzipping the finished CSV to its final path failed.
    #[error("failed to compress address CSV to {path}: {source}")]
    Compress {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// CSV sink writing `id,is_building,is_addr,is_relation,is_node,is_way,lat,lon,city,tags`.
#[derive(Debug)]
pub struct AddressCsvWriter {
    writer: csv::Writer<File>,
    temp_path: PathBuf,
    final_path: PathBuf,
    rows: u64,
}

impl AddressCsvWriter {
    /// Open a sink that will eventually materialise at `final_path`.
    pub fn create(final_path: &Path) -> Result<Self, AddressCsvError> {
        let temp_path = unique_scratch_path("addresses").with_extension("csv");

        let file = File::create(&temp_path).map_err(|source| AddressCsvError::CreateTemp {
            path: temp_path.clone(),
            source,
        })?;
        let mut writer = csv::Writer::from_writer(file);
        writer
            .write_record([
                "id",
                "is_building",
                "is_addr",
                "is_relation",
                "is_node",
                "is_way",
                "lat",
                "lon",
                "city",
                "tags",
            ])
            .map_err(|source| AddressCsvError::Write {
                path: temp_path.clone(),
                source,
            })?;

        Ok(Self {
            writer,
            temp_path,
            final_path: final_path.to_path_buf(),
            rows: 0,
        })
    }

    /// Append one address record.
    pub fn write(&mut self, record: &AddressRecord) -> Result<(), AddressCsvError> {
        let flag = |b: bool| if b { "1" } else { "0" };
        self.writer
            .write_record([
                record.id.to_string().as_str(),
                flag(record.is_building),
                flag(record.is_addr),
                flag(record.kind == ObjectKind::Relation),
                flag(record.kind == ObjectKind::Node),
                flag(record.kind == ObjectKind::Way),
                format!("{:.7}", record.lat).as_str(),
                format!("{:.7}", record.lon).as_str(),
                record.city.as_str(),
                record.tags_json.as_str(),
            ])
            .map_err(|source| AddressCsvError::Write {
                path: self.temp_path.clone(),
                source,
            })?;
        self.rows += 1;
        Ok(())
    }

    /// Number of rows written so far.
    #[must_use]
    pub fn rows(&self) -> u64 {
        self.rows
    }

    /// Flush, gzip to the final path and remove the temporary file.
    pub fn finish(mut self) -> Result<u64, AddressCsvError> {
        self.writer
            .flush()
            .map_err(|source| AddressCsvError::Compress {
                path: self.temp_path.clone(),
                source,
            })?;
        gzip::compress_file(&self.temp_path, &self.final_path).map_err(|source| {
            AddressCsvError::Compress {
                path: self.final_path.clone(),
                source,
            }
        })?;
        if let Err(err) = std::fs::remove_file(&self.temp_path) {
            log::debug!(
                "failed to remove temporary CSV {}: {err}",
                self.temp_path.display()
            );
        }
        Ok(self.rows)
    }

    /// Remove both the temporary and the final artefact after a failed pass.
    pub fn discard(mut self) {
        let _ = self.writer.flush();
        for path in [&self.temp_path, &self.final_path] {
            if path.exists() {
                if let Err(err) = std::fs::remove_file(path) {
                    log::debug!("failed to remove {}: {err}", path.display());
                }
            }
        }
    }
}
