//! Gzip helper for finalising CSV artefacts.

use std::fs::File;
use std::io::{self, BufReader, BufWriter};
use std::path::Path;

use flate2::write::GzEncoder;
use flate2::Compression;

/// Compress `src` into `dst` as gzip, truncating any existing `dst`.
pub fn compress_file(src: &Path, dst: &Path) -> io::Result<()> {
    let mut reader = BufReader::new(File::open(src)?);
    let writer = BufWriter::new(File::create(dst)?);
    let mut encoder = GzEncoder::new(writer, Compression::default());
    io::copy(&mut reader, &mut encoder)?;
    encoder.finish()?.into_inner()?.sync_all()
}
