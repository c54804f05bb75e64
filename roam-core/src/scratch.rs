//! Process-unique scratch paths for pipeline temporaries.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

static SEQUENCE: AtomicU64 = AtomicU64::new(0);

/// A path under the system temp directory that no other pipeline in this
/// process (or a concurrently running one) will pick: the name combines the
/// epoch seconds, the process id and a per-process sequence number.
#[must_use]
pub fn unique_scratch_path(prefix: &str) -> PathBuf {
    let epoch = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    let sequence = SEQUENCE.fetch_add(1, Ordering::Relaxed);
    std::env::temp_dir().join(format!(
        "{prefix}_{epoch}_{}_{sequence}",
        std::process::id()
    ))
}
