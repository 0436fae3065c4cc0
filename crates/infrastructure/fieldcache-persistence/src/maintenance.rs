use std::sync::atomic::{AtomicU64, Ordering};

use camino::{Utf8Path, Utf8PathBuf};
use chrono::{DateTime, Utc};

static QUARANTINED: AtomicU64 = AtomicU64::new(0);

/// `<file>.corrupt.<timestamp>.<pid>.<n>`, unique within and across processes.
fn quarantine_name(file_name: &str, at: DateTime<Utc>, pid: u32, n: u64) -> String {
    format!("{file_name}.corrupt.{}.{pid}.{n}", at.format("%Y%m%dT%H%M%S%.f"))
}

/// Moves an unreadable cache file aside so the next download can start clean.
/// Returns where the file went, or `None` if there was nothing to move.
pub fn quarantine_corrupt_file(path: &Utf8Path) -> std::io::Result<Option<Utf8PathBuf>> {
    if !path.exists() {
        return Ok(None);
    }
    let file_name = path.file_name().unwrap_or("cache.fcache");
    let target = path.with_file_name(quarantine_name(
        file_name,
        Utc::now(),
        std::process::id(),
        QUARANTINED.fetch_add(1, Ordering::Relaxed),
    ));
    std::fs::rename(path, &target)?;
    tracing::warn!(%path, quarantined = %target, "cache file unreadable, moved aside");
    Ok(Some(target))
}
