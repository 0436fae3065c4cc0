use camino::{Utf8Path, Utf8PathBuf};
use fieldcache_config::CACHE_FILE_EXTENSION;

use crate::CacheError;

/// File name for a service's cache. Deterministic in `service_id`, so a new download
/// always lands on top of the previous one.
pub fn cache_file_name(service_id: &str) -> Result<String, CacheError> {
    let trimmed = service_id.trim();
    if trimmed.is_empty() || trimmed.chars().all(|c| c == '.') {
        return Err(CacheError::InvalidServiceId(service_id.to_string()));
    }
    let stem: String = trimmed
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect();
    Ok(format!("{stem}.{CACHE_FILE_EXTENSION}"))
}

pub fn cache_path(root: &Utf8Path, service_id: &str) -> Result<Utf8PathBuf, CacheError> {
    Ok(root.join(cache_file_name(service_id)?))
}
