use camino::{Utf8Path, Utf8PathBuf};
use fieldcache_config::DEFAULT_ESTIMATED_SERVICE_BYTES;
use fieldcache_core::ports::StorageProbe;
use fieldcache_core::{ServiceConfig, StorageStatus};

/// Free space on the volume holding the cache root.
#[derive(Debug, Clone)]
pub struct DiskStorageProbe {
    root: Utf8PathBuf,
    per_service_estimate: u64,
}

impl DiskStorageProbe {
    pub fn new(root: impl Into<Utf8PathBuf>) -> Self {
        Self {
            root: root.into(),
            per_service_estimate: DEFAULT_ESTIMATED_SERVICE_BYTES,
        }
    }

    pub fn with_per_service_estimate(mut self, bytes: u64) -> Self {
        self.per_service_estimate = bytes;
        self
    }

    pub fn available_bytes(&self) -> std::io::Result<u64> {
        fs2::available_space(nearest_existing(&self.root).as_std_path())
    }
}

/// The cache root may not exist yet; measure the closest ancestor that does.
fn nearest_existing(path: &Utf8Path) -> &Utf8Path {
    let mut current = path;
    while !current.exists() {
        match current.parent() {
            Some(parent) if !parent.as_str().is_empty() => current = parent,
            _ => return Utf8Path::new("."),
        }
    }
    current
}

#[async_trait::async_trait]
impl StorageProbe for DiskStorageProbe {
    fn estimate_required_bytes(&self, _config: &ServiceConfig) -> u64 {
        self.per_service_estimate
    }

    async fn check_availability(&self, required_bytes: u64) -> StorageStatus {
        let probe = self.clone();
        match tokio::task::spawn_blocking(move || probe.available_bytes()).await {
            Ok(Ok(available)) => StorageStatus::assess(available, required_bytes),
            Ok(Err(e)) => {
                tracing::warn!(root = %self.root, "cannot measure free space: {e}");
                StorageStatus::Sufficient
            }
            Err(e) => {
                tracing::warn!(root = %self.root, "free space check panicked: {e}");
                StorageStatus::Sufficient
            }
        }
    }
}
