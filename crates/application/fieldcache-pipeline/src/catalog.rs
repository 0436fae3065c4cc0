use std::io::ErrorKind;

use fieldcache_core::ports::LocalCache;
use fieldcache_core::{StoreError, StoredDatasetInfo};
use tracing::{debug, warn};

use crate::engine::Collaborators;
use crate::error::PipelineError;

/// The set of usable local caches for the configured services.
#[derive(Clone)]
pub struct DatasetCatalog {
    deps: Collaborators,
}

impl DatasetCatalog {
    pub fn new(deps: Collaborators) -> Self {
        Self { deps }
    }

    /// Absent, zero-byte and zero-layer caches are skipped. A cache that exists but cannot be
    /// opened is an error.
    pub async fn list(&self) -> Result<Vec<StoredDatasetInfo>, PipelineError> {
        let environment = self.deps.config.current_environment()?;
        let mut datasets = Vec::new();

        for service in environment.services {
            let path = match self.deps.cache_path(&service.id) {
                Ok(path) => path,
                Err(e) => {
                    warn!(service = %service.id, "skipping service: {e}");
                    continue;
                }
            };
            let metadata = match tokio::fs::metadata(path.as_std_path()).await {
                Ok(m) => m,
                Err(e) if e.kind() == ErrorKind::NotFound => continue,
                Err(e) => return Err(StoreError::Io(e).into()),
            };
            if metadata.len() == 0 {
                warn!(service = %service.id, %path, "skipping zero-byte cache file");
                continue;
            }

            let handle = self.deps.store.open(&path).await?;
            let layers = self.deps.store.layers(&handle).await;
            let last_sync = handle.last_sync();
            self.deps.store.close(handle).await;
            let layers = layers?;
            if layers.is_empty() {
                debug!(service = %service.id, "skipping cache without layers");
                continue;
            }

            datasets.push(StoredDatasetInfo {
                file_name: path.file_name().unwrap_or_default().to_string(),
                service_id: service.id,
                service_name: service.name,
                layer_count: layers.len(),
                file_size_bytes: metadata.len(),
                last_sync_timestamp: last_sync?,
                display_on_map: service.display_on_map,
            });
        }
        Ok(datasets)
    }

    /// Deletes a service's cache file. Missing files are fine.
    pub async fn remove(&self, service_id: &str) -> Result<(), PipelineError> {
        let path = self.deps.cache_path(service_id)?;
        self.deps.store.remove(&path).await?;
        Ok(())
    }
}
