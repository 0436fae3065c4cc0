use camino::Utf8PathBuf;
use chrono::Utc;
use fieldcache_core::ports::{LocalCache, LocalCacheHandle};
use fieldcache_core::{LayerSyncOption, ServiceConfig, SyncDirection};
use tracing::{debug, error, info, warn};

use crate::engine::Collaborators;
use crate::error::PipelineError;

/// Pushes local edits for one service and pulls its remote changes.
///
/// Sync is not retried and cannot be interrupted once it starts: the work runs on its own
/// task, which also closes the cache.
#[derive(Clone)]
pub struct ServiceSyncJob {
    deps: Collaborators,
}

impl ServiceSyncJob {
    pub fn new(deps: Collaborators) -> Self {
        Self { deps }
    }

    pub fn collaborators(&self) -> &Collaborators {
        &self.deps
    }

    pub async fn sync(&self, service_id: &str) -> Result<bool, PipelineError> {
        let environment = self.deps.config.current_environment()?;
        let config = environment
            .service(service_id)
            .cloned()
            .ok_or_else(|| PipelineError::UnknownService(service_id.to_string()))?;
        self.sync_service(config).await
    }

    pub async fn sync_service(&self, config: ServiceConfig) -> Result<bool, PipelineError> {
        let path = self.deps.cache_path(&config.id)?;
        let exists = tokio::fs::try_exists(path.as_std_path())
            .await
            .map_err(fieldcache_core::StoreError::Io)?;
        if !exists {
            return Err(PipelineError::CacheNotFound(config.id));
        }

        let task = tokio::spawn(run(self.deps.clone(), config, path));
        task.await
            .map_err(|e| PipelineError::Task(e.to_string()))?
    }
}

async fn run(
    deps: Collaborators,
    config: ServiceConfig,
    path: Utf8PathBuf,
) -> Result<bool, PipelineError> {
    let handle = deps.store.open(&path).await?;
    let result = synchronize(&deps, &config, handle.clone()).await;
    deps.store.close(handle).await;
    match &result {
        Ok(ok) => info!(service = %config.id, ok, "sync finished"),
        Err(e) => error!(service = %config.id, "sync failed: {e}"),
    }
    result
}

async fn synchronize(
    deps: &Collaborators,
    config: &ServiceConfig,
    handle: LocalCacheHandle,
) -> Result<bool, PipelineError> {
    let layers = deps.store.layers(&handle).await?;
    if layers.is_empty() {
        return Err(PipelineError::EmptyCache(config.id.clone()));
    }

    let capability = deps.connector.load(&config.url).await?;
    let options = layers
        .iter()
        .map(|layer| LayerSyncOption {
            layer_id: layer.remote_layer_id,
            direction: SyncDirection::Bidirectional,
        })
        .collect();
    let params = capability.sync_parameters(SyncDirection::Bidirectional, options);
    debug!(service = %config.id, layers = params.layers.len(), "starting sync");

    let ok = capability.synchronize(params, handle.clone()).await?;
    if ok {
        // The exchange already happened; a stale timestamp does not undo it.
        if let Err(e) = handle.mark_synced(Utc::now()) {
            warn!(service = %config.id, "could not record sync time: {e}");
        }
    }
    Ok(ok)
}
