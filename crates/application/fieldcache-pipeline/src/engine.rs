use std::sync::Arc;

use camino::{Utf8Path, Utf8PathBuf};
use fieldcache_core::ports::{
    ConnectivityProbe, LocalStore, RemoteSyncConnector, ServiceConfigurationProvider,
    StorageProbe,
};
use fieldcache_core::ConfigError;

use crate::catalog::DatasetCatalog;
use crate::download::{MultiServiceDownloadCoordinator, ServiceDownloadJob};
use crate::error::PipelineError;
use crate::preflight::PreflightChecker;
use crate::retry::RetryPolicy;
use crate::sync::{ServiceSyncJob, SyncAllCoordinator};

/// Everything the engine talks to, shared by every job it builds.
#[derive(Clone)]
pub struct Collaborators {
    pub connectivity: Arc<dyn ConnectivityProbe>,
    pub storage: Arc<dyn StorageProbe>,
    pub connector: Arc<dyn RemoteSyncConnector>,
    pub store: Arc<dyn LocalStore>,
    pub config: Arc<dyn ServiceConfigurationProvider>,
    /// Directory holding one cache file per service.
    pub cache_root: Utf8PathBuf,
}

impl Collaborators {
    pub fn cache_root(&self) -> &Utf8Path {
        &self.cache_root
    }

    /// Deterministic cache location for a service.
    pub fn cache_path(&self, service_id: &str) -> Result<Utf8PathBuf, PipelineError> {
        fieldcache_persistence::cache_path(&self.cache_root, service_id)
            .map_err(|e| PipelineError::Configuration(ConfigError::Invalid(e.to_string())))
    }

    pub fn preflight(&self) -> PreflightChecker {
        PreflightChecker::new(self.connectivity.clone(), self.storage.clone())
    }
}

/// Entry point for callers: hands out the download, sync and catalog components wired to one
/// set of collaborators.
#[derive(Clone)]
pub struct FieldCacheEngine {
    deps: Collaborators,
    retry: RetryPolicy,
}

impl FieldCacheEngine {
    pub fn new(deps: Collaborators) -> Self {
        Self {
            deps,
            retry: RetryPolicy::DEFAULT,
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn collaborators(&self) -> &Collaborators {
        &self.deps
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry
    }

    pub fn preflight(&self) -> PreflightChecker {
        self.deps.preflight()
    }

    pub fn download_job(&self) -> ServiceDownloadJob {
        ServiceDownloadJob::new(self.deps.clone(), self.retry)
    }

    pub fn download_coordinator(&self) -> MultiServiceDownloadCoordinator {
        MultiServiceDownloadCoordinator::new(self.download_job())
    }

    pub fn sync_job(&self) -> ServiceSyncJob {
        ServiceSyncJob::new(self.deps.clone())
    }

    pub fn sync_all_coordinator(&self) -> SyncAllCoordinator {
        SyncAllCoordinator::new(self.sync_job())
    }

    pub fn catalog(&self) -> DatasetCatalog {
        DatasetCatalog::new(self.deps.clone())
    }
}
