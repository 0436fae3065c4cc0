use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use camino::Utf8PathBuf;
use fieldcache_config::{DEFAULT_CONNECTIVITY_PROBE_URL, EXTRACTION_POLL_INTERVAL};
use fieldcache_infra::{
    default_cache_root, default_http_client, DiskStorageProbe, FeatureServiceConnector,
    HttpConnectivityProbe, JsonEnvironmentProvider,
};
use fieldcache_persistence::RedbCacheStore;
use fieldcache_pipeline::{Collaborators, FieldCacheEngine, RetryPolicy};

/// Where the CLI finds its configuration and keeps its caches.
#[derive(Debug, Clone)]
pub struct EngineOptions {
    /// `environment.json`; the platform config dir when unset.
    pub environment: Option<Utf8PathBuf>,
    pub cache_dir: Option<Utf8PathBuf>,
    pub retry: RetryPolicy,
    pub probe_url: String,
    pub poll_interval: Duration,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            environment: None,
            cache_dir: None,
            retry: RetryPolicy::DEFAULT,
            probe_url: DEFAULT_CONNECTIVITY_PROBE_URL.to_string(),
            poll_interval: EXTRACTION_POLL_INTERVAL,
        }
    }
}

pub fn build_engine(options: &EngineOptions) -> Result<FieldCacheEngine> {
    let client = default_http_client().context("Failed to build HTTP client")?;

    let provider = match &options.environment {
        Some(path) => JsonEnvironmentProvider::new(path.clone()),
        None => JsonEnvironmentProvider::from_default_location()
            .context("Failed to locate environment configuration")?,
    };
    let cache_root = match &options.cache_dir {
        Some(dir) => dir.clone(),
        None => default_cache_root().context("Failed to locate cache directory")?,
    };
    std::fs::create_dir_all(&cache_root)
        .with_context(|| format!("Failed to create cache directory {}", cache_root))?;

    let deps = Collaborators {
        connectivity: Arc::new(HttpConnectivityProbe::new(
            client.clone(),
            options.probe_url.clone(),
        )),
        storage: Arc::new(DiskStorageProbe::new(cache_root.clone())),
        connector: Arc::new(
            FeatureServiceConnector::new(client).with_poll_interval(options.poll_interval),
        ),
        store: Arc::new(RedbCacheStore::new()),
        config: Arc::new(provider),
        cache_root,
    };
    Ok(FieldCacheEngine::new(deps).with_retry_policy(options.retry))
}
