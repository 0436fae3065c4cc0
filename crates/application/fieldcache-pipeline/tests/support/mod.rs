#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use camino::{Utf8Path, Utf8PathBuf};
use chrono::{DateTime, Utc};
use fieldcache_core::ports::{
    ConnectivityProbe, ExtractionJob, LocalCache, LocalCacheHandle, LocalStore,
    RemoteSyncCapability, RemoteSyncConnector, ServiceConfigurationProvider, StorageProbe,
};
use fieldcache_core::{
    ConfigError, Environment, Extent, ExtractionParameters, LayerDescriptor, LayerEdits,
    RemoteError, ServiceConfig, StorageStatus, StoreError, SyncParameters,
};
use fieldcache_persistence::{cache_path, RedbCacheStore};
use fieldcache_pipeline::{Collaborators, FieldCacheEngine, RetryPolicy};
use tokio::sync::watch;

pub const MIB: u64 = 1024 * 1024;

pub fn service(id: &str) -> ServiceConfig {
    ServiceConfig {
        id: id.to_string(),
        name: format!("Service {id}"),
        url: format!("https://example.test/{id}/FeatureServer"),
        display_on_map: true,
    }
}

pub fn extent() -> Extent {
    Extent::new(-1.0, -1.0, 1.0, 1.0, 4326).unwrap()
}

pub fn fast_retry() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 3,
        initial_delay: Duration::from_millis(1),
        max_delay: Duration::from_millis(5),
        backoff_factor: 2.0,
    }
}

/// Polls until `flag` is set or a few seconds pass.
pub async fn eventually(flag: &AtomicBool) -> bool {
    for _ in 0..500 {
        if flag.load(Ordering::SeqCst) {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    flag.load(Ordering::SeqCst)
}

pub struct FakeConnectivity {
    online: AtomicBool,
    state: watch::Sender<bool>,
}

impl FakeConnectivity {
    pub fn new(online: bool) -> Self {
        Self {
            online: AtomicBool::new(online),
            state: watch::Sender::new(online),
        }
    }

    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
        self.state.send_replace(online);
    }
}

#[async_trait]
impl ConnectivityProbe for FakeConnectivity {
    async fn is_currently_connected(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }

    fn subscribe(&self) -> watch::Receiver<bool> {
        self.state.subscribe()
    }
}

pub struct FakeStorage {
    pub available: AtomicU64,
    pub per_service: u64,
}

#[async_trait]
impl StorageProbe for FakeStorage {
    fn estimate_required_bytes(&self, _config: &ServiceConfig) -> u64 {
        self.per_service
    }

    async fn check_availability(&self, required_bytes: u64) -> StorageStatus {
        StorageStatus::assess(self.available.load(Ordering::SeqCst), required_bytes)
    }
}

/// How a fake extraction behaves once started.
#[derive(Clone)]
pub enum Extraction {
    /// Writes a cache with these `(layer id, feature count)` layers.
    Succeed(Vec<(u32, usize)>),
    FailAt(u8, fn() -> RemoteError),
    /// Reports a little progress, then waits until cancelled.
    Hang,
}

pub struct FakeCapability {
    service_id: String,
    store: RedbCacheStore,
    extraction: Extraction,
    sync_outcome: fn() -> Result<bool, RemoteError>,
    pub started: AtomicBool,
    pub cancelled: Arc<AtomicBool>,
    pub last_params: Mutex<Option<ExtractionParameters>>,
    pub sync_calls: Mutex<Vec<SyncParameters>>,
}

impl FakeCapability {
    pub fn new(service_id: &str, extraction: Extraction) -> Self {
        Self {
            service_id: service_id.to_string(),
            store: RedbCacheStore::new(),
            extraction,
            sync_outcome: || Ok(true),
            started: AtomicBool::new(false),
            cancelled: Arc::new(AtomicBool::new(false)),
            last_params: Mutex::new(None),
            sync_calls: Mutex::new(Vec::new()),
        }
    }

    pub fn with_sync_outcome(mut self, outcome: fn() -> Result<bool, RemoteError>) -> Self {
        self.sync_outcome = outcome;
        self
    }
}

struct SetOnDrop(Arc<AtomicBool>);

impl Drop for SetOnDrop {
    fn drop(&mut self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

fn write_cache(
    store: &RedbCacheStore,
    path: &Utf8Path,
    service_id: &str,
    layers: &[(u32, usize)],
) -> Result<(), StoreError> {
    let cache = store.create(path, service_id)?;
    for &(id, count) in layers {
        let features: Vec<_> = (1..=count as i64)
            .map(|oid| fieldcache_core::Feature {
                object_id: oid,
                attributes: serde_json::Map::new(),
                geometry: None,
            })
            .collect();
        let descriptor = LayerDescriptor {
            remote_layer_id: id,
            name: format!("layer {id}"),
            feature_count: 0,
        };
        cache.write_layer(&descriptor, &features)?;
    }
    cache.set_sync_token(&format!("replica-{service_id}"))?;
    drop(cache);
    store.release(path);
    Ok(())
}

#[async_trait]
impl RemoteSyncCapability for FakeCapability {
    async fn extraction_parameters(
        &self,
        extent: &Extent,
    ) -> Result<ExtractionParameters, RemoteError> {
        Ok(ExtractionParameters {
            extent: *extent,
            layer_ids: vec![0],
            include_attachments: true,
            out_wkid: 3857,
        })
    }

    fn start_extraction(
        &self,
        service_id: &str,
        params: ExtractionParameters,
        destination: &Utf8Path,
    ) -> ExtractionJob {
        self.started.store(true, Ordering::SeqCst);
        *self.last_params.lock().unwrap() = Some(params);

        // Registered for one service; anything else means the id was not passed through.
        let extraction = if service_id == self.service_id {
            self.extraction.clone()
        } else {
            Extraction::FailAt(0, || RemoteError::Protocol("extraction for the wrong service".into()))
        };
        let store = self.store.clone();
        let service_id = service_id.to_owned();
        let destination = destination.to_owned();
        let cancelled = self.cancelled.clone();

        ExtractionJob::spawn(move |reporter| async move {
            match extraction {
                Extraction::Succeed(layers) => {
                    reporter.progress(10).await;
                    reporter.progress(60).await;
                    write_cache(&store, &destination, &service_id, &layers)?;
                    reporter.progress(100).await;
                    Ok(())
                }
                Extraction::FailAt(percent, error) => {
                    reporter.progress(percent).await;
                    Err(error())
                }
                Extraction::Hang => {
                    let _guard = SetOnDrop(cancelled);
                    reporter.progress(5).await;
                    std::future::pending::<()>().await;
                    Ok(())
                }
            }
        })
    }

    async fn synchronize(
        &self,
        params: SyncParameters,
        _cache: LocalCacheHandle,
    ) -> Result<bool, RemoteError> {
        self.sync_calls.lock().unwrap().push(params);
        (self.sync_outcome)()
    }
}

#[derive(Default)]
pub struct FakeConnector {
    services: Mutex<HashMap<String, Arc<FakeCapability>>>,
    failures: Mutex<VecDeque<RemoteError>>,
    pub load_calls: AtomicUsize,
}

impl FakeConnector {
    pub fn register(&self, config: &ServiceConfig, capability: FakeCapability) -> Arc<FakeCapability> {
        let capability = Arc::new(capability);
        self.services
            .lock()
            .unwrap()
            .insert(config.url.clone(), capability.clone());
        capability
    }

    /// Queues failures returned by the next `load` calls.
    pub fn fail_next(&self, error: RemoteError) {
        self.failures.lock().unwrap().push_back(error);
    }

    pub fn load_calls(&self) -> usize {
        self.load_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RemoteSyncConnector for FakeConnector {
    async fn load(&self, service_url: &str) -> Result<Arc<dyn RemoteSyncCapability>, RemoteError> {
        self.load_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(error) = self.failures.lock().unwrap().pop_front() {
            return Err(error);
        }
        let capability = self.services.lock().unwrap().get(service_url).cloned();
        match capability {
            Some(capability) => {
                let capability: Arc<dyn RemoteSyncCapability> = capability;
                Ok(capability)
            }
            None => Err(RemoteError::Http {
                status: 404,
                message: "not found".into(),
            }),
        }
    }
}

/// Counts opens and closes around the real redb store.
#[derive(Default)]
pub struct CountingStore {
    inner: RedbCacheStore,
    pub opens: AtomicUsize,
    pub closes: AtomicUsize,
    /// Hands out caches whose sync timestamp cannot be written.
    pub reject_sync_time: AtomicBool,
}

/// Delegates to a real cache but refuses `mark_synced`.
#[derive(Debug)]
struct NoSyncTimeCache(LocalCacheHandle);

impl LocalCache for NoSyncTimeCache {
    fn path(&self) -> &Utf8Path {
        self.0.path()
    }
    fn layers(&self) -> Result<Vec<LayerDescriptor>, StoreError> {
        self.0.layers()
    }
    fn last_sync(&self) -> Result<Option<DateTime<Utc>>, StoreError> {
        self.0.last_sync()
    }
    fn mark_synced(&self, _at: DateTime<Utc>) -> Result<(), StoreError> {
        Err(StoreError::Backend("disk full".into()))
    }
    fn sync_token(&self) -> Result<Option<String>, StoreError> {
        self.0.sync_token()
    }
    fn pending_edits(&self) -> Result<Vec<LayerEdits>, StoreError> {
        self.0.pending_edits()
    }
    fn clear_pending_edits(&self, layer_ids: &[u32]) -> Result<(), StoreError> {
        self.0.clear_pending_edits(layer_ids)
    }
    fn apply_changes(&self, changes: &[LayerEdits]) -> Result<(), StoreError> {
        self.0.apply_changes(changes)
    }
}

#[async_trait]
impl LocalStore for CountingStore {
    async fn open(&self, path: &Utf8Path) -> Result<LocalCacheHandle, StoreError> {
        let handle = self.inner.open(path).await?;
        self.opens.fetch_add(1, Ordering::SeqCst);
        if self.reject_sync_time.load(Ordering::SeqCst) {
            return Ok(Arc::new(NoSyncTimeCache(handle)));
        }
        Ok(handle)
    }

    async fn close(&self, handle: LocalCacheHandle) {
        self.closes.fetch_add(1, Ordering::SeqCst);
        self.inner.close(handle).await;
    }

    async fn remove(&self, path: &Utf8Path) -> Result<(), StoreError> {
        self.inner.remove(path).await
    }
}

pub struct StaticEnvironment {
    environment: Option<Environment>,
}

impl ServiceConfigurationProvider for StaticEnvironment {
    fn current_environment(&self) -> Result<Environment, ConfigError> {
        self.environment
            .clone()
            .ok_or_else(|| ConfigError::Missing("environment.json".into()))
    }
}

pub struct Fixture {
    _dir: tempfile::TempDir,
    pub root: Utf8PathBuf,
    pub connectivity: Arc<FakeConnectivity>,
    pub storage: Arc<FakeStorage>,
    pub connector: Arc<FakeConnector>,
    pub store: Arc<CountingStore>,
    pub config: Arc<StaticEnvironment>,
}

impl Fixture {
    pub fn new(services: Vec<ServiceConfig>) -> Self {
        Self::build(Some(Environment {
            name: "test".into(),
            services,
        }))
    }

    pub fn without_environment() -> Self {
        Self::build(None)
    }

    fn build(environment: Option<Environment>) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap();
        Self {
            _dir: dir,
            root,
            connectivity: Arc::new(FakeConnectivity::new(true)),
            storage: Arc::new(FakeStorage {
                available: AtomicU64::new(10 * 1024 * MIB),
                per_service: 50 * MIB,
            }),
            connector: Arc::new(FakeConnector::default()),
            store: Arc::new(CountingStore::default()),
            config: Arc::new(StaticEnvironment { environment }),
        }
    }

    pub fn collaborators(&self) -> Collaborators {
        Collaborators {
            connectivity: self.connectivity.clone(),
            storage: self.storage.clone(),
            connector: self.connector.clone(),
            store: self.store.clone(),
            config: self.config.clone(),
            cache_root: self.root.clone(),
        }
    }

    pub fn engine(&self) -> FieldCacheEngine {
        FieldCacheEngine::new(self.collaborators()).with_retry_policy(fast_retry())
    }

    pub fn cache_path(&self, service_id: &str) -> Utf8PathBuf {
        cache_path(&self.root, service_id).unwrap()
    }

    /// Writes a cache for `service_id` as a finished download would.
    pub fn seed_cache(&self, service_id: &str, layers: &[(u32, usize)]) -> Utf8PathBuf {
        let path = self.cache_path(service_id);
        write_cache(&RedbCacheStore::new(), &path, service_id, layers).unwrap();
        path
    }
}
