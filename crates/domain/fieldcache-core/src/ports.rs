//! Collaborators the engine consumes. Implementations live in the infrastructure crates;
//! tests substitute in-memory fakes.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use camino::Utf8Path;
use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;

use crate::error::{ConfigError, RemoteError, StoreError};
use crate::{
    Environment, Extent, ExtractionParameters, LayerDescriptor, LayerEdits, LayerSyncOption,
    ServiceConfig, StorageStatus, SyncDirection, SyncParameters,
};

pub type LocalCacheHandle = Arc<dyn LocalCache>;

/// An open local cache file.
pub trait LocalCache: Send + Sync + fmt::Debug {
    fn path(&self) -> &Utf8Path;
    fn layers(&self) -> Result<Vec<LayerDescriptor>, StoreError>;
    fn last_sync(&self) -> Result<Option<DateTime<Utc>>, StoreError>;
    fn mark_synced(&self, at: DateTime<Utc>) -> Result<(), StoreError>;
    /// Opaque token the remote service issued for this replica, if any.
    fn sync_token(&self) -> Result<Option<String>, StoreError>;
    fn pending_edits(&self) -> Result<Vec<LayerEdits>, StoreError>;
    fn clear_pending_edits(&self, layer_ids: &[u32]) -> Result<(), StoreError>;
    fn apply_changes(&self, changes: &[LayerEdits]) -> Result<(), StoreError>;
}

#[async_trait::async_trait]
pub trait LocalStore: Send + Sync {
    async fn open(&self, path: &Utf8Path) -> Result<LocalCacheHandle, StoreError>;

    async fn layers(&self, handle: &LocalCacheHandle) -> Result<Vec<LayerDescriptor>, StoreError> {
        handle.layers()
    }

    async fn close(&self, handle: LocalCacheHandle);

    /// Deletes the cache file at `path`. Absent files are not an error.
    async fn remove(&self, path: &Utf8Path) -> Result<(), StoreError>;
}

#[async_trait::async_trait]
pub trait ConnectivityProbe: Send + Sync {
    async fn is_currently_connected(&self) -> bool;
    /// Level-triggered connectivity state.
    fn subscribe(&self) -> watch::Receiver<bool>;
}

#[async_trait::async_trait]
pub trait StorageProbe: Send + Sync {
    fn estimate_required_bytes(&self, config: &ServiceConfig) -> u64;
    async fn check_availability(&self, required_bytes: u64) -> StorageStatus;
}

pub trait ServiceConfigurationProvider: Send + Sync {
    fn current_environment(&self) -> Result<Environment, ConfigError>;
}

#[async_trait::async_trait]
pub trait RemoteSyncConnector: Send + Sync {
    /// Acquires a sync-capable handle for the service at `service_url`.
    async fn load(&self, service_url: &str) -> Result<Arc<dyn RemoteSyncCapability>, RemoteError>;
}

#[async_trait::async_trait]
pub trait RemoteSyncCapability: Send + Sync {
    async fn extraction_parameters(
        &self,
        extent: &Extent,
    ) -> Result<ExtractionParameters, RemoteError>;

    /// Writes the extracted replica for `service_id` to `destination`.
    fn start_extraction(
        &self,
        service_id: &str,
        params: ExtractionParameters,
        destination: &Utf8Path,
    ) -> ExtractionJob;

    fn sync_parameters(
        &self,
        direction: SyncDirection,
        layers: Vec<LayerSyncOption>,
    ) -> SyncParameters {
        SyncParameters::new(direction, layers)
    }

    async fn synchronize(
        &self,
        params: SyncParameters,
        cache: LocalCacheHandle,
    ) -> Result<bool, RemoteError>;
}

#[derive(Debug)]
pub enum ExtractionEvent {
    /// Native progress, 0-100.
    Progress(u8),
    Finished(Result<(), RemoteError>),
}

/// Producer side of an extraction job.
#[derive(Clone)]
pub struct ExtractionReporter {
    tx: mpsc::Sender<ExtractionEvent>,
    cancel: CancellationToken,
}

impl ExtractionReporter {
    pub async fn progress(&self, percent: u8) {
        let _ = self.tx.send(ExtractionEvent::Progress(percent.min(100))).await;
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn cancellation(&self) -> CancellationToken {
        self.cancel.clone()
    }
}

/// A running extraction. Dropping it cancels the work behind it.
pub struct ExtractionJob {
    events: mpsc::Receiver<ExtractionEvent>,
    cancel: CancellationToken,
}

impl ExtractionJob {
    pub fn channel() -> (ExtractionReporter, ExtractionJob) {
        let (tx, events) = mpsc::channel(fieldcache_config::PROGRESS_CHANNEL_CAPACITY);
        let cancel = CancellationToken::new();
        (
            ExtractionReporter {
                tx,
                cancel: cancel.clone(),
            },
            ExtractionJob { events, cancel },
        )
    }

    /// Runs `work` on the runtime; the job finishes with its result, or with
    /// `RemoteError::Cancelled` once the job handle is dropped.
    pub fn spawn<F, Fut>(work: F) -> Self
    where
        F: FnOnce(ExtractionReporter) -> Fut,
        Fut: Future<Output = Result<(), RemoteError>> + Send + 'static,
    {
        let (reporter, job) = Self::channel();
        let token = reporter.cancellation();
        let tx = reporter.tx.clone();
        let fut = work(reporter);
        tokio::spawn(async move {
            let result = tokio::select! {
                _ = token.cancelled() => Err(RemoteError::Cancelled),
                r = fut => r,
            };
            let _ = tx.send(ExtractionEvent::Finished(result)).await;
        });
        job
    }

    /// Next event, or `None` once the producer is gone.
    pub async fn next_event(&mut self) -> Option<ExtractionEvent> {
        self.events.recv().await
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }
}

impl Drop for ExtractionJob {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
