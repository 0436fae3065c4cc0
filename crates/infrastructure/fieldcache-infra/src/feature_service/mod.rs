//! Client for feature services that expose replica endpoints.
//!
//! Extraction is `createReplica` in async mode: the job's status URL is polled until a
//! result URL appears, the replica JSON is fetched and written into a redb cache file.
//! Sync is `synchronizeReplica`: pending local edits go up, the service's changes come
//! back and are applied to the cache.

mod wire;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use fieldcache_config::EXTRACTION_POLL_INTERVAL;
use fieldcache_core::ports::{
    ExtractionJob, ExtractionReporter, LocalCacheHandle, RemoteSyncCapability, RemoteSyncConnector,
};
use fieldcache_core::{
    Extent, ExtractionParameters, LayerDescriptor, RemoteError, SyncDirection, SyncParameters,
};
use fieldcache_persistence::RedbCacheStore;
use reqwest::{Client, RequestBuilder};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, warn};

use wire::{
    object_id_field, JobState, JobStatus, LayerInfo, Replica, ReplicaJob, ServiceError,
    ServiceInfo, SyncLayer, SyncResult, WireEdits,
};

fn map_reqwest_error(err: reqwest::Error) -> RemoteError {
    if err.is_timeout() {
        RemoteError::Timeout(err.to_string())
    } else if err.is_connect() {
        RemoteError::Offline(err.to_string())
    } else if let Some(status) = err.status() {
        RemoteError::Http {
            status: status.as_u16(),
            message: err.to_string(),
        }
    } else if err.is_decode() {
        RemoteError::Protocol(err.to_string())
    } else {
        RemoteError::Offline(err.to_string())
    }
}

/// Sends `request` and decodes the JSON body, surfacing a service-level `error` object
/// as [`RemoteError::Service`].
async fn send_json<T: DeserializeOwned>(request: RequestBuilder) -> Result<T, RemoteError> {
    let resp = request.send().await.map_err(map_reqwest_error)?;
    let status = resp.status();
    let body = resp.text().await.map_err(map_reqwest_error)?;
    if !status.is_success() {
        return Err(RemoteError::Http {
            status: status.as_u16(),
            message: body.chars().take(200).collect(),
        });
    }

    let value: Value = serde_json::from_str(&body)
        .map_err(|e| RemoteError::Protocol(format!("invalid JSON response: {e}")))?;
    if let Some(error) = value.get("error") {
        let error: ServiceError = serde_json::from_value(error.clone())
            .map_err(|e| RemoteError::Protocol(format!("malformed error object: {e}")))?;
        let mut message = error.message;
        if !error.details.is_empty() {
            message = format!("{message} ({})", error.details.join("; "));
        }
        return Err(RemoteError::Service {
            code: error.code,
            message,
        });
    }
    serde_json::from_value(value)
        .map_err(|e| RemoteError::Protocol(format!("unexpected response shape: {e}")))
}

fn join_url(base: &str, segment: &str) -> String {
    format!("{}/{segment}", base.trim_end_matches('/'))
}

#[derive(Debug, Clone)]
pub struct FeatureServiceConnector {
    client: Client,
    store: RedbCacheStore,
    poll_interval: Duration,
}

impl FeatureServiceConnector {
    pub fn new(client: Client) -> Self {
        Self {
            client,
            store: RedbCacheStore::new(),
            poll_interval: EXTRACTION_POLL_INTERVAL,
        }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Fetches service metadata; the service must have sync enabled.
    pub async fn connect(&self, service_url: &str) -> Result<FeatureService, RemoteError> {
        let info: ServiceInfo = send_json(
            self.client
                .get(service_url.trim_end_matches('/'))
                .query(&[("f", "json")]),
        )
        .await?;
        if !info.sync_enabled {
            return Err(RemoteError::Protocol(format!(
                "service {service_url} does not support offline sync"
            )));
        }
        debug!(url = service_url, layers = info.layers.len(), "connected to feature service");
        Ok(FeatureService {
            client: self.client.clone(),
            store: self.store.clone(),
            poll_interval: self.poll_interval,
            url: service_url.trim_end_matches('/').to_string(),
            layers: Arc::new(info.layers.into_iter().map(|l| (l.id, l)).collect()),
        })
    }
}

#[async_trait::async_trait]
impl RemoteSyncConnector for FeatureServiceConnector {
    async fn load(
        &self,
        service_url: &str,
    ) -> Result<Arc<dyn RemoteSyncCapability>, RemoteError> {
        let service: Arc<dyn RemoteSyncCapability> = Arc::new(self.connect(service_url).await?);
        Ok(service)
    }
}

/// A connected, sync-enabled feature service.
#[derive(Debug, Clone)]
pub struct FeatureService {
    client: Client,
    store: RedbCacheStore,
    poll_interval: Duration,
    url: String,
    layers: Arc<HashMap<u32, LayerInfo>>,
}

impl FeatureService {
    pub fn url(&self) -> &str {
        &self.url
    }

    fn layer_ids(&self) -> Vec<u32> {
        let mut ids: Vec<u32> = self.layers.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    fn id_field(&self, layer_id: u32) -> &str {
        object_id_field(self.layers.get(&layer_id))
    }

    async fn request_replica(&self, params: &ExtractionParameters) -> Result<String, RemoteError> {
        let layers = params
            .layer_ids
            .iter()
            .map(|id| id.to_string())
            .collect::<Vec<_>>()
            .join(",");
        let geometry = params.extent.to_envelope_json().to_string();
        let in_sr = params.extent.wkid.to_string();
        let out_sr = params.out_wkid.to_string();
        let form = [
            ("f", "json"),
            ("replicaName", "fieldcache"),
            ("layers", layers.as_str()),
            ("geometry", geometry.as_str()),
            ("geometryType", "esriGeometryEnvelope"),
            ("inSR", in_sr.as_str()),
            ("outSR", out_sr.as_str()),
            ("returnAttachments", bool_str(params.include_attachments)),
            ("syncModel", "perReplica"),
            ("dataFormat", "json"),
            ("async", "true"),
        ];
        let job: ReplicaJob = send_json(
            self.client
                .post(join_url(&self.url, "createReplica"))
                .form(&form),
        )
        .await?;
        job.status_url
            .ok_or_else(|| RemoteError::Protocol("createReplica returned no statusUrl".into()))
    }

    async fn wait_for_result(
        &self,
        status_url: &str,
        reporter: &ExtractionReporter,
    ) -> Result<String, RemoteError> {
        let mut last_progress = 0u8;
        loop {
            let status: JobStatus =
                send_json(self.client.get(status_url).query(&[("f", "json")])).await?;
            match status.status {
                JobState::Completed => {
                    return status.result_url.ok_or_else(|| {
                        RemoteError::Protocol("completed replica job has no resultUrl".into())
                    });
                }
                JobState::Failed => {
                    return Err(RemoteError::Protocol(format!(
                        "replica job failed: {}",
                        status.message.unwrap_or_else(|| "no details".into())
                    )));
                }
                JobState::Pending | JobState::InProgress | JobState::Unknown => {
                    // Services that report no percentage still show movement, capped below done.
                    let next = status
                        .progress
                        .unwrap_or_else(|| last_progress.saturating_add(5).min(90));
                    last_progress = last_progress.max(next.min(99));
                    reporter.progress(last_progress).await;
                }
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    async fn extract(
        self,
        service_id: String,
        params: ExtractionParameters,
        destination: Utf8PathBuf,
        reporter: ExtractionReporter,
    ) -> Result<(), RemoteError> {
        reporter.progress(0).await;
        let status_url = self.request_replica(&params).await?;
        let result_url = self.wait_for_result(&status_url, &reporter).await?;
        let replica: Replica = send_json(self.client.get(&result_url)).await?;

        let service = self.clone();
        tokio::task::spawn_blocking(move || {
            service.write_replica(&service_id, &destination, replica)
        })
            .await
            .map_err(|e| RemoteError::Protocol(format!("cache writer failed: {e}")))??;
        reporter.progress(100).await;
        Ok(())
    }

    fn write_replica(
        &self,
        service_id: &str,
        destination: &Utf8Path,
        replica: Replica,
    ) -> Result<(), RemoteError> {
        let cache = self
            .store
            .create(destination, service_id)
            .map_err(fieldcache_core::StoreError::from)?;
        for layer in replica.layers {
            let id_field = self.id_field(layer.id).to_string();
            let total = layer.features.len();
            let features: Vec<_> = layer
                .features
                .into_iter()
                .filter_map(|f| f.into_feature(&id_field))
                .collect();
            if features.len() < total {
                warn!(
                    layer = layer.id,
                    dropped = total - features.len(),
                    "features without object id skipped"
                );
            }
            let name = self
                .layers
                .get(&layer.id)
                .map(|l| l.name.clone())
                .unwrap_or_else(|| format!("Layer {}", layer.id));
            let descriptor = LayerDescriptor {
                remote_layer_id: layer.id,
                name,
                feature_count: features.len() as u64,
            };
            cache
                .write_layer(&descriptor, &features)
                .map_err(fieldcache_core::StoreError::from)?;
        }
        cache
            .set_sync_token(&replica.replica_id)
            .map_err(fieldcache_core::StoreError::from)?;
        drop(cache);
        self.store.release(destination);
        Ok(())
    }
}

fn bool_str(v: bool) -> &'static str {
    if v {
        "true"
    } else {
        "false"
    }
}

#[async_trait::async_trait]
impl RemoteSyncCapability for FeatureService {
    async fn extraction_parameters(
        &self,
        extent: &Extent,
    ) -> Result<ExtractionParameters, RemoteError> {
        let layer_ids = self.layer_ids();
        if layer_ids.is_empty() {
            return Err(RemoteError::Protocol(format!(
                "service {} publishes no layers",
                self.url
            )));
        }
        Ok(ExtractionParameters {
            extent: *extent,
            layer_ids,
            include_attachments: false,
            out_wkid: extent.wkid,
        })
    }

    fn start_extraction(
        &self,
        service_id: &str,
        params: ExtractionParameters,
        destination: &Utf8Path,
    ) -> ExtractionJob {
        let service = self.clone();
        let service_id = service_id.to_owned();
        let destination = destination.to_owned();
        ExtractionJob::spawn(move |reporter| {
            service.extract(service_id, params, destination, reporter)
        })
    }

    async fn synchronize(
        &self,
        params: SyncParameters,
        cache: LocalCacheHandle,
    ) -> Result<bool, RemoteError> {
        let replica_id = cache
            .sync_token()?
            .ok_or_else(|| RemoteError::Protocol("local cache has no replica id".into()))?;

        let directions: HashMap<u32, SyncDirection> = params
            .layers
            .iter()
            .map(|l| (l.layer_id, l.direction))
            .collect();
        let pushed: Vec<_> = cache
            .pending_edits()?
            .into_iter()
            .filter(|e| {
                directions.get(&e.layer_id).is_some_and(|d| d.pushes()) && !e.is_empty()
            })
            .collect();
        let wire_edits: Vec<WireEdits> = pushed
            .iter()
            .map(|e| WireEdits::from_edits(e, self.id_field(e.layer_id)))
            .collect();
        let sync_layers: Vec<SyncLayer> = params
            .layers
            .iter()
            .map(|l| SyncLayer {
                id: l.layer_id,
                sync_direction: l.direction.as_str(),
            })
            .collect();

        let sync_layers = serde_json::to_string(&sync_layers)
            .map_err(|e| RemoteError::Protocol(e.to_string()))?;
        let edits = serde_json::to_string(&wire_edits)
            .map_err(|e| RemoteError::Protocol(e.to_string()))?;
        let form = [
            ("f", "json"),
            ("replicaID", replica_id.as_str()),
            ("syncDirection", params.direction.as_str()),
            ("rollbackOnFailure", bool_str(params.rollback_on_failure)),
            ("async", "false"),
            ("dataFormat", "json"),
            ("syncLayers", sync_layers.as_str()),
            ("edits", edits.as_str()),
        ];
        let result: SyncResult = send_json(
            self.client
                .post(join_url(&self.url, "synchronizeReplica"))
                .form(&form),
        )
        .await?;

        // Rejected edits stay pending so the next sync offers them again.
        let mut rejected_layers = Vec::new();
        for layer in &result.edits {
            for rejection in layer.rejected() {
                let reason = rejection
                    .error
                    .as_ref()
                    .map(|e| format!("{} {}", e.code, e.message))
                    .unwrap_or_else(|| "no details".into());
                warn!(
                    url = %self.url,
                    layer = layer.id,
                    object_id = ?rejection.object_id,
                    "edit rejected: {reason}"
                );
                if !rejected_layers.contains(&layer.id) {
                    rejected_layers.push(layer.id);
                }
            }
        }
        let pushed_layers: Vec<u32> = pushed
            .iter()
            .map(|e| e.layer_id)
            .filter(|id| !rejected_layers.contains(id))
            .collect();
        cache.clear_pending_edits(&pushed_layers)?;

        let pulled: Vec<_> = result
            .edits
            .into_iter()
            .filter(|e| directions.get(&e.id).is_some_and(|d| d.pulls()))
            .map(|e| {
                let id_field = self.id_field(e.id).to_string();
                e.into_edits(&id_field)
            })
            .collect();
        cache.apply_changes(&pulled)?;
        debug!(
            url = %self.url,
            pushed = pushed_layers.len(),
            pulled = pulled.len(),
            rejected_layers = rejected_layers.len(),
            "replica synchronized"
        );
        Ok(rejected_layers.is_empty())
    }
}
