use fieldcache_config::OUTPUT_SPATIAL_REFERENCE;
use fieldcache_core::ports::ExtractionEvent;
use fieldcache_core::{
    CachedDataset, ConfigError, DownloadPhase, DownloadProgress, Extent, RemoteError,
    ServiceConfig,
};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::engine::Collaborators;
use crate::error::PipelineError;
use crate::retry::RetryPolicy;
use crate::stream::ProgressStream;

/// Downloads one service's data into its local cache file.
///
/// Callers must not run two downloads for the same service id at once.
#[derive(Clone)]
pub struct ServiceDownloadJob {
    deps: Collaborators,
    retry: RetryPolicy,
}

/// Publishes progress for one download, never letting the fraction go backwards.
struct PhaseReporter {
    tx: mpsc::Sender<DownloadProgress>,
    last_fraction: f64,
}

impl PhaseReporter {
    async fn emit(&mut self, mut progress: DownloadProgress) {
        if !progress.is_failed() {
            progress.fraction = progress.fraction.max(self.last_fraction);
            self.last_fraction = progress.fraction;
        }
        let _ = self.tx.send(progress).await;
    }

    async fn phase(&mut self, phase: DownloadPhase, message: &str) {
        debug!(?phase, "{message}");
        self.emit(DownloadProgress::at_phase(phase, message)).await;
    }
}

impl ServiceDownloadJob {
    pub fn new(deps: Collaborators, retry: RetryPolicy) -> Self {
        Self { deps, retry }
    }

    pub fn collaborators(&self) -> &Collaborators {
        &self.deps
    }

    /// Starts the download on the runtime. The stream ends after one terminal update;
    /// dropping it early cancels the extraction.
    pub fn download(&self, config: ServiceConfig, extent: Extent) -> ProgressStream<DownloadProgress> {
        let cancel = CancellationToken::new();
        let (tx, stream) = ProgressStream::channel(cancel.clone());
        let job = self.clone();
        tokio::spawn(async move { job.run(config, extent, tx, cancel).await });
        stream
    }

    async fn run(
        self,
        config: ServiceConfig,
        extent: Extent,
        tx: mpsc::Sender<DownloadProgress>,
        cancel: CancellationToken,
    ) {
        let mut reporter = PhaseReporter {
            tx,
            last_fraction: 0.0,
        };

        let outcome = tokio::select! {
            _ = cancel.cancelled() => {
                debug!(service = %config.id, "download cancelled");
                return;
            }
            outcome = self.execute(&config, extent, &mut reporter) => outcome,
        };

        match outcome {
            Ok(dataset) => {
                info!(service = %config.id, layers = dataset.layer_count, "download complete");
                reporter
                    .emit(DownloadProgress::complete(dataset, "Download complete"))
                    .await;
            }
            Err(e) => {
                error!(service = %config.id, "download failed: {e}");
                let failed = DownloadProgress::failed(reporter.last_fraction, e.category());
                reporter.emit(failed).await;
            }
        }
    }

    async fn execute(
        &self,
        config: &ServiceConfig,
        extent: Extent,
        reporter: &mut PhaseReporter,
    ) -> Result<CachedDataset, PipelineError> {
        if let Some(missing) = config.missing_fields() {
            return Err(ConfigError::Invalid(missing).into());
        }
        let path = self.deps.cache_path(&config.id)?;

        reporter
            .phase(DownloadPhase::CheckingConnectivity, "Checking connectivity")
            .await;
        if !self.deps.connectivity.is_currently_connected().await {
            return Err(PipelineError::NoInternet);
        }

        reporter
            .phase(DownloadPhase::Initializing, "Connecting to service")
            .await;
        self.deps.store.remove(&path).await?;

        let capability = self
            .retry
            .execute_if(
                |_| self.deps.connector.load(&config.url),
                RemoteError::is_transient,
                |attempt, e| debug!(service = %config.id, attempt, "load failed: {e}"),
            )
            .await?;

        reporter
            .phase(
                DownloadPhase::PreparingParameters,
                "Preparing download parameters",
            )
            .await;
        let mut params = self
            .retry
            .execute_if(
                |_| capability.extraction_parameters(&extent),
                RemoteError::is_transient,
                |attempt, e| debug!(service = %config.id, attempt, "parameters failed: {e}"),
            )
            .await?;
        params.include_attachments = false;
        params.out_wkid = OUTPUT_SPATIAL_REFERENCE;

        reporter
            .phase(DownloadPhase::Generating, "Generating offline copy")
            .await;
        let mut extraction = capability.start_extraction(&config.id, params, &path);
        loop {
            match extraction.next_event().await {
                Some(ExtractionEvent::Progress(percent)) => {
                    reporter
                        .emit(DownloadProgress::generating(
                            percent,
                            format!("Generating offline copy ({percent}%)"),
                        ))
                        .await;
                }
                Some(ExtractionEvent::Finished(result)) => {
                    result?;
                    break;
                }
                None => {
                    return Err(RemoteError::Protocol(
                        "extraction ended without a result".into(),
                    )
                    .into())
                }
            }
        }
        drop(extraction);

        reporter
            .phase(DownloadPhase::Processing, "Processing downloaded data")
            .await;
        let handle = self.deps.store.open(&path).await?;
        let layers = self.deps.store.layers(&handle).await;
        self.deps.store.close(handle).await;
        let layers = layers?;
        if layers.is_empty() {
            return Err(PipelineError::EmptyCache(config.id.clone()));
        }

        Ok(CachedDataset {
            service_id: config.id.clone(),
            path,
            layer_count: layers.len(),
        })
    }
}
