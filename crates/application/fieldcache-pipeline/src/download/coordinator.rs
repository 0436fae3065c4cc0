use std::collections::BTreeMap;

use fieldcache_config::PROGRESS_CHANNEL_CAPACITY;
use fieldcache_core::{
    BatchFailure, DownloadProgress, ErrorCategory, Extent, MultiServiceProgress, ServiceConfig,
    ServiceId,
};
use futures::StreamExt;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::ServiceDownloadJob;
use crate::error::PipelineError;
use crate::preflight::PreflightChecker;
use crate::stream::ProgressStream;

/// Downloads several services concurrently and reports one aggregate view.
///
/// The batch is fail-fast: the first failed service ends it, the remaining downloads are
/// cancelled, and the last snapshot carries the failure.
#[derive(Clone)]
pub struct MultiServiceDownloadCoordinator {
    job: ServiceDownloadJob,
    preflight: PreflightChecker,
}

impl MultiServiceDownloadCoordinator {
    pub fn new(job: ServiceDownloadJob) -> Self {
        let preflight = job.collaborators().preflight();
        Self { job, preflight }
    }

    /// Runs the preflight gate, then starts every download. A failed gate returns `Err` and
    /// nothing is started.
    pub async fn download_all(
        &self,
        services: Vec<ServiceConfig>,
        extent: Extent,
    ) -> Result<ProgressStream<MultiServiceProgress>, PipelineError> {
        let cancel = CancellationToken::new();
        let (tx, stream) = ProgressStream::channel(cancel.clone());

        if services.is_empty() {
            let _ = tx
                .send(MultiServiceProgress::from_table(&BTreeMap::new(), None))
                .await;
            return Ok(stream);
        }

        let report = self.preflight.run(&services).await?;

        let job = self.job.clone();
        tokio::spawn(drive(job, services, extent, report.warning, tx, cancel));
        Ok(stream)
    }
}

/// Sole owner of the progress table. Per-service forwarders feed it through one channel.
async fn drive(
    job: ServiceDownloadJob,
    services: Vec<ServiceConfig>,
    extent: Extent,
    warning: Option<String>,
    out: mpsc::Sender<MultiServiceProgress>,
    cancel: CancellationToken,
) {
    let mut table: BTreeMap<ServiceId, DownloadProgress> = services
        .iter()
        .map(|s| (s.id.clone(), DownloadProgress::idle()))
        .collect();

    let mut first = MultiServiceProgress::from_table(&table, None);
    if let Some(warning) = warning {
        first.overall_message = warning;
    }
    if out.send(first).await.is_err() {
        return;
    }

    let batch = cancel.child_token();
    let (funnel_tx, mut funnel_rx) =
        mpsc::channel::<(ServiceId, DownloadProgress)>(PROGRESS_CHANNEL_CAPACITY);
    let mut forwarders = JoinSet::new();
    for config in services {
        let id = config.id.clone();
        let mut updates = job.download(config, extent);
        let tx = funnel_tx.clone();
        let batch = batch.clone();
        forwarders.spawn(async move {
            loop {
                tokio::select! {
                    // Dropping `updates` cancels the download.
                    _ = batch.cancelled() => break,
                    next = updates.next() => {
                        let Some(progress) = next else { break };
                        let terminal = progress.is_complete;
                        if tx.send((id.clone(), progress)).await.is_err() || terminal {
                            break;
                        }
                    }
                }
            }
        });
    }
    drop(funnel_tx);

    let mut failure = None;
    loop {
        let next = tokio::select! {
            _ = cancel.cancelled() => {
                debug!("batch stream dropped, cancelling downloads");
                break;
            }
            next = funnel_rx.recv() => next,
        };
        let Some((id, progress)) = next else { break };

        let failed = progress.error.map(|category| BatchFailure {
            service_id: id.clone(),
            category,
            message: progress.message.clone(),
        });
        table.insert(id, progress);

        if let Some(f) = failed {
            warn!(service = %f.service_id, category = ?f.category, "download failed, aborting batch");
            failure = Some(f);
            break;
        }
        if out
            .send(MultiServiceProgress::from_table(&table, None))
            .await
            .is_err()
        {
            break;
        }
    }

    // A forwarder can end without a terminal update only if its download task died.
    if failure.is_none() && !cancel.is_cancelled() {
        if let Some((id, _)) = table.iter().find(|(_, p)| !p.is_complete) {
            failure = Some(BatchFailure {
                service_id: id.clone(),
                category: ErrorCategory::Unknown,
                message: ErrorCategory::Unknown.user_message().to_string(),
            });
        }
    }

    batch.cancel();
    drop(funnel_rx);
    while forwarders.join_next().await.is_some() {}

    if let Some(f) = failure {
        let _ = out
            .send(MultiServiceProgress::from_table(&table, Some(f)))
            .await;
    }
}
