use std::collections::BTreeMap;

use fieldcache_core::ServiceId;
use tracing::warn;

use super::ServiceSyncJob;
use crate::error::PipelineError;

/// Syncs every configured service, one at a time.
#[derive(Clone)]
pub struct SyncAllCoordinator {
    job: ServiceSyncJob,
}

impl SyncAllCoordinator {
    pub fn new(job: ServiceSyncJob) -> Self {
        Self { job }
    }

    /// Per-service outcome. Only a failure to read the configuration fails the call.
    pub async fn sync_all(&self) -> Result<BTreeMap<ServiceId, bool>, PipelineError> {
        let environment = self.job.collaborators().config.current_environment()?;
        let mut results = BTreeMap::new();
        for service in environment.services {
            let id = service.id.clone();
            let ok = match self.job.sync_service(service).await {
                Ok(ok) => ok,
                Err(e) => {
                    warn!(service = %id, category = ?e.category(), "sync failed: {e}");
                    false
                }
            };
            results.insert(id, ok);
        }
        Ok(results)
    }
}
