use std::sync::Arc;

use fieldcache_core::ports::{ConnectivityProbe, StorageProbe};
use fieldcache_core::{ServiceConfig, StorageStatus};
use tracing::{debug, warn};

use crate::error::PipelineError;

/// Result of a passed preflight gate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreflightReport {
    pub storage: StorageStatus,
    pub required_bytes: u64,
    /// Set for `Low` and `Insufficient` storage.
    pub warning: Option<String>,
}

/// Connectivity and free-space checks that run before any remote call.
#[derive(Clone)]
pub struct PreflightChecker {
    connectivity: Arc<dyn ConnectivityProbe>,
    storage: Arc<dyn StorageProbe>,
}

impl PreflightChecker {
    pub fn new(connectivity: Arc<dyn ConnectivityProbe>, storage: Arc<dyn StorageProbe>) -> Self {
        Self {
            connectivity,
            storage,
        }
    }

    pub async fn check_connectivity(&self) -> bool {
        self.connectivity.is_currently_connected().await
    }

    pub async fn check_storage(&self, estimated_bytes: u64) -> StorageStatus {
        self.storage.check_availability(estimated_bytes).await
    }

    pub fn estimate(&self, services: &[ServiceConfig]) -> u64 {
        services
            .iter()
            .map(|s| self.storage.estimate_required_bytes(s))
            .fold(0u64, u64::saturating_add)
    }

    pub async fn run(&self, services: &[ServiceConfig]) -> Result<PreflightReport, PipelineError> {
        if !self.check_connectivity().await {
            warn!("preflight: device is offline");
            return Err(PipelineError::NoInternet);
        }

        let required_bytes = self.estimate(services);
        let storage = self.check_storage(required_bytes).await;
        debug!(?storage, required_bytes, "preflight storage check");

        match storage {
            StorageStatus::CriticallyLow {
                available,
                required,
            } => {
                warn!(available, required, "preflight: storage critically low");
                Err(PipelineError::StorageCriticallyLow {
                    available,
                    required,
                })
            }
            status => {
                let warning = status.warning();
                if let Some(w) = &warning {
                    warn!("preflight: {w}");
                }
                Ok(PreflightReport {
                    storage: status,
                    required_bytes,
                    warning,
                })
            }
        }
    }
}
