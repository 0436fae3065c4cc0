use std::collections::BTreeMap;

use camino::Utf8PathBuf;

use crate::error::ErrorCategory;
use crate::ServiceId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DownloadPhase {
    Idle,
    CheckingConnectivity,
    Initializing,
    PreparingParameters,
    Generating,
    Processing,
    Complete,
    Failed,
}

impl DownloadPhase {
    /// Fraction reported on entering the phase.
    pub fn base_fraction(&self) -> f64 {
        match self {
            DownloadPhase::Idle | DownloadPhase::CheckingConnectivity => 0.0,
            DownloadPhase::Initializing => 0.05,
            DownloadPhase::PreparingParameters => 0.2,
            DownloadPhase::Generating => GENERATING_START,
            DownloadPhase::Processing => 0.95,
            DownloadPhase::Complete => 1.0,
            // A failure keeps whatever fraction was last reached.
            DownloadPhase::Failed => 0.0,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, DownloadPhase::Complete | DownloadPhase::Failed)
    }
}

const GENERATING_START: f64 = 0.3;
const GENERATING_END: f64 = 0.9;

/// Maps an extraction job's native 0-100 progress into the 0.3-0.9 band.
pub fn remap_job_percent(percent: u8) -> f64 {
    let p = f64::from(percent.min(100)) / 100.0;
    GENERATING_START + (GENERATING_END - GENERATING_START) * p
}

/// Path-based handle to a freshly populated cache. Holding it keeps nothing open.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedDataset {
    pub service_id: ServiceId,
    pub path: Utf8PathBuf,
    pub layer_count: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DownloadProgress {
    pub fraction: f64,
    pub message: String,
    pub phase: DownloadPhase,
    pub is_complete: bool,
    pub error: Option<ErrorCategory>,
    pub payload: Option<CachedDataset>,
}

impl DownloadProgress {
    pub fn idle() -> Self {
        Self::at_phase(DownloadPhase::Idle, "Waiting")
    }

    pub fn at_phase(phase: DownloadPhase, message: impl Into<String>) -> Self {
        Self {
            fraction: phase.base_fraction(),
            message: message.into(),
            phase,
            is_complete: false,
            error: None,
            payload: None,
        }
    }

    pub fn generating(percent: u8, message: impl Into<String>) -> Self {
        Self {
            fraction: remap_job_percent(percent),
            ..Self::at_phase(DownloadPhase::Generating, message)
        }
    }

    pub fn complete(payload: CachedDataset, message: impl Into<String>) -> Self {
        Self {
            fraction: 1.0,
            message: message.into(),
            phase: DownloadPhase::Complete,
            is_complete: true,
            error: None,
            payload: Some(payload),
        }
    }

    /// Terminal failure at the last fraction reached.
    pub fn failed(last_fraction: f64, category: ErrorCategory) -> Self {
        Self {
            fraction: last_fraction.clamp(0.0, 1.0),
            message: category.user_message().to_string(),
            phase: DownloadPhase::Failed,
            is_complete: true,
            error: Some(category),
            payload: None,
        }
    }

    pub fn is_failed(&self) -> bool {
        self.error.is_some()
    }

    pub fn succeeded(&self) -> bool {
        self.is_complete && self.error.is_none()
    }
}

/// The failure that ended a batch download.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchFailure {
    pub service_id: ServiceId,
    pub category: ErrorCategory,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MultiServiceProgress {
    pub per_service: BTreeMap<ServiceId, DownloadProgress>,
    pub overall_fraction: f64,
    pub overall_message: String,
    pub is_complete: bool,
    pub error: Option<BatchFailure>,
}

impl MultiServiceProgress {
    /// Recomputes the aggregate view of a progress table.
    pub fn from_table(
        table: &BTreeMap<ServiceId, DownloadProgress>,
        error: Option<BatchFailure>,
    ) -> Self {
        let total = table.len();
        let overall_fraction = if total == 0 {
            1.0
        } else {
            table.values().map(|p| p.fraction).sum::<f64>() / total as f64
        };
        let done = table.values().filter(|p| p.succeeded()).count();
        let is_complete = error.is_none()
            && table.values().all(|p| p.is_complete && p.error.is_none());

        let overall_message = match &error {
            Some(failure) => format!("{} failed: {}", failure.service_id, failure.message),
            None if is_complete => format!("Downloaded {total} of {total} services"),
            None => format!("Downloading: {done} of {total} services complete"),
        };

        Self {
            per_service: table.clone(),
            overall_fraction,
            overall_message,
            is_complete,
            error,
        }
    }
}
