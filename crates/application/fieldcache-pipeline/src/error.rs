use fieldcache_core::{
    ConfigError, ErrorCategory, ErrorClassifier, RemoteError, ServiceId, StoreError,
};

/// Failure of an engine operation.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("no internet connection")]
    NoInternet,
    #[error("storage critically low: {available} bytes free, {required} bytes required")]
    StorageCriticallyLow { available: u64, required: u64 },
    #[error("configuration error: {0}")]
    Configuration(#[from] ConfigError),
    #[error("service '{0}' is not configured")]
    UnknownService(ServiceId),
    #[error("no local cache for service '{0}'")]
    CacheNotFound(ServiceId),
    #[error("local cache for service '{0}' has no layers")]
    EmptyCache(ServiceId),
    #[error("remote error: {0}")]
    Remote(#[from] RemoteError),
    #[error("local cache error: {0}")]
    Store(#[from] StoreError),
    #[error("background task failed: {0}")]
    Task(String),
}

impl PipelineError {
    /// Preflight and structural failures surface immediately; only these are worth retrying.
    pub fn is_transient(&self) -> bool {
        matches!(self, PipelineError::Remote(e) if e.is_transient())
    }

    /// Only remote and store failures are classified; their messages never embed service ids.
    pub fn category(&self) -> ErrorCategory {
        match self {
            PipelineError::NoInternet => ErrorCategory::NoInternet,
            PipelineError::Remote(e) => ErrorClassifier::classify(e),
            PipelineError::Store(e) => ErrorClassifier::classify(e),
            PipelineError::StorageCriticallyLow { .. }
            | PipelineError::Configuration(_)
            | PipelineError::UnknownService(_)
            | PipelineError::CacheNotFound(_)
            | PipelineError::EmptyCache(_)
            | PipelineError::Task(_) => ErrorCategory::Unknown,
        }
    }
}
