use serde::{Deserialize, Serialize};

/// Closed set of failure categories shown to users.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ErrorCategory {
    NoInternet,
    ServerUnavailable,
    ServerTimeout,
    AuthenticationFailed,
    AuthorizationFailed,
    Unknown,
}

impl ErrorCategory {
    pub fn user_message(&self) -> &'static str {
        match self {
            ErrorCategory::NoInternet => "No internet connection. Check your network and try again.",
            ErrorCategory::ServerUnavailable => {
                "The server is temporarily unavailable. Try again later."
            }
            ErrorCategory::ServerTimeout => "The server took too long to respond.",
            ErrorCategory::AuthenticationFailed => "Sign-in failed. Check your credentials.",
            ErrorCategory::AuthorizationFailed => {
                "You do not have permission to access this service."
            }
            ErrorCategory::Unknown => "Something went wrong. See the log for details.",
        }
    }
}

/// Failure raised by a remote feature service or its client.
#[derive(Debug, thiserror::Error)]
pub enum RemoteError {
    #[error("network unreachable: {0}")]
    Offline(String),
    #[error("request timed out: {0}")]
    Timeout(String),
    #[error("http status {status}: {message}")]
    Http { status: u16, message: String },
    #[error("service error {code}: {message}")]
    Service { code: i64, message: String },
    #[error("protocol error: {0}")]
    Protocol(String),
    #[error("operation cancelled")]
    Cancelled,
    #[error("local cache error: {0}")]
    Store(#[from] StoreError),
}

impl RemoteError {
    /// Failures worth another attempt: connectivity blips, timeouts, overloaded servers.
    pub fn is_transient(&self) -> bool {
        match self {
            RemoteError::Offline(_) | RemoteError::Timeout(_) => true,
            RemoteError::Http { status, .. } => *status >= 500 || *status == 429,
            RemoteError::Service { code, .. } => (500..600).contains(code),
            RemoteError::Protocol(_) | RemoteError::Cancelled | RemoteError::Store(_) => false,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("local cache missing")]
    Missing,
    #[error("local cache is invalid or corrupt")]
    Corrupt,
    #[error("local cache is from a newer version (schema_version={found}, supported={supported})")]
    NewerSchema { found: u32, supported: u32 },
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Codec(#[from] serde_json::Error),
    #[error("storage backend error: {0}")]
    Backend(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreErrorKind {
    Missing,
    Corrupt,
    NewerSchema,
    Io,
    Codec,
    Backend,
}

impl StoreError {
    pub fn kind(&self) -> StoreErrorKind {
        match self {
            StoreError::Missing => StoreErrorKind::Missing,
            StoreError::Corrupt => StoreErrorKind::Corrupt,
            StoreError::NewerSchema { .. } => StoreErrorKind::NewerSchema,
            StoreError::Io(_) => StoreErrorKind::Io,
            StoreError::Codec(_) => StoreErrorKind::Codec,
            StoreError::Backend(_) => StoreErrorKind::Backend,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("configuration file not found: {0}")]
    Missing(String),
    #[error("cannot determine config directory")]
    NoConfigDir,
    #[error("io error reading configuration: {0}")]
    Io(#[from] std::io::Error),
    #[error("configuration parse error: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}
