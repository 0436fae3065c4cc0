pub mod environment;
pub mod feature_service;
pub mod net;
pub mod storage;

// Re-exports for convenience
pub use environment::{default_cache_root, JsonEnvironmentProvider};
pub use feature_service::{FeatureService, FeatureServiceConnector};
pub use net::{default_http_client, HttpConnectivityProbe};
pub use storage::DiskStorageProbe;
