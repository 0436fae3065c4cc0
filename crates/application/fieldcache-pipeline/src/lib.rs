//! Download and synchronization engine for offline field data caches.

pub mod catalog;
pub mod download;
mod engine;
pub mod error;
pub mod leases;
pub mod preflight;
pub mod retry;
pub mod stream;
pub mod sync;

pub use catalog::DatasetCatalog;
pub use download::{MultiServiceDownloadCoordinator, ServiceDownloadJob};
pub use engine::{Collaborators, FieldCacheEngine};
pub use error::PipelineError;
pub use leases::{Lease, ServiceLeases};
pub use preflight::{PreflightChecker, PreflightReport};
pub use retry::RetryPolicy;
pub use stream::ProgressStream;
pub use sync::{ServiceSyncJob, SyncAllCoordinator};
