//! Per-service downloads and the fail-fast batch coordinator on top of them.

mod coordinator;
mod job;

pub use coordinator::MultiServiceDownloadCoordinator;
pub use job::ServiceDownloadJob;
