//! Two-way synchronization of existing local caches.

mod all;
mod job;

pub use all::SyncAllCoordinator;
pub use job::ServiceSyncJob;
