mod api;
mod cache_key;
mod codec;
mod error;
mod maintenance;
mod paths;
mod redb_store;

pub use api::*;
pub use error::*;
pub use paths::{cache_file_name, cache_path};
pub use redb_store::{RedbCache, RedbCacheStore};
