use chrono::{DateTime, Utc};
use fieldcache_core::Feature;
use serde::{Deserialize, Serialize};

pub const CURRENT_SCHEMA: u32 = 1;
pub const CACHE_FORMAT: &str = "fieldcache-redb";

/// Header values stored in a cache file's `meta` table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheMeta {
    pub service_id: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
    pub last_sync_at: Option<DateTime<Utc>>,
    pub sync_token: Option<String>,
}

/// A local edit waiting to be pushed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "camelCase")]
pub enum LocalEdit {
    Add { feature: Feature },
    Update { feature: Feature },
    Delete,
}
