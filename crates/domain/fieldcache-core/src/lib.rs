use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub mod classify;
pub mod error;
pub mod extent;
pub mod ports;
pub mod progress;
pub mod storage;

pub use classify::ErrorClassifier;
pub use error::{ConfigError, ErrorCategory, RemoteError, StoreError, StoreErrorKind};
pub use extent::Extent;
pub use progress::{BatchFailure, CachedDataset, DownloadPhase, DownloadProgress, MultiServiceProgress};
pub use storage::StorageStatus;

pub type ServiceId = String;

/// One remote feature service the device can work against offline.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ServiceConfig {
    pub id: ServiceId,
    pub name: String,
    pub url: String,
    #[serde(default = "default_display_on_map")]
    pub display_on_map: bool,
}

fn default_display_on_map() -> bool {
    true
}

impl ServiceConfig {
    /// Returns a description of what is missing, if the entry cannot be used as-is.
    pub fn missing_fields(&self) -> Option<String> {
        let mut missing = Vec::new();
        if self.id.trim().is_empty() {
            missing.push("id");
        }
        if self.url.trim().is_empty() {
            missing.push("url");
        }
        if missing.is_empty() {
            None
        } else {
            Some(format!(
                "service '{}' is missing {}",
                self.name,
                missing.join(", ")
            ))
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct Environment {
    #[serde(default)]
    pub name: String,
    pub services: Vec<ServiceConfig>,
}

impl Environment {
    pub fn service(&self, id: &str) -> Option<&ServiceConfig> {
        self.services.iter().find(|s| s.id == id)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct LayerDescriptor {
    pub remote_layer_id: u32,
    pub name: String,
    #[serde(default)]
    pub feature_count: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Feature {
    pub object_id: i64,
    #[serde(default)]
    pub attributes: serde_json::Map<String, serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub geometry: Option<serde_json::Value>,
}

/// Changes for one layer: local edits on the way up, remote changes on the way down.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct LayerEdits {
    pub layer_id: u32,
    #[serde(default)]
    pub adds: Vec<Feature>,
    #[serde(default)]
    pub updates: Vec<Feature>,
    #[serde(default)]
    pub deletes: Vec<i64>,
}

impl LayerEdits {
    pub fn is_empty(&self) -> bool {
        self.adds.is_empty() && self.updates.is_empty() && self.deletes.is_empty()
    }
}

/// Derived view of one cached dataset; rebuilt on every enumeration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StoredDatasetInfo {
    pub service_id: ServiceId,
    pub service_name: String,
    pub file_name: String,
    pub layer_count: usize,
    pub file_size_bytes: u64,
    pub last_sync_timestamp: Option<DateTime<Utc>>,
    pub display_on_map: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SyncDirection {
    Download,
    Upload,
    Bidirectional,
}

impl SyncDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncDirection::Download => "download",
            SyncDirection::Upload => "upload",
            SyncDirection::Bidirectional => "bidirectional",
        }
    }

    pub fn pushes(&self) -> bool {
        matches!(self, SyncDirection::Upload | SyncDirection::Bidirectional)
    }

    pub fn pulls(&self) -> bool {
        matches!(self, SyncDirection::Download | SyncDirection::Bidirectional)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LayerSyncOption {
    pub layer_id: u32,
    pub direction: SyncDirection,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncParameters {
    pub direction: SyncDirection,
    pub layers: Vec<LayerSyncOption>,
    pub rollback_on_failure: bool,
}

impl SyncParameters {
    /// Rollback is never requested; a failed sync keeps whatever it already committed.
    pub fn new(direction: SyncDirection, layers: Vec<LayerSyncOption>) -> Self {
        Self {
            direction,
            layers,
            rollback_on_failure: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExtractionParameters {
    pub extent: Extent,
    pub layer_ids: Vec<u32>,
    pub include_attachments: bool,
    pub out_wkid: u32,
}
