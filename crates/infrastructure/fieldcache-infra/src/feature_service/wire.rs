//! JSON shapes exchanged with feature-service replica endpoints.

use fieldcache_core::{Feature, LayerEdits};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Debug, Deserialize)]
pub struct ServiceError {
    #[serde(default)]
    pub code: i64,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub details: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceInfo {
    #[serde(default)]
    pub sync_enabled: bool,
    #[serde(default)]
    pub layers: Vec<LayerInfo>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LayerInfo {
    pub id: u32,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub object_id_field: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplicaJob {
    #[serde(default)]
    pub status_url: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum JobState {
    Pending,
    InProgress,
    Completed,
    Failed,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobStatus {
    pub status: JobState,
    #[serde(default)]
    pub progress: Option<u8>,
    #[serde(default)]
    pub result_url: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Replica {
    #[serde(rename = "replicaID", alias = "replicaId")]
    pub replica_id: String,
    #[serde(default)]
    pub layers: Vec<ReplicaLayer>,
}

#[derive(Debug, Deserialize)]
pub struct ReplicaLayer {
    pub id: u32,
    #[serde(default)]
    pub features: Vec<WireFeature>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireFeature {
    #[serde(default)]
    pub attributes: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub geometry: Option<Value>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncLayer {
    pub id: u32,
    pub sync_direction: &'static str,
}

/// Per-layer edits. Outgoing it carries local edits; in a sync response it carries the
/// service's changes plus its verdict on each pushed edit.
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireEdits {
    pub id: u32,
    #[serde(default)]
    pub adds: Vec<WireFeature>,
    #[serde(default)]
    pub updates: Vec<WireFeature>,
    #[serde(default)]
    pub delete_ids: Vec<i64>,
    #[serde(default, skip_serializing)]
    pub add_results: Vec<EditResult>,
    #[serde(default, skip_serializing)]
    pub update_results: Vec<EditResult>,
    #[serde(default, skip_serializing)]
    pub delete_results: Vec<EditResult>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EditResult {
    #[serde(default)]
    pub object_id: Option<i64>,
    #[serde(default = "accepted")]
    pub success: bool,
    #[serde(default)]
    pub error: Option<ServiceError>,
}

fn accepted() -> bool {
    true
}

#[derive(Debug, Default, Deserialize)]
pub struct SyncResult {
    #[serde(default)]
    pub edits: Vec<WireEdits>,
}

const DEFAULT_OBJECT_ID_FIELD: &str = "OBJECTID";

pub fn object_id_field(layer: Option<&LayerInfo>) -> &str {
    layer
        .and_then(|l| l.object_id_field.as_deref())
        .unwrap_or(DEFAULT_OBJECT_ID_FIELD)
}

impl WireFeature {
    /// Features without a readable object id are dropped by the caller.
    pub fn into_feature(self, id_field: &str) -> Option<Feature> {
        let object_id = self
            .attributes
            .get(id_field)
            .or_else(|| {
                self.attributes
                    .iter()
                    .find(|(k, _)| k.eq_ignore_ascii_case(id_field))
                    .map(|(_, v)| v)
            })
            .and_then(Value::as_i64)?;
        Some(Feature {
            object_id,
            attributes: self.attributes,
            geometry: self.geometry,
        })
    }

    pub fn from_feature(feature: &Feature, id_field: &str) -> Self {
        let mut attributes = feature.attributes.clone();
        attributes.insert(id_field.to_string(), Value::from(feature.object_id));
        Self {
            attributes,
            geometry: feature.geometry.clone(),
        }
    }
}

impl WireEdits {
    pub fn from_edits(edits: &LayerEdits, id_field: &str) -> Self {
        Self {
            id: edits.layer_id,
            adds: edits
                .adds
                .iter()
                .map(|f| WireFeature::from_feature(f, id_field))
                .collect(),
            updates: edits
                .updates
                .iter()
                .map(|f| WireFeature::from_feature(f, id_field))
                .collect(),
            delete_ids: edits.deletes.clone(),
            ..Self::default()
        }
    }

    pub fn rejected(&self) -> impl Iterator<Item = &EditResult> {
        self.add_results
            .iter()
            .chain(&self.update_results)
            .chain(&self.delete_results)
            .filter(|r| !r.success)
    }

    pub fn into_edits(self, id_field: &str) -> LayerEdits {
        LayerEdits {
            layer_id: self.id,
            adds: self
                .adds
                .into_iter()
                .filter_map(|f| f.into_feature(id_field))
                .collect(),
            updates: self
                .updates
                .into_iter()
                .filter_map(|f| f.into_feature(id_field))
                .collect(),
            deletes: self.delete_ids,
        }
    }
}
