use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::State;
use axum::routing::{get, post};
use axum::{Form, Json, Router};
use camino::Utf8PathBuf;
use fieldcache_core::ports::{ExtractionEvent, LocalCache, LocalStore, RemoteSyncConnector};
use fieldcache_core::{
    ErrorCategory, ErrorClassifier, Extent, Feature, LayerDescriptor, LayerSyncOption,
    RemoteError, SyncDirection,
};
use fieldcache_infra::FeatureServiceConnector;
use fieldcache_persistence::{LocalEdit, RedbCacheStore};
use serde_json::{json, Value};

#[derive(Clone)]
struct Fixture {
    base: String,
    polls: Arc<AtomicUsize>,
    replica_form: Arc<Mutex<Option<HashMap<String, String>>>>,
    sync_form: Arc<Mutex<Option<HashMap<String, String>>>>,
}

async fn service_info() -> Json<Value> {
    Json(json!({
        "syncEnabled": true,
        "layers": [
            {"id": 0, "name": "Parcels"},
            {"id": 1, "name": "Hydrants", "objectIdField": "FID"}
        ]
    }))
}

async fn create_replica(
    State(fx): State<Fixture>,
    Form(form): Form<HashMap<String, String>>,
) -> Json<Value> {
    *fx.replica_form.lock().unwrap() = Some(form);
    Json(json!({"statusUrl": format!("{}/jobs/1", fx.base)}))
}

async fn job_status(State(fx): State<Fixture>) -> Json<Value> {
    if fx.polls.fetch_add(1, Ordering::SeqCst) == 0 {
        Json(json!({"status": "InProgress", "progress": 50}))
    } else {
        Json(json!({"status": "Completed", "resultUrl": format!("{}/results/1", fx.base)}))
    }
}

async fn replica_result() -> Json<Value> {
    Json(json!({
        "replicaID": "rep-1",
        "layers": [
            {"id": 0, "features": [
                {"attributes": {"OBJECTID": 1, "owner": "Ada"}, "geometry": {"rings": []}},
                {"attributes": {"OBJECTID": 2, "owner": "Grace"}}
            ]},
            {"id": 1, "features": [
                {"attributes": {"FID": 7, "pressure": 60}}
            ]}
        ]
    }))
}

async fn synchronize(
    State(fx): State<Fixture>,
    Form(form): Form<HashMap<String, String>>,
) -> Json<Value> {
    *fx.sync_form.lock().unwrap() = Some(form);
    Json(json!({
        "edits": [
            {"id": 1, "adds": [{"attributes": {"FID": 9, "pressure": 55}}], "deleteIds": [7]}
        ]
    }))
}

async fn synchronize_rejecting_update() -> Json<Value> {
    Json(json!({
        "edits": [
            {"id": 0, "updateResults": [
                {"objectId": 1, "success": false,
                 "error": {"code": 1019, "message": "Field is not editable"}}
            ]},
            {"id": 1, "addResults": [{"objectId": 9, "success": true}]}
        ]
    }))
}

async fn bad_token() -> Json<Value> {
    Json(json!({"error": {"code": 498, "message": "Invalid token.", "details": []}}))
}

async fn no_sync() -> Json<Value> {
    Json(json!({"syncEnabled": false, "layers": [{"id": 0, "name": "Only"}]}))
}

async fn start_server() -> (Fixture, tokio::task::JoinHandle<()>) {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let fx = Fixture {
        base: format!("http://{addr}"),
        polls: Arc::new(AtomicUsize::new(0)),
        replica_form: Arc::new(Mutex::new(None)),
        sync_form: Arc::new(Mutex::new(None)),
    };
    let app = Router::new()
        .route("/svc/FeatureServer", get(service_info))
        .route("/svc/FeatureServer/createReplica", post(create_replica))
        .route("/svc/FeatureServer/synchronizeReplica", post(synchronize))
        .route("/jobs/1", get(job_status))
        .route("/results/1", get(replica_result))
        .route("/strict/FeatureServer", get(service_info))
        .route(
            "/strict/FeatureServer/synchronizeReplica",
            post(synchronize_rejecting_update),
        )
        .route("/bad/FeatureServer", get(bad_token))
        .route("/nosync/FeatureServer", get(no_sync))
        .with_state(fx.clone());
    let handle = tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (fx, handle)
}

#[tokio::test]
async fn extract_then_synchronize_against_replica_endpoints() {
    let (fx, _server) = start_server().await;
    let dir = tempfile::tempdir().unwrap();
    let root = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap();
    let dest = root.join("parcels.fcache");

    let connector = FeatureServiceConnector::new(reqwest::Client::new())
        .with_poll_interval(Duration::from_millis(10));
    let service = connector
        .load(&format!("{}/svc/FeatureServer", fx.base))
        .await
        .unwrap();

    let extent: Extent = "-10,-10,10,10".parse().unwrap();
    let params = service.extraction_parameters(&extent).await.unwrap();
    assert_eq!(params.layer_ids, vec![0, 1]);
    assert!(!params.include_attachments);

    let mut job = service.start_extraction("parcels/north", params, &dest);
    let mut progress = Vec::new();
    let outcome = loop {
        match job.next_event().await {
            Some(ExtractionEvent::Progress(p)) => progress.push(p),
            Some(ExtractionEvent::Finished(result)) => break result,
            None => panic!("job ended without a result"),
        }
    };
    outcome.unwrap();
    assert_eq!(progress.first(), Some(&0));
    assert_eq!(progress.last(), Some(&100));
    assert!(progress.contains(&50));

    let replica_form = fx.replica_form.lock().unwrap().clone().unwrap();
    assert_eq!(replica_form["returnAttachments"], "false");
    assert_eq!(replica_form["layers"], "0,1");
    assert_eq!(replica_form["async"], "true");

    let store = RedbCacheStore::new();
    let handle = store.open(&dest).await.unwrap();
    let layers = store.layers(&handle).await.unwrap();
    assert_eq!(layers.len(), 2);
    assert_eq!(layers[0].name, "Parcels");
    assert_eq!(layers[0].feature_count, 2);
    assert_eq!(layers[1].feature_count, 1);
    assert_eq!(handle.sync_token().unwrap().as_deref(), Some("rep-1"));
    let meta = store.open_existing(&dest).unwrap().meta().unwrap();
    assert_eq!(meta.service_id.as_deref(), Some("parcels/north"));

    let editable = store.open_existing(&dest).unwrap();
    let mut attributes = serde_json::Map::new();
    attributes.insert("owner".into(), json!("Ada Lovelace"));
    editable
        .stage_edit(
            0,
            1,
            LocalEdit::Update {
                feature: Feature {
                    object_id: 1,
                    attributes,
                    geometry: None,
                },
            },
        )
        .unwrap();

    let sync_params = service.sync_parameters(
        SyncDirection::Bidirectional,
        vec![
            LayerSyncOption {
                layer_id: 0,
                direction: SyncDirection::Bidirectional,
            },
            LayerSyncOption {
                layer_id: 1,
                direction: SyncDirection::Bidirectional,
            },
        ],
    );
    assert!(!sync_params.rollback_on_failure);
    assert!(service.synchronize(sync_params, handle.clone()).await.unwrap());

    let sync_form = fx.sync_form.lock().unwrap().clone().unwrap();
    assert_eq!(sync_form["replicaID"], "rep-1");
    assert_eq!(sync_form["rollbackOnFailure"], "false");
    let pushed: Value = serde_json::from_str(&sync_form["edits"]).unwrap();
    assert_eq!(pushed[0]["id"], 0);
    assert_eq!(pushed[0]["updates"][0]["attributes"]["OBJECTID"], 1);

    assert!(handle.pending_edits().unwrap().is_empty());
    let hydrants: Vec<i64> = editable
        .features(1)
        .unwrap()
        .iter()
        .map(|f| f.object_id)
        .collect();
    assert_eq!(hydrants, vec![9]);
    store.close(handle).await;
}

fn owner_update(owner: &str) -> LocalEdit {
    let mut attributes = serde_json::Map::new();
    attributes.insert("owner".into(), json!(owner));
    LocalEdit::Update {
        feature: Feature {
            object_id: 1,
            attributes,
            geometry: None,
        },
    }
}

#[tokio::test]
async fn rejected_edits_stay_pending_and_fail_the_sync() {
    let (fx, _server) = start_server().await;
    let dir = tempfile::tempdir().unwrap();
    let root = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap();
    let dest = root.join("strict.fcache");

    let store = RedbCacheStore::new();
    let cache = store.create(&dest, "strict").unwrap();
    for (id, name) in [(0, "Parcels"), (1, "Hydrants")] {
        let descriptor = LayerDescriptor {
            remote_layer_id: id,
            name: name.into(),
            feature_count: 0,
        };
        cache.write_layer(&descriptor, &[]).unwrap();
    }
    cache.set_sync_token("rep-strict").unwrap();
    cache.stage_edit(0, 1, owner_update("Grace Hopper")).unwrap();
    drop(cache);
    store.release(&dest);

    let connector = FeatureServiceConnector::new(reqwest::Client::new());
    let service = connector
        .load(&format!("{}/strict/FeatureServer", fx.base))
        .await
        .unwrap();
    let handle = store.open(&dest).await.unwrap();
    let params = service.sync_parameters(
        SyncDirection::Bidirectional,
        vec![LayerSyncOption {
            layer_id: 0,
            direction: SyncDirection::Bidirectional,
        }],
    );

    assert!(!service.synchronize(params, handle.clone()).await.unwrap());
    let pending = handle.pending_edits().unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].layer_id, 0);
    assert_eq!(pending[0].updates.len(), 1);
    store.close(handle).await;
}

#[tokio::test]
async fn service_error_object_maps_to_service_error() {
    let (fx, _server) = start_server().await;
    let connector = FeatureServiceConnector::new(reqwest::Client::new());

    let err = connector
        .load(&format!("{}/bad/FeatureServer", fx.base))
        .await
        .err()
        .unwrap();
    assert!(matches!(err, RemoteError::Service { code: 498, .. }));
    assert_eq!(
        ErrorClassifier::classify(&err),
        ErrorCategory::AuthenticationFailed
    );

    let err = connector
        .load(&format!("{}/nosync/FeatureServer", fx.base))
        .await
        .err()
        .unwrap();
    assert!(matches!(err, RemoteError::Protocol(_)));
    assert_eq!(ErrorClassifier::classify(&err), ErrorCategory::Unknown);
}

#[tokio::test]
async fn unreachable_host_is_offline_and_missing_route_is_http() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let connector = FeatureServiceConnector::new(reqwest::Client::new());
    let err = connector
        .load(&format!("http://{addr}/svc/FeatureServer"))
        .await
        .err()
        .unwrap();
    assert!(matches!(err, RemoteError::Offline(_)));
    assert!(err.is_transient());

    let (fx, _server) = start_server().await;
    let err = connector
        .load(&format!("{}/missing/FeatureServer", fx.base))
        .await
        .err()
        .unwrap();
    assert!(matches!(err, RemoteError::Http { status: 404, .. }));
}
