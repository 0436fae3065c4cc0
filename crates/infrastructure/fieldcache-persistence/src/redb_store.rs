use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, OnceLock};

use camino::{Utf8Path, Utf8PathBuf};
use chrono::{DateTime, Utc};
use fieldcache_core::ports::{LocalCache, LocalCacheHandle, LocalStore};
use fieldcache_core::{Feature, LayerDescriptor, LayerEdits, StoreError};
use redb::{Database, ReadableTable, TableDefinition};

use crate::api::{CacheMeta, LocalEdit, CACHE_FORMAT, CURRENT_SCHEMA};
use crate::cache_key::FeatureKey;
use crate::codec::{decode, encode};
use crate::maintenance::quarantine_corrupt_file;
use crate::CacheError;

const META: TableDefinition<&str, &str> = TableDefinition::new("meta");
const LAYERS: TableDefinition<u32, &[u8]> = TableDefinition::new("layers");
const FEATURES: TableDefinition<&[u8], &[u8]> = TableDefinition::new("features");
const EDITS: TableDefinition<&[u8], &[u8]> = TableDefinition::new("edits");

const META_FORMAT_KEY: &str = "format";
const META_SCHEMA_VERSION: &str = "schema_version";
const META_CREATED_AT: &str = "created_at";
const META_SERVICE_ID: &str = "service_id";
const META_LAST_SYNC_AT: &str = "last_sync_at";
const META_SYNC_TOKEN: &str = "sync_token";

type DbCache = HashMap<Utf8PathBuf, Arc<Database>>;

/// Local cache files backed by redb. One shared [`Database`] per path per process.
#[derive(Debug, Default, Clone)]
pub struct RedbCacheStore;

impl RedbCacheStore {
    fn is_corrupt_open_error(err: &redb::DatabaseError) -> bool {
        match err {
            redb::DatabaseError::Storage(storage) => match storage {
                redb::StorageError::Corrupted(_) => true,
                redb::StorageError::Io(ioe) => matches!(
                    ioe.kind(),
                    std::io::ErrorKind::InvalidData | std::io::ErrorKind::UnexpectedEof
                ),
                _ => false,
            },
            _ => false,
        }
    }

    fn db_cache() -> &'static Mutex<DbCache> {
        static CACHE: OnceLock<Mutex<DbCache>> = OnceLock::new();
        CACHE.get_or_init(|| Mutex::new(HashMap::new()))
    }

    fn lock_cache() -> MutexGuard<'static, DbCache> {
        // A panic while holding the lock cannot leave the map half-updated.
        Self::db_cache()
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn new() -> Self {
        Self
    }

    /// Creates an empty cache at `path` for `service_id`, replacing any file already there.
    pub fn create(&self, path: &Utf8Path, service_id: &str) -> Result<RedbCache, CacheError> {
        self.remove_file(path)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let mut cache = Self::lock_cache();
        let db = Database::create(path.as_std_path())?;
        Self::ensure_schema(&db, Some(service_id))?;
        let db = Arc::new(db);
        cache.insert(path.to_owned(), db.clone());
        tracing::debug!(%path, service_id, "created cache file");
        Ok(RedbCache {
            path: path.to_owned(),
            db,
        })
    }

    /// Opens an existing cache, sharing the handle with any other open of the same path.
    pub fn open_existing(&self, path: &Utf8Path) -> Result<RedbCache, CacheError> {
        if !path.exists() {
            return Err(CacheError::Missing);
        }

        let mut cache = Self::lock_cache();
        if let Some(existing) = cache.get(path) {
            return Ok(RedbCache {
                path: path.to_owned(),
                db: existing.clone(),
            });
        }

        let db = match Database::open(path.as_std_path()) {
            Ok(db) => db,
            Err(redb::DatabaseError::DatabaseAlreadyOpen) => {
                return Err(CacheError::DatabaseAlreadyOpen);
            }
            Err(e) if Self::is_corrupt_open_error(&e) => {
                let _ = quarantine_corrupt_file(path);
                return Err(CacheError::Corrupt);
            }
            Err(e) => return Err(e.into()),
        };

        if let Err(e) = Self::ensure_schema(&db, None) {
            drop(db);
            if matches!(e, CacheError::Corrupt) {
                let _ = quarantine_corrupt_file(path);
            }
            return Err(e);
        }
        let db = Arc::new(db);
        cache.insert(path.to_owned(), db.clone());
        Ok(RedbCache {
            path: path.to_owned(),
            db,
        })
    }

    /// Drops the shared handle for `path` once no open cache still uses it.
    pub fn release(&self, path: &Utf8Path) {
        let mut cache = Self::lock_cache();
        if cache
            .get(path)
            .is_some_and(|db| Arc::strong_count(db) == 1)
        {
            cache.remove(path);
            tracing::debug!(%path, "closed cache file");
        }
    }

    /// Evicts the shared handle and deletes the file. Absent files are fine.
    pub fn remove_file(&self, path: &Utf8Path) -> Result<(), CacheError> {
        Self::lock_cache().remove(path);
        match std::fs::remove_file(path.as_std_path()) {
            Ok(()) => {
                tracing::debug!(%path, "removed cache file");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn ensure_schema(db: &Database, service_id: Option<&str>) -> Result<(), CacheError> {
        // Create tables and required meta keys on first open.
        let write_tx = db.begin_write()?;
        {
            let mut meta = write_tx.open_table(META)?;
            let format: Option<String> = meta.get(META_FORMAT_KEY)?.map(|g| g.value().to_string());
            match format.as_deref() {
                None => {
                    // A file without a header that we did not just create is not ours.
                    let Some(service_id) = service_id else {
                        return Err(CacheError::Corrupt);
                    };
                    let schema_version = CURRENT_SCHEMA.to_string();
                    let created_at = Utc::now().to_rfc3339();
                    meta.insert(META_FORMAT_KEY, CACHE_FORMAT)?;
                    meta.insert(META_SCHEMA_VERSION, schema_version.as_str())?;
                    meta.insert(META_CREATED_AT, created_at.as_str())?;
                    meta.insert(META_SERVICE_ID, service_id)?;
                }
                Some(CACHE_FORMAT) => {}
                Some(_) => return Err(CacheError::Corrupt),
            }
        }
        let _ = write_tx.open_table(LAYERS)?;
        let _ = write_tx.open_table(FEATURES)?;
        let _ = write_tx.open_table(EDITS)?;
        write_tx.commit()?;

        let read_tx = db.begin_read()?;
        let meta = read_tx.open_table(META)?;
        let schema_version = meta
            .get(META_SCHEMA_VERSION)?
            .and_then(|g| g.value().parse::<u32>().ok())
            .unwrap_or(0);
        if schema_version == 0 {
            return Err(CacheError::Corrupt);
        }
        if schema_version > CURRENT_SCHEMA {
            return Err(CacheError::NewerSchema {
                found: schema_version,
                supported: CURRENT_SCHEMA,
            });
        }
        if schema_version != CURRENT_SCHEMA {
            return Err(CacheError::Corrupt);
        }
        Ok(())
    }

    fn join_error(e: tokio::task::JoinError) -> StoreError {
        CacheError::Task(e.to_string()).into()
    }
}

#[async_trait::async_trait]
impl LocalStore for RedbCacheStore {
    async fn open(&self, path: &Utf8Path) -> Result<LocalCacheHandle, StoreError> {
        let store = self.clone();
        let path = path.to_owned();
        let cache = tokio::task::spawn_blocking(move || store.open_existing(&path))
            .await
            .map_err(Self::join_error)??;
        Ok(Arc::new(cache))
    }

    async fn close(&self, handle: LocalCacheHandle) {
        let path = handle.path().to_owned();
        drop(handle);
        self.release(&path);
    }

    async fn remove(&self, path: &Utf8Path) -> Result<(), StoreError> {
        let store = self.clone();
        let path = path.to_owned();
        tokio::task::spawn_blocking(move || store.remove_file(&path))
            .await
            .map_err(Self::join_error)??;
        Ok(())
    }
}

/// One open cache file.
#[derive(Clone)]
pub struct RedbCache {
    path: Utf8PathBuf,
    db: Arc<Database>,
}

impl fmt::Debug for RedbCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedbCache").field("path", &self.path).finish()
    }
}

impl RedbCache {
    pub fn meta(&self) -> Result<CacheMeta, CacheError> {
        let read_tx = self.db.begin_read()?;
        let meta = read_tx.open_table(META)?;
        let get = |key: &str| -> Result<Option<String>, CacheError> {
            Ok(meta.get(key)?.map(|g| g.value().to_string()))
        };
        let parse_ts = |raw: Option<String>| {
            raw.and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
                .map(|t| t.with_timezone(&Utc))
        };
        Ok(CacheMeta {
            service_id: get(META_SERVICE_ID)?,
            created_at: parse_ts(get(META_CREATED_AT)?),
            last_sync_at: parse_ts(get(META_LAST_SYNC_AT)?),
            sync_token: get(META_SYNC_TOKEN)?,
        })
    }

    fn set_meta(&self, key: &str, value: &str) -> Result<(), CacheError> {
        let write_tx = self.db.begin_write()?;
        {
            let mut meta = write_tx.open_table(META)?;
            meta.insert(key, value)?;
        }
        write_tx.commit()?;
        Ok(())
    }

    pub fn set_sync_token(&self, token: &str) -> Result<(), CacheError> {
        self.set_meta(META_SYNC_TOKEN, token)
    }

    /// Replaces a layer's descriptor and features.
    pub fn write_layer(
        &self,
        descriptor: &LayerDescriptor,
        features: &[Feature],
    ) -> Result<(), CacheError> {
        let layer_id = descriptor.remote_layer_id;
        let write_tx = self.db.begin_write()?;
        {
            let mut table = write_tx.open_table(FEATURES)?;
            let (start, end) = FeatureKey::range_for_layer(layer_id);
            let mut stale = Vec::new();
            for row in table.range(start.as_slice()..=end.as_slice())? {
                let (k, _) = row?;
                stale.push(k.value().to_vec());
            }
            for k in stale {
                let _ = table.remove(k.as_slice())?;
            }
            for feature in features {
                let key = FeatureKey::new(layer_id, feature.object_id).to_bytes();
                table.insert(key.as_slice(), encode(feature)?.as_slice())?;
            }

            let mut layers = write_tx.open_table(LAYERS)?;
            let stored = LayerDescriptor {
                feature_count: 0,
                ..descriptor.clone()
            };
            layers.insert(layer_id, encode(&stored)?.as_slice())?;
        }
        write_tx.commit()?;
        Ok(())
    }

    pub fn features(&self, layer_id: u32) -> Result<Vec<Feature>, CacheError> {
        let read_tx = self.db.begin_read()?;
        let table = read_tx.open_table(FEATURES)?;
        let (start, end) = FeatureKey::range_for_layer(layer_id);
        let mut out = Vec::new();
        for row in table.range(start.as_slice()..=end.as_slice())? {
            let (_, v) = row?;
            out.push(decode(v.value())?);
        }
        Ok(out)
    }

    /// Applies a local edit to the features table and queues it for the next sync.
    ///
    /// Edits to the same feature collapse: an update of a local add stays an add, and
    /// deleting a local add drops it without ever reaching the server.
    pub fn stage_edit(&self, layer_id: u32, object_id: i64, edit: LocalEdit) -> Result<(), CacheError> {
        let key = FeatureKey::new(layer_id, object_id).to_bytes();
        let write_tx = self.db.begin_write()?;
        {
            let mut edits = write_tx.open_table(EDITS)?;
            let previous: Option<LocalEdit> = match edits.get(key.as_slice())? {
                Some(guard) => Some(decode(guard.value())?),
                None => None,
            };
            let merged = match (previous, edit) {
                (Some(LocalEdit::Add { .. }), LocalEdit::Update { feature }) => {
                    Some(LocalEdit::Add { feature })
                }
                (Some(LocalEdit::Add { .. }), LocalEdit::Delete) => None,
                (_, edit) => Some(edit),
            };

            let mut features = write_tx.open_table(FEATURES)?;
            match &merged {
                Some(LocalEdit::Add { feature }) | Some(LocalEdit::Update { feature }) => {
                    features.insert(key.as_slice(), encode(feature)?.as_slice())?;
                }
                Some(LocalEdit::Delete) | None => {
                    let _ = features.remove(key.as_slice())?;
                }
            }

            match merged {
                Some(edit) => {
                    edits.insert(key.as_slice(), encode(&edit)?.as_slice())?;
                }
                None => {
                    let _ = edits.remove(key.as_slice())?;
                }
            }
        }
        write_tx.commit()?;
        Ok(())
    }

    fn read_layers(&self) -> Result<Vec<LayerDescriptor>, CacheError> {
        let read_tx = self.db.begin_read()?;
        let layers = read_tx.open_table(LAYERS)?;
        let features = read_tx.open_table(FEATURES)?;
        let mut out = Vec::new();
        for row in layers.iter()? {
            let (_, v) = row?;
            let mut descriptor: LayerDescriptor = decode(v.value())?;
            let (start, end) = FeatureKey::range_for_layer(descriptor.remote_layer_id);
            let mut count = 0u64;
            for row in features.range(start.as_slice()..=end.as_slice())? {
                row?;
                count += 1;
            }
            descriptor.feature_count = count;
            out.push(descriptor);
        }
        Ok(out)
    }

    fn read_pending_edits(&self) -> Result<Vec<LayerEdits>, CacheError> {
        let read_tx = self.db.begin_read()?;
        let edits = read_tx.open_table(EDITS)?;
        let mut by_layer: BTreeMap<u32, LayerEdits> = BTreeMap::new();
        for row in edits.iter()? {
            let (k, v) = row?;
            let Some(key) = FeatureKey::from_bytes(k.value()) else {
                return Err(CacheError::Corrupt);
            };
            let entry = by_layer.entry(key.layer_id).or_insert_with(|| LayerEdits {
                layer_id: key.layer_id,
                ..LayerEdits::default()
            });
            match decode::<LocalEdit>(v.value())? {
                LocalEdit::Add { feature } => entry.adds.push(feature),
                LocalEdit::Update { feature } => entry.updates.push(feature),
                LocalEdit::Delete => entry.deletes.push(key.object_id),
            }
        }
        Ok(by_layer.into_values().collect())
    }

    fn delete_edits(&self, layer_ids: &[u32]) -> Result<(), CacheError> {
        let write_tx = self.db.begin_write()?;
        {
            let mut edits = write_tx.open_table(EDITS)?;
            for layer_id in layer_ids {
                let (start, end) = FeatureKey::range_for_layer(*layer_id);
                let mut keys = Vec::new();
                for row in edits.range(start.as_slice()..=end.as_slice())? {
                    let (k, _) = row?;
                    keys.push(k.value().to_vec());
                }
                for k in keys {
                    let _ = edits.remove(k.as_slice())?;
                }
            }
        }
        write_tx.commit()?;
        Ok(())
    }

    fn write_changes(&self, changes: &[LayerEdits]) -> Result<(), CacheError> {
        let write_tx = self.db.begin_write()?;
        {
            let mut features = write_tx.open_table(FEATURES)?;
            for layer in changes {
                for feature in layer.adds.iter().chain(layer.updates.iter()) {
                    let key = FeatureKey::new(layer.layer_id, feature.object_id).to_bytes();
                    features.insert(key.as_slice(), encode(feature)?.as_slice())?;
                }
                for object_id in &layer.deletes {
                    let key = FeatureKey::new(layer.layer_id, *object_id).to_bytes();
                    let _ = features.remove(key.as_slice())?;
                }
            }
        }
        write_tx.commit()?;
        Ok(())
    }
}

impl LocalCache for RedbCache {
    fn path(&self) -> &Utf8Path {
        &self.path
    }

    fn layers(&self) -> Result<Vec<LayerDescriptor>, StoreError> {
        Ok(self.read_layers()?)
    }

    fn last_sync(&self) -> Result<Option<DateTime<Utc>>, StoreError> {
        Ok(self.meta()?.last_sync_at)
    }

    fn mark_synced(&self, at: DateTime<Utc>) -> Result<(), StoreError> {
        Ok(self.set_meta(META_LAST_SYNC_AT, &at.to_rfc3339())?)
    }

    fn sync_token(&self) -> Result<Option<String>, StoreError> {
        Ok(self.meta()?.sync_token)
    }

    fn pending_edits(&self) -> Result<Vec<LayerEdits>, StoreError> {
        Ok(self.read_pending_edits()?)
    }

    fn clear_pending_edits(&self, layer_ids: &[u32]) -> Result<(), StoreError> {
        Ok(self.delete_edits(layer_ids)?)
    }

    fn apply_changes(&self, changes: &[LayerEdits]) -> Result<(), StoreError> {
        Ok(self.write_changes(changes)?)
    }
}
