use fieldcache_core::StoreError;

/// Internal error for the redb-backed cache. Collapsed into [`StoreError`] at the port boundary.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("cache file missing")]
    Missing,
    #[error("cache file is invalid or corrupt")]
    Corrupt,
    #[error("cache file is from a newer version (schema_version={found}, supported={supported})")]
    NewerSchema { found: u32, supported: u32 },
    #[error("cache file is already open by another process")]
    DatabaseAlreadyOpen,
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("redb database error: {0}")]
    RedbDatabase(Box<redb::DatabaseError>),
    #[error("redb transaction error: {0}")]
    RedbTransaction(Box<redb::TransactionError>),
    #[error("redb table error: {0}")]
    RedbTable(Box<redb::TableError>),
    #[error("redb storage error: {0}")]
    RedbStorage(Box<redb::StorageError>),
    #[error("redb commit error: {0}")]
    RedbCommit(Box<redb::CommitError>),
    #[error("invalid service id: {0:?}")]
    InvalidServiceId(String),
    #[error("background task failed: {0}")]
    Task(String),
}

impl From<redb::DatabaseError> for CacheError {
    fn from(value: redb::DatabaseError) -> Self {
        match value {
            redb::DatabaseError::DatabaseAlreadyOpen => Self::DatabaseAlreadyOpen,
            other => Self::RedbDatabase(Box::new(other)),
        }
    }
}

impl From<redb::TransactionError> for CacheError {
    fn from(value: redb::TransactionError) -> Self {
        Self::RedbTransaction(Box::new(value))
    }
}

impl From<redb::TableError> for CacheError {
    fn from(value: redb::TableError) -> Self {
        Self::RedbTable(Box::new(value))
    }
}

impl From<redb::StorageError> for CacheError {
    fn from(value: redb::StorageError) -> Self {
        Self::RedbStorage(Box::new(value))
    }
}

impl From<redb::CommitError> for CacheError {
    fn from(value: redb::CommitError) -> Self {
        Self::RedbCommit(Box::new(value))
    }
}

impl From<CacheError> for StoreError {
    fn from(value: CacheError) -> Self {
        match value {
            CacheError::Missing => StoreError::Missing,
            CacheError::Corrupt => StoreError::Corrupt,
            CacheError::NewerSchema { found, supported } => {
                StoreError::NewerSchema { found, supported }
            }
            CacheError::Io(e) => StoreError::Io(e),
            CacheError::Serde(e) => StoreError::Codec(e),
            other => StoreError::Backend(other.to_string()),
        }
    }
}
