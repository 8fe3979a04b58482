//! Cache store persisted in a sled tree.

use std::path::Path;

use async_trait::async_trait;

use super::CacheStore;
use crate::error::BackendError;

/// Name of the sled tree holding cached snapshots.
const CACHE_TREE: &str = "dimension_cache";

/// Cache store backed by an embedded sled database.
///
/// Values are stored as UTF-8 bytes. The tree handle is cheap to share and
/// every call is an independent sled operation.
pub struct SledCache {
    tree: sled::Tree,
    /// Keep the sled::Db handle alive for the tree.
    _db: sled::Db,
}

impl SledCache {
    /// Open (or create) a cache database at the given path.
    pub fn open(path: &Path) -> Result<Self, BackendError> {
        let db = sled::open(path)?;
        Self::from_db(db)
    }

    /// Open a throwaway cache that is removed on drop.
    pub fn temporary() -> Result<Self, BackendError> {
        let db = sled::Config::new().temporary(true).open()?;
        Self::from_db(db)
    }

    fn from_db(db: sled::Db) -> Result<Self, BackendError> {
        let tree = db.open_tree(CACHE_TREE)?;
        Ok(Self { tree, _db: db })
    }

    /// Read a cached snapshot.
    pub fn get(&self, key: &str) -> Result<Option<String>, BackendError> {
        match self.tree.get(key.as_bytes())? {
            Some(bytes) => String::from_utf8(bytes.to_vec())
                .map(Some)
                .map_err(|e| BackendError::new(format!("non UTF-8 value under {}: {}", key, e))),
            None => Ok(None),
        }
    }

    /// Number of cached snapshots.
    pub fn len(&self) -> usize {
        self.tree.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tree.is_empty()
    }

    /// Flush pending writes to disk.
    pub async fn flush(&self) -> Result<(), BackendError> {
        self.tree.flush_async().await?;
        Ok(())
    }
}

#[async_trait]
impl CacheStore for SledCache {
    async fn set(&self, key: &str, value: &str) -> Result<(), BackendError> {
        self.tree.insert(key.as_bytes(), value.as_bytes())?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), BackendError> {
        self.tree.remove(key.as_bytes())?;
        Ok(())
    }
}
