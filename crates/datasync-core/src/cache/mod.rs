//! Dimension cache stores.
//!
//! The router writes opaque JSON snapshots under `"{kind}_{id}"` keys. Stores
//! are last-writer-wins with no expiry, and deleting an absent key succeeds.

mod memory;
mod redis_store;
mod sled_store;

pub use memory::MemoryCache;
pub use redis_store::{RedisCache, DEFAULT_POOL_SIZE};
pub use sled_store::SledCache;

use async_trait::async_trait;

use crate::error::BackendError;

/// Key-value store the router mirrors catalog records into.
///
/// Errors are reserved for store-level faults. Handles are shared across
/// concurrent events, so implementations acquire any connection per call.
#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn set(&self, key: &str, value: &str) -> Result<(), BackendError>;

    async fn delete(&self, key: &str) -> Result<(), BackendError>;
}
