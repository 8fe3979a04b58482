//! Cache store in a shared Redis instance.
//!
//! This is the store aggregation consumers read from, so keys are written
//! without any prefix: `brand_42` in the relay is `brand_42` in Redis.

use std::time::Duration;

use async_trait::async_trait;
use bb8_redis::bb8::{Pool, PooledConnection};
use bb8_redis::redis;
use bb8_redis::RedisConnectionManager;

use super::CacheStore;
use crate::error::BackendError;

/// Default number of pooled Redis connections.
pub const DEFAULT_POOL_SIZE: u32 = 16;

/// Cache store backed by a pooled Redis connection manager.
///
/// Each call checks a connection out of the pool and returns it as soon as
/// the command completes.
pub struct RedisCache {
    pool: Pool<RedisConnectionManager>,
    url: String,
}

impl RedisCache {
    /// Build the pool and check that the server answers `PING`.
    pub async fn connect(
        url: &str,
        pool_size: u32,
        connection_timeout: Duration,
    ) -> Result<Self, BackendError> {
        let manager = RedisConnectionManager::new(url)?;
        let pool = Pool::builder()
            .max_size(pool_size.max(1))
            .connection_timeout(connection_timeout)
            .build_unchecked(manager);

        let cache = Self {
            pool,
            url: url.to_string(),
        };
        cache.ping().await?;
        Ok(cache)
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    async fn connection(
        &self,
    ) -> Result<PooledConnection<'_, RedisConnectionManager>, BackendError> {
        self.pool
            .get()
            .await
            .map_err(|e| BackendError::new(format!("redis pool at {}: {}", self.url, e)))
    }

    /// Round trip to the server.
    pub async fn ping(&self) -> Result<(), BackendError> {
        let mut conn = self.connection().await?;
        redis::cmd("PING")
            .query_async::<_, String>(&mut *conn)
            .await?;
        Ok(())
    }

    /// Read a cached snapshot.
    pub async fn get(&self, key: &str) -> Result<Option<String>, BackendError> {
        let mut conn = self.connection().await?;
        let value = redis::cmd("GET")
            .arg(key)
            .query_async::<_, Option<String>>(&mut *conn)
            .await?;
        Ok(value)
    }
}

#[async_trait]
impl CacheStore for RedisCache {
    async fn set(&self, key: &str, value: &str) -> Result<(), BackendError> {
        let mut conn = self.connection().await?;
        redis::cmd("SET")
            .arg(key)
            .arg(value)
            .query_async::<_, ()>(&mut *conn)
            .await?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), BackendError> {
        let mut conn = self.connection().await?;
        redis::cmd("DEL")
            .arg(key)
            .query_async::<_, ()>(&mut *conn)
            .await?;
        Ok(())
    }
}
