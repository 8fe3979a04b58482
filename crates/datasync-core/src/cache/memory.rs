//! In-process cache store.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use dashmap::DashMap;

use super::CacheStore;
use crate::error::BackendError;

/// Cache store held in a concurrent map.
#[derive(Default)]
pub struct MemoryCache {
    entries: DashMap<String, String>,
    sets: AtomicU64,
    deletes: AtomicU64,
    unavailable: AtomicBool,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<String> {
        self.entries.get(key).map(|entry| entry.value().clone())
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of `set` calls received, including failed ones.
    pub fn set_calls(&self) -> u64 {
        self.sets.load(Ordering::Relaxed)
    }

    /// Number of `delete` calls received, including failed ones.
    pub fn delete_calls(&self) -> u64 {
        self.deletes.load(Ordering::Relaxed)
    }

    /// Simulate a backend outage. While set, every call fails.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check_available(&self) -> Result<(), BackendError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(BackendError::new("cache unavailable"));
        }
        Ok(())
    }
}

#[async_trait]
impl CacheStore for MemoryCache {
    async fn set(&self, key: &str, value: &str) -> Result<(), BackendError> {
        self.sets.fetch_add(1, Ordering::Relaxed);
        self.check_available()?;
        self.entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), BackendError> {
        self.deletes.fetch_add(1, Ordering::Relaxed);
        self.check_available()?;
        self.entries.remove(key);
        Ok(())
    }
}
