//! Source-of-truth lookups.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use parking_lot::RwLock;

use datasync_proto::EntityKind;

use crate::error::BackendError;

/// Fetches the current serialized state of a catalog record.
///
/// Each entity kind is a separate query against the source of truth.
/// `Ok(None)` means the record does not exist; `Err` is a transport or
/// service fault. Implementations must not have side effects.
#[async_trait]
pub trait EntityResolver: Send + Sync {
    async fn resolve(&self, kind: EntityKind, id: i64) -> Result<Option<String>, BackendError>;
}

/// In-process resolver backed by a map of fixtures.
///
/// Useful for running the relay without a catalog service and for tests.
#[derive(Default)]
pub struct MemoryResolver {
    records: RwLock<HashMap<(EntityKind, i64), String>>,
    failing: RwLock<HashMap<(EntityKind, i64), String>>,
    calls: AtomicU64,
}

impl MemoryResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the representation returned for `(kind, id)`.
    pub fn insert(&self, kind: EntityKind, id: i64, representation: impl Into<String>) {
        self.records.write().insert((kind, id), representation.into());
    }

    /// Builder form of [`MemoryResolver::insert`].
    pub fn with_record(self, kind: EntityKind, id: i64, representation: impl Into<String>) -> Self {
        self.insert(kind, id, representation);
        self
    }

    /// Make lookups for `(kind, id)` fail with a backend error.
    pub fn fail(&self, kind: EntityKind, id: i64, message: impl Into<String>) {
        self.failing.write().insert((kind, id), message.into());
    }

    /// Number of lookups served so far.
    pub fn call_count(&self) -> u64 {
        self.calls.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl EntityResolver for MemoryResolver {
    async fn resolve(&self, kind: EntityKind, id: i64) -> Result<Option<String>, BackendError> {
        self.calls.fetch_add(1, Ordering::Relaxed);

        if let Some(message) = self.failing.read().get(&(kind, id)) {
            return Err(BackendError::new(message.clone()));
        }

        Ok(self.records.read().get(&(kind, id)).cloned())
    }
}
