//! Core error types.

use std::fmt;

use datasync_proto::EntityKind;
use thiserror::Error;

/// Failure of a single routed event.
///
/// Unknown entity kinds are not represented here; they are reported as
/// [`RouteOutcome::Ignored`](crate::router::RouteOutcome::Ignored).
#[derive(Debug, Error)]
pub enum Error {
    /// The payload could not be classified. Dead-letter it; redelivery will not help.
    #[error("parse error: {0}")]
    Parse(#[from] datasync_proto::Error),

    /// The source of truth did not return a usable record for an upsert.
    #[error("failed to resolve {kind} {id}: {reason}")]
    Resolution {
        kind: EntityKind,
        id: i64,
        reason: String,
    },

    /// The cache mutation failed at the store level.
    #[error("cache store error on {key}: {reason}")]
    CacheStore { key: String, reason: String },

    /// The notification could not be delivered. Never fails an event.
    #[error("failed to publish to {topic}: {reason}")]
    Publish { topic: String, reason: String },
}

impl Error {
    /// Stable short label for logs and metrics.
    pub fn kind_label(&self) -> &'static str {
        match self {
            Error::Parse(_) => "parse",
            Error::Resolution { .. } => "resolution",
            Error::CacheStore { .. } => "cache_store",
            Error::Publish { .. } => "publish",
        }
    }

    /// Whether redelivering the same payload could succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Resolution { .. } | Error::CacheStore { .. })
    }
}

/// Fault reported by a collaborator backend (resolver transport, cache, publisher).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendError {
    message: String,
}

impl BackendError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for BackendError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for BackendError {}

impl From<sled::Error> for BackendError {
    fn from(err: sled::Error) -> Self {
        BackendError::new(format!("sled: {}", err))
    }
}

impl From<bb8_redis::redis::RedisError> for BackendError {
    fn from(err: bb8_redis::redis::RedisError) -> Self {
        BackendError::new(format!("redis: {}", err))
    }
}
