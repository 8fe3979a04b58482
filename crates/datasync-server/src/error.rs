//! Server error types.

use thiserror::Error;

/// Server errors.
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// Transport error.
    #[error("transport error: {0}")]
    Transport(String),

    /// AMQP broker error.
    #[error("amqp error: {0}")]
    Amqp(#[from] lapin::Error),

    /// Collaborator backend error.
    #[error("backend error: {0}")]
    Backend(#[from] datasync_core::BackendError),

    /// Resolver client error.
    #[error("resolver error: {0}")]
    Resolver(String),

    /// IO error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
