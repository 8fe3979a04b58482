//! Protocol error types.

use thiserror::Error;

/// Protocol-level errors.
#[derive(Debug, Error)]
pub enum Error {
    /// Payload is not a JSON object.
    #[error("malformed payload: {0}")]
    Malformed(String),

    /// A mandatory field is absent or null.
    #[error("missing field `{0}`")]
    MissingField(&'static str),

    /// A field is present but has the wrong shape.
    #[error("invalid field `{field}`: {reason}")]
    InvalidField {
        field: &'static str,
        reason: String,
    },

    /// Serialization failed.
    #[error("serialization error: {0}")]
    Serialization(String),
}
