//! Error types for the codec crate.

use thiserror::Error;

/// Result type for codec operations.
pub type CodecResult<T> = Result<T, CodecError>;

/// Errors that can occur while converting values.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// A JSON value has no scalar counterpart (arrays, objects).
    #[error("unsupported JSON value: {kind}")]
    UnsupportedJson {
        /// The JSON kind that was rejected.
        kind: &'static str,
    },

    /// A JSON document was expected to be an object.
    #[error("expected a JSON object, got {kind}")]
    ExpectedObject {
        /// The JSON kind that was found instead.
        kind: &'static str,
    },

    /// JSON text could not be parsed.
    #[error("invalid JSON: {message}")]
    InvalidJson {
        /// Parser message.
        message: String,
    },
}

impl CodecError {
    /// Creates an invalid-JSON error.
    pub fn invalid_json(message: impl Into<String>) -> Self {
        Self::InvalidJson {
            message: message.into(),
        }
    }
}
