//! Error types for remote clients.

use serde::Serialize;
use std::fmt;
use thiserror::Error;

/// Result type for remote operations.
pub type RemoteResult<T> = Result<T, RemoteError>;

/// The only failure categories visible past the client boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RemoteErrorKind {
    /// The collection or row does not exist remotely.
    NotFound,
    /// Credentials are missing, expired or rejected.
    Unauthorized,
    /// The remote could not be reached or answered with a transient failure.
    /// Timeouts land here too.
    Unavailable,
    /// An optimistic write found a different version than expected.
    Conflict,
}

impl fmt::Display for RemoteErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            RemoteErrorKind::NotFound => "not found",
            RemoteErrorKind::Unauthorized => "unauthorized",
            RemoteErrorKind::Unavailable => "unavailable",
            RemoteErrorKind::Conflict => "version conflict",
        })
    }
}

/// A remote failure: a kind plus a human-readable message.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("remote {kind}: {message}")]
pub struct RemoteError {
    /// Failure category.
    pub kind: RemoteErrorKind,
    /// Detail for logs and `last_sync_error`.
    pub message: String,
}

impl RemoteError {
    /// Creates an error of the given kind.
    pub fn new(kind: RemoteErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Creates a `NotFound` error.
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(RemoteErrorKind::NotFound, message)
    }

    /// Creates an `Unauthorized` error.
    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(RemoteErrorKind::Unauthorized, message)
    }

    /// Creates an `Unavailable` error.
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(RemoteErrorKind::Unavailable, message)
    }

    /// Creates a `Conflict` error.
    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(RemoteErrorKind::Conflict, message)
    }

    /// Returns true if retrying the same call later may succeed.
    pub fn is_retryable(&self) -> bool {
        self.kind == RemoteErrorKind::Unavailable
    }

    /// Returns true for credential failures.
    pub fn is_unauthorized(&self) -> bool {
        self.kind == RemoteErrorKind::Unauthorized
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_unavailable_is_retryable() {
        assert!(RemoteError::unavailable("timeout").is_retryable());
        assert!(!RemoteError::not_found("gone").is_retryable());
        assert!(!RemoteError::unauthorized("expired").is_retryable());
        assert!(!RemoteError::conflict("v2 != v3").is_retryable());
    }

    #[test]
    fn display_includes_kind() {
        let err = RemoteError::conflict("expected v1");
        assert_eq!(err.to_string(), "remote version conflict: expected v1");
    }
}
