//! Error types for the sync coordinator.

use larder_codec::Value;
use larder_remote::RemoteError;
use larder_store::StoreError;
use thiserror::Error;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that end a sync session or reject a sync request.
///
/// Per-row remote failures never show up here; they are recorded on the row
/// and listed in the pass report.
#[derive(Error, Debug)]
pub enum SyncError {
    /// The connectivity probe failed. Nothing was sent or changed.
    #[error("remote is unreachable")]
    Offline,

    /// Another session holds the coordinator.
    #[error("a sync session is already in progress")]
    SyncInProgress,

    /// Credentials were refused, including after one re-authentication.
    #[error("authentication failed: {0}")]
    Unauthorized(String),

    /// A session-level remote call failed for another reason.
    #[error("remote error: {0}")]
    Remote(RemoteError),

    /// Local store error.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// The row needs a manual conflict decision first.
    #[error("row {id} in table {table} is in conflict and needs a manual decision")]
    ConflictUnresolved {
        /// Table name.
        table: String,
        /// Primary key.
        id: Value,
    },

    /// The session was cancelled between rows.
    #[error("sync cancelled")]
    Cancelled,
}

impl SyncError {
    /// Maps a session-level remote failure.
    pub fn from_remote(err: RemoteError) -> Self {
        if err.is_unauthorized() {
            Self::Unauthorized(err.message)
        } else {
            Self::Remote(err)
        }
    }

    /// Returns true if trying again later may succeed without intervention.
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::Offline | SyncError::SyncInProgress | SyncError::Cancelled => true,
            SyncError::Remote(err) => err.is_retryable(),
            _ => false,
        }
    }

    /// Returns true for outcomes that are reported as a status rather than
    /// a failure of the last session.
    pub fn is_status(&self) -> bool {
        matches!(self, SyncError::Offline | SyncError::SyncInProgress)
    }
}
