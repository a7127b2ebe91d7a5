//! Error types for the local store.

use larder_codec::Value;
use thiserror::Error;

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors that can occur in local store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// SQLite error.
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// The store has no open connection.
    #[error("store is not connected")]
    Closed,

    /// A table name is not part of the registry.
    #[error("unknown table: {name}")]
    UnknownTable {
        /// The name that failed to resolve.
        name: String,
    },

    /// The registry definition is invalid.
    #[error("invalid registry: {message}")]
    InvalidRegistry {
        /// Description of the problem.
        message: String,
    },

    /// A record violates the table contract (duplicate key, missing
    /// required column, unknown column, wrong type).
    #[error("validation failed for table {table}: {message}")]
    Validation {
        /// Table name.
        table: String,
        /// Description of the violation.
        message: String,
    },

    /// No row matches the given primary key.
    #[error("no row with id {id} in table {table}")]
    NotFound {
        /// Table name.
        table: String,
        /// Primary key that was looked up.
        id: Value,
    },

    /// A persisted bookkeeping value could not be interpreted.
    #[error("corrupt bookkeeping in table {table}: {message}")]
    Corrupt {
        /// Table name.
        table: String,
        /// Description of the problem.
        message: String,
    },
}

impl StoreError {
    /// Creates a validation error.
    pub fn validation(table: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation {
            table: table.into(),
            message: message.into(),
        }
    }

    /// Creates a not-found error.
    pub fn not_found(table: impl Into<String>, id: Value) -> Self {
        Self::NotFound {
            table: table.into(),
            id,
        }
    }

    /// Creates an invalid-registry error.
    pub fn invalid_registry(message: impl Into<String>) -> Self {
        Self::InvalidRegistry {
            message: message.into(),
        }
    }

    /// Returns true for contract violations by the caller.
    ///
    /// These are programming errors and are never retried.
    pub fn is_contract_violation(&self) -> bool {
        matches!(
            self,
            StoreError::Validation { .. }
                | StoreError::NotFound { .. }
                | StoreError::UnknownTable { .. }
        )
    }
}
