//! The remote client contract.

use crate::error::RemoteResult;
use larder_codec::Record;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

/// One record as the remote holds it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RemoteRecord {
    /// Identifier the remote assigned to the record.
    pub remote_id: String,
    /// Version tag; changes whenever the record changes.
    pub version: Option<String>,
    /// Remote modification time (ms since epoch), when the remote records one.
    pub modified_at: Option<i64>,
    /// Field values keyed by field name.
    pub fields: Record,
}

/// Identity and version produced by a successful write.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RemoteWrite {
    /// Identifier of the written record.
    pub remote_id: String,
    /// Version tag after the write.
    pub version: Option<String>,
}

/// One entry of a batched update.
#[derive(Debug, Clone, PartialEq)]
pub struct RowUpdate {
    /// Record to overwrite.
    pub remote_id: String,
    /// New field values.
    pub fields: Record,
    /// Version the caller last saw; the write is refused if it moved.
    pub expected_version: Option<String>,
}

/// Per-update results of a batched update, in request order.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchOutcome {
    /// One result per requested update.
    pub results: Vec<RemoteResult<RemoteWrite>>,
}

impl BatchOutcome {
    /// Number of updates that landed.
    pub fn succeeded(&self) -> usize {
        self.results.iter().filter(|r| r.is_ok()).count()
    }

    /// Number of updates that failed.
    pub fn failed(&self) -> usize {
        self.results.len() - self.succeeded()
    }

    /// Returns true if every update landed.
    pub fn is_complete(&self) -> bool {
        self.failed() == 0
    }
}

/// A network-only store organised as named collections of records.
///
/// Implementations translate their transport failures into the
/// [`RemoteErrorKind`](crate::RemoteErrorKind) set and must bound every call
/// with a timeout. Writes must be safe to resend after a timeout.
pub trait RemoteClient: Send + Sync {
    /// Acquires or refreshes credentials. Safe to call repeatedly.
    ///
    /// # Errors
    ///
    /// `Unauthorized` when no usable credential could be obtained.
    fn authenticate(&self) -> RemoteResult<()>;

    /// Reads every record of a collection.
    fn read_collection(&self, collection: &str) -> RemoteResult<Vec<RemoteRecord>>;

    /// Appends a record and returns its new identity.
    fn append_row(&self, collection: &str, fields: &Record) -> RemoteResult<RemoteWrite>;

    /// Overwrites a record.
    ///
    /// With `expected_version`, the write is a compare-and-swap and fails
    /// with `Conflict` if the record's version moved.
    fn update_row(
        &self,
        collection: &str,
        remote_id: &str,
        fields: &Record,
        expected_version: Option<&str>,
    ) -> RemoteResult<RemoteWrite>;

    /// Removes a record. Version checking works as for `update_row`.
    fn delete_row(
        &self,
        collection: &str,
        remote_id: &str,
        expected_version: Option<&str>,
    ) -> RemoteResult<()>;

    /// Applies several updates to one collection.
    ///
    /// A call-level failure (credentials, transport) is returned as `Err`;
    /// otherwise each update reports its own result.
    fn batch_update(&self, collection: &str, updates: &[RowUpdate]) -> RemoteResult<BatchOutcome> {
        let mut results = Vec::with_capacity(updates.len());
        for update in updates {
            let result = self.update_row(
                collection,
                &update.remote_id,
                &update.fields,
                update.expected_version.as_deref(),
            );
            if let Err(err) = &result {
                if err.is_unauthorized() {
                    return Err(err.clone());
                }
            }
            results.push(result);
        }
        Ok(BatchOutcome { results })
    }

    /// Bounded-latency liveness check, independent of business data.
    fn probe_reachable(&self, timeout: Duration) -> bool;
}

impl<R: RemoteClient + ?Sized> RemoteClient for Arc<R> {
    fn authenticate(&self) -> RemoteResult<()> {
        (**self).authenticate()
    }

    fn read_collection(&self, collection: &str) -> RemoteResult<Vec<RemoteRecord>> {
        (**self).read_collection(collection)
    }

    fn append_row(&self, collection: &str, fields: &Record) -> RemoteResult<RemoteWrite> {
        (**self).append_row(collection, fields)
    }

    fn update_row(
        &self,
        collection: &str,
        remote_id: &str,
        fields: &Record,
        expected_version: Option<&str>,
    ) -> RemoteResult<RemoteWrite> {
        (**self).update_row(collection, remote_id, fields, expected_version)
    }

    fn delete_row(&self, collection: &str, remote_id: &str, expected_version: Option<&str>) -> RemoteResult<()> {
        (**self).delete_row(collection, remote_id, expected_version)
    }

    fn batch_update(&self, collection: &str, updates: &[RowUpdate]) -> RemoteResult<BatchOutcome> {
        (**self).batch_update(collection, updates)
    }

    fn probe_reachable(&self, timeout: Duration) -> bool {
        (**self).probe_reachable(timeout)
    }
}
