//! Stored rows and their synchronization bookkeeping.

use crate::registry::TableId;
use larder_codec::{Record, Value};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Synchronization state of a row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    /// The remote holds this exact version.
    Synced,
    /// Local changes not yet confirmed by the remote.
    Pending,
    /// Needs a manual decision before it can sync again.
    Conflict,
}

impl SyncStatus {
    /// Value stored in the `sync_status` column.
    pub const fn as_str(self) -> &'static str {
        match self {
            SyncStatus::Synced => "synced",
            SyncStatus::Pending => "pending",
            SyncStatus::Conflict => "conflict",
        }
    }
}

impl fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SyncStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "synced" => Ok(SyncStatus::Synced),
            "pending" => Ok(SyncStatus::Pending),
            "conflict" => Ok(SyncStatus::Conflict),
            other => Err(format!("unknown sync status {other:?}")),
        }
    }
}

/// A remote identity together with the version last seen for it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteLink {
    /// Identifier the remote assigned to the record.
    pub remote_id: String,
    /// Version tag of the remote copy, when the remote provides one.
    pub version: Option<String>,
}

impl RemoteLink {
    /// Creates a link.
    pub fn new(remote_id: impl Into<String>, version: Option<String>) -> Self {
        Self {
            remote_id: remote_id.into(),
            version,
        }
    }
}

/// Bookkeeping columns of a row.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SyncMeta {
    /// Current status.
    pub status: SyncStatus,
    /// Monotonic stamp of the last local business mutation (ms).
    pub local_modified_at: i64,
    /// Remote identity and version, once the row reached the remote.
    pub remote: Option<RemoteLink>,
    /// Failed push attempts since the last local edit.
    pub attempts: u32,
    /// When the row last became pending (ms).
    pub enqueued_at: Option<i64>,
    /// When a push was last attempted (ms).
    pub last_attempt_at: Option<i64>,
    /// Earliest time the next scheduled attempt may run (ms).
    pub next_attempt_at: Option<i64>,
    /// Last push failure or conflict reason.
    pub last_error: Option<String>,
    /// Tombstone flag: deleted locally, delete not yet propagated.
    pub deleted: bool,
}

/// A row as stored, including bookkeeping.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StoredRow {
    /// Primary key value.
    pub id: Value,
    /// Business columns.
    pub record: Record,
    /// Synchronization bookkeeping.
    pub meta: SyncMeta,
}

impl StoredRow {
    /// Business columns plus the `sync_status` column, as handed to callers.
    pub fn to_record(&self) -> Record {
        let mut record = self.record.clone();
        record.insert(
            "sync_status".to_string(),
            Value::Text(self.meta.status.as_str().to_string()),
        );
        record
    }

    /// Returns true if the row has at least `ceiling` failed attempts.
    pub fn is_stalled(&self, ceiling: u32) -> bool {
        self.meta.attempts >= ceiling
    }
}

/// What a pending row asks the remote to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueOp {
    /// Never sent; append it.
    Insert,
    /// Known remotely; overwrite it.
    Update,
    /// Tombstone; remove it remotely.
    Delete,
}

/// Logical sync queue entry derived from a pending row.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueueEntry {
    /// Table the row lives in.
    #[serde(skip)]
    pub table: TableId,
    /// Operation to perform.
    pub operation: QueueOp,
    /// Snapshot of the row at enqueue-scan time.
    pub row: StoredRow,
}

impl QueueEntry {
    pub(crate) fn from_row(table: TableId, row: StoredRow) -> Self {
        let operation = if row.meta.deleted {
            QueueOp::Delete
        } else if row.meta.remote.is_none() {
            QueueOp::Insert
        } else {
            QueueOp::Update
        };
        Self {
            table,
            operation,
            row,
        }
    }

    /// Primary key of the row.
    pub fn record_id(&self) -> &Value {
        &self.row.id
    }

    /// Business columns to send.
    pub fn payload(&self) -> &Record {
        &self.row.record
    }

    /// When the row became pending.
    pub fn enqueued_at(&self) -> Option<i64> {
        self.row.meta.enqueued_at
    }

    /// Failed attempts so far.
    pub fn attempt_count(&self) -> u32 {
        self.row.meta.attempts
    }

    /// When the last attempt ran.
    pub fn last_attempt_at(&self) -> Option<i64> {
        self.row.meta.last_attempt_at
    }
}

/// Precondition for writing remote data over a local row.
///
/// Sync passes read a row, talk to the remote, then write back. A local edit
/// landing in between must win over the stale decision, so writes carry the
/// state they were decided against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyGuard {
    /// The row must not exist.
    Absent,
    /// The row must still carry this local modification stamp.
    Unchanged(i64),
}

/// Manual decision for a row in `conflict`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictChoice {
    /// Keep the local row; it is re-sent to the remote as a new record.
    KeepLocal,
    /// Accept the remote state; the local row is removed.
    AcceptRemote,
}

/// Row counts per status across all tables.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatusCounts {
    /// Rows in `synced`.
    pub synced: u64,
    /// Rows in `pending` (tombstones included).
    pub pending: u64,
    /// Rows in `conflict`.
    pub conflict: u64,
}

/// Outcome of replacing a table's synced contents.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReplaceSummary {
    /// Synced rows removed before the reload.
    pub removed: u64,
    /// Remote rows written.
    pub inserted: u64,
    /// Remote rows skipped because an unsynced local row holds the key.
    pub kept_local: u64,
}
