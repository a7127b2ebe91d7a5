//! Pass reports and status snapshots.

use crate::state::{SyncMode, SyncState};
use larder_codec::Value;
use serde::Serialize;

/// A row that did not make it, and why.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RowIssue {
    /// Primary key.
    pub id: Value,
    /// Failure or conflict reason.
    pub reason: String,
}

impl RowIssue {
    pub(crate) fn new(id: Value, reason: impl Into<String>) -> Self {
        Self {
            id,
            reason: reason.into(),
        }
    }
}

/// What one pass did to one table.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct TableReport {
    /// Table name.
    pub table: String,
    /// Rows appended remotely.
    pub appended: u64,
    /// Rows updated remotely.
    pub updated: u64,
    /// Deletes propagated to the remote.
    pub deleted: u64,
    /// Remote changes written locally (inserts, edits, removals).
    pub pulled: u64,
    /// Conflicts decided for the remote copy.
    pub remote_wins: u64,
    /// Conflicts decided for the local copy.
    pub local_wins: u64,
    /// Rows skipped because their backoff has not elapsed.
    pub skipped_backoff: u64,
    /// Rows whose push failed; they stay pending.
    pub failures: Vec<RowIssue>,
    /// Keys of rows skipped because they reached the retry ceiling.
    pub stalled: Vec<Value>,
    /// Keys of rows whose push met a newer remote version.
    pub contested: Vec<Value>,
    /// Rows moved to, or left in, `conflict`.
    pub conflicts: Vec<RowIssue>,
    /// Set when the whole table was skipped.
    pub error: Option<String>,
}

impl TableReport {
    pub(crate) fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            ..Self::default()
        }
    }

    /// Rows that reached the remote.
    pub fn pushed(&self) -> u64 {
        self.appended + self.updated + self.deleted
    }

    /// Returns true if nothing in this table needs attention.
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
            && self.stalled.is_empty()
            && self.contested.is_empty()
            && self.conflicts.is_empty()
            && self.error.is_none()
    }

    fn is_empty(&self) -> bool {
        self.pushed() + self.pulled + self.remote_wins + self.local_wins + self.skipped_backoff == 0
            && self.is_clean()
    }
}

/// What one session did.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SyncReport {
    /// Session mode.
    pub mode: SyncMode,
    /// Session start (ms).
    pub started_at: i64,
    /// Session end (ms).
    pub finished_at: i64,
    /// Per-table results, in registry order. Tables the pass did not touch
    /// are left out.
    pub tables: Vec<TableReport>,
}

impl SyncReport {
    pub(crate) fn new(mode: SyncMode, started_at: i64) -> Self {
        Self {
            mode,
            started_at,
            finished_at: started_at,
            tables: Vec::new(),
        }
    }

    pub(crate) fn add(&mut self, table: TableReport) {
        if !table.is_empty() {
            self.tables.push(table);
        }
    }

    /// Looks up a table's report.
    pub fn table(&self, name: &str) -> Option<&TableReport> {
        self.tables.iter().find(|t| t.table == name)
    }

    /// Rows that reached the remote, across tables.
    pub fn pushed(&self) -> u64 {
        self.tables.iter().map(TableReport::pushed).sum()
    }

    /// Remote changes written locally, across tables.
    pub fn pulled(&self) -> u64 {
        self.tables.iter().map(|t| t.pulled).sum()
    }

    /// Failed rows, across tables.
    pub fn failure_count(&self) -> usize {
        self.tables.iter().map(|t| t.failures.len()).sum()
    }

    /// Conflict rows, across tables.
    pub fn conflict_count(&self) -> usize {
        self.tables.iter().map(|t| t.conflicts.len()).sum()
    }

    /// Returns true if nothing needs attention.
    pub fn is_clean(&self) -> bool {
        self.tables.iter().all(TableReport::is_clean)
    }
}

/// Everything the application needs to show about sync.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusSnapshot {
    /// Result of the last connectivity probe.
    pub online: bool,
    /// When the last probe ran (ms).
    pub last_checked_at: Option<i64>,
    /// End of the last successful session (ms).
    pub last_sync_at: Option<i64>,
    /// Rows waiting to be pushed.
    pub pending_count: u64,
    /// Rows waiting for a manual decision.
    pub conflict_count: u64,
    /// Pending rows at the retry ceiling.
    pub stalled_count: u64,
    /// True while a session runs.
    pub in_progress: bool,
    /// Coordinator state.
    pub state: SyncState,
    /// Reason the last session failed, if it did.
    pub last_error: Option<String>,
}
