//! The sync coordinator.
//!
//! One coordinator owns one session slot. Every pass claims the slot, probes
//! the remote, authenticates, then works table by table in registry order.
//! Local store calls are short and never span a remote call; writes decided
//! from a snapshot carry that snapshot's stamp so concurrent local edits win.

use crate::config::{ReconcileScope, SyncConfig};
use crate::conflict::{self, Winner};
use crate::connectivity::Connectivity;
use crate::error::{SyncError, SyncResult};
use crate::report::{RowIssue, StatusSnapshot, SyncReport, TableReport};
use crate::state::{SessionSlot, SyncMode, SyncSession};
use larder_codec::{Record, Value};
use larder_remote::{
    RemoteClient, RemoteError, RemoteErrorKind, RemoteRecord, RemoteResult, RemoteWrite, RowUpdate,
};
use larder_store::{
    ApplyGuard, ConflictChoice, LocalStore, QueueEntry, QueueOp, RemoteLink, StoreError, StoredRow,
    SyncStatus, TableId, TableSpec,
};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

const LAST_SYNC_AT: &str = "last_sync_at";
const LAST_ERROR: &str = "last_error";
const LAST_BOOTSTRAP_AT: &str = "last_bootstrap_at";

/// Who asked for a pass. Scheduled passes respect row backoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Trigger {
    Scheduled,
    Manual,
}

/// Cancels the running session of a coordinator from anywhere.
///
/// Cancellation takes effect between rows. A cancel issued while no session
/// runs is discarded when the next session starts.
#[derive(Debug, Clone, Default)]
pub struct CancelHandle {
    flag: Arc<AtomicBool>,
}

impl CancelHandle {
    /// Requests cancellation.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    /// Returns true if cancellation was requested.
    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    fn reset(&self) {
        self.flag.store(false, Ordering::SeqCst);
    }
}

/// Orchestrates bootstrap, push and reconcile between a local store and a
/// remote.
pub struct SyncCoordinator {
    store: Arc<LocalStore>,
    remote: Arc<dyn RemoteClient>,
    config: SyncConfig,
    session: SessionSlot,
    connectivity: Connectivity,
    cancel: CancelHandle,
}

impl fmt::Debug for SyncCoordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncCoordinator")
            .field("config", &self.config)
            .field("session", &self.session.snapshot())
            .finish_non_exhaustive()
    }
}

impl SyncCoordinator {
    /// Creates a coordinator.
    pub fn new(store: Arc<LocalStore>, remote: Arc<dyn RemoteClient>, config: SyncConfig) -> Self {
        Self {
            store,
            remote,
            config,
            session: SessionSlot::default(),
            connectivity: Connectivity::default(),
            cancel: CancelHandle::default(),
        }
    }

    /// The local store.
    pub fn store(&self) -> &Arc<LocalStore> {
        &self.store
    }

    /// The configuration.
    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Current session value.
    pub fn session(&self) -> SyncSession {
        self.session.snapshot()
    }

    /// A handle that cancels this coordinator's sessions.
    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    /// Cancels the running session between rows.
    pub fn cancel(&self) {
        info!("sync cancellation requested");
        self.cancel.cancel();
    }

    /// Replaces local synced contents with the remote collections.
    ///
    /// Tables are independent: a table whose read fails is skipped and
    /// reported while the others complete.
    pub fn bootstrap(&self) -> SyncResult<SyncReport> {
        self.run(SyncMode::Bootstrap, Trigger::Manual)
    }

    /// Sends every pending row, ignoring backoff.
    pub fn push(&self) -> SyncResult<SyncReport> {
        self.run(SyncMode::Push, Trigger::Manual)
    }

    /// Pushes, then reads back and resolves, ignoring backoff.
    pub fn reconcile(&self) -> SyncResult<SyncReport> {
        self.run(SyncMode::Reconcile, Trigger::Manual)
    }

    /// A user-requested sync: a reconcile that ignores backoff.
    pub fn manual_sync(&self) -> SyncResult<SyncReport> {
        self.reconcile()
    }

    /// The unattended pass: bootstraps when due, otherwise reconciles.
    /// Rows still backing off are skipped.
    pub fn run_scheduled(&self) -> SyncResult<SyncReport> {
        let mode = if self.bootstrap_due()? {
            SyncMode::Bootstrap
        } else {
            SyncMode::Reconcile
        };
        self.run(mode, Trigger::Scheduled)
    }

    /// Returns true if no bootstrap ever completed, or the last one is
    /// older than `bootstrap_max_age`.
    pub fn bootstrap_due(&self) -> SyncResult<bool> {
        let last = self
            .store
            .meta_get(LAST_BOOTSTRAP_AT)?
            .and_then(|v| v.parse::<i64>().ok());
        Ok(match (last, self.config.bootstrap_max_age) {
            (None, _) => true,
            (Some(at), Some(age)) => {
                let age = i64::try_from(age.as_millis()).unwrap_or(i64::MAX);
                self.store.now_ms().saturating_sub(at) > age
            }
            (Some(_), None) => false,
        })
    }

    /// The state the application shows.
    pub fn get_sync_status(&self) -> SyncResult<StatusSnapshot> {
        let session = self.session.snapshot();
        let connectivity = self.connectivity.snapshot();
        let counts = self.store.count_by_status()?;
        let stalled = self.store.count_stalled(self.config.retry.max_attempts)?;
        let last_sync_at = self
            .store
            .meta_get(LAST_SYNC_AT)?
            .and_then(|v| v.parse().ok())
            .or(session.last_completed_at);
        let last_error = if session.mode.is_some() {
            session.last_error.clone()
        } else {
            self.store.meta_get(LAST_ERROR)?
        };

        Ok(StatusSnapshot {
            online: connectivity.online,
            last_checked_at: connectivity.last_checked_at,
            last_sync_at,
            pending_count: counts.pending,
            conflict_count: counts.conflict,
            stalled_count: stalled,
            in_progress: session.in_progress,
            state: session.state,
            last_error,
        })
    }

    /// Applies a manual decision to a row in `conflict`.
    pub fn resolve_conflict(
        &self,
        table: TableId,
        id: impl Into<Value>,
        choice: ConflictChoice,
    ) -> SyncResult<()> {
        self.store.resolve_conflict(table, id, choice)?;
        Ok(())
    }

    /// Gives a failing or stalled row a fresh retry budget.
    ///
    /// # Errors
    ///
    /// `ConflictUnresolved` if the row is in conflict; it needs
    /// [`resolve_conflict`](Self::resolve_conflict) instead.
    pub fn retry_row(&self, table: TableId, id: impl Into<Value>) -> SyncResult<()> {
        let id = id.into();
        let name = self.store.registry().table(table)?.name.clone();
        match self.store.get_row(table, id.clone())? {
            None => Err(StoreError::not_found(name, id).into()),
            Some(row) if row.meta.status == SyncStatus::Conflict => {
                Err(SyncError::ConflictUnresolved { table: name, id })
            }
            Some(_) => {
                self.store.reset_attempts(table, id)?;
                Ok(())
            }
        }
    }

    fn run(&self, mode: SyncMode, trigger: Trigger) -> SyncResult<SyncReport> {
        let started_at = self.store.now_ms();
        // a cancel aimed at the session this call lost to must survive
        let guard = self.session.try_begin(mode, started_at, || self.cancel.reset())?;
        info!(%mode, ?trigger, "sync session started");

        let result = self.open_session().and_then(|()| {
            let mut pass = Pass::new(self, trigger == Trigger::Scheduled);
            let mut report = SyncReport::new(mode, started_at);
            match mode {
                SyncMode::Bootstrap => pass.bootstrap(&mut report)?,
                SyncMode::Push => pass.push(&mut report)?,
                SyncMode::Reconcile => pass.reconcile(&mut report)?,
            }
            Ok(report)
        });

        let finished_at = self.store.now_ms();
        let result = result.and_then(|report| {
            self.store.meta_set(LAST_SYNC_AT, &finished_at.to_string())?;
            self.store.meta_remove(LAST_ERROR)?;
            Ok(report)
        });

        match result {
            Ok(mut report) => {
                report.finished_at = finished_at;
                guard.finish(finished_at, None);
                info!(
                    %mode,
                    pushed = report.pushed(),
                    pulled = report.pulled(),
                    failures = report.failure_count(),
                    conflicts = report.conflict_count(),
                    "sync session finished"
                );
                Ok(report)
            }
            Err(err) => {
                if !err.is_status() {
                    if let Err(e) = self.store.meta_set(LAST_ERROR, &err.to_string()) {
                        warn!(error = %e, "could not persist sync error");
                    }
                }
                if err.is_status() {
                    debug!(%mode, error = %err, "sync session not run");
                } else {
                    warn!(%mode, error = %err, "sync session failed");
                }
                guard.finish(finished_at, Some(err.to_string()));
                Err(err)
            }
        }
    }

    fn open_session(&self) -> SyncResult<()> {
        let now = self.store.now_ms();
        if !self
            .connectivity
            .check(self.remote.as_ref(), self.config.probe_timeout, now)
        {
            return Err(SyncError::Offline);
        }
        self.remote.authenticate().map_err(SyncError::from_remote)
    }
}

/// Per-table work area of a pass.
struct TableWork<'a> {
    id: TableId,
    spec: &'a TableSpec,
    report: TableReport,
    had_pending: bool,
    contested: bool,
}

/// State of one running pass.
struct Pass<'a> {
    coordinator: &'a SyncCoordinator,
    store: &'a LocalStore,
    remote: &'a dyn RemoteClient,
    honor_backoff: bool,
    reauthenticated: bool,
}

impl<'a> Pass<'a> {
    fn new(coordinator: &'a SyncCoordinator, honor_backoff: bool) -> Self {
        Self {
            coordinator,
            store: coordinator.store.as_ref(),
            remote: coordinator.remote.as_ref(),
            honor_backoff,
            reauthenticated: false,
        }
    }

    fn check_cancelled(&self) -> SyncResult<()> {
        if self.coordinator.cancel.is_cancelled() {
            return Err(SyncError::Cancelled);
        }
        Ok(())
    }

    /// Runs a remote call. An `Unauthorized` answer triggers one
    /// re-authentication and retry per session; after that it ends the
    /// session. Any other outcome goes back to the caller.
    fn call<T>(
        &mut self,
        what: &'static str,
        op: impl Fn(&dyn RemoteClient) -> RemoteResult<T>,
    ) -> SyncResult<RemoteResult<T>> {
        match op(self.remote) {
            Err(err) if err.is_unauthorized() => {
                if self.reauthenticated {
                    return Err(SyncError::Unauthorized(err.message));
                }
                self.reauthenticated = true;
                info!(call = what, "credentials refused, re-authenticating");
                self.remote.authenticate().map_err(SyncError::from_remote)?;
                match op(self.remote) {
                    Err(err) if err.is_unauthorized() => Err(SyncError::Unauthorized(err.message)),
                    other => Ok(other),
                }
            }
            other => Ok(other),
        }
    }

    fn tables(&self) -> Vec<TableWork<'a>> {
        let store = self.store;
        store
            .registry()
            .iter()
            .map(|(id, spec)| TableWork {
                id,
                spec,
                report: TableReport::new(&spec.name),
                had_pending: false,
                contested: false,
            })
            .collect()
    }

    fn bootstrap(&mut self, report: &mut SyncReport) -> SyncResult<()> {
        let mut complete = true;
        for mut work in self.tables() {
            self.check_cancelled()?;
            let collection = work.spec.remote_collection.as_str();
            match self.call("read_collection", |r| r.read_collection(collection))? {
                Ok(records) => {
                    let rows = remote_rows(work.spec, &records);
                    let summary = self.store.replace_synced(work.id, &rows)?;
                    work.report.pulled = summary.inserted;
                }
                Err(err) => {
                    warn!(table = %work.spec.name, error = %err, "bootstrap skipped table");
                    work.report.error = Some(err.to_string());
                    complete = false;
                }
            }
            report.add(work.report);
        }

        if complete {
            self.store
                .meta_set(LAST_BOOTSTRAP_AT, &self.store.now_ms().to_string())?;
        }
        Ok(())
    }

    fn push(&mut self, report: &mut SyncReport) -> SyncResult<()> {
        let mut tables = self.tables();
        for work in &mut tables {
            self.check_cancelled()?;
            self.push_table(work)?;
        }
        for work in tables {
            report.add(work.report);
        }
        Ok(())
    }

    fn reconcile(&mut self, report: &mut SyncReport) -> SyncResult<()> {
        let mut tables = self.tables();
        for work in &mut tables {
            work.had_pending = !self.store.list_pending(Some(work.id))?.is_empty();
        }
        for work in &mut tables {
            self.check_cancelled()?;
            self.push_table(work)?;
        }

        let scope = self.coordinator.config.reconcile_scope;
        for work in &mut tables {
            let in_scope = match scope {
                ReconcileScope::AllTables => true,
                ReconcileScope::PendingTables => work.had_pending || work.contested,
            };
            if in_scope {
                self.check_cancelled()?;
                self.pull_table(work)?;
            }
        }

        for work in tables {
            report.add(work.report);
        }
        Ok(())
    }

    fn push_table(&mut self, work: &mut TableWork<'a>) -> SyncResult<()> {
        let entries = self.store.pending_entries(Some(work.id))?;
        let now = self.store.now_ms();
        let batch_size = self.coordinator.config.push_batch_size.max(1);
        let mut batch: Vec<(QueueEntry, RemoteLink)> = Vec::new();

        for entry in entries {
            if self.coordinator.config.retry.is_exhausted(entry.attempt_count()) {
                work.report.stalled.push(entry.record_id().clone());
                continue;
            }
            if self.honor_backoff && entry.row.meta.next_attempt_at.is_some_and(|at| at > now) {
                work.report.skipped_backoff += 1;
                continue;
            }

            match (entry.operation, entry.row.meta.remote.clone()) {
                (QueueOp::Update, Some(link)) => {
                    batch.push((entry, link));
                    if batch.len() >= batch_size {
                        self.flush_updates(work, &mut batch)?;
                    }
                }
                (QueueOp::Delete, link) => {
                    self.flush_updates(work, &mut batch)?;
                    self.check_cancelled()?;
                    self.push_delete(work, &entry, link)?;
                }
                _ => {
                    self.flush_updates(work, &mut batch)?;
                    self.check_cancelled()?;
                    self.push_insert(work, &entry)?;
                }
            }
        }
        self.flush_updates(work, &mut batch)
    }

    fn push_insert(&mut self, work: &mut TableWork<'a>, entry: &QueueEntry) -> SyncResult<()> {
        let collection = work.spec.remote_collection.as_str();
        match self.call("append_row", |r| r.append_row(collection, entry.payload()))? {
            Ok(write) => {
                self.confirm(work, entry, write)?;
                work.report.appended += 1;
            }
            Err(err) => self.row_failed(work, entry, &err)?,
        }
        Ok(())
    }

    fn push_delete(
        &mut self,
        work: &mut TableWork<'a>,
        entry: &QueueEntry,
        link: Option<RemoteLink>,
    ) -> SyncResult<()> {
        let id = entry.record_id().clone();
        let stamp = entry.row.meta.local_modified_at;
        let Some(link) = link else {
            // never reached the remote
            self.store.mark_synced(work.id, id, stamp, None)?;
            return Ok(());
        };

        let collection = work.spec.remote_collection.as_str();
        let result = self.call("delete_row", |r| {
            r.delete_row(collection, &link.remote_id, link.version.as_deref())
        })?;
        match result {
            Ok(()) => {}
            Err(err) if err.kind == RemoteErrorKind::NotFound => {
                debug!(table = %work.spec.name, %id, "remote record already gone");
            }
            Err(err) => return self.row_failed(work, entry, &err),
        }
        self.store.mark_synced(work.id, id, stamp, None)?;
        work.report.deleted += 1;
        Ok(())
    }

    fn flush_updates(
        &mut self,
        work: &mut TableWork<'a>,
        batch: &mut Vec<(QueueEntry, RemoteLink)>,
    ) -> SyncResult<()> {
        if batch.is_empty() {
            return Ok(());
        }
        self.check_cancelled()?;
        let batch = std::mem::take(batch);
        let collection = work.spec.remote_collection.as_str();

        let results: Vec<RemoteResult<RemoteWrite>> = match batch.as_slice() {
            [(entry, link)] => vec![self.call("update_row", |r| {
                r.update_row(
                    collection,
                    &link.remote_id,
                    entry.payload(),
                    link.version.as_deref(),
                )
            })?],
            _ => {
                let updates: Vec<RowUpdate> = batch
                    .iter()
                    .map(|(entry, link)| RowUpdate {
                        remote_id: link.remote_id.clone(),
                        fields: entry.payload().clone(),
                        expected_version: link.version.clone(),
                    })
                    .collect();
                match self.call("batch_update", |r| r.batch_update(collection, &updates))? {
                    Ok(outcome) => outcome.results,
                    Err(err) => vec![Err(err); batch.len()],
                }
            }
        };

        for ((entry, _), result) in batch.iter().zip(results) {
            match result {
                Ok(write) => {
                    self.confirm(work, entry, write)?;
                    work.report.updated += 1;
                }
                Err(err) => self.row_failed(work, entry, &err)?,
            }
        }
        Ok(())
    }

    fn confirm(&self, work: &TableWork<'a>, entry: &QueueEntry, write: RemoteWrite) -> SyncResult<()> {
        let link = RemoteLink::new(write.remote_id, write.version);
        let synced = self.store.mark_synced(
            work.id,
            entry.record_id().clone(),
            entry.row.meta.local_modified_at,
            Some(&link),
        )?;
        if !synced {
            debug!(table = %work.spec.name, id = %entry.record_id(), "row edited during push, stays pending");
        }
        Ok(())
    }

    fn row_failed(&self, work: &mut TableWork<'a>, entry: &QueueEntry, err: &RemoteError) -> SyncResult<()> {
        let id = entry.record_id().clone();
        match (err.kind, entry.operation) {
            (RemoteErrorKind::Conflict, _) => {
                debug!(table = %work.spec.name, %id, "remote version moved, left for reconcile");
                work.contested = true;
                work.report.contested.push(id);
            }
            (RemoteErrorKind::NotFound, QueueOp::Update) => {
                let reason = "remote record no longer exists";
                self.store.mark_conflict(work.id, id.clone(), reason)?;
                work.report.conflicts.push(RowIssue::new(id, reason));
            }
            _ => {
                let retry = &self.coordinator.config.retry;
                let delay = retry.delay_for_attempt(entry.attempt_count().saturating_add(1));
                let delay_ms = i64::try_from(delay.as_millis()).unwrap_or(i64::MAX);
                let next_attempt_at = self.store.now_ms().saturating_add(delay_ms);
                let message = err.to_string();
                let attempts =
                    self.store
                        .record_failure(work.id, id.clone(), &message, Some(next_attempt_at))?;
                if retry.is_exhausted(attempts) {
                    warn!(table = %work.spec.name, %id, attempts, error = %err, "row reached the retry ceiling");
                } else {
                    debug!(table = %work.spec.name, %id, attempts, error = %err, "row push failed");
                }
                work.report.failures.push(RowIssue::new(id, message));
            }
        }
        Ok(())
    }

    fn pull_table(&mut self, work: &mut TableWork<'a>) -> SyncResult<()> {
        let collection = work.spec.remote_collection.as_str();
        let records = match self.call("read_collection", |r| r.read_collection(collection))? {
            Ok(records) => records,
            Err(err) => {
                warn!(table = %work.spec.name, error = %err, "reconcile skipped table");
                work.report.error = Some(err.to_string());
                return Ok(());
            }
        };

        let local = self.store.rows(work.id)?;
        let by_remote: HashMap<&str, &StoredRow> = local
            .iter()
            .filter_map(|row| row.meta.remote.as_ref().map(|l| (l.remote_id.as_str(), row)))
            .collect();
        let by_key: HashMap<String, &StoredRow> = local
            .iter()
            .map(|row| (row.id.to_cell_text(), row))
            .collect();
        let mut seen: HashSet<&str> = HashSet::with_capacity(records.len());

        for rec in &records {
            self.check_cancelled()?;
            seen.insert(rec.remote_id.as_str());
            let Some(record) = local_record(work.spec, rec) else {
                continue;
            };
            let link = RemoteLink::new(rec.remote_id.clone(), rec.version.clone());
            let key = record
                .get(&work.spec.primary_key)
                .map(Value::to_cell_text)
                .unwrap_or_default();
            let row = by_remote.get(rec.remote_id.as_str()).copied().or_else(|| {
                by_key
                    .get(&key)
                    .copied()
                    .filter(|row| row.meta.remote.is_none())
            });

            match row {
                None => {
                    if self.store.apply_remote(
                        work.id,
                        &record,
                        &link,
                        rec.modified_at,
                        ApplyGuard::Absent,
                    )? {
                        work.report.pulled += 1;
                    }
                }
                Some(row) => self.merge_row(work, row, &record, &link, rec.modified_at)?,
            }
        }

        for row in &local {
            let Some(link) = &row.meta.remote else {
                continue;
            };
            if seen.contains(link.remote_id.as_str()) {
                continue;
            }
            self.check_cancelled()?;
            let stamp = row.meta.local_modified_at;
            match row.meta.status {
                SyncStatus::Synced => {
                    if self.store.purge(work.id, row.id.clone(), stamp)? {
                        work.report.pulled += 1;
                    }
                }
                SyncStatus::Pending if row.meta.deleted => {
                    self.store.mark_synced(work.id, row.id.clone(), stamp, None)?;
                }
                SyncStatus::Pending => {
                    let reason = "deleted remotely while edited locally";
                    self.store.mark_conflict(work.id, row.id.clone(), reason)?;
                    work.report.conflicts.push(RowIssue::new(row.id.clone(), reason));
                }
                SyncStatus::Conflict => {}
            }
        }
        Ok(())
    }

    /// Brings one local row in line with its remote copy.
    fn merge_row(
        &self,
        work: &mut TableWork<'a>,
        row: &StoredRow,
        record: &Record,
        link: &RemoteLink,
        remote_modified_at: Option<i64>,
    ) -> SyncResult<()> {
        let stamp = row.meta.local_modified_at;
        let known_version = row.meta.remote.as_ref().and_then(|l| l.version.as_deref());

        match row.meta.status {
            SyncStatus::Conflict => {
                let reason = row
                    .meta
                    .last_error
                    .clone()
                    .unwrap_or_else(|| "awaiting a manual decision".to_string());
                work.report.conflicts.push(RowIssue::new(row.id.clone(), reason));
            }
            SyncStatus::Synced => {
                let changed = match (known_version, link.version.as_deref()) {
                    (Some(known), Some(current)) => known != current,
                    _ => row.record != *record,
                };
                if changed
                    && self.store.apply_remote(
                        work.id,
                        record,
                        link,
                        remote_modified_at,
                        ApplyGuard::Unchanged(stamp),
                    )?
                {
                    work.report.pulled += 1;
                }
            }
            SyncStatus::Pending => {
                let changed = match (&row.meta.remote, known_version, link.version.as_deref()) {
                    // a record created elsewhere under the same key
                    (None, _, _) => true,
                    (Some(_), Some(known), Some(current)) => known != current,
                    // without versions the push decides
                    _ => false,
                };
                if !changed {
                    return Ok(());
                }

                match conflict::resolve(stamp, remote_modified_at) {
                    Winner::Remote => {
                        if self.store.apply_remote(
                            work.id,
                            record,
                            link,
                            remote_modified_at,
                            ApplyGuard::Unchanged(stamp),
                        )? {
                            info!(table = %work.spec.name, id = %row.id, local = stamp, remote = ?remote_modified_at, "conflict resolved for remote copy");
                            work.report.remote_wins += 1;
                        }
                    }
                    Winner::Local => {
                        self.store.link_remote(work.id, row.id.clone(), link)?;
                        info!(table = %work.spec.name, id = %row.id, local = stamp, remote = ?remote_modified_at, "conflict resolved for local copy");
                        work.report.local_wins += 1;
                    }
                }
            }
        }
        Ok(())
    }
}

/// Converts remote records to local rows for a bootstrap reload.
fn remote_rows(spec: &TableSpec, records: &[RemoteRecord]) -> Vec<(Record, RemoteLink, Option<i64>)> {
    records
        .iter()
        .filter_map(|rec| {
            let record = local_record(spec, rec)?;
            Some((
                record,
                RemoteLink::new(rec.remote_id.clone(), rec.version.clone()),
                rec.modified_at,
            ))
        })
        .collect()
}

/// Reads a remote record as a local one. Records without a key are skipped.
fn local_record(spec: &TableSpec, rec: &RemoteRecord) -> Option<Record> {
    let (record, rejected) = spec.record_from_remote(&rec.fields);
    if !rejected.is_empty() {
        debug!(table = %spec.name, remote_id = %rec.remote_id, ?rejected, "remote values unreadable as column type");
    }
    match record.get(&spec.primary_key) {
        Some(value) if !value.is_null() => Some(record),
        _ => {
            warn!(table = %spec.name, remote_id = %rec.remote_id, "remote record without a key skipped");
            None
        }
    }
}
