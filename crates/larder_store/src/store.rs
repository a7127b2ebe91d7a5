//! The local store.

use crate::clock::{Clock, SystemClock};
use crate::error::{StoreError, StoreResult};
use crate::filter::{Filter, OrderBy};
use crate::registry::{Registry, TableId, META_TABLE};
use crate::row::{
    ApplyGuard, ConflictChoice, QueueEntry, RemoteLink, ReplaceSummary, StatusCounts, StoredRow,
    SyncMeta, SyncStatus,
};
use crate::schema::{quote, TableSpec};
use larder_codec::{Record, Value};
use parking_lot::Mutex;
use rusqlite::types::{Type, Value as SqlValue};
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Bookkeeping column definitions, in `BOOKKEEPING_COLUMNS` order.
const BOOKKEEPING_DDL: [(&str, &str); 10] = [
    ("sync_status", "TEXT NOT NULL DEFAULT 'pending'"),
    ("local_modified_at", "INTEGER NOT NULL DEFAULT 0"),
    ("remote_id", "TEXT"),
    ("remote_version", "TEXT"),
    ("sync_attempts", "INTEGER NOT NULL DEFAULT 0"),
    ("enqueued_at", "INTEGER"),
    ("last_attempt_at", "INTEGER"),
    ("next_attempt_at", "INTEGER"),
    ("last_sync_error", "TEXT"),
    ("deleted", "INTEGER NOT NULL DEFAULT 0"),
];

/// Meta key holding the local clock high-water mark.
const CLOCK_KEY: &str = "clock_high_water";

/// Configuration for the local store.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Database file. `None` keeps the database in memory.
    pub path: Option<PathBuf>,
    /// How long a statement waits on a locked database file.
    pub busy_timeout: Duration,
    /// Whether every commit is fsynced (`synchronous = FULL`).
    pub sync_on_commit: bool,
}

impl StoreConfig {
    /// Configuration for a database file.
    pub fn file(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
            ..Self::default()
        }
    }

    /// Configuration for an in-memory database.
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Sets the busy timeout.
    #[must_use]
    pub fn with_busy_timeout(mut self, timeout: Duration) -> Self {
        self.busy_timeout = timeout;
        self
    }

    /// Sets whether commits are fsynced.
    #[must_use]
    pub fn with_sync_on_commit(mut self, value: bool) -> Self {
        self.sync_on_commit = value;
        self
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: None,
            busy_timeout: Duration::from_secs(5),
            sync_on_commit: true,
        }
    }
}

/// Persistent, schema-typed local database.
///
/// The store is the only source of truth for application reads and writes.
/// Every business mutation marks its row `pending` and stamps it with a
/// monotonic local modification time in the same transaction. Only the sync
/// coordinator moves rows back to `synced`.
///
/// One connection is shared by every caller; each call holds it for a single
/// statement or a single transaction, never across network I/O.
///
/// # Example
///
/// ```rust,ignore
/// use larder_store::{ColumnType, LocalStore, Registry, TableSpec};
/// use std::sync::Arc;
///
/// let registry = Arc::new(Registry::new(vec![
///     TableSpec::new("products", "Products")
///         .key("id", ColumnType::Integer)
///         .required("name", ColumnType::Text),
/// ])?);
/// let store = LocalStore::open_in_memory(registry.clone())?;
/// let products = registry.resolve("products")?;
/// store.insert(products, &larder_codec::record! { "id" => 1, "name" => "Rye" })?;
/// ```
pub struct LocalStore {
    config: StoreConfig,
    registry: Arc<Registry>,
    clock: Arc<dyn Clock>,
    conn: Mutex<Option<Connection>>,
}

impl LocalStore {
    /// Creates a store without connecting.
    pub fn new(config: StoreConfig, registry: Arc<Registry>) -> Self {
        Self {
            config,
            registry,
            clock: Arc::new(SystemClock),
            conn: Mutex::new(None),
        }
    }

    /// Opens a database file, connecting and ensuring the schema.
    pub fn open(path: impl Into<PathBuf>, registry: Arc<Registry>) -> StoreResult<Self> {
        let store = Self::new(StoreConfig::file(path), registry);
        store.connect()?;
        store.ensure_schema()?;
        Ok(store)
    }

    /// Opens an in-memory database, connecting and ensuring the schema.
    pub fn open_in_memory(registry: Arc<Registry>) -> StoreResult<Self> {
        let store = Self::new(StoreConfig::in_memory(), registry);
        store.connect()?;
        store.ensure_schema()?;
        Ok(store)
    }

    /// Replaces the clock used for modification stamps.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// The table registry.
    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Current time according to the store's clock.
    pub fn now_ms(&self) -> i64 {
        self.clock.now_ms()
    }

    /// Opens the underlying connection. Connecting twice is a no-op.
    pub fn connect(&self) -> StoreResult<()> {
        let mut guard = self.conn.lock();
        if guard.is_some() {
            return Ok(());
        }

        let conn = match &self.config.path {
            Some(path) => Connection::open(path)?,
            None => Connection::open_in_memory()?,
        };
        conn.busy_timeout(self.config.busy_timeout)?;
        if self.config.path.is_some() {
            conn.pragma_update(None, "journal_mode", "WAL")?;
        }
        let synchronous = if self.config.sync_on_commit { "FULL" } else { "NORMAL" };
        conn.pragma_update(None, "synchronous", synchronous)?;

        info!(path = ?self.config.path, "local store connected");
        *guard = Some(conn);
        Ok(())
    }

    /// Closes the connection. Safe to call repeatedly or before `connect`.
    pub fn close(&self) -> StoreResult<()> {
        if let Some(conn) = self.conn.lock().take() {
            conn.close().map_err(|(_, e)| StoreError::Sqlite(e))?;
            debug!("local store closed");
        }
        Ok(())
    }

    /// Returns true while a connection is open.
    pub fn is_connected(&self) -> bool {
        self.conn.lock().is_some()
    }

    fn with_conn<T>(&self, f: impl FnOnce(&mut Connection) -> StoreResult<T>) -> StoreResult<T> {
        let mut guard = self.conn.lock();
        let conn = guard.as_mut().ok_or(StoreError::Closed)?;
        f(conn)
    }

    fn with_tx<T>(&self, f: impl FnOnce(&Connection) -> StoreResult<T>) -> StoreResult<T> {
        self.with_conn(|conn| {
            let tx = conn.transaction()?;
            let out = f(&tx)?;
            tx.commit()?;
            Ok(out)
        })
    }

    /// Creates missing tables and columns. Never drops or narrows anything.
    pub fn ensure_schema(&self) -> StoreResult<()> {
        self.with_tx(|tx| {
            tx.execute_batch(&format!(
                "CREATE TABLE IF NOT EXISTS {META_TABLE} (key TEXT PRIMARY KEY, value TEXT NOT NULL)"
            ))?;

            for (_, spec) in self.registry.iter() {
                ensure_table(tx, spec)?;
            }
            Ok(())
        })?;
        info!(tables = self.registry.len(), "schema ensured");
        Ok(())
    }

    fn spec(&self, table: TableId) -> StoreResult<&TableSpec> {
        self.registry.table(table)
    }

    /// Inserts a new row as `pending`.
    ///
    /// Inserting over a local tombstone revives the row and keeps its remote
    /// identity, so the next push becomes an update.
    ///
    /// # Errors
    ///
    /// `Validation` if the key already exists or the record breaks the
    /// schema.
    pub fn insert(&self, table: TableId, record: &Record) -> StoreResult<()> {
        let spec = self.spec(table)?;
        let full = spec.check_insert(record)?;
        let id = spec.key_value(full.get(&spec.primary_key).cloned().unwrap_or(Value::Null))?;
        let now = self.clock.now_ms();

        self.with_tx(|tx| {
            let stamp = next_stamp(tx, now)?;
            match fetch_row(tx, spec, &id)? {
                Some(row) if !row.meta.deleted => Err(StoreError::validation(
                    &spec.name,
                    format!("duplicate primary key {id}"),
                )),
                Some(_) => {
                    let mut columns = full.clone();
                    columns.remove(&spec.primary_key);
                    write_pending(tx, spec, &id, &columns, stamp, now, false)
                }
                None => {
                    let names: Vec<String> = spec.columns.iter().map(|c| quote(&c.name)).collect();
                    let mut values: Vec<SqlValue> = spec
                        .columns
                        .iter()
                        .map(|c| c.ty.to_sql(&full[&c.name]))
                        .collect();
                    let n = values.len();
                    values.push(SqlValue::Integer(stamp));
                    values.push(SqlValue::Integer(now));
                    let placeholders: Vec<String> = (1..=n).map(|i| format!("?{i}")).collect();
                    let sql = format!(
                        "INSERT INTO {} ({}, sync_status, local_modified_at, enqueued_at, deleted) \
                         VALUES ({}, 'pending', ?{}, ?{}, 0)",
                        quote(&spec.name),
                        names.join(", "),
                        placeholders.join(", "),
                        n + 1,
                        n + 2,
                    );
                    tx.execute(&sql, params_from_iter(values))?;
                    Ok(())
                }
            }
        })?;

        debug!(table = %spec.name, %id, "row inserted");
        Ok(())
    }

    /// Merges the given columns into an existing row and marks it pending.
    ///
    /// A row in `conflict` stays in `conflict`.
    ///
    /// # Errors
    ///
    /// `NotFound` if no live row matches `id`; `Validation` for schema
    /// violations.
    pub fn update(&self, table: TableId, id: impl Into<Value>, patch: &Record) -> StoreResult<()> {
        let spec = self.spec(table)?;
        spec.check_patch(patch)?;
        let id = spec.key_value(id.into())?;
        let now = self.clock.now_ms();

        self.with_tx(|tx| {
            match fetch_row(tx, spec, &id)? {
                Some(row) if !row.meta.deleted => {}
                _ => return Err(StoreError::not_found(&spec.name, id.clone())),
            }
            if patch.is_empty() {
                return Ok(());
            }
            let stamp = next_stamp(tx, now)?;
            write_pending(tx, spec, &id, patch, stamp, now, false)
        })?;

        debug!(table = %spec.name, %id, columns = patch.len(), "row updated");
        Ok(())
    }

    /// Deletes a row.
    ///
    /// The row becomes a pending tombstone, hidden from reads, until the
    /// delete reaches the remote. A row in `conflict` is removed outright,
    /// since deleting it settles the conflict.
    pub fn delete(&self, table: TableId, id: impl Into<Value>) -> StoreResult<()> {
        let spec = self.spec(table)?;
        let id = spec.key_value(id.into())?;
        let now = self.clock.now_ms();

        self.with_tx(|tx| {
            let row = match fetch_row(tx, spec, &id)? {
                Some(row) if !row.meta.deleted => row,
                _ => return Err(StoreError::not_found(&spec.name, id.clone())),
            };
            if row.meta.status == SyncStatus::Conflict {
                return purge_row(tx, spec, &id).map(|_| ());
            }
            let stamp = next_stamp(tx, now)?;
            write_pending(tx, spec, &id, &Record::new(), stamp, now, true)
        })?;

        debug!(table = %spec.name, %id, "row deleted");
        Ok(())
    }

    /// Fetches a live row with its `sync_status` column.
    pub fn get(&self, table: TableId, id: impl Into<Value>) -> StoreResult<Option<Record>> {
        Ok(self
            .get_row(table, id)?
            .filter(|row| !row.meta.deleted)
            .map(|row| row.to_record()))
    }

    /// Fetches a row with its bookkeeping, tombstones included.
    pub fn get_row(&self, table: TableId, id: impl Into<Value>) -> StoreResult<Option<StoredRow>> {
        let spec = self.spec(table)?;
        let id = spec.key_value(id.into())?;
        self.with_conn(|conn| fetch_row(conn, spec, &id))
    }

    /// Runs a structured query over live rows.
    ///
    /// Results always end with a primary key tiebreak, so the order is
    /// stable.
    pub fn query(&self, table: TableId, filter: &Filter, order: &[OrderBy]) -> StoreResult<Vec<Record>> {
        let spec = self.spec(table)?;
        let mut params = Vec::new();
        let predicate = filter.compile(spec, &mut params)?;
        let order_sql = OrderBy::compile(order, spec)?;
        let sql = format!(
            "SELECT {} FROM {} WHERE deleted = 0 AND ({predicate}) ORDER BY {order_sql}",
            select_list(spec),
            quote(&spec.name),
        );
        let rows = self.with_conn(|conn| select_rows(conn, spec, &sql, params))?;
        Ok(rows.iter().map(StoredRow::to_record).collect())
    }

    /// Every stored row of a table, tombstones included, in key order.
    pub fn rows(&self, table: TableId) -> StoreResult<Vec<StoredRow>> {
        let spec = self.spec(table)?;
        let sql = format!(
            "SELECT {} FROM {} ORDER BY {} ASC",
            select_list(spec),
            quote(&spec.name),
            quote(&spec.primary_key),
        );
        self.with_conn(|conn| select_rows(conn, spec, &sql, Vec::new()))
    }

    fn scoped(&self, table: Option<TableId>) -> Vec<TableId> {
        match table {
            Some(id) => vec![id],
            None => self.registry.ids().collect(),
        }
    }

    /// Rows in `pending` or `conflict`, optionally for one table.
    ///
    /// Ordered by registry order, then local modification stamp, then key.
    pub fn list_pending(&self, table: Option<TableId>) -> StoreResult<Vec<StoredRow>> {
        let mut out = Vec::new();
        for id in self.scoped(table) {
            out.extend(self.rows_with_status(id, &[SyncStatus::Pending, SyncStatus::Conflict])?);
        }
        Ok(out)
    }

    /// The sync queue: `pending` rows with the operation each one needs.
    pub fn pending_entries(&self, table: Option<TableId>) -> StoreResult<Vec<QueueEntry>> {
        let mut out = Vec::new();
        for id in self.scoped(table) {
            out.extend(
                self.rows_with_status(id, &[SyncStatus::Pending])?
                    .into_iter()
                    .map(|row| QueueEntry::from_row(id, row)),
            );
        }
        Ok(out)
    }

    fn rows_with_status(&self, table: TableId, statuses: &[SyncStatus]) -> StoreResult<Vec<StoredRow>> {
        let spec = self.spec(table)?;
        let placeholders: Vec<String> = (1..=statuses.len()).map(|i| format!("?{i}")).collect();
        let sql = format!(
            "SELECT {} FROM {} WHERE sync_status IN ({}) ORDER BY local_modified_at ASC, {} ASC",
            select_list(spec),
            quote(&spec.name),
            placeholders.join(", "),
            quote(&spec.primary_key),
        );
        let params = statuses
            .iter()
            .map(|s| SqlValue::Text(s.as_str().to_string()))
            .collect();
        self.with_conn(|conn| select_rows(conn, spec, &sql, params))
    }

    /// Marks a pushed row `synced`.
    ///
    /// `pushed_stamp` is the local modification stamp of the snapshot that
    /// was sent. If the row was edited since, only the remote link is
    /// recorded and the row stays pending; returns whether the status moved.
    /// A synced tombstone is removed. Business columns are never touched.
    pub fn mark_synced(
        &self,
        table: TableId,
        id: impl Into<Value>,
        pushed_stamp: i64,
        link: Option<&RemoteLink>,
    ) -> StoreResult<bool> {
        let spec = self.spec(table)?;
        let id = spec.key_value(id.into())?;
        let now = self.clock.now_ms();

        self.with_tx(|tx| {
            let row = fetch_row(tx, spec, &id)?
                .ok_or_else(|| StoreError::not_found(&spec.name, id.clone()))?;
            let key = spec.key_spec()?.ty.to_sql(&id);

            if row.meta.local_modified_at != pushed_stamp {
                if let Some(link) = link {
                    set_link(tx, spec, &key, link)?;
                }
                return Ok(false);
            }
            if row.meta.deleted {
                purge_row(tx, spec, &id)?;
                return Ok(true);
            }

            let link = link.or(row.meta.remote.as_ref());
            tx.execute(
                &format!(
                    "UPDATE {} SET sync_status = 'synced', remote_id = ?1, remote_version = ?2, \
                     sync_attempts = 0, enqueued_at = NULL, last_attempt_at = ?3, \
                     next_attempt_at = NULL, last_sync_error = NULL WHERE {} = ?4",
                    quote(&spec.name),
                    quote(&spec.primary_key),
                ),
                params![
                    link.map(|l| l.remote_id.clone()),
                    link.and_then(|l| l.version.clone()),
                    now,
                    key
                ],
            )?;
            Ok(true)
        })
    }

    /// Moves a row to `conflict`, recording why.
    pub fn mark_conflict(&self, table: TableId, id: impl Into<Value>, reason: &str) -> StoreResult<()> {
        let spec = self.spec(table)?;
        let id = spec.key_value(id.into())?;
        let key = spec.key_spec()?.ty.to_sql(&id);
        let changed = self.with_conn(|conn| {
            Ok(conn.execute(
                &format!(
                    "UPDATE {} SET sync_status = 'conflict', last_sync_error = ?1 WHERE {} = ?2",
                    quote(&spec.name),
                    quote(&spec.primary_key),
                ),
                params![reason, key],
            )?)
        })?;
        if changed == 0 {
            return Err(StoreError::not_found(&spec.name, id));
        }
        info!(table = %spec.name, %id, reason, "row moved to conflict");
        Ok(())
    }

    /// Records a failed push attempt and returns the new attempt count.
    pub fn record_failure(
        &self,
        table: TableId,
        id: impl Into<Value>,
        error: &str,
        next_attempt_at: Option<i64>,
    ) -> StoreResult<u32> {
        let spec = self.spec(table)?;
        let id = spec.key_value(id.into())?;
        let key = spec.key_spec()?.ty.to_sql(&id);
        let now = self.clock.now_ms();

        self.with_tx(|tx| {
            let changed = tx.execute(
                &format!(
                    "UPDATE {} SET sync_attempts = sync_attempts + 1, last_attempt_at = ?1, \
                     next_attempt_at = ?2, last_sync_error = ?3 WHERE {} = ?4",
                    quote(&spec.name),
                    quote(&spec.primary_key),
                ),
                params![now, next_attempt_at, error, key],
            )?;
            if changed == 0 {
                return Err(StoreError::not_found(&spec.name, id.clone()));
            }
            let attempts: i64 = tx.query_row(
                &format!(
                    "SELECT sync_attempts FROM {} WHERE {} = ?1",
                    quote(&spec.name),
                    quote(&spec.primary_key)
                ),
                params![key],
                |r| r.get(0),
            )?;
            Ok(u32::try_from(attempts).unwrap_or(u32::MAX))
        })
    }

    /// Adopts a remote identity and version while keeping the row pending.
    ///
    /// Used when a conflict resolves in favour of the local copy: the next
    /// push overwrites exactly the remote version that lost. The retry
    /// budget starts over.
    pub fn link_remote(&self, table: TableId, id: impl Into<Value>, link: &RemoteLink) -> StoreResult<()> {
        let spec = self.spec(table)?;
        let id = spec.key_value(id.into())?;
        let key = spec.key_spec()?.ty.to_sql(&id);
        self.with_tx(|tx| {
            if set_link(tx, spec, &key, link)? == 0 {
                return Err(StoreError::not_found(&spec.name, id.clone()));
            }
            tx.execute(
                &format!(
                    "UPDATE {} SET sync_attempts = 0, next_attempt_at = NULL, last_sync_error = NULL \
                     WHERE {} = ?1",
                    quote(&spec.name),
                    quote(&spec.primary_key),
                ),
                params![key],
            )?;
            Ok(())
        })
    }

    /// Writes a remote copy over the local row and marks it `synced`.
    ///
    /// `record` must carry the primary key. The write only happens if
    /// `guard` still holds; returns whether it did.
    pub fn apply_remote(
        &self,
        table: TableId,
        record: &Record,
        link: &RemoteLink,
        remote_modified_at: Option<i64>,
        guard: ApplyGuard,
    ) -> StoreResult<bool> {
        let spec = self.spec(table)?;
        let id = spec.key_value(record.get(&spec.primary_key).cloned().unwrap_or(Value::Null))?;
        let now = self.clock.now_ms();

        self.with_tx(|tx| {
            let existing = fetch_row(tx, spec, &id)?;
            match (guard, existing) {
                (ApplyGuard::Absent, None) => {
                    insert_synced(tx, spec, record, link, remote_modified_at.unwrap_or(0))?;
                    Ok(true)
                }
                (ApplyGuard::Unchanged(stamp), Some(row)) if row.meta.local_modified_at == stamp => {
                    overwrite_synced(tx, spec, &id, record, link, now)?;
                    Ok(true)
                }
                _ => Ok(false),
            }
        })
    }

    /// Physically removes a row if it still carries the modification
    /// stamp `stamp`. Returns whether a row was removed.
    pub fn purge(&self, table: TableId, id: impl Into<Value>, stamp: i64) -> StoreResult<bool> {
        let spec = self.spec(table)?;
        let id = spec.key_value(id.into())?;
        self.with_tx(|tx| match fetch_row(tx, spec, &id)? {
            Some(row) if row.meta.local_modified_at == stamp => purge_row(tx, spec, &id),
            _ => Ok(false),
        })
    }

    /// Replaces a table's synced contents with remote rows, atomically.
    ///
    /// Rows in `pending` or `conflict` are left alone, and remote rows whose
    /// key they hold are skipped, so unsynced local work survives a reload.
    pub fn replace_synced(
        &self,
        table: TableId,
        rows: &[(Record, RemoteLink, Option<i64>)],
    ) -> StoreResult<ReplaceSummary> {
        let spec = self.spec(table)?;
        let summary = self.with_tx(|tx| {
            let removed = tx.execute(
                &format!("DELETE FROM {} WHERE sync_status = 'synced'", quote(&spec.name)),
                [],
            )?;
            let mut inserted = 0u64;
            for (record, link, modified_at) in rows {
                let key = spec.key_value(record.get(&spec.primary_key).cloned().unwrap_or(Value::Null))?;
                if fetch_row(tx, spec, &key)?.is_some() {
                    continue;
                }
                insert_synced(tx, spec, record, link, modified_at.unwrap_or(0))?;
                inserted += 1;
            }
            Ok(ReplaceSummary {
                removed: removed as u64,
                inserted,
                kept_local: rows.len() as u64 - inserted,
            })
        })?;
        info!(
            table = %spec.name,
            removed = summary.removed,
            inserted = summary.inserted,
            kept_local = summary.kept_local,
            "table contents replaced"
        );
        Ok(summary)
    }

    /// Clears the failure count and backoff of a row.
    pub fn reset_attempts(&self, table: TableId, id: impl Into<Value>) -> StoreResult<()> {
        let spec = self.spec(table)?;
        let id = spec.key_value(id.into())?;
        let key = spec.key_spec()?.ty.to_sql(&id);
        let changed = self.with_conn(|conn| {
            Ok(conn.execute(
                &format!(
                    "UPDATE {} SET sync_attempts = 0, next_attempt_at = NULL, last_sync_error = NULL \
                     WHERE {} = ?1",
                    quote(&spec.name),
                    quote(&spec.primary_key),
                ),
                params![key],
            )?)
        })?;
        if changed == 0 {
            return Err(StoreError::not_found(&spec.name, id));
        }
        Ok(())
    }

    /// Applies a manual decision to a row in `conflict`.
    ///
    /// # Errors
    ///
    /// `NotFound` for an unknown row, `Validation` if the row is not in
    /// conflict.
    pub fn resolve_conflict(&self, table: TableId, id: impl Into<Value>, choice: ConflictChoice) -> StoreResult<()> {
        let spec = self.spec(table)?;
        let id = spec.key_value(id.into())?;
        let now = self.clock.now_ms();

        self.with_tx(|tx| {
            let row = fetch_row(tx, spec, &id)?
                .ok_or_else(|| StoreError::not_found(&spec.name, id.clone()))?;
            if row.meta.status != SyncStatus::Conflict {
                return Err(StoreError::validation(
                    &spec.name,
                    format!("row {id} is {}, not in conflict", row.meta.status),
                ));
            }
            match choice {
                ConflictChoice::AcceptRemote => {
                    purge_row(tx, spec, &id)?;
                }
                ConflictChoice::KeepLocal => {
                    let key = spec.key_spec()?.ty.to_sql(&id);
                    tx.execute(
                        &format!(
                            "UPDATE {} SET sync_status = 'pending', remote_id = NULL, remote_version = NULL, \
                             sync_attempts = 0, enqueued_at = ?1, next_attempt_at = NULL, \
                             last_sync_error = NULL WHERE {} = ?2",
                            quote(&spec.name),
                            quote(&spec.primary_key),
                        ),
                        params![now, key],
                    )?;
                }
            }
            Ok(())
        })?;

        info!(table = %spec.name, %id, ?choice, "conflict resolved");
        Ok(())
    }

    /// Row counts per status across all tables.
    pub fn count_by_status(&self) -> StoreResult<StatusCounts> {
        let mut counts = StatusCounts::default();
        self.with_conn(|conn| {
            for (_, spec) in self.registry.iter() {
                let mut stmt = conn.prepare(&format!(
                    "SELECT sync_status, COUNT(*) FROM {} GROUP BY sync_status",
                    quote(&spec.name)
                ))?;
                let rows = stmt.query_map([], |r| Ok((r.get::<_, String>(0)?, r.get::<_, i64>(1)?)))?;
                for row in rows {
                    let (status, n) = row?;
                    let n = u64::try_from(n).unwrap_or(0);
                    match status.parse::<SyncStatus>() {
                        Ok(SyncStatus::Synced) => counts.synced += n,
                        Ok(SyncStatus::Pending) => counts.pending += n,
                        Ok(SyncStatus::Conflict) => counts.conflict += n,
                        Err(message) => {
                            return Err(StoreError::Corrupt {
                                table: spec.name.clone(),
                                message,
                            })
                        }
                    }
                }
            }
            Ok(counts)
        })
    }

    /// Number of pending rows whose failed attempts reached `ceiling`.
    pub fn count_stalled(&self, ceiling: u32) -> StoreResult<u64> {
        self.with_conn(|conn| {
            let mut total = 0u64;
            for (_, spec) in self.registry.iter() {
                let n: i64 = conn.query_row(
                    &format!(
                        "SELECT COUNT(*) FROM {} WHERE sync_status = 'pending' AND sync_attempts >= ?1",
                        quote(&spec.name)
                    ),
                    params![ceiling],
                    |r| r.get(0),
                )?;
                total += u64::try_from(n).unwrap_or(0);
            }
            Ok(total)
        })
    }

    /// Returns true if no registered table holds any row.
    pub fn is_empty(&self) -> StoreResult<bool> {
        let counts = self.count_by_status()?;
        Ok(counts.synced + counts.pending + counts.conflict == 0)
    }

    /// Reads a value from the store's key/value table.
    pub fn meta_get(&self, key: &str) -> StoreResult<Option<String>> {
        self.with_conn(|conn| {
            Ok(conn
                .query_row(
                    &format!("SELECT value FROM {META_TABLE} WHERE key = ?1"),
                    params![key],
                    |r| r.get(0),
                )
                .optional()?)
        })
    }

    /// Writes a value to the store's key/value table.
    pub fn meta_set(&self, key: &str, value: &str) -> StoreResult<()> {
        self.with_conn(|conn| {
            conn.execute(
                &format!(
                    "INSERT INTO {META_TABLE} (key, value) VALUES (?1, ?2) \
                     ON CONFLICT(key) DO UPDATE SET value = excluded.value"
                ),
                params![key, value],
            )?;
            Ok(())
        })
    }

    /// Removes a value from the store's key/value table.
    pub fn meta_remove(&self, key: &str) -> StoreResult<()> {
        self.with_conn(|conn| {
            conn.execute(&format!("DELETE FROM {META_TABLE} WHERE key = ?1"), params![key])?;
            Ok(())
        })
    }
}

impl Drop for LocalStore {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

fn ensure_table(tx: &Connection, spec: &TableSpec) -> StoreResult<()> {
    let key = spec.key_spec()?;
    let mut defs = vec![format!(
        "{} {} PRIMARY KEY NOT NULL",
        quote(&key.name),
        key.ty.sql_type()
    )];
    for column in spec.columns.iter().filter(|c| c.name != key.name) {
        defs.push(format!("{} {}", quote(&column.name), column.ty.sql_type()));
    }
    for (name, ddl) in BOOKKEEPING_DDL {
        defs.push(format!("{name} {ddl}"));
    }
    tx.execute_batch(&format!(
        "CREATE TABLE IF NOT EXISTS {} ({})",
        quote(&spec.name),
        defs.join(", ")
    ))?;

    let existing: Vec<String> = {
        let mut stmt = tx.prepare("SELECT name FROM pragma_table_info(?1)")?;
        let names = stmt.query_map(params![spec.name], |r| r.get(0))?;
        names.collect::<rusqlite::Result<_>>()?
    };

    for column in &spec.columns {
        if !existing.contains(&column.name) {
            tx.execute_batch(&format!(
                "ALTER TABLE {} ADD COLUMN {} {}",
                quote(&spec.name),
                quote(&column.name),
                column.ty.sql_type()
            ))?;
            info!(table = %spec.name, column = %column.name, "column added");
        }
    }
    for (name, ddl) in BOOKKEEPING_DDL {
        if !existing.iter().any(|c| c == name) {
            tx.execute_batch(&format!(
                "ALTER TABLE {} ADD COLUMN {name} {ddl}",
                quote(&spec.name)
            ))?;
        }
    }

    tx.execute_batch(&format!(
        "CREATE INDEX IF NOT EXISTS {} ON {} (sync_status, local_modified_at)",
        quote(&format!("{}_sync_status_idx", spec.name)),
        quote(&spec.name)
    ))?;
    Ok(())
}

/// Issues the next local modification stamp and persists the high-water
/// mark in the caller's transaction.
fn next_stamp(tx: &Connection, now: i64) -> StoreResult<i64> {
    let last: Option<String> = tx
        .query_row(
            &format!("SELECT value FROM {META_TABLE} WHERE key = ?1"),
            params![CLOCK_KEY],
            |r| r.get(0),
        )
        .optional()?;
    let last = last.and_then(|s| s.parse::<i64>().ok());
    let stamp = match last {
        Some(last) => now.max(last.saturating_add(1)),
        None => now,
    };
    tx.execute(
        &format!(
            "INSERT INTO {META_TABLE} (key, value) VALUES (?1, ?2) \
             ON CONFLICT(key) DO UPDATE SET value = excluded.value"
        ),
        params![CLOCK_KEY, stamp.to_string()],
    )?;
    Ok(stamp)
}

fn select_list(spec: &TableSpec) -> String {
    spec.columns
        .iter()
        .map(|c| quote(&c.name))
        .chain(BOOKKEEPING_DDL.iter().map(|(name, _)| (*name).to_string()))
        .collect::<Vec<_>>()
        .join(", ")
}

fn read_row(spec: &TableSpec, row: &Row<'_>) -> rusqlite::Result<StoredRow> {
    let mut record = Record::new();
    for (i, column) in spec.columns.iter().enumerate() {
        let raw: SqlValue = row.get(i)?;
        record.insert(column.name.clone(), column.ty.from_sql(raw));
    }

    let n = spec.columns.len();
    let status_text: String = row.get(n)?;
    let status = status_text
        .parse::<SyncStatus>()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(n, Type::Text, e.into()))?;
    let remote_id: Option<String> = row.get(n + 2)?;
    let remote_version: Option<String> = row.get(n + 3)?;
    let attempts: i64 = row.get(n + 4)?;
    let deleted: i64 = row.get(n + 9)?;

    let meta = SyncMeta {
        status,
        local_modified_at: row.get(n + 1)?,
        remote: remote_id.map(|remote_id| RemoteLink {
            remote_id,
            version: remote_version,
        }),
        attempts: u32::try_from(attempts).unwrap_or(u32::MAX),
        enqueued_at: row.get(n + 5)?,
        last_attempt_at: row.get(n + 6)?,
        next_attempt_at: row.get(n + 7)?,
        last_error: row.get(n + 8)?,
        deleted: deleted != 0,
    };

    Ok(StoredRow {
        id: record.get(&spec.primary_key).cloned().unwrap_or(Value::Null),
        record,
        meta,
    })
}

fn select_rows(conn: &Connection, spec: &TableSpec, sql: &str, params: Vec<SqlValue>) -> StoreResult<Vec<StoredRow>> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt.query_map(params_from_iter(params), |r| read_row(spec, r))?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

fn fetch_row(conn: &Connection, spec: &TableSpec, id: &Value) -> StoreResult<Option<StoredRow>> {
    let key = spec.key_spec()?.ty.to_sql(id);
    let sql = format!(
        "SELECT {} FROM {} WHERE {} = ?1",
        select_list(spec),
        quote(&spec.name),
        quote(&spec.primary_key),
    );
    Ok(conn
        .query_row(&sql, params![key], |r| read_row(spec, r))
        .optional()?)
}

fn purge_row(conn: &Connection, spec: &TableSpec, id: &Value) -> StoreResult<bool> {
    let key = spec.key_spec()?.ty.to_sql(id);
    let changed = conn.execute(
        &format!(
            "DELETE FROM {} WHERE {} = ?1",
            quote(&spec.name),
            quote(&spec.primary_key)
        ),
        params![key],
    )?;
    Ok(changed > 0)
}

fn set_link(conn: &Connection, spec: &TableSpec, key: &SqlValue, link: &RemoteLink) -> StoreResult<usize> {
    Ok(conn.execute(
        &format!(
            "UPDATE {} SET remote_id = ?1, remote_version = ?2 WHERE {} = ?3",
            quote(&spec.name),
            quote(&spec.primary_key),
        ),
        params![link.remote_id, link.version, key],
    )?)
}

/// Writes business columns and the pending bookkeeping in one statement.
fn write_pending(
    tx: &Connection,
    spec: &TableSpec,
    id: &Value,
    columns: &Record,
    stamp: i64,
    now: i64,
    deleted: bool,
) -> StoreResult<()> {
    let mut sets = Vec::with_capacity(columns.len() + 8);
    let mut values: Vec<SqlValue> = Vec::with_capacity(columns.len() + 4);

    for (name, value) in columns {
        let column = spec
            .column_spec(name)
            .ok_or_else(|| StoreError::validation(&spec.name, format!("unknown column {name}")))?;
        values.push(column.ty.to_sql(value));
        sets.push(format!("{} = ?{}", quote(name), values.len()));
    }

    values.push(SqlValue::Integer(stamp));
    sets.push(format!("local_modified_at = ?{}", values.len()));
    values.push(SqlValue::Integer(now));
    sets.push(format!(
        "enqueued_at = CASE WHEN sync_status = 'synced' OR enqueued_at IS NULL THEN ?{} ELSE enqueued_at END",
        values.len()
    ));
    values.push(SqlValue::Integer(i64::from(deleted)));
    sets.push(format!("deleted = ?{}", values.len()));
    sets.push(
        "sync_status = CASE WHEN sync_status = 'conflict' THEN 'conflict' ELSE 'pending' END".to_string(),
    );
    sets.push("sync_attempts = 0".to_string());
    sets.push("next_attempt_at = NULL".to_string());
    sets.push("last_sync_error = NULL".to_string());

    values.push(spec.key_spec()?.ty.to_sql(id));
    let sql = format!(
        "UPDATE {} SET {} WHERE {} = ?{}",
        quote(&spec.name),
        sets.join(", "),
        quote(&spec.primary_key),
        values.len()
    );
    tx.execute(&sql, params_from_iter(values))?;
    Ok(())
}

fn insert_synced(
    tx: &Connection,
    spec: &TableSpec,
    record: &Record,
    link: &RemoteLink,
    modified_at: i64,
) -> StoreResult<()> {
    let names: Vec<String> = spec.columns.iter().map(|c| quote(&c.name)).collect();
    let mut values: Vec<SqlValue> = spec
        .columns
        .iter()
        .map(|c| c.ty.to_sql(record.get(&c.name).unwrap_or(&Value::Null)))
        .collect();
    let n = values.len();
    values.push(SqlValue::Integer(modified_at));
    values.push(SqlValue::Text(link.remote_id.clone()));
    values.push(link.version.clone().map_or(SqlValue::Null, SqlValue::Text));
    let placeholders: Vec<String> = (1..=n).map(|i| format!("?{i}")).collect();
    let sql = format!(
        "INSERT INTO {} ({}, sync_status, local_modified_at, remote_id, remote_version, deleted) \
         VALUES ({}, 'synced', ?{}, ?{}, ?{}, 0)",
        quote(&spec.name),
        names.join(", "),
        placeholders.join(", "),
        n + 1,
        n + 2,
        n + 3,
    );
    tx.execute(&sql, params_from_iter(values))?;
    Ok(())
}

fn overwrite_synced(
    tx: &Connection,
    spec: &TableSpec,
    id: &Value,
    record: &Record,
    link: &RemoteLink,
    now: i64,
) -> StoreResult<()> {
    let mut sets = Vec::new();
    let mut values: Vec<SqlValue> = Vec::new();
    for column in spec.columns.iter().filter(|c| c.name != spec.primary_key) {
        values.push(column.ty.to_sql(record.get(&column.name).unwrap_or(&Value::Null)));
        sets.push(format!("{} = ?{}", quote(&column.name), values.len()));
    }
    values.push(SqlValue::Text(link.remote_id.clone()));
    sets.push(format!("remote_id = ?{}", values.len()));
    values.push(link.version.clone().map_or(SqlValue::Null, SqlValue::Text));
    sets.push(format!("remote_version = ?{}", values.len()));
    values.push(SqlValue::Integer(now));
    sets.push(format!("last_attempt_at = ?{}", values.len()));
    sets.extend(
        [
            "sync_status = 'synced'",
            "deleted = 0",
            "sync_attempts = 0",
            "enqueued_at = NULL",
            "next_attempt_at = NULL",
            "last_sync_error = NULL",
        ]
        .map(String::from),
    );
    values.push(spec.key_spec()?.ty.to_sql(id));
    let sql = format!(
        "UPDATE {} SET {} WHERE {} = ?{}",
        quote(&spec.name),
        sets.join(", "),
        quote(&spec.primary_key),
        values.len()
    );
    tx.execute(&sql, params_from_iter(values))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::registry::BOOKKEEPING_COLUMNS;
    use crate::schema::ColumnType;
    use larder_codec::record;

    fn registry() -> Arc<Registry> {
        Arc::new(
            Registry::new(vec![
                TableSpec::new("products", "Products")
                    .key("id", ColumnType::Integer)
                    .required("name", ColumnType::Text)
                    .column("price", ColumnType::Real)
                    .column("active", ColumnType::Boolean),
                TableSpec::new("customers", "Customers")
                    .key("code", ColumnType::Text)
                    .column("name", ColumnType::Text),
            ])
            .unwrap(),
        )
    }

    fn store_at(now: i64) -> (LocalStore, Arc<ManualClock>, TableId) {
        let registry = registry();
        let clock = Arc::new(ManualClock::new(now));
        let store = LocalStore::open_in_memory(registry.clone())
            .unwrap()
            .with_clock(clock.clone());
        let products = registry.resolve("products").unwrap();
        (store, clock, products)
    }

    #[test]
    fn bookkeeping_ddl_matches_reserved_names() {
        let names: Vec<&str> = BOOKKEEPING_DDL.iter().map(|(n, _)| *n).collect();
        assert_eq!(names, BOOKKEEPING_COLUMNS);
    }

    #[test]
    fn insert_marks_pending_and_stamps() {
        let (store, _, products) = store_at(100);
        store
            .insert(products, &record! { "id" => 1, "name" => "Rye", "active" => true })
            .unwrap();

        let row = store.get_row(products, 1).unwrap().unwrap();
        assert_eq!(row.meta.status, SyncStatus::Pending);
        assert_eq!(row.meta.local_modified_at, 100);
        assert_eq!(row.meta.enqueued_at, Some(100));
        assert_eq!(row.record["active"], Value::Bool(true));
        assert_eq!(row.record["price"], Value::Null);
    }

    #[test]
    fn stamps_are_strictly_increasing_under_a_stuck_clock() {
        let (store, _, products) = store_at(100);
        store.insert(products, &record! { "id" => 1, "name" => "a" }).unwrap();
        store.update(products, 1, &record! { "name" => "b" }).unwrap();
        store.update(products, 1, &record! { "name" => "c" }).unwrap();
        let row = store.get_row(products, 1).unwrap().unwrap();
        assert_eq!(row.meta.local_modified_at, 102);
    }

    #[test]
    fn duplicate_key_is_a_validation_error() {
        let (store, _, products) = store_at(1);
        store.insert(products, &record! { "id" => 1, "name" => "a" }).unwrap();
        let err = store
            .insert(products, &record! { "id" => 1, "name" => "b" })
            .unwrap_err();
        assert!(matches!(err, StoreError::Validation { .. }));
    }

    #[test]
    fn update_merges_only_given_columns() {
        let (store, _, products) = store_at(1);
        store
            .insert(products, &record! { "id" => 1, "name" => "a", "price" => 2.0 })
            .unwrap();
        store.update(products, 1, &record! { "price" => 3.5 }).unwrap();
        let record = store.get(products, 1).unwrap().unwrap();
        assert_eq!(record["name"], Value::Text("a".into()));
        assert_eq!(record["price"], Value::Real(3.5));
        assert_eq!(record["sync_status"], Value::Text("pending".into()));
    }

    #[test]
    fn update_missing_row_is_not_found() {
        let (store, _, products) = store_at(1);
        let err = store
            .update(products, 9, &record! { "name" => "x" })
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound { .. }));
    }

    #[test]
    fn delete_leaves_hidden_tombstone() {
        let (store, _, products) = store_at(1);
        store.insert(products, &record! { "id" => 1, "name" => "a" }).unwrap();
        store.delete(products, 1).unwrap();

        assert!(store.get(products, 1).unwrap().is_none());
        assert!(store.query(products, &Filter::All, &[]).unwrap().is_empty());
        let row = store.get_row(products, 1).unwrap().unwrap();
        assert!(row.meta.deleted);
        assert_eq!(row.meta.status, SyncStatus::Pending);
        assert!(matches!(store.delete(products, 1), Err(StoreError::NotFound { .. })));
    }

    #[test]
    fn insert_over_tombstone_keeps_remote_identity() {
        let (store, _, products) = store_at(1);
        store.insert(products, &record! { "id" => 1, "name" => "a" }).unwrap();
        let stamp = store.get_row(products, 1).unwrap().unwrap().meta.local_modified_at;
        store
            .mark_synced(products, 1, stamp, Some(&RemoteLink::new("r-1", Some("v1".into()))))
            .unwrap();
        store.delete(products, 1).unwrap();
        store.insert(products, &record! { "id" => 1, "name" => "again" }).unwrap();

        let row = store.get_row(products, 1).unwrap().unwrap();
        assert!(!row.meta.deleted);
        assert_eq!(row.meta.remote.unwrap().remote_id, "r-1");
        assert_eq!(row.record["name"], Value::Text("again".into()));
    }

    #[test]
    fn mark_synced_respects_newer_edits() {
        let (store, clock, products) = store_at(10);
        store.insert(products, &record! { "id" => 1, "name" => "a" }).unwrap();
        let pushed = store.get_row(products, 1).unwrap().unwrap().meta.local_modified_at;

        clock.set(20);
        store.update(products, 1, &record! { "name" => "b" }).unwrap();

        let link = RemoteLink::new("r-1", Some("v1".into()));
        assert!(!store.mark_synced(products, 1, pushed, Some(&link)).unwrap());
        let row = store.get_row(products, 1).unwrap().unwrap();
        assert_eq!(row.meta.status, SyncStatus::Pending);
        assert_eq!(row.meta.remote, Some(link));
    }

    #[test]
    fn mark_synced_purges_tombstones() {
        let (store, _, products) = store_at(10);
        store.insert(products, &record! { "id" => 1, "name" => "a" }).unwrap();
        store.delete(products, 1).unwrap();
        let stamp = store.get_row(products, 1).unwrap().unwrap().meta.local_modified_at;
        assert!(store.mark_synced(products, 1, stamp, None).unwrap());
        assert!(store.get_row(products, 1).unwrap().is_none());
    }

    #[test]
    fn purge_requires_unchanged_stamp() {
        let (store, clock, products) = store_at(10);
        store.insert(products, &record! { "id" => 1, "name" => "a" }).unwrap();
        let stamp = store.get_row(products, 1).unwrap().unwrap().meta.local_modified_at;
        clock.set(20);
        store.update(products, 1, &record! { "name" => "b" }).unwrap();

        assert!(!store.purge(products, 1, stamp).unwrap());
        let fresh = store.get_row(products, 1).unwrap().unwrap().meta.local_modified_at;
        assert!(store.purge(products, 1, fresh).unwrap());
        assert!(store.get_row(products, 1).unwrap().is_none());
    }

    #[test]
    fn record_failure_counts_attempts() {
        let (store, _, products) = store_at(10);
        store.insert(products, &record! { "id" => 1, "name" => "a" }).unwrap();
        assert_eq!(store.record_failure(products, 1, "unavailable", Some(50)).unwrap(), 1);
        assert_eq!(store.record_failure(products, 1, "unavailable", Some(90)).unwrap(), 2);
        let row = store.get_row(products, 1).unwrap().unwrap();
        assert_eq!(row.meta.next_attempt_at, Some(90));
        assert_eq!(row.meta.last_error.as_deref(), Some("unavailable"));
        assert_eq!(store.count_stalled(2).unwrap(), 1);

        // a fresh edit gets a fresh budget
        store.update(products, 1, &record! { "name" => "b" }).unwrap();
        let row = store.get_row(products, 1).unwrap().unwrap();
        assert_eq!(row.meta.attempts, 0);
        assert_eq!(row.meta.next_attempt_at, None);
    }

    #[test]
    fn pending_entries_are_ordered_and_typed() {
        let (store, clock, products) = store_at(10);
        let customers = store.registry().resolve("customers").unwrap();

        store.insert(customers, &record! { "code" => "c1" }).unwrap();
        clock.set(20);
        store.insert(products, &record! { "id" => 2, "name" => "late" }).unwrap();
        clock.set(15);
        store.insert(products, &record! { "id" => 3, "name" => "stuck clock" }).unwrap();

        let entries = store.pending_entries(None).unwrap();
        let keys: Vec<Value> = entries.iter().map(|e| e.record_id().clone()).collect();
        // registry order first, then stamp
        assert_eq!(
            keys,
            vec![Value::Integer(2), Value::Integer(3), Value::Text("c1".into())]
        );
        assert!(entries.iter().all(|e| e.operation == crate::QueueOp::Insert));
    }

    #[test]
    fn conflict_rows_listed_but_not_queued() {
        let (store, _, products) = store_at(10);
        store.insert(products, &record! { "id" => 1, "name" => "a" }).unwrap();
        store.mark_conflict(products, 1, "remote row deleted").unwrap();

        assert_eq!(store.list_pending(Some(products)).unwrap().len(), 1);
        assert!(store.pending_entries(Some(products)).unwrap().is_empty());

        // edits keep the conflict
        store.update(products, 1, &record! { "name" => "b" }).unwrap();
        let row = store.get_row(products, 1).unwrap().unwrap();
        assert_eq!(row.meta.status, SyncStatus::Conflict);
    }

    #[test]
    fn resolve_conflict_choices() {
        let (store, _, products) = store_at(10);
        store.insert(products, &record! { "id" => 1, "name" => "a" }).unwrap();
        store.insert(products, &record! { "id" => 2, "name" => "b" }).unwrap();
        store.link_remote(products, 1, &RemoteLink::new("r1", None)).unwrap();
        store.mark_conflict(products, 1, "gone").unwrap();
        store.mark_conflict(products, 2, "gone").unwrap();

        store.resolve_conflict(products, 1, ConflictChoice::KeepLocal).unwrap();
        let row = store.get_row(products, 1).unwrap().unwrap();
        assert_eq!(row.meta.status, SyncStatus::Pending);
        assert!(row.meta.remote.is_none());

        store.resolve_conflict(products, 2, ConflictChoice::AcceptRemote).unwrap();
        assert!(store.get_row(products, 2).unwrap().is_none());

        let err = store
            .resolve_conflict(products, 1, ConflictChoice::KeepLocal)
            .unwrap_err();
        assert!(matches!(err, StoreError::Validation { .. }));
    }

    #[test]
    fn apply_remote_guards() {
        let (store, _, products) = store_at(10);
        let link = RemoteLink::new("r9", Some("v1".into()));
        let remote = record! { "id" => 9, "name" => "remote", "price" => Option::<f64>::None, "active" => Option::<bool>::None };

        assert!(store
            .apply_remote(products, &remote, &link, Some(5), ApplyGuard::Absent)
            .unwrap());
        // second absent-guarded write must not clobber
        assert!(!store
            .apply_remote(products, &remote, &link, Some(5), ApplyGuard::Absent)
            .unwrap());

        let row = store.get_row(products, 9).unwrap().unwrap();
        assert_eq!(row.meta.status, SyncStatus::Synced);
        assert_eq!(row.meta.local_modified_at, 5);

        store.update(products, 9, &record! { "name" => "local" }).unwrap();
        let stale = 5;
        assert!(!store
            .apply_remote(products, &remote, &link, None, ApplyGuard::Unchanged(stale))
            .unwrap());
        let current = store.get_row(products, 9).unwrap().unwrap().meta.local_modified_at;
        assert!(store
            .apply_remote(products, &remote, &link, None, ApplyGuard::Unchanged(current))
            .unwrap());
        let record = store.get(products, 9).unwrap().unwrap();
        assert_eq!(record["name"], Value::Text("remote".into()));
        assert_eq!(record["sync_status"], Value::Text("synced".into()));
    }

    #[test]
    fn replace_synced_keeps_unsynced_rows() {
        let (store, _, products) = store_at(10);
        store.insert(products, &record! { "id" => 1, "name" => "local edit" }).unwrap();
        store
            .apply_remote(
                products,
                &record! { "id" => 2, "name" => "old" },
                &RemoteLink::new("r2", None),
                None,
                ApplyGuard::Absent,
            )
            .unwrap();

        let rows = vec![
            (record! { "id" => 1, "name" => "remote one" }, RemoteLink::new("r1", None), None),
            (record! { "id" => 3, "name" => "three" }, RemoteLink::new("r3", None), Some(40)),
        ];
        let summary = store.replace_synced(products, &rows).unwrap();
        assert_eq!(summary.removed, 1);
        assert_eq!(summary.inserted, 1);
        assert_eq!(summary.kept_local, 1);

        assert_eq!(
            store.get(products, 1).unwrap().unwrap()["name"],
            Value::Text("local edit".into())
        );
        assert!(store.get(products, 2).unwrap().is_none());
        assert!(store.get(products, 3).unwrap().is_some());
    }

    #[test]
    fn query_with_filter_and_order() {
        let (store, _, products) = store_at(10);
        for (id, name, price) in [(1, "a", 3.0), (2, "b", 1.0), (3, "c", 2.0)] {
            store
                .insert(products, &record! { "id" => id, "name" => name, "price" => price })
                .unwrap();
        }
        let rows = store
            .query(products, &Filter::ge("price", 2), &[OrderBy::desc("price")])
            .unwrap();
        let ids: Vec<&Value> = rows.iter().map(|r| &r["id"]).collect();
        assert_eq!(ids, vec![&Value::Integer(1), &Value::Integer(3)]);
    }

    #[test]
    fn closed_store_rejects_calls_and_close_is_idempotent() {
        let store = LocalStore::new(StoreConfig::in_memory(), registry());
        store.close().unwrap();
        let products = store.registry().resolve("products").unwrap();
        assert!(matches!(store.get(products, 1), Err(StoreError::Closed)));

        store.connect().unwrap();
        store.ensure_schema().unwrap();
        store.close().unwrap();
        store.close().unwrap();
        assert!(!store.is_connected());
    }

    #[test]
    fn counts_by_status() {
        let (store, _, products) = store_at(10);
        store.insert(products, &record! { "id" => 1, "name" => "a" }).unwrap();
        store.insert(products, &record! { "id" => 2, "name" => "b" }).unwrap();
        store.mark_conflict(products, 2, "x").unwrap();
        let counts = store.count_by_status().unwrap();
        assert_eq!(counts, StatusCounts { synced: 0, pending: 1, conflict: 1 });
        assert!(!store.is_empty().unwrap());
    }

    #[test]
    fn meta_round_trip() {
        let (store, _, _) = store_at(10);
        assert_eq!(store.meta_get("last_sync_at").unwrap(), None);
        store.meta_set("last_sync_at", "42").unwrap();
        assert_eq!(store.meta_get("last_sync_at").unwrap().as_deref(), Some("42"));
        store.meta_remove("last_sync_at").unwrap();
        assert_eq!(store.meta_get("last_sync_at").unwrap(), None);
    }
}
