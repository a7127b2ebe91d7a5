//! In-process remote.

use crate::client::{RemoteClient, RemoteRecord, RemoteWrite};
use crate::error::{RemoteError, RemoteErrorKind, RemoteResult};
use larder_codec::Record;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::debug;

#[derive(Debug, Clone)]
struct StoredRecord {
    version: u64,
    modified_at: i64,
    fields: Record,
}

#[derive(Debug, Default)]
struct Collection {
    next_id: u64,
    rows: BTreeMap<u64, StoredRecord>,
}

impl Collection {
    fn record(id: u64, row: &StoredRecord) -> RemoteRecord {
        RemoteRecord {
            remote_id: id.to_string(),
            version: Some(row.version.to_string()),
            modified_at: Some(row.modified_at),
            fields: row.fields.clone(),
        }
    }
}

#[derive(Debug)]
struct State {
    collections: HashMap<String, Collection>,
    faults: HashMap<String, RemoteErrorKind>,
    reachable: bool,
    token_valid: bool,
    auth_rejected: bool,
    now_ms: i64,
    next_version: u64,
}

/// A complete remote kept in memory.
///
/// Records get sequential ids and a fresh version on every write. The remote
/// has its own clock for `modified_at`, so tests can place remote edits
/// before or after local ones. Reachability, credentials and per-collection
/// failures can be toggled at any time.
#[derive(Debug)]
pub struct MemoryRemote {
    state: Mutex<State>,
    calls: AtomicU64,
}

impl Default for MemoryRemote {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryRemote {
    /// Creates an empty, reachable remote with valid credentials.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State {
                collections: HashMap::new(),
                faults: HashMap::new(),
                reachable: true,
                token_valid: true,
                auth_rejected: false,
                now_ms: 0,
                next_version: 1,
            }),
            calls: AtomicU64::new(0),
        }
    }

    /// Creates an empty collection. Existing collections are kept.
    pub fn create_collection(&self, name: &str) {
        self.state
            .lock()
            .collections
            .entry(name.to_string())
            .or_insert_with(|| Collection {
                next_id: 1,
                rows: BTreeMap::new(),
            });
    }

    /// Builder form of [`create_collection`](Self::create_collection).
    #[must_use]
    pub fn with_collection(self, name: &str) -> Self {
        self.create_collection(name);
        self
    }

    /// Makes the remote reachable or not.
    pub fn set_reachable(&self, reachable: bool) {
        self.state.lock().reachable = reachable;
    }

    /// Expires the current credential (`true`) until the next `authenticate`.
    pub fn expire_token(&self) {
        self.state.lock().token_valid = false;
    }

    /// Makes `authenticate` fail (`true`) or succeed again (`false`).
    pub fn reject_auth(&self, rejected: bool) {
        let mut state = self.state.lock();
        state.auth_rejected = rejected;
        if rejected {
            state.token_valid = false;
        }
    }

    /// Makes every call on `collection` fail with `kind`.
    pub fn fail_collection(&self, collection: &str, kind: RemoteErrorKind) {
        self.state.lock().faults.insert(collection.to_string(), kind);
    }

    /// Removes an injected failure.
    pub fn clear_fault(&self, collection: &str) {
        self.state.lock().faults.remove(collection);
    }

    /// Sets the remote clock.
    pub fn set_now(&self, now_ms: i64) {
        self.state.lock().now_ms = now_ms;
    }

    /// Number of client calls received, probes included.
    pub fn call_count(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }

    /// Resets the call counter.
    pub fn reset_calls(&self) {
        self.calls.store(0, Ordering::SeqCst);
    }

    /// Writes a record directly on the remote side, as another client would.
    pub fn seed(&self, collection: &str, fields: Record) -> String {
        let mut state = self.state.lock();
        let version = bump(&mut state);
        let now = state.now_ms;
        let coll = state.collections.entry(collection.to_string()).or_default();
        coll.next_id = coll.next_id.max(1);
        let id = coll.next_id;
        coll.next_id += 1;
        coll.rows.insert(
            id,
            StoredRecord {
                version,
                modified_at: now,
                fields,
            },
        );
        id.to_string()
    }

    /// Edits a record on the remote side. Returns false if it does not exist.
    pub fn edit(&self, collection: &str, remote_id: &str, patch: Record) -> bool {
        let mut state = self.state.lock();
        let version = bump(&mut state);
        let now = state.now_ms;
        let Some(id) = parse_id(remote_id) else {
            return false;
        };
        let Some(row) = state
            .collections
            .get_mut(collection)
            .and_then(|c| c.rows.get_mut(&id))
        else {
            return false;
        };
        row.fields.extend(patch);
        row.version = version;
        row.modified_at = now;
        true
    }

    /// Deletes a record on the remote side. Returns false if it did not exist.
    pub fn remove(&self, collection: &str, remote_id: &str) -> bool {
        let mut state = self.state.lock();
        parse_id(remote_id)
            .and_then(|id| state.collections.get_mut(collection)?.rows.remove(&id))
            .is_some()
    }

    /// Snapshot of a collection, in id order.
    pub fn records(&self, collection: &str) -> Vec<RemoteRecord> {
        let state = self.state.lock();
        state
            .collections
            .get(collection)
            .map(|c| c.rows.iter().map(|(id, row)| Collection::record(*id, row)).collect())
            .unwrap_or_default()
    }

    /// Looks up one record.
    pub fn record(&self, collection: &str, remote_id: &str) -> Option<RemoteRecord> {
        let state = self.state.lock();
        let id = parse_id(remote_id)?;
        let row = state.collections.get(collection)?.rows.get(&id)?;
        Some(Collection::record(id, row))
    }

    /// Counts the call, then checks reachability, credentials and faults.
    fn enter<'a>(&self, state: &'a mut State, collection: &str) -> RemoteResult<&'a mut Collection> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !state.reachable {
            return Err(RemoteError::unavailable("remote unreachable"));
        }
        if !state.token_valid {
            return Err(RemoteError::unauthorized("token expired"));
        }
        if let Some(kind) = state.faults.get(collection) {
            return Err(RemoteError::new(*kind, format!("injected failure on {collection}")));
        }
        state
            .collections
            .get_mut(collection)
            .ok_or_else(|| RemoteError::not_found(format!("no collection {collection}")))
    }
}

fn bump(state: &mut State) -> u64 {
    let version = state.next_version;
    state.next_version += 1;
    version
}

fn parse_id(remote_id: &str) -> Option<u64> {
    remote_id.parse().ok()
}

fn check_version(row: &StoredRecord, expected: Option<&str>, remote_id: &str) -> RemoteResult<()> {
    match expected {
        Some(expected) if expected != row.version.to_string() => Err(RemoteError::conflict(format!(
            "record {remote_id} is at version {}, expected {expected}",
            row.version
        ))),
        _ => Ok(()),
    }
}

impl RemoteClient for MemoryRemote {
    fn authenticate(&self) -> RemoteResult<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mut state = self.state.lock();
        if !state.reachable {
            return Err(RemoteError::unavailable("remote unreachable"));
        }
        if state.auth_rejected {
            return Err(RemoteError::unauthorized("credentials rejected"));
        }
        state.token_valid = true;
        Ok(())
    }

    fn read_collection(&self, collection: &str) -> RemoteResult<Vec<RemoteRecord>> {
        let mut state = self.state.lock();
        let coll = self.enter(&mut state, collection)?;
        Ok(coll
            .rows
            .iter()
            .map(|(id, row)| Collection::record(*id, row))
            .collect())
    }

    fn append_row(&self, collection: &str, fields: &Record) -> RemoteResult<RemoteWrite> {
        let mut state = self.state.lock();
        let version = bump(&mut state);
        let now = state.now_ms;
        let coll = self.enter(&mut state, collection)?;
        let id = coll.next_id.max(1);
        coll.next_id = id + 1;
        coll.rows.insert(
            id,
            StoredRecord {
                version,
                modified_at: now,
                fields: fields.clone(),
            },
        );
        debug!(collection, remote_id = id, "memory remote append");
        Ok(RemoteWrite {
            remote_id: id.to_string(),
            version: Some(version.to_string()),
        })
    }

    fn update_row(
        &self,
        collection: &str,
        remote_id: &str,
        fields: &Record,
        expected_version: Option<&str>,
    ) -> RemoteResult<RemoteWrite> {
        let mut state = self.state.lock();
        let version = bump(&mut state);
        let now = state.now_ms;
        let coll = self.enter(&mut state, collection)?;
        let missing = || RemoteError::not_found(format!("no record {remote_id} in {collection}"));
        let id = parse_id(remote_id).ok_or_else(missing)?;
        let row = coll.rows.get_mut(&id).ok_or_else(missing)?;
        check_version(row, expected_version, remote_id)?;
        row.fields = fields.clone();
        row.version = version;
        row.modified_at = now;
        Ok(RemoteWrite {
            remote_id: remote_id.to_string(),
            version: Some(version.to_string()),
        })
    }

    fn delete_row(&self, collection: &str, remote_id: &str, expected_version: Option<&str>) -> RemoteResult<()> {
        let mut state = self.state.lock();
        let coll = self.enter(&mut state, collection)?;
        let id = parse_id(remote_id)
            .filter(|id| coll.rows.contains_key(id))
            .ok_or_else(|| RemoteError::not_found(format!("no record {remote_id} in {collection}")))?;
        if let Some(row) = coll.rows.get(&id) {
            check_version(row, expected_version, remote_id)?;
        }
        coll.rows.remove(&id);
        Ok(())
    }

    fn probe_reachable(&self, _timeout: Duration) -> bool {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.state.lock().reachable
    }
}
