//! Remote wrappers that let tests control timing.

use larder_codec::Record;
use larder_remote::{BatchOutcome, RemoteClient, RemoteRecord, RemoteResult, RemoteWrite, RowUpdate};
use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Kind of data call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteOp {
    /// `read_collection`
    Read,
    /// `append_row`
    Append,
    /// `update_row`
    Update,
    /// `delete_row`
    Delete,
    /// `batch_update`
    Batch,
}

/// A data call as seen by a hook.
#[derive(Debug, Clone, Copy)]
pub struct RemoteCall<'a> {
    /// What is being called.
    pub op: RemoteOp,
    /// Target collection.
    pub collection: &'a str,
    /// 1-based position among data calls.
    pub index: u64,
}

#[derive(Debug, Default)]
struct GateState {
    closed: bool,
    blocked: usize,
}

/// Blocks data calls while its gate is closed.
///
/// Probes and `authenticate` always pass, so a session gets as far as its
/// first data call and then waits there with the session held.
#[derive(Debug)]
pub struct GatedRemote<R> {
    inner: R,
    state: Mutex<GateState>,
    changed: Condvar,
}

impl<R> GatedRemote<R> {
    /// Wraps `inner` with an open gate.
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            state: Mutex::new(GateState::default()),
            changed: Condvar::new(),
        }
    }

    /// The wrapped remote.
    pub fn inner(&self) -> &R {
        &self.inner
    }

    /// Makes subsequent data calls wait.
    pub fn close(&self) {
        self.state.lock().closed = true;
    }

    /// Releases every waiting call.
    pub fn open(&self) {
        self.state.lock().closed = false;
        self.changed.notify_all();
    }

    /// Waits until at least one call is blocked. Returns false on timeout.
    pub fn wait_until_blocked(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock();
        while state.blocked == 0 {
            if self.changed.wait_until(&mut state, deadline).timed_out() {
                return state.blocked > 0;
            }
        }
        true
    }

    fn pass(&self) {
        let mut state = self.state.lock();
        if !state.closed {
            return;
        }
        state.blocked += 1;
        self.changed.notify_all();
        while state.closed {
            self.changed.wait(&mut state);
        }
        state.blocked -= 1;
    }
}

impl<R: RemoteClient> RemoteClient for GatedRemote<R> {
    fn authenticate(&self) -> RemoteResult<()> {
        self.inner.authenticate()
    }

    fn read_collection(&self, collection: &str) -> RemoteResult<Vec<RemoteRecord>> {
        self.pass();
        self.inner.read_collection(collection)
    }

    fn append_row(&self, collection: &str, fields: &Record) -> RemoteResult<RemoteWrite> {
        self.pass();
        self.inner.append_row(collection, fields)
    }

    fn update_row(
        &self,
        collection: &str,
        remote_id: &str,
        fields: &Record,
        expected_version: Option<&str>,
    ) -> RemoteResult<RemoteWrite> {
        self.pass();
        self.inner.update_row(collection, remote_id, fields, expected_version)
    }

    fn delete_row(&self, collection: &str, remote_id: &str, expected_version: Option<&str>) -> RemoteResult<()> {
        self.pass();
        self.inner.delete_row(collection, remote_id, expected_version)
    }

    fn batch_update(&self, collection: &str, updates: &[RowUpdate]) -> RemoteResult<BatchOutcome> {
        self.pass();
        self.inner.batch_update(collection, updates)
    }

    fn probe_reachable(&self, timeout: Duration) -> bool {
        self.inner.probe_reachable(timeout)
    }
}

type Hook = Box<dyn Fn(RemoteCall<'_>) + Send + Sync>;

/// Runs a callback before every data call.
///
/// Tests use it to change the world at an exact point of a pass: expire a
/// credential, cancel the session, edit a row locally.
pub struct HookRemote<R> {
    inner: R,
    hook: Hook,
    calls: AtomicU64,
}

impl<R> HookRemote<R> {
    /// Wraps `inner`.
    pub fn new(inner: R, hook: impl Fn(RemoteCall<'_>) + Send + Sync + 'static) -> Self {
        Self {
            inner,
            hook: Box::new(hook),
            calls: AtomicU64::new(0),
        }
    }

    /// The wrapped remote.
    pub fn inner(&self) -> &R {
        &self.inner
    }

    /// Data calls seen so far.
    pub fn data_calls(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }

    fn before(&self, op: RemoteOp, collection: &str) {
        let index = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        (self.hook)(RemoteCall {
            op,
            collection,
            index,
        });
    }
}

impl<R: std::fmt::Debug> std::fmt::Debug for HookRemote<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HookRemote")
            .field("inner", &self.inner)
            .field("calls", &self.data_calls())
            .finish_non_exhaustive()
    }
}

impl<R: RemoteClient> RemoteClient for HookRemote<R> {
    fn authenticate(&self) -> RemoteResult<()> {
        self.inner.authenticate()
    }

    fn read_collection(&self, collection: &str) -> RemoteResult<Vec<RemoteRecord>> {
        self.before(RemoteOp::Read, collection);
        self.inner.read_collection(collection)
    }

    fn append_row(&self, collection: &str, fields: &Record) -> RemoteResult<RemoteWrite> {
        self.before(RemoteOp::Append, collection);
        self.inner.append_row(collection, fields)
    }

    fn update_row(
        &self,
        collection: &str,
        remote_id: &str,
        fields: &Record,
        expected_version: Option<&str>,
    ) -> RemoteResult<RemoteWrite> {
        self.before(RemoteOp::Update, collection);
        self.inner.update_row(collection, remote_id, fields, expected_version)
    }

    fn delete_row(&self, collection: &str, remote_id: &str, expected_version: Option<&str>) -> RemoteResult<()> {
        self.before(RemoteOp::Delete, collection);
        self.inner.delete_row(collection, remote_id, expected_version)
    }

    fn batch_update(&self, collection: &str, updates: &[RowUpdate]) -> RemoteResult<BatchOutcome> {
        self.before(RemoteOp::Batch, collection);
        self.inner.batch_update(collection, updates)
    }

    fn probe_reachable(&self, timeout: Duration) -> bool {
        self.inner.probe_reachable(timeout)
    }
}
