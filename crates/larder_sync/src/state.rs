//! Sync session state machine.

use crate::error::{SyncError, SyncResult};
use parking_lot::Mutex;
use serde::Serialize;
use std::fmt;

/// What a session is doing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncMode {
    /// Remote to local full replacement.
    Bootstrap,
    /// Local pending rows to remote.
    Push,
    /// Push, then read back and resolve.
    Reconcile,
}

impl fmt::Display for SyncMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SyncMode::Bootstrap => "bootstrap",
            SyncMode::Push => "push",
            SyncMode::Reconcile => "reconcile",
        })
    }
}

/// The coordinator's state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncState {
    /// No session running.
    Idle,
    /// Replicating remote collections into the local store.
    Bootstrapping,
    /// Sending pending rows.
    Pushing,
    /// Pushing and then resolving against remote state.
    Reconciling,
    /// The last session failed; the reason is kept in `last_error`.
    Failed,
}

impl SyncState {
    /// The state a session of `mode` occupies.
    pub fn for_mode(mode: SyncMode) -> Self {
        match mode {
            SyncMode::Bootstrap => SyncState::Bootstrapping,
            SyncMode::Push => SyncState::Pushing,
            SyncMode::Reconcile => SyncState::Reconciling,
        }
    }

    /// Returns true while a session runs.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            SyncState::Bootstrapping | SyncState::Pushing | SyncState::Reconciling
        )
    }

    /// Returns true if a new session may start.
    pub fn can_start_sync(&self) -> bool {
        matches!(self, SyncState::Idle | SyncState::Failed)
    }
}

/// The single sync session value the coordinator owns.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SyncSession {
    /// Current state.
    pub state: SyncState,
    /// Mode of the running or last session.
    pub mode: Option<SyncMode>,
    /// Start of the running or last session (ms).
    pub started_at: Option<i64>,
    /// True while a session runs.
    pub in_progress: bool,
    /// End of the last successful session (ms).
    pub last_completed_at: Option<i64>,
    /// Reason the last session failed.
    pub last_error: Option<String>,
}

impl Default for SyncSession {
    fn default() -> Self {
        Self {
            state: SyncState::Idle,
            mode: None,
            started_at: None,
            in_progress: false,
            last_completed_at: None,
            last_error: None,
        }
    }
}

/// Mutual exclusion for sessions: one check-and-set under one lock.
#[derive(Debug, Default)]
pub(crate) struct SessionSlot {
    session: Mutex<SyncSession>,
}

impl SessionSlot {
    /// Claims the slot for a session of `mode`, or fails with
    /// `SyncInProgress` without side effects.
    ///
    /// `on_claim` runs under the slot lock once the claim has succeeded, so
    /// it happens before anyone can observe the new session.
    pub(crate) fn try_begin(
        &self,
        mode: SyncMode,
        now: i64,
        on_claim: impl FnOnce(),
    ) -> SyncResult<SessionGuard<'_>> {
        let mut session = self.session.lock();
        if session.in_progress || !session.state.can_start_sync() {
            return Err(SyncError::SyncInProgress);
        }
        on_claim();
        session.state = SyncState::for_mode(mode);
        session.mode = Some(mode);
        session.started_at = Some(now);
        session.in_progress = true;
        Ok(SessionGuard {
            slot: self,
            finished: false,
        })
    }

    pub(crate) fn snapshot(&self) -> SyncSession {
        self.session.lock().clone()
    }
}

/// Holds the session slot; always releases it.
///
/// A guard dropped without [`finish`](Self::finish) (a panic inside the
/// pass) leaves the session `Failed`.
#[derive(Debug)]
pub(crate) struct SessionGuard<'a> {
    slot: &'a SessionSlot,
    finished: bool,
}

impl SessionGuard<'_> {
    /// Ends the session, recording success or the failure reason.
    pub(crate) fn finish(mut self, now: i64, error: Option<String>) {
        let mut session = self.slot.session.lock();
        session.in_progress = false;
        match error {
            None => {
                session.state = SyncState::Idle;
                session.last_completed_at = Some(now);
                session.last_error = None;
            }
            Some(reason) => {
                session.state = SyncState::Failed;
                session.last_error = Some(reason);
            }
        }
        self.finished = true;
    }
}

impl Drop for SessionGuard<'_> {
    fn drop(&mut self) {
        if !self.finished {
            let mut session = self.slot.session.lock();
            session.in_progress = false;
            session.state = SyncState::Failed;
            session.last_error = Some("session ended unexpectedly".to_string());
        }
    }
}
