//! Connectivity tracking.

use larder_remote::RemoteClient;
use parking_lot::RwLock;
use std::time::Duration;
use tracing::{debug, warn};

/// Last probe result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ConnectivityState {
    /// Whether the remote answered.
    pub online: bool,
    /// When the probe ran (ms), if ever.
    pub last_checked_at: Option<i64>,
}

/// Runs probes and remembers the last result for status reporting.
///
/// The remembered value is informational only; every session probes again.
#[derive(Debug, Default)]
pub(crate) struct Connectivity {
    state: RwLock<ConnectivityState>,
}

impl Connectivity {
    pub(crate) fn check(&self, remote: &dyn RemoteClient, timeout: Duration, now: i64) -> bool {
        let online = remote.probe_reachable(timeout);
        let previous = std::mem::replace(
            &mut *self.state.write(),
            ConnectivityState {
                online,
                last_checked_at: Some(now),
            },
        );
        match (previous.online, online) {
            (true, false) => warn!("remote became unreachable"),
            (false, true) if previous.last_checked_at.is_some() => debug!("remote reachable again"),
            _ => {}
        }
        online
    }

    pub(crate) fn snapshot(&self) -> ConnectivityState {
        *self.state.read()
    }
}
