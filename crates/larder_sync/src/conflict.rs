//! Last-writer-wins conflict policy.

use serde::Serialize;

/// Which copy of a row survives a conflict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Winner {
    /// The local copy; it is pushed over the remote one.
    Local,
    /// The remote copy; it overwrites the local one.
    Remote,
}

/// Decides a row edited on both sides.
///
/// The local copy wins only if its modification stamp is strictly later
/// than the remote one. Ties and an unknown remote time go to the remote.
pub fn resolve(local_modified_at: i64, remote_modified_at: Option<i64>) -> Winner {
    match remote_modified_at {
        Some(remote) if local_modified_at > remote => Winner::Local,
        _ => Winner::Remote,
    }
}
