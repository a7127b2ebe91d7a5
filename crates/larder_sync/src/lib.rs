//! # Larder Sync
//!
//! Keeps a [`LocalStore`](larder_store::LocalStore) and a
//! [`RemoteClient`](larder_remote::RemoteClient) in step.
//!
//! This crate provides:
//! - [`SyncCoordinator`]: bootstrap, push and reconcile passes with
//!   connectivity probing, re-authentication, per-row backoff and
//!   last-writer-wins conflict resolution
//! - [`SyncScheduler`]: a tokio loop running unattended passes
//! - [`SyncReport`] and [`StatusSnapshot`] for callers and UIs
//!
//! ## Key Invariants
//!
//! - At most one session runs at a time; a second request is rejected with
//!   [`SyncError::SyncInProgress`] before any remote call
//! - An unreachable remote aborts a session before anything is sent or
//!   changed
//! - One row's failure never stops the rest of the pass
//! - Rows are never dropped: each ends `synced`, `pending` or `conflict`

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod conflict;
mod connectivity;
mod coordinator;
mod error;
mod report;
mod scheduler;
mod state;

pub use config::{ReconcileScope, RetryConfig, SyncConfig};
pub use conflict::{resolve, Winner};
pub use connectivity::ConnectivityState;
pub use coordinator::{CancelHandle, SyncCoordinator};
pub use error::{SyncError, SyncResult};
pub use report::{RowIssue, StatusSnapshot, SyncReport, TableReport};
pub use scheduler::{SchedulerHandle, SyncScheduler};
pub use state::{SyncMode, SyncSession, SyncState};
