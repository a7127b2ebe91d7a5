//! Background scheduling on tokio.
//!
//! Sessions are blocking work (SQLite and a blocking remote client), so every
//! pass runs on the blocking pool. The async side only decides when.

use crate::coordinator::SyncCoordinator;
use crate::error::{SyncError, SyncResult};
use crate::report::{StatusSnapshot, SyncReport};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Spawns the periodic sync loop.
#[derive(Debug)]
pub struct SyncScheduler;

impl SyncScheduler {
    /// Starts running [`SyncCoordinator::run_scheduled`] every
    /// `sync_interval`, beginning immediately. Must be called inside a
    /// tokio runtime.
    pub fn spawn(coordinator: Arc<SyncCoordinator>) -> SchedulerHandle {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(run_loop(coordinator.clone(), shutdown_rx));
        SchedulerHandle {
            coordinator,
            shutdown: shutdown_tx,
            task,
        }
    }
}

async fn run_loop(coordinator: Arc<SyncCoordinator>, mut shutdown: watch::Receiver<bool>) {
    let period = coordinator.config().sync_interval;
    let mut ticker = time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    info!(?period, "sync scheduler started");

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let c = coordinator.clone();
                match tokio::task::spawn_blocking(move || c.run_scheduled()).await {
                    Ok(Ok(report)) => debug!(
                        mode = %report.mode,
                        pushed = report.pushed(),
                        pulled = report.pulled(),
                        "scheduled sync done"
                    ),
                    Ok(Err(err)) if err.is_status() => debug!(error = %err, "scheduled sync skipped"),
                    Ok(Err(err)) => warn!(error = %err, "scheduled sync failed"),
                    Err(err) => warn!(error = %err, "scheduled sync task failed"),
                }
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }
    info!("sync scheduler stopped");
}

/// Controls a running scheduler.
///
/// Requests go straight to the coordinator: if a session is running they
/// fail with [`SyncError::SyncInProgress`] instead of waiting.
#[derive(Debug)]
pub struct SchedulerHandle {
    coordinator: Arc<SyncCoordinator>,
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl SchedulerHandle {
    /// Runs a manual sync now.
    pub async fn request_manual_sync(&self) -> SyncResult<SyncReport> {
        self.blocking(|c| c.manual_sync()).await
    }

    /// Runs a bootstrap now.
    pub async fn request_bootstrap(&self) -> SyncResult<SyncReport> {
        self.blocking(|c| c.bootstrap()).await
    }

    /// Current sync status.
    pub async fn status(&self) -> SyncResult<StatusSnapshot> {
        self.blocking(|c| c.get_sync_status()).await
    }

    /// Cancels the running session, if any.
    pub fn cancel(&self) {
        self.coordinator.cancel();
    }

    /// The coordinator behind this scheduler.
    pub fn coordinator(&self) -> &Arc<SyncCoordinator> {
        &self.coordinator
    }

    /// Cancels the running session and waits for the loop to stop.
    pub async fn shutdown(self) {
        self.coordinator.cancel();
        // the loop may already be gone
        let _ = self.shutdown.send(true);
        if let Err(err) = self.task.await {
            warn!(error = %err, "sync scheduler ended abnormally");
        }
    }

    async fn blocking<T, F>(&self, f: F) -> SyncResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&SyncCoordinator) -> SyncResult<T> + Send + 'static,
    {
        let coordinator = self.coordinator.clone();
        match tokio::task::spawn_blocking(move || f(&coordinator)).await {
            Ok(result) => result,
            Err(err) if err.is_panic() => std::panic::resume_unwind(err.into_panic()),
            Err(_) => Err(SyncError::Cancelled),
        }
    }
}
