//! Run command implementation: the background scheduler in the foreground.

use super::Context;
use larder_sync::SyncScheduler;
use std::sync::Arc;
use tracing::info;

/// Runs scheduled passes until Ctrl-C.
pub fn run(ctx: &Context) -> Result<(), Box<dyn std::error::Error>> {
    let coordinator = Arc::new(ctx.coordinator()?);
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    runtime.block_on(async move {
        let handle = SyncScheduler::spawn(coordinator);
        let stopped = tokio::signal::ctrl_c().await;
        info!("shutting down");
        handle.shutdown().await;
        stopped
    })?;
    Ok(())
}
