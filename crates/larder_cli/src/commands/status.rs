//! Status command implementation.

use super::{format_ms, Context};
use larder_remote::RemoteClient;
use larder_sync::StatusSnapshot;

/// Prints the sync status.
///
/// Connectivity is only known once something has probed the remote, so
/// without `--probe` it is reported as unknown.
pub fn run(ctx: &Context, probe: bool, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    let mut status = ctx.coordinator()?.get_sync_status()?;
    let online = if probe {
        let reachable = ctx
            .remote()?
            .probe_reachable(ctx.settings.sync_config().probe_timeout);
        status.online = reachable;
        status.last_checked_at = Some(ctx.store.now_ms());
        Some(reachable)
    } else {
        None
    };

    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&status)?),
        _ => print_text(&status, online),
    }
    Ok(())
}

fn print_text(status: &StatusSnapshot, online: Option<bool>) {
    let online = match online {
        None => "unknown",
        Some(true) => "yes",
        Some(false) => "no",
    };
    println!("=== Sync Status ===");
    println!("Online:          {online}");
    println!("Last sync:       {}", format_ms(status.last_sync_at));
    println!("State:           {:?}", status.state);
    println!("Pending rows:    {}", status.pending_count);
    println!("Conflicts:       {}", status.conflict_count);
    println!("Stalled rows:    {}", status.stalled_count);
    if let Some(err) = &status.last_error {
        println!("Last error:      {err}");
    }
}
