//! Bootstrap and sync command implementations.

use super::Context;
use larder_sync::{SyncError, SyncReport};
use serde_json::json;

/// Which pass to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pass {
    /// Replace synced rows with the remote contents.
    Bootstrap,
    /// Send pending rows only.
    Push,
    /// Push, then read back and resolve.
    Reconcile,
}

/// Runs one pass and prints its report.
pub fn run(ctx: &Context, pass: Pass, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    let coordinator = ctx.coordinator()?;
    let result = match pass {
        Pass::Bootstrap => coordinator.bootstrap(),
        Pass::Push => coordinator.push(),
        Pass::Reconcile => coordinator.manual_sync(),
    };
    let report = match result {
        Ok(report) => report,
        Err(err) => match status_word(&err) {
            Some(status) => {
                match format {
                    "json" => {
                        let body = json!({ "status": status, "message": err.to_string() });
                        println!("{}", serde_json::to_string_pretty(&body)?);
                    }
                    _ => println!("{status}: {err}, nothing was sent"),
                }
                return Ok(());
            }
            None => return Err(err.into()),
        },
    };

    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&report)?),
        _ => print_report(&report),
    }
    Ok(())
}

/// Short name for outcomes that are a status rather than a failure.
fn status_word(err: &SyncError) -> Option<&'static str> {
    match err {
        SyncError::Offline => Some("offline"),
        SyncError::SyncInProgress => Some("busy"),
        _ => None,
    }
}

/// Prints a report as text.
pub fn print_report(report: &SyncReport) {
    println!(
        "{} finished: {} pushed, {} pulled, {} failed, {} in conflict",
        report.mode,
        report.pushed(),
        report.pulled(),
        report.failure_count(),
        report.conflict_count()
    );
    for table in &report.tables {
        println!(
            "  {}: +{} ~{} -{} pulled={} remote_wins={} local_wins={} waiting={}",
            table.table,
            table.appended,
            table.updated,
            table.deleted,
            table.pulled,
            table.remote_wins,
            table.local_wins,
            table.skipped_backoff,
        );
        if let Some(err) = &table.error {
            println!("    skipped: {err}");
        }
        for issue in &table.failures {
            println!("    failed {}: {}", issue.id, issue.reason);
        }
        for issue in &table.conflicts {
            println!("    conflict {}: {}", issue.id, issue.reason);
        }
        for id in &table.stalled {
            println!("    stalled {id} (use `larder retry`)");
        }
    }
}
