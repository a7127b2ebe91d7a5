//! Pending command implementation.

use super::{format_ms, Context};
use serde::Serialize;

#[derive(Debug, Serialize)]
struct PendingLine {
    table: String,
    id: String,
    operation: String,
    status: String,
    attempts: u32,
    enqueued_at: Option<i64>,
    next_attempt_at: Option<i64>,
    last_error: Option<String>,
}

/// Lists rows waiting for sync, oldest first within each table.
pub fn run(ctx: &Context, table: Option<&str>, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    let filter = table.map(|name| ctx.table(name)).transpose()?;
    let registry = ctx.store.registry();

    let mut lines = Vec::new();
    for entry in ctx.store.pending_entries(filter)? {
        let spec = registry.table(entry.table)?;
        lines.push(PendingLine {
            table: spec.name.clone(),
            id: entry.record_id().to_cell_text(),
            operation: format!("{:?}", entry.operation).to_lowercase(),
            status: entry.row.meta.status.to_string(),
            attempts: entry.attempt_count(),
            enqueued_at: entry.enqueued_at(),
            next_attempt_at: entry.row.meta.next_attempt_at,
            last_error: entry.row.meta.last_error.clone(),
        });
    }

    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&lines)?),
        _ => {
            if lines.is_empty() {
                println!("Nothing pending.");
            }
            for line in &lines {
                println!(
                    "{}/{}: {} [{}] attempts={} enqueued={}",
                    line.table,
                    line.id,
                    line.operation,
                    line.status,
                    line.attempts,
                    format_ms(line.enqueued_at),
                );
                if let Some(err) = &line.last_error {
                    println!("    last error: {err} (next try {})", format_ms(line.next_attempt_at));
                }
            }
        }
    }
    Ok(())
}
