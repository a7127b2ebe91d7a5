//! Retry and resolve command implementations.

use super::{key_arg, Context};
use larder_store::ConflictChoice;

/// Clears a row's retry counters so the next pass sends it again.
pub fn retry(ctx: &Context, table: &str, id: &str) -> Result<(), Box<dyn std::error::Error>> {
    let table_id = ctx.table(table)?;
    ctx.coordinator()?.retry_row(table_id, key_arg(id))?;
    println!("{table}/{id} will be retried on the next sync");
    Ok(())
}

/// Settles a row in conflict.
pub fn resolve(
    ctx: &Context,
    table: &str,
    id: &str,
    choice: ConflictChoice,
) -> Result<(), Box<dyn std::error::Error>> {
    let table_id = ctx.table(table)?;
    ctx.coordinator()?.resolve_conflict(table_id, key_arg(id), choice)?;
    match choice {
        ConflictChoice::KeepLocal => println!("{table}/{id} kept; it will be sent again"),
        ConflictChoice::AcceptRemote => println!("{table}/{id} removed locally"),
    }
    Ok(())
}
