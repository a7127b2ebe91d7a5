//! Schema command implementation.

use super::Context;

/// Creates missing tables and prints the registry.
pub fn run(ctx: &Context, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    ctx.store.ensure_schema()?;
    let tables: Vec<_> = ctx.store.registry().iter().map(|(_, spec)| spec).collect();

    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&tables)?),
        _ => {
            for spec in tables {
                println!("{} -> {} (key: {})", spec.name, spec.remote_collection, spec.primary_key);
                for column in &spec.columns {
                    let required = if column.required { " required" } else { "" };
                    println!("  {:<24} {:?}{required}", column.name, column.ty);
                }
            }
        }
    }
    Ok(())
}
