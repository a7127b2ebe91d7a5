//! Larder CLI
//!
//! Command-line tools for a Larder database and its spreadsheet remote.
//!
//! # Commands
//!
//! - `schema` - Create missing tables and print the registry
//! - `status` - Show pending, conflict and stalled counts and the last sync
//! - `pending` - List rows waiting for sync
//! - `bootstrap` - Replace synced rows with the remote contents
//! - `sync` - Push pending rows, then reconcile
//! - `retry` - Give a failing row a fresh retry budget
//! - `resolve` - Settle a row in conflict
//! - `run` - Run the background scheduler until interrupted
//!
//! The bearer token is read from `LARDER_TOKEN`.

mod commands;
mod http;
mod settings;

use clap::{ArgGroup, Parser, Subcommand};
use commands::sync::Pass;
use commands::Context;
use larder_store::ConflictChoice;
use settings::Settings;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Larder offline-first store tools.
#[derive(Parser)]
#[command(name = "larder")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the database file
    #[arg(global = true, short, long, env = "LARDER_DB")]
    db: Option<PathBuf>,

    /// Path to the JSON settings file
    #[arg(global = true, short, long, env = "LARDER_SETTINGS")]
    settings: Option<PathBuf>,

    /// Failures before a row stalls (overrides settings)
    #[arg(global = true, long)]
    max_attempts: Option<u32>,

    /// Updates per batched call (overrides settings)
    #[arg(global = true, long)]
    batch_size: Option<usize>,

    /// Read back every table on sync (overrides settings)
    #[arg(global = true, long)]
    all_tables: bool,

    /// Output format (text, json)
    #[arg(global = true, short, long, default_value = "text")]
    format: String,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create missing tables and print the registry
    Schema,

    /// Show sync status
    Status {
        /// Probe the remote for reachability
        #[arg(short, long)]
        probe: bool,
    },

    /// List rows waiting for sync
    Pending {
        /// Only this table
        #[arg(short, long)]
        table: Option<String>,
    },

    /// Replace synced rows with the remote contents
    Bootstrap,

    /// Push pending rows, then reconcile
    Sync {
        /// Push only, without reading back
        #[arg(long)]
        push_only: bool,
    },

    /// Give a failing or stalled row a fresh retry budget
    Retry {
        /// Table name
        table: String,
        /// Primary key
        id: String,
    },

    /// Settle a row in conflict
    #[command(group(ArgGroup::new("choice").required(true).args(["keep_local", "accept_remote"])))]
    Resolve {
        /// Table name
        table: String,
        /// Primary key
        id: String,
        /// Keep the local row and send it again
        #[arg(long)]
        keep_local: bool,
        /// Drop the local row
        #[arg(long)]
        accept_remote: bool,
    },

    /// Run scheduled syncs until Ctrl-C
    Run,

    /// Show version information
    Version,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    if let Commands::Version = cli.command {
        println!("Larder CLI v{}", env!("CARGO_PKG_VERSION"));
        return Ok(());
    }

    let db = cli.db.ok_or("database path required (--db or LARDER_DB)")?;
    let settings_path = cli
        .settings
        .ok_or("settings file required (--settings or LARDER_SETTINGS)")?;
    let mut settings = Settings::load(&settings_path)?;
    if cli.max_attempts.is_some() {
        settings.sync.max_attempts = cli.max_attempts;
    }
    if cli.batch_size.is_some() {
        settings.sync.push_batch_size = cli.batch_size;
    }
    if cli.all_tables {
        settings.sync.reconcile_all_tables = true;
    }
    let ctx = Context::open(&db, settings)?;
    let format = cli.format.as_str();

    match cli.command {
        Commands::Schema => commands::schema::run(&ctx, format)?,
        Commands::Status { probe } => commands::status::run(&ctx, probe, format)?,
        Commands::Pending { table } => commands::pending::run(&ctx, table.as_deref(), format)?,
        Commands::Bootstrap => commands::sync::run(&ctx, Pass::Bootstrap, format)?,
        Commands::Sync { push_only } => {
            let pass = if push_only { Pass::Push } else { Pass::Reconcile };
            commands::sync::run(&ctx, pass, format)?;
        }
        Commands::Retry { table, id } => commands::resolve::retry(&ctx, &table, &id)?,
        Commands::Resolve {
            table,
            id,
            keep_local,
            accept_remote: _,
        } => {
            let choice = if keep_local {
                ConflictChoice::KeepLocal
            } else {
                ConflictChoice::AcceptRemote
            };
            commands::resolve::resolve(&ctx, &table, &id, choice)?;
        }
        Commands::Run => commands::run::run(&ctx)?,
        Commands::Version => {}
    }

    Ok(())
}
