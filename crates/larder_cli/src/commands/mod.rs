//! CLI command implementations.

pub mod pending;
pub mod resolve;
pub mod run;
pub mod schema;
pub mod status;
pub mod sync;

use crate::http::ReqwestClient;
use crate::settings::Settings;
use larder_codec::Value;
use larder_remote::{EnvToken, SheetsRemote};
use larder_store::{LocalStore, TableId};
use larder_sync::SyncCoordinator;
use std::path::Path;
use std::sync::Arc;

/// Environment variable holding the bearer token.
pub const TOKEN_VAR: &str = "LARDER_TOKEN";

/// An opened database plus the settings it was opened with.
pub struct Context {
    /// The local store.
    pub store: Arc<LocalStore>,
    /// Parsed settings.
    pub settings: Settings,
}

impl Context {
    /// Opens the database, creating missing tables.
    pub fn open(db: &Path, settings: Settings) -> Result<Self, Box<dyn std::error::Error>> {
        let registry = settings.registry()?;
        let store = LocalStore::open(db, registry)?;
        Ok(Self {
            store: Arc::new(store),
            settings,
        })
    }

    /// Resolves a table name.
    pub fn table(&self, name: &str) -> Result<TableId, Box<dyn std::error::Error>> {
        Ok(self.store.registry().resolve(name)?)
    }

    /// The configured spreadsheet remote.
    pub fn remote(&self) -> Result<Arc<SheetsRemote<ReqwestClient>>, Box<dyn std::error::Error>> {
        Ok(Arc::new(SheetsRemote::new(
            self.settings.sheets_config()?,
            ReqwestClient::new(),
            Arc::new(EnvToken::new(TOKEN_VAR)),
        )))
    }

    /// Builds a coordinator talking to the configured spreadsheet.
    pub fn coordinator(&self) -> Result<SyncCoordinator, Box<dyn std::error::Error>> {
        Ok(SyncCoordinator::new(
            self.store.clone(),
            self.remote()?,
            self.settings.sync_config(),
        ))
    }
}

/// Parses a key given on the command line. The store converts it to the
/// key column's type.
pub fn key_arg(raw: &str) -> Value {
    Value::Text(raw.to_string())
}

/// Renders a millisecond timestamp as RFC 3339.
pub fn format_ms(ms: Option<i64>) -> String {
    match ms.and_then(chrono::DateTime::from_timestamp_millis) {
        Some(at) => at.to_rfc3339_opts(chrono::SecondsFormat::Secs, true),
        None => "never".to_string(),
    }
}
