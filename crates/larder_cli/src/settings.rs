//! JSON settings file.
//!
//! ```json
//! {
//!   "tables": [
//!     { "name": "products", "remote_collection": "Products", "primary_key": "id",
//!       "columns": [ { "name": "id", "type": "integer" },
//!                    { "name": "name", "type": "text", "required": true } ] }
//!   ],
//!   "remote": { "base_url": "https://sheets.googleapis.com/", "spreadsheet_id": "abc" },
//!   "sync": { "max_attempts": 8, "reconcile_all_tables": true }
//! }
//! ```

use larder_remote::SheetsConfig;
use larder_store::{Registry, TableSpec};
use larder_sync::{ReconcileScope, RetryConfig, SyncConfig};
use serde::Deserialize;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

/// Everything the binary needs besides the database path.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Settings {
    /// Local tables and their remote collections.
    pub tables: Vec<TableSpec>,
    /// Remote connection.
    pub remote: RemoteSettings,
    /// Sync knobs.
    #[serde(default)]
    pub sync: SyncSettings,
}

/// Spreadsheet connection settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RemoteSettings {
    /// API root.
    pub base_url: String,
    /// Spreadsheet holding one sheet per collection.
    pub spreadsheet_id: String,
    /// Field holding the remote modification time.
    #[serde(default)]
    pub modified_column: Option<String>,
    /// Per-request deadline.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

/// Sync knobs. Missing fields keep the library defaults.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SyncSettings {
    /// Scheduler period.
    pub interval_secs: Option<u64>,
    /// Connectivity probe deadline.
    pub probe_timeout_secs: Option<u64>,
    /// Failures before a row stalls.
    pub max_attempts: Option<u32>,
    /// First backoff delay.
    pub initial_delay_secs: Option<u64>,
    /// Backoff cap.
    pub max_delay_secs: Option<u64>,
    /// Updates per batched call.
    pub push_batch_size: Option<usize>,
    /// Read back every table on reconcile, not just those that had work.
    pub reconcile_all_tables: bool,
    /// Scheduled re-bootstrap age.
    pub bootstrap_max_age_secs: Option<u64>,
}

fn default_request_timeout() -> u64 {
    30
}

impl Settings {
    /// Reads and parses a settings file.
    pub fn load(path: &Path) -> Result<Self, Box<dyn std::error::Error>> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| format!("cannot read settings {}: {e}", path.display()))?;
        Self::parse(&text)
    }

    /// Parses settings text.
    pub fn parse(text: &str) -> Result<Self, Box<dyn std::error::Error>> {
        let settings: Settings = serde_json::from_str(text)?;
        if settings.tables.is_empty() {
            return Err("settings declare no tables".into());
        }
        Ok(settings)
    }

    /// Builds the frozen table registry.
    pub fn registry(&self) -> Result<Arc<Registry>, Box<dyn std::error::Error>> {
        Ok(Arc::new(Registry::new(self.tables.clone())?))
    }

    /// Builds the remote configuration.
    pub fn sheets_config(&self) -> Result<SheetsConfig, Box<dyn std::error::Error>> {
        let mut config = SheetsConfig::new(&self.remote.base_url, &self.remote.spreadsheet_id)?
            .with_request_timeout(Duration::from_secs(self.remote.request_timeout_secs));
        if let Some(column) = &self.remote.modified_column {
            config = config.with_modified_column(column);
        }
        Ok(config)
    }

    /// Builds the coordinator configuration.
    pub fn sync_config(&self) -> SyncConfig {
        let s = &self.sync;
        let mut config = SyncConfig::default()
            .with_request_timeout(Duration::from_secs(self.remote.request_timeout_secs));
        if let Some(secs) = s.interval_secs {
            config.sync_interval = Duration::from_secs(secs);
        }
        if let Some(secs) = s.probe_timeout_secs {
            config = config.with_probe_timeout(Duration::from_secs(secs));
        }

        let mut retry = RetryConfig::default();
        if let Some(max) = s.max_attempts {
            retry.max_attempts = max;
        }
        if let Some(secs) = s.initial_delay_secs {
            retry = retry.with_initial_delay(Duration::from_secs(secs));
        }
        if let Some(secs) = s.max_delay_secs {
            retry = retry.with_max_delay(Duration::from_secs(secs));
        }
        config = config.with_retry(retry);

        if let Some(size) = s.push_batch_size {
            config = config.with_push_batch_size(size);
        }
        if s.reconcile_all_tables {
            config = config.with_reconcile_scope(ReconcileScope::AllTables);
        }
        if let Some(secs) = s.bootstrap_max_age_secs {
            config = config.with_bootstrap_max_age(Duration::from_secs(secs));
        }
        config
    }
}
