//! Test fixtures: a sample schema, stores and remotes.
//!
//! Fixtures panic on setup failure; they are only meant for tests.

use larder_codec::{record, Record};
use larder_remote::MemoryRemote;
use larder_store::{ColumnType, LocalStore, ManualClock, Registry, TableId, TableSpec};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;

/// Clock value fixtures start at (ms).
pub const START_MS: i64 = 1_000;

/// The sample schema: products, customers and orders.
pub fn sample_registry() -> Arc<Registry> {
    Arc::new(
        Registry::new(vec![
            TableSpec::new("products", "Products")
                .key("id", ColumnType::Integer)
                .required("name", ColumnType::Text)
                .column("price", ColumnType::Real)
                .column("active", ColumnType::Boolean),
            TableSpec::new("customers", "Customers")
                .key("code", ColumnType::Text)
                .required("name", ColumnType::Text)
                .column("email", ColumnType::Text),
            TableSpec::new("orders", "Orders")
                .key("id", ColumnType::Integer)
                .required("customer", ColumnType::Text)
                .column("total", ColumnType::Real)
                .column("placed_at", ColumnType::Text),
        ])
        .expect("sample registry is valid"),
    )
}

/// An empty in-memory remote holding the sample collections.
pub fn sample_remote() -> MemoryRemote {
    MemoryRemote::new()
        .with_collection("Products")
        .with_collection("Customers")
        .with_collection("Orders")
}

/// A product record.
pub fn product(id: i64, name: &str) -> Record {
    record! { "id" => id, "name" => name, "price" => 2.5, "active" => true }
}

/// A local store on the sample schema, driven by a manual clock.
pub struct TestStore {
    /// The store.
    pub store: Arc<LocalStore>,
    /// Clock used for modification stamps.
    pub clock: Arc<ManualClock>,
    path: Option<PathBuf>,
    // Kept alive so the database file outlives the store.
    _temp_dir: Option<TempDir>,
}

impl TestStore {
    /// Creates an in-memory store.
    pub fn memory() -> Self {
        let clock = Arc::new(ManualClock::new(START_MS));
        let store = LocalStore::open_in_memory(sample_registry())
            .expect("failed to open in-memory store")
            .with_clock(clock.clone());
        Self {
            store: Arc::new(store),
            clock,
            path: None,
            _temp_dir: None,
        }
    }

    /// Creates a store backed by a file in a fresh temporary directory.
    pub fn file() -> Self {
        let temp_dir = TempDir::new().expect("failed to create temp directory");
        let path = temp_dir.path().join("larder.db");
        let clock = Arc::new(ManualClock::new(START_MS));
        let store = LocalStore::open(&path, sample_registry())
            .expect("failed to open file store")
            .with_clock(clock.clone());
        Self {
            store: Arc::new(store),
            clock,
            path: Some(path),
            _temp_dir: Some(temp_dir),
        }
    }

    /// Database file path, if file-based.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Opens a second store on the same file, as a restarted process would.
    ///
    /// # Panics
    ///
    /// Panics for in-memory stores.
    pub fn reopen(&self) -> LocalStore {
        let path = self.path.as_ref().expect("only file stores can be reopened");
        LocalStore::open(path, sample_registry())
            .expect("failed to reopen store")
            .with_clock(self.clock.clone())
    }

    /// Resolves a sample table.
    pub fn table(&self, name: &str) -> TableId {
        self.store
            .registry()
            .resolve(name)
            .expect("unknown sample table")
    }
}

impl std::ops::Deref for TestStore {
    type Target = LocalStore;

    fn deref(&self) -> &Self::Target {
        &self.store
    }
}

/// Pre-populated scenarios.
pub mod scenarios {
    use super::*;

    /// A sample remote with `count` products already on it, ids `1..=count`,
    /// written at remote time `modified_at`.
    pub fn remote_with_products(count: i64, modified_at: i64) -> MemoryRemote {
        let remote = sample_remote();
        remote.set_now(modified_at);
        for id in 1..=count {
            remote.seed("Products", product(id, &format!("product {id}")));
        }
        remote
    }
}
