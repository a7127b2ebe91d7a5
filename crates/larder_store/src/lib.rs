//! # Larder Store
//!
//! Persistent, schema-typed local database for offline-first applications.
//!
//! This crate provides:
//! - A frozen table registry mapping local tables to remote collections
//! - Typed inserts, partial updates, tombstone deletes and structured queries
//! - Durable per-row sync bookkeeping (status, stamps, remote identity,
//!   retry counters) written in the same transaction as the business data
//! - The status transitions the sync coordinator drives
//!
//! ## Key Invariants
//!
//! - Every business mutation leaves its row `pending` (or `conflict`)
//! - Local modification stamps never go backwards, even if the wall clock does
//! - Only the coordinator moves rows back to `synced`
//! - Table and column names reach SQL only after registry validation
//!
//! ## Example
//!
//! ```
//! use larder_codec::{record, Value};
//! use larder_store::{ColumnType, Filter, LocalStore, Registry, TableSpec};
//! use std::sync::Arc;
//!
//! let registry = Arc::new(
//!     Registry::new(vec![TableSpec::new("products", "Products")
//!         .key("id", ColumnType::Integer)
//!         .required("name", ColumnType::Text)])
//!     .unwrap(),
//! );
//! let store = LocalStore::open_in_memory(registry.clone()).unwrap();
//! let products = registry.resolve("products").unwrap();
//!
//! store.insert(products, &record! { "id" => 1, "name" => "Rye" }).unwrap();
//! let rows = store.query(products, &Filter::eq("name", "Rye"), &[]).unwrap();
//! assert_eq!(rows[0]["sync_status"], Value::from("pending"));
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod clock;
mod error;
mod filter;
mod registry;
mod row;
mod schema;
mod store;

pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{StoreError, StoreResult};
pub use filter::{Direction, Filter, OrderBy};
pub use registry::{Registry, TableId, BOOKKEEPING_COLUMNS};
pub use row::{
    ApplyGuard, ConflictChoice, QueueEntry, QueueOp, RemoteLink, ReplaceSummary, StatusCounts,
    StoredRow, SyncMeta, SyncStatus,
};
pub use schema::{ColumnSpec, ColumnType, TableSpec};
pub use store::{LocalStore, StoreConfig};
