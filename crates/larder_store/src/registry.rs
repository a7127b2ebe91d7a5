//! The table registry.
//!
//! The registry is the single place table names are turned into something
//! the store will accept. It is validated once at startup and frozen; every
//! store call takes a [`TableId`] issued by it, so no caller-supplied string
//! ever reaches SQL.

use crate::error::{StoreError, StoreResult};
use crate::schema::{is_identifier, TableSpec};
use std::collections::{HashMap, HashSet};
use std::fmt;

/// Bookkeeping columns present on every entity table.
pub const BOOKKEEPING_COLUMNS: &[&str] = &[
    "sync_status",
    "local_modified_at",
    "remote_id",
    "remote_version",
    "sync_attempts",
    "enqueued_at",
    "last_attempt_at",
    "next_attempt_at",
    "last_sync_error",
    "deleted",
];

/// Name of the store's own key/value table.
pub(crate) const META_TABLE: &str = "larder_meta";

/// Opaque handle to a registered table.
///
/// Handles order by registration order, which is also the order sync passes
/// visit tables in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TableId(u16);

impl TableId {
    /// Position of the table in the registry.
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for TableId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "table:{}", self.0)
    }
}

/// Immutable mapping of local tables to remote collections.
#[derive(Debug, Clone)]
pub struct Registry {
    tables: Vec<TableSpec>,
    by_name: HashMap<String, TableId>,
}

impl Registry {
    /// Validates and freezes a set of table definitions.
    ///
    /// # Errors
    ///
    /// Returns `InvalidRegistry` if a name is not a plain identifier, a
    /// table or column is declared twice, a column collides with a
    /// bookkeeping column, a primary key is undeclared, or two tables share a
    /// remote collection.
    pub fn new(tables: Vec<TableSpec>) -> StoreResult<Self> {
        if tables.len() > usize::from(u16::MAX) {
            return Err(StoreError::invalid_registry("too many tables"));
        }

        let mut by_name = HashMap::new();
        let mut collections = HashSet::new();

        for (index, spec) in tables.iter().enumerate() {
            validate_table(spec)?;
            if spec.name == META_TABLE {
                return Err(StoreError::invalid_registry(format!(
                    "{META_TABLE} is reserved"
                )));
            }
            if !collections.insert(spec.remote_collection.as_str()) {
                return Err(StoreError::invalid_registry(format!(
                    "remote collection {} is mapped twice",
                    spec.remote_collection
                )));
            }
            #[allow(clippy::cast_possible_truncation)]
            let id = TableId(index as u16);
            if by_name.insert(spec.name.clone(), id).is_some() {
                return Err(StoreError::invalid_registry(format!(
                    "table {} is declared twice",
                    spec.name
                )));
            }
        }

        Ok(Self { tables, by_name })
    }

    /// Resolves a table name.
    pub fn resolve(&self, name: &str) -> StoreResult<TableId> {
        self.by_name
            .get(name)
            .copied()
            .ok_or_else(|| StoreError::UnknownTable {
                name: name.to_string(),
            })
    }

    /// Returns the definition of a table.
    ///
    /// Fails only for a handle issued by a different registry.
    pub fn table(&self, id: TableId) -> StoreResult<&TableSpec> {
        self.tables
            .get(id.index())
            .ok_or_else(|| StoreError::UnknownTable {
                name: id.to_string(),
            })
    }

    /// All table handles in registration order.
    pub fn ids(&self) -> impl Iterator<Item = TableId> + '_ {
        #[allow(clippy::cast_possible_truncation)]
        (0..self.tables.len()).map(|i| TableId(i as u16))
    }

    /// All tables in registration order.
    pub fn iter(&self) -> impl Iterator<Item = (TableId, &TableSpec)> {
        self.ids().zip(self.tables.iter())
    }

    /// Number of registered tables.
    pub fn len(&self) -> usize {
        self.tables.len()
    }

    /// Returns true if no tables are registered.
    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }
}

fn validate_table(spec: &TableSpec) -> StoreResult<()> {
    if !is_identifier(&spec.name) {
        return Err(StoreError::invalid_registry(format!(
            "table name {:?} is not an identifier",
            spec.name
        )));
    }
    if spec.remote_collection.trim().is_empty() {
        return Err(StoreError::invalid_registry(format!(
            "table {} has no remote collection",
            spec.name
        )));
    }

    let mut seen = HashSet::new();
    for column in &spec.columns {
        if !is_identifier(&column.name) {
            return Err(StoreError::invalid_registry(format!(
                "column name {:?} in {} is not an identifier",
                column.name, spec.name
            )));
        }
        if BOOKKEEPING_COLUMNS.contains(&column.name.as_str()) {
            return Err(StoreError::invalid_registry(format!(
                "column {} in {} collides with a bookkeeping column",
                column.name, spec.name
            )));
        }
        if !seen.insert(column.name.as_str()) {
            return Err(StoreError::invalid_registry(format!(
                "column {} in {} is declared twice",
                column.name, spec.name
            )));
        }
    }

    spec.key_spec()?;
    Ok(())
}
