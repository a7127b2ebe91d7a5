//! Table and column definitions.

use crate::error::{StoreError, StoreResult};
use larder_codec::{Record, Value};
use rusqlite::types::Value as SqlValue;
use serde::{Deserialize, Serialize};

/// Storage type of a business column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnType {
    /// UTF-8 text.
    Text,
    /// 64-bit signed integer.
    Integer,
    /// Double precision float.
    Real,
    /// Boolean, stored as 0/1.
    Boolean,
}

impl ColumnType {
    /// SQLite type affinity used in DDL.
    pub(crate) fn sql_type(self) -> &'static str {
        match self {
            ColumnType::Text => "TEXT",
            ColumnType::Integer | ColumnType::Boolean => "INTEGER",
            ColumnType::Real => "REAL",
        }
    }

    /// Strict check used for local writes.
    ///
    /// Integers are accepted for real columns; nothing else is converted.
    pub fn accepts(self, value: &Value) -> bool {
        matches!(
            (self, value),
            (_, Value::Null)
                | (ColumnType::Text, Value::Text(_))
                | (ColumnType::Integer, Value::Integer(_))
                | (ColumnType::Real, Value::Real(_) | Value::Integer(_))
                | (ColumnType::Boolean, Value::Bool(_))
        )
    }

    /// Lenient conversion used for remote data and lookup keys.
    ///
    /// Remote cells frequently arrive as text; this parses them into the
    /// column's type. Empty text reads as null. Returns `None` when the value
    /// cannot represent this type.
    #[allow(clippy::cast_possible_truncation, clippy::float_cmp)]
    pub fn coerce(self, value: Value) -> Option<Value> {
        if let Value::Text(s) = &value {
            if s.trim().is_empty() && self != ColumnType::Text {
                return Some(Value::Null);
            }
        }
        match (self, value) {
            (_, Value::Null) => Some(Value::Null),
            (ColumnType::Text, v) => Some(Value::Text(v.to_cell_text())),
            (ColumnType::Integer, Value::Integer(i)) => Some(Value::Integer(i)),
            (ColumnType::Integer, Value::Real(r)) if r.fract() == 0.0 && r.is_finite() => {
                Some(Value::Integer(r as i64))
            }
            (ColumnType::Integer, Value::Bool(b)) => Some(Value::Integer(i64::from(b))),
            (ColumnType::Integer, Value::Text(s)) => s.trim().parse().ok().map(Value::Integer),
            (ColumnType::Real, Value::Real(r)) => Some(Value::Real(r)),
            (ColumnType::Real, Value::Integer(i)) => Some(Value::Real(i as f64)),
            (ColumnType::Real, Value::Text(s)) => s.trim().parse().ok().map(Value::Real),
            (ColumnType::Boolean, Value::Bool(b)) => Some(Value::Bool(b)),
            (ColumnType::Boolean, Value::Integer(0)) => Some(Value::Bool(false)),
            (ColumnType::Boolean, Value::Integer(1)) => Some(Value::Bool(true)),
            (ColumnType::Boolean, Value::Text(s)) => match s.trim().to_ascii_lowercase().as_str() {
                "true" | "1" | "yes" => Some(Value::Bool(true)),
                "false" | "0" | "no" => Some(Value::Bool(false)),
                _ => None,
            },
            _ => None,
        }
    }

    /// Converts a checked value into its SQLite representation.
    #[allow(clippy::cast_precision_loss)]
    pub(crate) fn to_sql(self, value: &Value) -> SqlValue {
        match (self, value) {
            (_, Value::Null) => SqlValue::Null,
            (ColumnType::Real, Value::Integer(i)) => SqlValue::Real(*i as f64),
            (_, Value::Integer(i)) => SqlValue::Integer(*i),
            (_, Value::Real(r)) => SqlValue::Real(*r),
            (_, Value::Bool(b)) => SqlValue::Integer(i64::from(*b)),
            (_, Value::Text(s)) => SqlValue::Text(s.clone()),
        }
    }

    /// Reads a stored SQLite value back through the column type.
    #[allow(clippy::cast_precision_loss)]
    pub(crate) fn from_sql(self, value: SqlValue) -> Value {
        match (self, value) {
            (_, SqlValue::Null) => Value::Null,
            (ColumnType::Boolean, SqlValue::Integer(i)) => Value::Bool(i != 0),
            (ColumnType::Real, SqlValue::Integer(i)) => Value::Real(i as f64),
            (_, SqlValue::Integer(i)) => Value::Integer(i),
            (_, SqlValue::Real(r)) => Value::Real(r),
            (_, SqlValue::Text(s)) => Value::Text(s),
            (_, SqlValue::Blob(b)) => Value::Text(String::from_utf8_lossy(&b).into_owned()),
        }
    }
}

/// A business column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnSpec {
    /// Column name.
    pub name: String,
    /// Storage type.
    #[serde(rename = "type")]
    pub ty: ColumnType,
    /// Whether inserts must provide a non-null value.
    #[serde(default)]
    pub required: bool,
}

/// Definition of one entity table and its remote counterpart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableSpec {
    /// Local table name.
    pub name: String,
    /// Name of the remote collection this table replicates.
    pub remote_collection: String,
    /// Primary key column (must be one of `columns`).
    pub primary_key: String,
    /// Business columns, in declaration order.
    pub columns: Vec<ColumnSpec>,
}

impl TableSpec {
    /// Starts a table definition.
    pub fn new(name: impl Into<String>, remote_collection: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            remote_collection: remote_collection.into(),
            primary_key: String::new(),
            columns: Vec::new(),
        }
    }

    /// Adds the primary key column.
    #[must_use]
    pub fn key(mut self, name: impl Into<String>, ty: ColumnType) -> Self {
        let name = name.into();
        self.primary_key.clone_from(&name);
        self.columns.push(ColumnSpec {
            name,
            ty,
            required: true,
        });
        self
    }

    /// Adds an optional column.
    #[must_use]
    pub fn column(mut self, name: impl Into<String>, ty: ColumnType) -> Self {
        self.columns.push(ColumnSpec {
            name: name.into(),
            ty,
            required: false,
        });
        self
    }

    /// Adds a column that inserts must provide.
    #[must_use]
    pub fn required(mut self, name: impl Into<String>, ty: ColumnType) -> Self {
        self.columns.push(ColumnSpec {
            name: name.into(),
            ty,
            required: true,
        });
        self
    }

    /// Looks up a column by name.
    pub fn column_spec(&self, name: &str) -> Option<&ColumnSpec> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// The primary key column.
    pub fn key_spec(&self) -> StoreResult<&ColumnSpec> {
        self.column_spec(&self.primary_key).ok_or_else(|| {
            StoreError::invalid_registry(format!(
                "table {} has no primary key column {}",
                self.name, self.primary_key
            ))
        })
    }

    /// Normalizes a lookup key to the primary key's type.
    pub fn key_value(&self, id: Value) -> StoreResult<Value> {
        let spec = self.key_spec()?;
        match spec.ty.coerce(id.clone()) {
            Some(Value::Null) | None => Err(StoreError::validation(
                &self.name,
                format!("{} is not a valid {} key", id, self.primary_key),
            )),
            Some(v) => Ok(v),
        }
    }

    /// Checks a full record for insertion.
    ///
    /// Rejects unknown and bookkeeping columns, wrong types and missing
    /// required values. Returns the record with absent optional columns
    /// filled with null.
    pub fn check_insert(&self, record: &Record) -> StoreResult<Record> {
        self.check_columns(record)?;
        let mut full = Record::new();
        for column in &self.columns {
            let value = record.get(&column.name).cloned().unwrap_or(Value::Null);
            if column.required && value.is_null() {
                return Err(StoreError::validation(
                    &self.name,
                    format!("missing required column {}", column.name),
                ));
            }
            full.insert(column.name.clone(), value);
        }
        Ok(full)
    }

    /// Checks a partial record for an update.
    ///
    /// The primary key cannot be changed and required columns cannot be
    /// cleared.
    pub fn check_patch(&self, patch: &Record) -> StoreResult<()> {
        self.check_columns(patch)?;
        if patch.contains_key(&self.primary_key) {
            return Err(StoreError::validation(
                &self.name,
                format!("primary key {} cannot be updated", self.primary_key),
            ));
        }
        for column in self.columns.iter().filter(|c| c.required) {
            if patch.get(&column.name).is_some_and(Value::is_null) {
                return Err(StoreError::validation(
                    &self.name,
                    format!("required column {} cannot be null", column.name),
                ));
            }
        }
        Ok(())
    }

    fn check_columns(&self, record: &Record) -> StoreResult<()> {
        for (name, value) in record {
            let column = self.column_spec(name).ok_or_else(|| {
                StoreError::validation(&self.name, format!("unknown column {name}"))
            })?;
            if !column.ty.accepts(value) {
                return Err(StoreError::validation(
                    &self.name,
                    format!(
                        "column {name} expects {:?}, got {}",
                        column.ty,
                        value.type_name()
                    ),
                ));
            }
        }
        Ok(())
    }

    /// Converts remote fields into a local record.
    ///
    /// Only declared columns are kept. Values that cannot be read as the
    /// column type become null and are named in the second tuple element so
    /// the caller can log them.
    pub fn record_from_remote(&self, fields: &Record) -> (Record, Vec<String>) {
        let mut record = Record::new();
        let mut rejected = Vec::new();
        for column in &self.columns {
            let raw = fields.get(&column.name).cloned().unwrap_or(Value::Null);
            match column.ty.coerce(raw) {
                Some(v) => {
                    record.insert(column.name.clone(), v);
                }
                None => {
                    rejected.push(column.name.clone());
                    record.insert(column.name.clone(), Value::Null);
                }
            }
        }
        (record, rejected)
    }
}

/// Returns true if `name` is a plain SQL identifier.
pub(crate) fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Quotes a validated identifier.
pub(crate) fn quote(name: &str) -> String {
    format!("\"{name}\"")
}
