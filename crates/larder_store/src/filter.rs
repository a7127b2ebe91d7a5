//! Structured query filters.
//!
//! Filters name columns and carry values; they never carry SQL text. Column
//! names are checked against the table schema and values are bound as
//! parameters when the filter is compiled.

use crate::error::{StoreError, StoreResult};
use crate::schema::{quote, TableSpec};
use larder_codec::Value;
use rusqlite::types::Value as SqlValue;

/// A predicate over the business columns of one table.
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    /// Matches every row.
    All,
    /// `column = value` (`IS NULL` when the value is null).
    Eq(String, Value),
    /// `column <> value` (`IS NOT NULL` when the value is null).
    Ne(String, Value),
    /// `column < value`.
    Lt(String, Value),
    /// `column <= value`.
    Le(String, Value),
    /// `column > value`.
    Gt(String, Value),
    /// `column >= value`.
    Ge(String, Value),
    /// `column IS NULL`.
    IsNull(String),
    /// `column IS NOT NULL`.
    NotNull(String),
    /// `column IN (values...)`.
    In(String, Vec<Value>),
    /// All sub-filters match.
    And(Vec<Filter>),
    /// Any sub-filter matches.
    Or(Vec<Filter>),
    /// The sub-filter does not match.
    Not(Box<Filter>),
}

impl Filter {
    /// `column = value`.
    pub fn eq(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Filter::Eq(column.into(), value.into())
    }

    /// `column <> value`.
    pub fn ne(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Filter::Ne(column.into(), value.into())
    }

    /// `column < value`.
    pub fn lt(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Filter::Lt(column.into(), value.into())
    }

    /// `column <= value`.
    pub fn le(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Filter::Le(column.into(), value.into())
    }

    /// `column > value`.
    pub fn gt(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Filter::Gt(column.into(), value.into())
    }

    /// `column >= value`.
    pub fn ge(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Filter::Ge(column.into(), value.into())
    }

    /// `column IN (values...)`.
    pub fn is_in<V: Into<Value>>(
        column: impl Into<String>,
        values: impl IntoIterator<Item = V>,
    ) -> Self {
        Filter::In(column.into(), values.into_iter().map(Into::into).collect())
    }

    /// Combines with another filter using AND.
    #[must_use]
    pub fn and(self, other: Filter) -> Self {
        match self {
            Filter::And(mut parts) => {
                parts.push(other);
                Filter::And(parts)
            }
            Filter::All => other,
            first => Filter::And(vec![first, other]),
        }
    }

    /// Combines with another filter using OR.
    #[must_use]
    pub fn or(self, other: Filter) -> Self {
        match self {
            Filter::Or(mut parts) => {
                parts.push(other);
                Filter::Or(parts)
            }
            first => Filter::Or(vec![first, other]),
        }
    }

    /// Compiles into a SQL boolean expression, pushing bound values onto
    /// `params`. Placeholders are numbered from `params.len() + 1`.
    pub(crate) fn compile(&self, spec: &TableSpec, params: &mut Vec<SqlValue>) -> StoreResult<String> {
        match self {
            Filter::All => Ok("1".to_string()),
            Filter::Eq(column, value) if value.is_null() => {
                Ok(format!("{} IS NULL", column_ref(spec, column)?))
            }
            Filter::Ne(column, value) if value.is_null() => {
                Ok(format!("{} IS NOT NULL", column_ref(spec, column)?))
            }
            Filter::Eq(column, value) => compare(spec, column, "=", value, params),
            Filter::Ne(column, value) => compare(spec, column, "<>", value, params),
            Filter::Lt(column, value) => compare(spec, column, "<", value, params),
            Filter::Le(column, value) => compare(spec, column, "<=", value, params),
            Filter::Gt(column, value) => compare(spec, column, ">", value, params),
            Filter::Ge(column, value) => compare(spec, column, ">=", value, params),
            Filter::IsNull(column) => Ok(format!("{} IS NULL", column_ref(spec, column)?)),
            Filter::NotNull(column) => Ok(format!("{} IS NOT NULL", column_ref(spec, column)?)),
            Filter::In(column, values) => {
                let name = column_ref(spec, column)?;
                if values.is_empty() {
                    return Ok("0".to_string());
                }
                let mut placeholders = Vec::with_capacity(values.len());
                for value in values {
                    params.push(bind(spec, column, value)?);
                    placeholders.push(format!("?{}", params.len()));
                }
                Ok(format!("{name} IN ({})", placeholders.join(", ")))
            }
            Filter::And(parts) => join(spec, parts, " AND ", "1", params),
            Filter::Or(parts) => join(spec, parts, " OR ", "0", params),
            Filter::Not(inner) => Ok(format!("NOT ({})", inner.compile(spec, params)?)),
        }
    }
}

/// Sort direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Smallest first.
    Asc,
    /// Largest first.
    Desc,
}

/// One ORDER BY term.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderBy {
    /// Column to sort on.
    pub column: String,
    /// Sort direction.
    pub direction: Direction,
}

impl OrderBy {
    /// Ascending order on `column`.
    pub fn asc(column: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            direction: Direction::Asc,
        }
    }

    /// Descending order on `column`.
    pub fn desc(column: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            direction: Direction::Desc,
        }
    }

    pub(crate) fn compile(order: &[OrderBy], spec: &TableSpec) -> StoreResult<String> {
        let mut terms = Vec::with_capacity(order.len() + 1);
        for term in order {
            let dir = match term.direction {
                Direction::Asc => "ASC",
                Direction::Desc => "DESC",
            };
            terms.push(format!("{} {dir}", column_ref(spec, &term.column)?));
        }
        // the key makes ties deterministic
        terms.push(format!("{} ASC", quote(&spec.primary_key)));
        Ok(terms.join(", "))
    }
}

fn column_ref(spec: &TableSpec, column: &str) -> StoreResult<String> {
    spec.column_spec(column)
        .map(|c| quote(&c.name))
        .ok_or_else(|| StoreError::validation(&spec.name, format!("unknown column {column} in filter")))
}

fn bind(spec: &TableSpec, column: &str, value: &Value) -> StoreResult<SqlValue> {
    let column_spec = spec.column_spec(column).ok_or_else(|| {
        StoreError::validation(&spec.name, format!("unknown column {column} in filter"))
    })?;
    let coerced = column_spec.ty.coerce(value.clone()).ok_or_else(|| {
        StoreError::validation(
            &spec.name,
            format!("{value} cannot be compared with column {column}"),
        )
    })?;
    Ok(column_spec.ty.to_sql(&coerced))
}

fn compare(
    spec: &TableSpec,
    column: &str,
    op: &str,
    value: &Value,
    params: &mut Vec<SqlValue>,
) -> StoreResult<String> {
    let name = column_ref(spec, column)?;
    params.push(bind(spec, column, value)?);
    Ok(format!("{name} {op} ?{}", params.len()))
}

fn join(
    spec: &TableSpec,
    parts: &[Filter],
    sep: &str,
    empty: &str,
    params: &mut Vec<SqlValue>,
) -> StoreResult<String> {
    if parts.is_empty() {
        return Ok(empty.to_string());
    }
    let compiled = parts
        .iter()
        .map(|p| p.compile(spec, params).map(|sql| format!("({sql})")))
        .collect::<StoreResult<Vec<_>>>()?;
    Ok(compiled.join(sep))
}
