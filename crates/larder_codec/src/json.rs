//! JSON conversion for the remote wire.

use crate::error::{CodecError, CodecResult};
use crate::value::{Record, Value};
use serde_json::{Map, Number};

fn json_kind(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "boolean",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object",
    }
}

/// Converts a scalar JSON value into a [`Value`].
///
/// Numbers that fit in `i64` become `Integer`; every other number becomes
/// `Real`. Arrays and objects are rejected.
pub fn value_from_json(json: &serde_json::Value) -> CodecResult<Value> {
    match json {
        serde_json::Value::Null => Ok(Value::Null),
        serde_json::Value::Bool(b) => Ok(Value::Bool(*b)),
        serde_json::Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Ok(Value::Integer(i))
            } else {
                // as_f64 only fails for arbitrary-precision numbers, which we don't enable
                Ok(n.as_f64().map_or(Value::Null, Value::Real))
            }
        }
        serde_json::Value::String(s) => Ok(Value::Text(s.clone())),
        other => Err(CodecError::UnsupportedJson {
            kind: json_kind(other),
        }),
    }
}

/// Converts a [`Value`] into JSON.
///
/// Non-finite floats have no JSON form and become `null`.
pub fn value_to_json(value: &Value) -> serde_json::Value {
    match value {
        Value::Null => serde_json::Value::Null,
        Value::Bool(b) => serde_json::Value::Bool(*b),
        Value::Integer(i) => serde_json::Value::Number(Number::from(*i)),
        Value::Real(r) => Number::from_f64(*r).map_or(serde_json::Value::Null, serde_json::Value::Number),
        Value::Text(s) => serde_json::Value::String(s.clone()),
    }
}

/// Converts a JSON object into a [`Record`].
pub fn record_from_json(json: &serde_json::Value) -> CodecResult<Record> {
    let object = json.as_object().ok_or(CodecError::ExpectedObject {
        kind: json_kind(json),
    })?;

    object
        .iter()
        .map(|(column, value)| Ok((column.clone(), value_from_json(value)?)))
        .collect()
}

/// Converts a [`Record`] into a JSON object.
pub fn record_to_json(record: &Record) -> serde_json::Value {
    let object: Map<String, serde_json::Value> = record
        .iter()
        .map(|(column, value)| (column.clone(), value_to_json(value)))
        .collect();
    serde_json::Value::Object(object)
}
