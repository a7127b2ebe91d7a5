//! # Larder Codec
//!
//! Scalar value model shared by the local store, the remote clients and the
//! sync coordinator.
//!
//! This crate provides:
//! - `Value`, the closed set of scalars a record column may hold
//! - `Record`, a deterministic column → value map
//! - JSON conversion used on the remote wire
//!
//! This is a pure crate with no I/O operations.
//!
//! ## Usage
//!
//! ```
//! use larder_codec::{record, Value};
//!
//! let row = record! { "id" => 1, "name" => "Rye loaf", "price" => 4.5 };
//! assert_eq!(row.get("id"), Some(&Value::Integer(1)));
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod error;
mod json;
mod value;

pub use error::{CodecError, CodecResult};
pub use json::{record_from_json, record_to_json, value_from_json, value_to_json};
pub use value::{Record, Value};

/// Builds a [`Record`] from `column => value` pairs.
///
/// Values go through `Value::from`, so plain integers, floats, strings,
/// booleans and `Option`s all work.
#[macro_export]
macro_rules! record {
    () => {
        $crate::Record::new()
    };
    ($($column:expr => $value:expr),+ $(,)?) => {{
        let mut record = $crate::Record::new();
        $(
            record.insert(::std::string::String::from($column), $crate::Value::from($value));
        )+
        record
    }};
}
