//! Row conversion.
//!
//! Turns one result row from the query engine into a [`Record`]: columns whose
//! name starts with `value` become numeric samples, every other column becomes
//! a label. Conversion is pure and never fails; values that cannot be coerced
//! degrade to sentinels instead of dropping the row.

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};

/// Column prefix that marks a numeric value column.
pub const VALUE_PREFIX: &str = "value";

/// Label value emitted for columns that are not strings.
pub const INVALID_LABEL: &str = "invalid string";

/// A single dynamically typed cell returned by the query engine.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// SQL NULL.
    Null,
    /// Integer storage class.
    Int(i64),
    /// Floating point storage class.
    Float(f64),
    /// Boolean column.
    Bool(bool),
    /// Text storage class.
    String(String),
    /// Date/time column.
    Timestamp(DateTime<Utc>),
    /// Blob storage class.
    Bytes(Vec<u8>),
}

impl Value {
    /// Short type name used in log output.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::Bool(_) => "bool",
            Self::String(_) => "string",
            Self::Timestamp(_) => "timestamp",
            Self::Bytes(_) => "bytes",
        }
    }
}

/// One result row keyed by column name. Iteration order is not meaningful.
pub type Row = HashMap<String, Value>;

/// A converted query row: ordered labels plus named numeric values.
///
/// `label_keys` and `label_values` always have the same length, and keys are
/// sorted so every record from the same query shares one label order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Record {
    /// Sorted label names.
    pub label_keys: Vec<String>,
    /// Label values, parallel to `label_keys`.
    pub label_values: Vec<String>,
    /// Value suffix (possibly empty) to sample value.
    pub values: BTreeMap<String, f64>,
}

impl Record {
    /// Create a record from its parts.
    pub fn new(
        label_keys: Vec<String>,
        label_values: Vec<String>,
        values: BTreeMap<String, f64>,
    ) -> Self {
        Self {
            label_keys,
            label_values,
            values,
        }
    }
}

/// Convert one row into a [`Record`].
///
/// `value` maps to the suffix `""`, `value_foo` to `_foo`. Label keys are
/// sorted ascending and their values looked up in that order.
pub fn row_to_record(row: &Row) -> Record {
    let mut values = BTreeMap::new();
    let mut label_keys = Vec::new();

    for (column, value) in row {
        match column.strip_prefix(VALUE_PREFIX) {
            Some(suffix) => {
                values.insert(suffix.to_string(), value_to_f64(column, value));
            }
            None => label_keys.push(column.clone()),
        }
    }
    label_keys.sort_unstable();

    let label_values = label_keys
        .iter()
        .map(|key| row.get(key).map_or_else(|| INVALID_LABEL.to_string(), value_to_label))
        .collect();

    Record {
        label_keys,
        label_values,
        values,
    }
}

fn value_to_f64(column: &str, value: &Value) -> f64 {
    match value {
        Value::Int(v) => *v as f64,
        Value::Float(v) => *v,
        Value::Null => 0.0,
        other => {
            tracing::warn!(
                column = %column,
                kind = other.type_name(),
                "Unrecognized value format, using NaN"
            );
            f64::NAN
        }
    }
}

fn value_to_label(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        _ => INVALID_LABEL.to_string(),
    }
}
