//! Document helpers
//!
//! Documents are schema-less JSON objects. Filters are documents too: a
//! plain value means equality, an object carrying `$type` means a type check.
//! That is the subset the upgrader needs for partial unique indexes.

use serde_json::{Map, Value};
use std::cmp::Ordering;

/// A stored document
pub type Document = Map<String, Value>;

/// Storage-assigned identity field, preserved verbatim on copy
pub const ID_FIELD: &str = "_id";

/// Type operator used in filters and partial index predicates
pub const TYPE_OPERATOR: &str = "$type";

/// Build a document from a `serde_json::json!` object literal.
///
/// Non-object values yield an empty document.
pub fn doc(value: Value) -> Document {
    match value {
        Value::Object(map) => map,
        _ => Document::new(),
    }
}

/// Check whether a document satisfies a filter
pub fn matches_filter(document: &Document, filter: &Document) -> bool {
    filter.iter().all(|(field, expected)| {
        let actual = document.get(field);
        match expected {
            Value::Object(op) if op.contains_key(TYPE_OPERATOR) => match op.get(TYPE_OPERATOR) {
                Some(Value::String(type_name)) => type_matches(actual, type_name),
                _ => false,
            },
            _ => actual.map(|a| values_equal(a, expected)).unwrap_or(false),
        }
    })
}

/// Check a value against a type name.
///
/// An array matches when any element matches, the way document stores
/// evaluate `$type` against list-valued fields.
pub fn type_matches(value: Option<&Value>, type_name: &str) -> bool {
    let Some(value) = value else {
        return false;
    };

    let scalar = |v: &Value| match type_name {
        "string" => v.is_string(),
        "number" => v.is_number(),
        "int" | "long" => v.is_i64() || v.is_u64(),
        "double" => v.is_f64(),
        "bool" => v.is_boolean(),
        "object" => v.is_object(),
        "null" => v.is_null(),
        _ => false,
    };

    match value {
        Value::Array(_) if type_name == "array" => true,
        Value::Array(items) => items.iter().any(scalar),
        other => scalar(other),
    }
}

/// Equality that treats `1` and `1.0` as the same number
pub fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => compare_numbers(x, y) == Ordering::Equal,
        _ => a == b,
    }
}

fn type_rank(value: Option<&Value>) -> u8 {
    match value {
        None | Some(Value::Null) => 0,
        Some(Value::Number(_)) => 1,
        Some(Value::String(_)) => 2,
        Some(Value::Object(_)) => 3,
        Some(Value::Array(_)) => 4,
        Some(Value::Bool(_)) => 5,
    }
}

fn compare_numbers(a: &serde_json::Number, b: &serde_json::Number) -> Ordering {
    if let (Some(x), Some(y)) = (a.as_i64(), b.as_i64()) {
        return x.cmp(&y);
    }
    if let (Some(x), Some(y)) = (a.as_u64(), b.as_u64()) {
        return x.cmp(&y);
    }
    let x = a.as_f64().unwrap_or(f64::NAN);
    let y = b.as_f64().unwrap_or(f64::NAN);
    x.partial_cmp(&y).unwrap_or(Ordering::Equal)
}

/// Total order over optional values: missing/null < numbers < strings <
/// objects < arrays < booleans
pub fn compare_values(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    let (ra, rb) = (type_rank(a), type_rank(b));
    if ra != rb {
        return ra.cmp(&rb);
    }

    match (a, b) {
        (Some(Value::Number(x)), Some(Value::Number(y))) => compare_numbers(x, y),
        (Some(Value::String(x)), Some(Value::String(y))) => x.cmp(y),
        (Some(Value::Bool(x)), Some(Value::Bool(y))) => x.cmp(y),
        (Some(Value::Array(x)), Some(Value::Array(y))) => {
            for (l, r) in x.iter().zip(y.iter()) {
                let ord = compare_values(Some(l), Some(r));
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            x.len().cmp(&y.len())
        }
        (Some(x @ Value::Object(_)), Some(y @ Value::Object(_))) => {
            x.to_string().cmp(&y.to_string())
        }
        _ => Ordering::Equal,
    }
}

/// Render a value for table names and log fields without JSON quoting
pub fn display_value(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}
