//! Property normalization.
//!
//! Raw attribute values become store-native [`PropertyValue`]s:
//!
//! - `null`, `""`, `[]` and `{}` are omitted
//! - booleans, strings and numbers pass through (`i64` when it fits,
//!   otherwise `f64`; integers beyond both become strings)
//! - arrays of one scalar kind become lists, nulls and empty strings inside
//!   are dropped and mixed integer/float arrays widen to floats; any other
//!   array is encoded as a compact JSON string
//! - objects flatten to dotted keys up to [`MAX_FLATTEN_DEPTH`] levels
//!   below the top-level key; a deeper object is encoded as a JSON string
//!   under its dotted key
//! - a flattened key never replaces a key produced earlier; keys are
//!   visited in sorted order

use crate::error::{Error, Result};
use crate::graph::{PropertyMap, PropertyValue};
use crate::model::Attributes;
use serde_json::Value;
use tracing::debug;

/// Object nesting flattened before falling back to JSON strings
pub const MAX_FLATTEN_DEPTH: usize = 3;

/// Normalize a full attribute mapping
pub fn normalize_attributes(attributes: &Attributes) -> PropertyMap {
    let mut out = PropertyMap::new();
    let mut keys: Vec<&String> = attributes.keys().collect();
    keys.sort();
    for key in keys {
        normalize_into(&mut out, key, &attributes[key.as_str()], 0);
    }
    out
}

/// Normalize one value under `key` into `out`
pub fn normalize_into(out: &mut PropertyMap, key: &str, value: &Value, depth: usize) {
    if key.is_empty() {
        return;
    }
    match value {
        Value::Object(map) if map.is_empty() => {}
        Value::Object(map) if depth < MAX_FLATTEN_DEPTH => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            for child in keys {
                normalize_into(out, &format!("{key}.{child}"), &map[child.as_str()], depth + 1);
            }
        }
        other => {
            if let Some(normalized) = normalize_value(other) {
                if out.contains_key(key) {
                    debug!(key, "flattened property collides with an existing key, keeping the first");
                } else {
                    out.insert(key.to_string(), normalized);
                }
            }
        }
    }
}

/// Normalize a single value; `None` means the value is omitted.
///
/// Values without a native representation are coerced to their compact
/// JSON text.
pub fn normalize_value(value: &Value) -> Option<PropertyValue> {
    match native_value(value) {
        Ok(normalized) => normalized,
        Err(e) => {
            debug!(error = %e, "coercing property to a JSON string");
            Some(json_string(value))
        }
    }
}

/// Store-native conversion without coercion. Fails with
/// [`Error::Mapping`] for mixed or nested arrays, non-empty objects and
/// integers beyond `i64`.
pub fn native_value(value: &Value) -> Result<Option<PropertyValue>> {
    Ok(match value {
        Value::Null => None,
        Value::Bool(b) => Some(PropertyValue::Bool(*b)),
        Value::Number(n) => Some(number(n)?),
        Value::String(s) if s.is_empty() => None,
        Value::String(s) => Some(PropertyValue::String(s.clone())),
        Value::Array(items) => array(items)?,
        Value::Object(map) if map.is_empty() => None,
        Value::Object(_) => return Err(Error::mapping("object has no native property type")),
    })
}

fn number(n: &serde_json::Number) -> Result<PropertyValue> {
    if let Some(i) = n.as_i64() {
        return Ok(PropertyValue::Int(i));
    }
    match n.as_f64() {
        Some(f) if n.is_f64() => Ok(PropertyValue::Float(f)),
        _ => Err(Error::mapping(format!("{n} does not fit a 64-bit integer"))),
    }
}

#[derive(PartialEq, Clone, Copy)]
enum Kind {
    Bool,
    Int,
    Float,
    String,
}

fn array(items: &[Value]) -> Result<Option<PropertyValue>> {
    let mut kind: Option<Kind> = None;
    let mut values = Vec::with_capacity(items.len());
    for item in items {
        let scalar = match item {
            Value::Null => continue,
            Value::Bool(_) | Value::Number(_) | Value::String(_) => native_value(item)?,
            _ => return Err(Error::mapping("array holds nested values")),
        };
        // empty strings are dropped like nulls
        let Some(scalar) = scalar else {
            continue;
        };
        let item_kind = match &scalar {
            PropertyValue::Bool(_) => Kind::Bool,
            PropertyValue::Int(_) => Kind::Int,
            PropertyValue::Float(_) => Kind::Float,
            _ => Kind::String,
        };
        kind = merge_kind(kind, item_kind);
        values.push(scalar);
    }
    if values.is_empty() {
        return Ok(None);
    }

    if kind == Some(Kind::Float) {
        values = values
            .into_iter()
            .map(|v| match v {
                PropertyValue::Int(i) => PropertyValue::Float(i as f64),
                other => other,
            })
            .collect();
    }

    if mixed(&values) {
        Err(Error::mapping("array mixes value kinds"))
    } else {
        Ok(Some(PropertyValue::List(values)))
    }
}

fn merge_kind(current: Option<Kind>, next: Kind) -> Option<Kind> {
    match (current, next) {
        (None, k) => Some(k),
        (Some(Kind::Int), Kind::Float) | (Some(Kind::Float), Kind::Int) => Some(Kind::Float),
        (Some(Kind::Float), Kind::Float) => Some(Kind::Float),
        (Some(a), b) if a == b => Some(a),
        // anything else is mixed; remember the first kind, `mixed` decides
        (Some(a), _) => Some(a),
    }
}

fn mixed(values: &[PropertyValue]) -> bool {
    let mut iter = values.iter().map(std::mem::discriminant);
    match iter.next() {
        Some(first) => iter.any(|d| d != first),
        None => false,
    }
}

fn json_string(value: &Value) -> PropertyValue {
    PropertyValue::String(value.to_string())
}
