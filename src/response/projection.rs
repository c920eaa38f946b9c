use chrono::DateTime;
use serde_json::{Map, Value};

use crate::filter::{FieldSelect, FieldSpec};

/// Reduce a value to the requested field subset.
///
/// Without a projection every own, non-private (no leading underscore)
/// property is exported. Timestamps render as epoch milliseconds. Below the
/// top level, an entity reference (an object carrying `id` and `type`)
/// without an explicit sub-selection collapses to `{id, type}` instead of
/// expanding, which keeps response graphs bounded.
pub fn project(value: &Value, fields: Option<&FieldSpec>) -> Value {
    let fields = fields.filter(|f| !f.is_empty());
    match value {
        Value::Array(items) => Value::Array(items.iter().map(|v| project(v, fields)).collect()),
        Value::Object(map) => filter_object(map, fields),
        other => format_scalar(other),
    }
}

fn filter_object(map: &Map<String, Value>, fields: Option<&FieldSpec>) -> Value {
    let mut result = Map::new();
    match fields {
        Some(spec) => {
            for name in spec.names() {
                if name.starts_with('_') {
                    continue;
                }
                if let Some(value) = map.get(name) {
                    let sub = match spec.select(name) {
                        Some(FieldSelect::Sub(sub)) => Some(sub),
                        _ => None,
                    };
                    result.insert(name.to_string(), format_value(value, sub));
                }
            }
        }
        None => {
            for (key, value) in map {
                if key.starts_with('_') {
                    continue;
                }
                result.insert(key.clone(), format_value(value, None));
            }
        }
    }
    Value::Object(result)
}

fn format_value(value: &Value, fields: Option<&FieldSpec>) -> Value {
    match value {
        Value::Object(map) => {
            let fields = fields.filter(|f| !f.is_empty());
            if fields.is_none() && is_entity_reference(map) {
                let mut stub = Map::new();
                stub.insert("id".to_string(), map["id"].clone());
                stub.insert("type".to_string(), map["type"].clone());
                return Value::Object(stub);
            }
            filter_object(map, fields)
        }
        Value::Array(items) => Value::Array(items.iter().map(|v| format_value(v, fields)).collect()),
        other => format_scalar(other),
    }
}

fn is_entity_reference(map: &Map<String, Value>) -> bool {
    map.contains_key("id") && map.get("type").map(Value::is_string).unwrap_or(false)
}

fn format_scalar(value: &Value) -> Value {
    if let Value::String(s) = value {
        if let Ok(ts) = DateTime::parse_from_rfc3339(s) {
            return Value::from(ts.timestamp_millis());
        }
    }
    value.clone()
}
