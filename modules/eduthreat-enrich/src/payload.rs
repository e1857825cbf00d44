//! Payload projection helpers.
//!
//! The extraction payload is opaque to the core. These functions derive the
//! two things the core does need from it: a flattened projection (stored
//! next to the payload for fast querying and export) and a field-coverage
//! score used to pick the primary document.

use serde_json::{Map, Value};

/// Flatten a payload into a single-level object with dotted-path keys.
/// Arrays and scalars are leaves; nested objects recurse.
pub fn flatten(payload: &Value) -> Value {
    let mut out = Map::new();
    flatten_into("", payload, &mut out);
    Value::Object(out)
}

fn flatten_into(prefix: &str, value: &Value, out: &mut Map<String, Value>) {
    match value {
        Value::Object(fields) => {
            if fields.is_empty() && !prefix.is_empty() {
                out.insert(prefix.to_string(), Value::Object(Map::new()));
                return;
            }
            for (key, nested) in fields {
                let path = if prefix.is_empty() {
                    key.clone()
                } else {
                    format!("{prefix}.{key}")
                };
                flatten_into(&path, nested, out);
            }
        }
        other => {
            out.insert(prefix.to_string(), other.clone());
        }
    }
}

/// Count the payload's populated leaves: non-null, non-empty values after
/// flattening. The document whose payload covers the most fields becomes
/// the incident's primary reference.
pub fn field_coverage(payload: &Value) -> usize {
    let flat = flatten(payload);
    let Value::Object(fields) = flat else {
        return usize::from(!payload.is_null());
    };
    fields
        .values()
        .filter(|v| match v {
            Value::Null => false,
            Value::String(s) => !s.trim().is_empty(),
            Value::Array(a) => !a.is_empty(),
            Value::Object(o) => !o.is_empty(),
            _ => true,
        })
        .count()
}

/// The denormalized one-paragraph summary, when the payload carries one.
pub fn summary_of(payload: &Value) -> Option<String> {
    payload
        .get("summary")
        .and_then(|v| v.as_str())
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
}

/// The service's own extraction confidence, when reported.
pub fn confidence_of(payload: &Value) -> Option<f64> {
    payload.get("extraction_confidence").and_then(|v| v.as_f64())
}
