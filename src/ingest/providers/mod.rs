// src/ingest/providers/mod.rs
pub mod discourse;
pub mod intercom;
pub mod playstore;

use serde_json::Value;

/// Ids arrive as numbers from some APIs and strings from others.
pub(crate) fn id_string(v: &Value) -> Option<String> {
    match v {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}
