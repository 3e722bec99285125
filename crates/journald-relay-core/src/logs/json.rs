//! Structured (JSON) log body extraction.
//!
//! When enabled, a message body that parses as a single JSON object is
//! replaced by its message field; a level field maps to a journal priority
//! and the remaining fields are flattened to strings for the journal
//! record. Anything that is not a JSON object with a usable message falls
//! back to the raw body.

use std::collections::HashMap;

use serde_json::Value;

use crate::config::{Config, Priority};

/// A successfully extracted JSON log body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedJsonLog {
    /// The raw level string, if a level key matched. Mapping to a priority
    /// happens separately so unknown levels can fall through.
    pub level: Option<String>,
    /// The extracted message body, always non-empty.
    pub message: String,
    /// Remaining fields, flattened to strings.
    pub extra_fields: HashMap<String, String>,
}

/// Attempts to extract a structured body. Returns `None` when extraction is
/// disabled, the body is not a JSON object, or no configured message key
/// holds a non-empty string; the pipeline must always have a body to emit.
pub fn parse_json_log(cfg: &Config, line: &[u8]) -> Option<ParsedJsonLog> {
    if !cfg.parse_json || line.is_empty() {
        return None;
    }

    let Ok(Value::Object(mut object)) = serde_json::from_slice::<Value>(line) else {
        return None;
    };

    let mut level = None;
    for key in &cfg.json_level_keys {
        if let Some(Value::String(_)) = object.get(key) {
            if let Some(Value::String(s)) = object.remove(key) {
                level = Some(s);
                break;
            }
        }
    }

    let mut message = None;
    for key in &cfg.json_message_keys {
        if let Some(Value::String(_)) = object.get(key) {
            if let Some(Value::String(s)) = object.remove(key) {
                message = Some(s);
                break;
            }
        }
    }
    let message = match message {
        Some(m) if !m.is_empty() => m,
        _ => return None,
    };

    let mut extra_fields = HashMap::with_capacity(object.len());
    for (key, value) in object {
        if let Some(flat) = flatten_value(&value) {
            extra_fields.insert(key, flat);
        }
    }

    Some(ParsedJsonLog {
        level,
        message,
        extra_fields,
    })
}

/// Flattens one JSON value to its journal-field string form. Null values
/// are omitted entirely.
fn flatten_value(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        Value::Bool(b) => Some(if *b { "true" } else { "false" }.to_string()),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Some(i.to_string())
            } else if let Some(u) = n.as_u64() {
                Some(u.to_string())
            } else {
                n.as_f64().map(|f| f.to_string())
            }
        }
        Value::Array(_) | Value::Object(_) => serde_json::to_string(value).ok(),
    }
}

/// Maps a JSON level string to a journal priority (case-insensitive).
/// Unknown levels return `None` and severity falls through to the
/// classifier.
pub fn level_to_priority(level: &str) -> Option<Priority> {
    match level.to_ascii_lowercase().as_str() {
        "debug" | "trace" => Some(Priority::Debug),
        "info" | "information" => Some(Priority::Info),
        "notice" => Some(Priority::Notice),
        "warn" | "warning" => Some(Priority::Warning),
        "error" | "err" => Some(Priority::Err),
        "fatal" | "critical" | "crit" => Some(Priority::Crit),
        "panic" | "alert" => Some(Priority::Alert),
        "emerg" | "emergency" => Some(Priority::Emerg),
        _ => None,
    }
}
