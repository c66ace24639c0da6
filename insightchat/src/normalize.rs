//! Turn arbitrary backend payloads into display text.
//!
//! Backend answers are sometimes plain strings and sometimes the raw trace of
//! a multi-step agent: nested message logs, tool invocations, content blocks
//! wrapped in JSON strings. [`normalize`] walks any of these shapes and keeps
//! only the human-facing narrative.
//!
//! The result never contains a coercion artifact such as `[object Object]`.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::{Map, Value};

/// The artifact produced by naive object-to-string coercion.
pub const ARTIFACT: &str = "[object Object]";

/// Deeper values are treated as noise.
const MAX_DEPTH: usize = 32;

/// Fields probed for content, in priority order, after the nested message log.
const CONTENT_FIELDS: &[&str] = &[
    "content", "analysis", "message", "text", "response", "output", "result",
];

/// `type` tags of internal tool traffic.
const TOOL_TYPES: &[&str] = &["tool_use", "tool_call", "function_call", "tool_result"];

/// Argument fields that mark an `{id, name, ...}` object as a tool invocation.
const TOOL_INPUT_FIELDS: &[&str] = &["input", "arguments", "args", "parameters"];

static ARTIFACT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[object [A-Za-z]*\]").expect("artifact pattern is valid"));

/// Normalize any JSON value into safe display text.
pub fn normalize(value: &Value) -> String {
    strip_artifacts(&normalize_at(value, 0))
}

/// Normalize every element of a list-like value into individual lines,
/// dropping empty entries. A scalar becomes a one-element list.
pub fn normalize_list(value: &Value) -> Vec<String> {
    match value {
        Value::Array(items) => items
            .iter()
            .map(normalize)
            .filter(|s| !s.trim().is_empty())
            .collect(),
        Value::Null => Vec::new(),
        other => {
            let text = normalize(other);
            if text.trim().is_empty() {
                Vec::new()
            } else {
                vec![text]
            }
        }
    }
}

/// Remove every coercion artifact, including ones exposed by a removal.
pub fn strip_artifacts(text: &str) -> String {
    let mut current = text.to_string();
    loop {
        let next = ARTIFACT_RE.replace_all(&current, "").into_owned();
        if next == current {
            return current;
        }
        current = next;
    }
}

fn has_artifact(text: &str) -> bool {
    ARTIFACT_RE.is_match(text)
}

fn normalize_at(value: &Value, depth: usize) -> String {
    if depth > MAX_DEPTH {
        return String::new();
    }

    match value {
        Value::Null => String::new(),
        Value::String(s) => normalize_str(s, depth),
        Value::Array(items) => items
            .iter()
            .map(|item| normalize_at(item, depth + 1))
            .filter(|s| !strip_artifacts(s).trim().is_empty())
            .collect::<Vec<_>>()
            .join("\n"),
        Value::Object(map) => normalize_object(map, depth),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => strip_artifacts(&n.to_string()),
    }
}

fn normalize_str(s: &str, depth: usize) -> String {
    let trimmed = s.trim_start();
    if trimmed.starts_with('{') || trimmed.starts_with('[') {
        if let Ok(parsed) = serde_json::from_str::<Value>(s) {
            return normalize_at(&parsed, depth + 1);
        }
    }
    strip_artifacts(s)
}

fn normalize_object(map: &Map<String, Value>, depth: usize) -> String {
    if is_tool_invocation(map) {
        return String::new();
    }

    if map.get("type").and_then(Value::as_str) == Some("text") {
        if let Some(text) = map.get("text") {
            return match text {
                Value::String(s) => strip_artifacts(s),
                other => normalize_at(other, depth + 1),
            };
        }
    }

    if let Some(last) = map
        .get("messages")
        .and_then(Value::as_array)
        .and_then(|log| log.last())
    {
        if let Some(content) = last.get("content") {
            return normalize_at(content, depth + 1);
        }
    }

    for field in CONTENT_FIELDS {
        match map.get(*field) {
            None | Some(Value::Null) => {}
            Some(inner) => return normalize_at(inner, depth + 1),
        }
    }

    if map.is_empty() {
        return String::new();
    }

    match serde_json::to_string_pretty(map) {
        Ok(rendered) if !has_artifact(&rendered) => rendered,
        _ => String::new(),
    }
}

fn is_tool_invocation(map: &Map<String, Value>) -> bool {
    if let Some(kind) = map.get("type").and_then(Value::as_str) {
        if TOOL_TYPES.contains(&kind) {
            return true;
        }
    }
    map.contains_key("id")
        && map.contains_key("name")
        && TOOL_INPUT_FIELDS.iter().any(|f| map.contains_key(*f))
}
