//! First resolver pass: turn raw script text into the canonical
//! `{ tasks: [ { reports: [ ... ] } ] }` JSON tree.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::{json, Value};

use super::{relaxed, ScriptError};

/// Syntax family detected for a raw script.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptSyntax {
    /// Starts with `{` or `[`.
    Json,
    /// Relaxed JSON whose outer object braces were left out (`tasks:[...]`).
    BracelessJson,
    /// Anything else is read as YAML.
    Yaml,
}

/// `key:` directly followed by an object or array on the same line.
static BRACELESS_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"^\s*(?:"[^"]*"|'[^']*'|[A-Za-z_$@][\w$@.\-]*)\s*:\s*[\[{]"#)
        .expect("braceless pattern is valid")
});

/// Sniff the syntax family from the structure of the text.
pub fn detect_syntax(text: &str) -> ScriptSyntax {
    let trimmed = text.trim_start_matches('\u{feff}').trim_start();
    if trimmed.starts_with('{') || trimmed.starts_with('[') {
        return ScriptSyntax::Json;
    }

    let first_line = trimmed
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty() && !line.starts_with("//") && !line.starts_with('#'));

    match first_line {
        Some(line) if BRACELESS_LINE.is_match(line) => ScriptSyntax::BracelessJson,
        _ => ScriptSyntax::Yaml,
    }
}

/// Parse and canonicalize a raw user script.
pub fn normalize(raw: &str) -> Result<Value, ScriptError> {
    let text = raw.trim();
    if text.is_empty() {
        return Err(ScriptError::Empty);
    }

    let syntax = detect_syntax(text);
    tracing::debug!(?syntax, "Normalizing script");

    let tree = match syntax {
        ScriptSyntax::Json => relaxed::parse(&relaxed::balance(text))?,
        // Only the opening brace is added; balancing supplies the closer
        // unless the user already wrote it.
        ScriptSyntax::BracelessJson => relaxed::parse(&relaxed::balance(&format!("{{{text}")))?,
        ScriptSyntax::Yaml => serde_yaml::from_str::<Value>(text)?,
    };

    wrap_envelope(tree)
}

/// Wrap bare task/report fragments into the canonical envelope.
pub fn wrap_envelope(tree: Value) -> Result<Value, ScriptError> {
    let mut root = match tree {
        Value::Object(map) if map.contains_key("tasks") => Value::Object(map),
        Value::Object(map) if map.contains_key("reports") => json!({ "tasks": [map] }),
        Value::Object(map) if map.contains_key("template") => {
            json!({ "tasks": [{ "reports": [map] }] })
        }
        Value::Array(items) if items.iter().all(|i| i.get("reports").is_some()) && !items.is_empty() => {
            json!({ "tasks": items })
        }
        Value::Array(items) if items.iter().all(|i| i.get("template").is_some()) && !items.is_empty() => {
            json!({ "tasks": [{ "reports": items }] })
        }
        other => {
            return Err(ScriptError::UnrecognizedShape(describe(&other)));
        }
    };

    // Single objects where lists are expected are lifted into one-element lists.
    if let Some(tasks) = root.get_mut("tasks") {
        lift_to_array(tasks);
        if let Some(items) = tasks.as_array_mut() {
            for task in items {
                if let Some(reports) = task.get_mut("reports") {
                    lift_to_array(reports);
                }
            }
        }
    }

    if !root["tasks"].is_array() {
        return Err(ScriptError::UnrecognizedShape(
            "'tasks' must be a list of task objects".into(),
        ));
    }
    Ok(root)
}

fn lift_to_array(value: &mut Value) {
    if value.is_object() {
        let single = value.take();
        *value = Value::Array(vec![single]);
    }
}

fn describe(value: &Value) -> String {
    match value {
        Value::Object(map) => {
            let keys: Vec<&str> = map.keys().map(String::as_str).collect();
            format!(
                "expected 'tasks', 'reports' or 'template' at the top level, found keys [{}]",
                keys.join(", ")
            )
        }
        Value::Array(_) => "expected a list of tasks or reports".into(),
        Value::String(_) | Value::Number(_) | Value::Bool(_) | Value::Null => {
            "expected an object, found a plain value".into()
        }
    }
}
