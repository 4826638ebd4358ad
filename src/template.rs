//! Template/expression engine.
//!
//! Split into three non-overloaded operations per the design notes: string
//! interpolation (`render_string`), list-expression evaluation (`eval_list_expr`),
//! and path resolution (`resolve_path`). None of these raise on an unresolved
//! path — templates are tolerant of partially-populated state by design.

use serde_json::Value;
use std::collections::HashMap;
use std::sync::LazyLock;

/// Matches a whole `{{ ... }}` token, capturing the inner expression.
static TOKEN: LazyLock<regex::Regex> =
    LazyLock::new(|| regex::Regex::new(r"\{\{\s*([^}]+?)\s*\}\}").unwrap());

/// Matches one path segment: an identifier, optionally followed by `[N]` index chains.
static PATH_SEGMENT: LazyLock<regex::Regex> =
    LazyLock::new(|| regex::Regex::new(r"^([A-Za-z_][A-Za-z0-9_]*)((?:\[\d+\])*)$").unwrap());

static INDEX: LazyLock<regex::Regex> = LazyLock::new(|| regex::Regex::new(r"\[(\d+)\]").unwrap());

/// Resolve a dotted/indexed path against a variable map. Mapping keys are
/// checked before attribute-style lookups (there is no distinction for JSON
/// values, but the lookup order matters conceptually for object fields vs.
/// array indices within one segment, e.g. `seed_results[0].url`).
///
/// Returns `None` on any missing key, out-of-range index, or malformed path.
pub fn resolve_path(path: &str, vars: &HashMap<String, Value>) -> Option<Value> {
    let mut segments = path.split('.');
    let first = segments.next()?;
    let mut current = resolve_segment(first, &Value::Object(
        vars.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
    ))?;

    for segment in segments {
        current = resolve_segment(segment, &current)?;
    }
    Some(current)
}

fn resolve_segment(segment: &str, base: &Value) -> Option<Value> {
    let caps = PATH_SEGMENT.captures(segment)?;
    let name = caps.get(1)?.as_str();
    let indices = caps.get(2)?.as_str();

    let mut current = base.get(name)?.clone();
    for idx_cap in INDEX.captures_iter(indices) {
        let idx: usize = idx_cap.get(1)?.as_str().parse().ok()?;
        current = current.get(idx)?.clone();
    }
    Some(current)
}

fn value_to_display(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Render a string containing `{{ path }}` and `{{ path | shortlist:N }}`
/// tokens against `vars`. Unresolved paths leave the token verbatim.
pub fn render_string(template: &str, vars: &HashMap<String, Value>) -> String {
    TOKEN
        .replace_all(template, |caps: &regex::Captures| {
            let expr = caps.get(1).unwrap().as_str();
            match render_token(expr, vars) {
                Some(rendered) => rendered,
                None => caps.get(0).unwrap().as_str().to_string(),
            }
        })
        .into_owned()
}

fn render_token(expr: &str, vars: &HashMap<String, Value>) -> Option<String> {
    if let Some((path, filter)) = expr.split_once('|') {
        let path = path.trim();
        let filter = filter.trim();
        let value = resolve_path(path, vars)?;
        if let Some(n_str) = filter.strip_prefix("shortlist:") {
            let n: usize = n_str.trim().parse().ok()?;
            return Some(apply_shortlist(&value, n));
        }
        return Some(value_to_display(&value));
    }
    let value = resolve_path(expr.trim(), vars)?;
    Some(value_to_display(&value))
}

fn apply_shortlist(value: &Value, n: usize) -> String {
    match value.as_array() {
        Some(items) => {
            let truncated: Vec<Value> = items.iter().take(n).cloned().collect();
            Value::Array(truncated).to_string()
        }
        // Non-sequence values pass through unchanged.
        None => value_to_display(value),
    }
}

/// Evaluate a full `{{ expr }}` token as a structured list expression, used by
/// `foreach` and list-typed inputs. Returns `None` if the token doesn't wrap
/// the whole string, the path doesn't resolve, or the resolved value is not
/// an array.
pub fn eval_list_expr(expr: &str, vars: &HashMap<String, Value>) -> Option<Vec<Value>> {
    let caps = TOKEN.captures(expr.trim())?;
    if caps.get(0)?.as_str() != expr.trim() {
        return None;
    }
    let inner = caps.get(1)?.as_str();
    let (path, filter) = match inner.split_once('|') {
        Some((p, f)) => (p.trim(), Some(f.trim())),
        None => (inner.trim(), None),
    };
    let value = resolve_path(path, vars)?;
    let array = value.as_array()?.clone();
    match filter {
        Some(f) => {
            if let Some(n_str) = f.strip_prefix("shortlist:") {
                let n: usize = n_str.trim().parse().ok()?;
                Some(array.into_iter().take(n).collect())
            } else {
                Some(array)
            }
        }
        None => Some(array),
    }
}

/// Evaluate a `when` boolean expression against the current variables.
/// A missing path is falsy; a resolved value is truthy unless it is
/// `false`, `null`, `0`, an empty string, or an empty array/object.
pub fn eval_when(expr: &str, vars: &HashMap<String, Value>) -> bool {
    let trimmed = expr.trim();
    let inner = TOKEN
        .captures(trimmed)
        .filter(|c| c.get(0).unwrap().as_str() == trimmed)
        .map(|c| c.get(1).unwrap().as_str().to_string())
        .unwrap_or_else(|| trimmed.to_string());

    match resolve_path(inner.trim(), vars) {
        Some(value) => is_truthy(&value),
        None => false,
    }
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(true),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

/// Apply the template engine to every string-valued input; non-strings pass through.
pub fn render_inputs(
    inputs: &HashMap<String, Value>,
    vars: &HashMap<String, Value>,
) -> HashMap<String, Value> {
    inputs
        .iter()
        .map(|(k, v)| {
            let rendered = match v {
                Value::String(s) => Value::String(render_string(s, vars)),
                other => other.clone(),
            };
            (k.clone(), rendered)
        })
        .collect()
}
