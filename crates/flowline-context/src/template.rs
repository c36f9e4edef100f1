//! `{{scope.path}}` placeholder resolution.
//!
//! Placeholders are looked up in a [`RunContext`]. An unresolved placeholder
//! is not an error: it renders as an empty string and its path is reported in
//! [`Rendered::unresolved`], so partial data never aborts a run. Handlers
//! reject empty required fields themselves.
//!
//! A string that consists of exactly one placeholder keeps the type of the
//! value it points at, so `"{{trigger.score}}"` resolves to a number:
//! ```json
//! { "to": "{{trigger.email}}", "subject": "Hi {{trigger.name}}", "score": "{{trigger.score}}" }
//! ```
//!
//! Known limitation: there is no escape for a literal `{{`. Any `{{ ... }}`
//! span is treated as a placeholder.

use std::sync::LazyLock;

use regex::{Captures, Regex};
use serde_json::{Map, Value};

use crate::context::RunContext;

static PLACEHOLDER: LazyLock<Regex> =
  LazyLock::new(|| Regex::new(r"\{\{\s*([^{}]*?)\s*\}\}").unwrap());

/// A resolved value plus the placeholder paths that could not be resolved.
#[derive(Debug, Clone, PartialEq)]
pub struct Rendered<T> {
  pub value: T,
  pub unresolved: Vec<String>,
}

impl<T> Rendered<T> {
  pub fn is_complete(&self) -> bool {
    self.unresolved.is_empty()
  }
}

/// Resolve placeholders in a string, always producing a string.
pub fn resolve(raw: &str, ctx: &RunContext) -> Rendered<String> {
  let mut unresolved = Vec::new();
  let value = render(raw, ctx, &mut unresolved);
  Rendered { value, unresolved }
}

/// Resolve placeholders in every string leaf of a JSON value.
///
/// Non-string leaves pass through unchanged.
pub fn resolve_value(value: &Value, ctx: &RunContext) -> Rendered<Value> {
  let mut unresolved = Vec::new();
  let value = resolve_json(value, ctx, &mut unresolved);
  Rendered { value, unresolved }
}

/// Resolve a node's config object.
pub fn resolve_config(config: &Map<String, Value>, ctx: &RunContext) -> Rendered<Map<String, Value>> {
  let mut unresolved = Vec::new();
  let value = config
    .iter()
    .map(|(k, v)| (k.clone(), resolve_json(v, ctx, &mut unresolved)))
    .collect();
  Rendered { value, unresolved }
}

fn resolve_json(value: &Value, ctx: &RunContext, unresolved: &mut Vec<String>) -> Value {
  match value {
    Value::String(s) => {
      if !s.contains("{{") {
        return value.clone();
      }
      if let Some(path) = pure_placeholder(s) {
        return match ctx.lookup(path) {
          Some(found) => found.clone(),
          None => {
            unresolved.push(path.to_string());
            Value::String(String::new())
          }
        };
      }
      Value::String(render(s, ctx, unresolved))
    }
    Value::Array(items) => Value::Array(
      items
        .iter()
        .map(|v| resolve_json(v, ctx, unresolved))
        .collect(),
    ),
    Value::Object(obj) => Value::Object(
      obj
        .iter()
        .map(|(k, v)| (k.clone(), resolve_json(v, ctx, unresolved)))
        .collect(),
    ),
    // Numbers, bools, nulls pass through unchanged
    _ => value.clone(),
  }
}

fn render(raw: &str, ctx: &RunContext, unresolved: &mut Vec<String>) -> String {
  PLACEHOLDER
    .replace_all(raw, |caps: &Captures| {
      let path = caps.get(1).map_or("", |m| m.as_str());
      match ctx.lookup(path) {
        Some(value) => to_text(value),
        None => {
          unresolved.push(path.to_string());
          String::new()
        }
      }
    })
    .into_owned()
}

/// The inner path if `s` is exactly one placeholder.
fn pure_placeholder(s: &str) -> Option<&str> {
  let caps = PLACEHOLDER.captures(s)?;
  let whole = caps.get(0)?;
  if whole.start() == 0 && whole.end() == s.len() {
    caps.get(1).map(|m| m.as_str())
  } else {
    None
  }
}

/// Text form of a value when interpolated into a larger string.
pub fn to_text(value: &Value) -> String {
  match value {
    Value::String(s) => s.clone(),
    Value::Null => String::new(),
    other => other.to_string(),
  }
}
