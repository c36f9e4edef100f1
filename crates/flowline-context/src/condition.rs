//! Predicate evaluation for conditional connections and condition/filter
//! nodes.
//!
//! A predicate spec is a JSON object, either a comparison:
//! ```json
//! { "path": "trigger.score", "operator": "greater_than", "value": 50 }
//! ```
//! or a group: `{ "all": [..] }`, `{ "any": [..] }`, `{ "not": {..} }`.
//!
//! `field` is accepted as an alias for `path`, and the path may be wrapped in
//! `{{ }}`. String operands are template-resolved before comparison.
//!
//! Comparisons fail closed: a numeric or date operand that doesn't coerce
//! makes the comparison `false`. String operators are case-sensitive.

use std::str::FromStr;

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde_json::{Map, Value};
use tracing::warn;

use crate::context::RunContext;
use crate::error::EvaluatorError;
use crate::template::{resolve_value, to_text};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
  Equals,
  NotEquals,
  GreaterThan,
  LessThan,
  GreaterOrEqual,
  LessOrEqual,
  Contains,
  StartsWith,
  EndsWith,
  Exists,
  Empty,
  Before,
  After,
}

impl FromStr for Operator {
  type Err = EvaluatorError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s {
      "equals" => Ok(Operator::Equals),
      "not_equals" => Ok(Operator::NotEquals),
      "greater_than" => Ok(Operator::GreaterThan),
      "less_than" => Ok(Operator::LessThan),
      "greater_or_equal" => Ok(Operator::GreaterOrEqual),
      "less_or_equal" => Ok(Operator::LessOrEqual),
      "contains" => Ok(Operator::Contains),
      "starts_with" => Ok(Operator::StartsWith),
      "ends_with" => Ok(Operator::EndsWith),
      "exists" => Ok(Operator::Exists),
      "empty" => Ok(Operator::Empty),
      "before" => Ok(Operator::Before),
      "after" => Ok(Operator::After),
      other => Err(EvaluatorError::UnknownOperator {
        operator: other.to_string(),
      }),
    }
  }
}

/// A parsed predicate.
#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
  Compare {
    path: String,
    operator: Operator,
    value: Value,
  },
  All(Vec<Predicate>),
  Any(Vec<Predicate>),
  Not(Box<Predicate>),
}

impl Predicate {
  pub fn parse(spec: &Value) -> Result<Self, EvaluatorError> {
    let obj = spec.as_object().ok_or_else(|| EvaluatorError::NotAnObject {
      found: type_name(spec).to_string(),
    })?;

    if let Some(items) = obj.get("all") {
      return Ok(Predicate::All(parse_group("all", items)?));
    }
    if let Some(items) = obj.get("any") {
      return Ok(Predicate::Any(parse_group("any", items)?));
    }
    if let Some(inner) = obj.get("not") {
      return Ok(Predicate::Not(Box::new(Predicate::parse(inner)?)));
    }

    parse_compare(obj)
  }

  pub fn evaluate(&self, ctx: &RunContext) -> bool {
    match self {
      Predicate::All(items) => items.iter().all(|p| p.evaluate(ctx)),
      Predicate::Any(items) => items.iter().any(|p| p.evaluate(ctx)),
      Predicate::Not(inner) => !inner.evaluate(ctx),
      Predicate::Compare {
        path,
        operator,
        value,
      } => {
        let actual = ctx.lookup(path);
        let expected = resolve_value(value, ctx).value;
        compare(*operator, actual, &expected)
      }
    }
  }
}

fn parse_group(group: &'static str, items: &Value) -> Result<Vec<Predicate>, EvaluatorError> {
  let items = items.as_array().ok_or(EvaluatorError::InvalidGroup {
    group,
    expected: "an array of predicates",
  })?;
  items.iter().map(Predicate::parse).collect()
}

fn parse_compare(obj: &Map<String, Value>) -> Result<Predicate, EvaluatorError> {
  let path = obj
    .get("path")
    .or_else(|| obj.get("field"))
    .and_then(Value::as_str)
    .ok_or(EvaluatorError::MissingField { field: "path" })?;
  let operator = obj
    .get("operator")
    .and_then(Value::as_str)
    .ok_or(EvaluatorError::MissingField { field: "operator" })?
    .parse::<Operator>()?;

  Ok(Predicate::Compare {
    path: strip_braces(path).to_string(),
    operator,
    value: obj.get("value").cloned().unwrap_or(Value::Null),
  })
}

fn strip_braces(path: &str) -> &str {
  let trimmed = path.trim();
  trimmed
    .strip_prefix("{{")
    .and_then(|p| p.strip_suffix("}}"))
    .map(str::trim)
    .unwrap_or(trimmed)
}

/// Parse and evaluate a predicate spec.
pub fn evaluate(spec: &Value, ctx: &RunContext) -> Result<bool, EvaluatorError> {
  Ok(Predicate::parse(spec)?.evaluate(ctx))
}

/// Evaluate a predicate, treating a malformed spec as `false`.
pub fn evaluate_or_false(spec: &Value, ctx: &RunContext) -> bool {
  match evaluate(spec, ctx) {
    Ok(result) => result,
    Err(e) => {
      warn!(error = %e, "predicate_invalid");
      false
    }
  }
}

fn compare(operator: Operator, actual: Option<&Value>, expected: &Value) -> bool {
  match operator {
    Operator::Exists => actual.is_some(),
    Operator::Empty => actual.is_none_or(is_empty),
    Operator::NotEquals => !actual.is_some_and(|a| equals(a, expected)),
    _ => {
      let Some(actual) = actual else {
        return false;
      };
      match operator {
        Operator::Equals => equals(actual, expected),
        Operator::GreaterThan => numeric(actual, expected, |a, b| a > b),
        Operator::LessThan => numeric(actual, expected, |a, b| a < b),
        Operator::GreaterOrEqual => numeric(actual, expected, |a, b| a >= b),
        Operator::LessOrEqual => numeric(actual, expected, |a, b| a <= b),
        Operator::Contains => contains(actual, expected),
        Operator::StartsWith => text_op(actual, expected, |a, b| a.starts_with(b)),
        Operator::EndsWith => text_op(actual, expected, |a, b| a.ends_with(b)),
        Operator::Before => temporal(actual, expected, |a, b| a < b),
        Operator::After => temporal(actual, expected, |a, b| a > b),
        Operator::Exists | Operator::Empty | Operator::NotEquals => false,
      }
    }
  }
}

fn equals(actual: &Value, expected: &Value) -> bool {
  match (actual, expected) {
    (Value::Number(_), _) | (_, Value::Number(_)) => match (as_number(actual), as_number(expected)) {
      (Some(a), Some(b)) => a == b,
      _ => to_text(actual) == to_text(expected),
    },
    (Value::Bool(a), Value::Bool(b)) => a == b,
    (Value::Null, Value::Null) => true,
    (Value::Array(_) | Value::Object(_), _) | (_, Value::Array(_) | Value::Object(_)) => {
      actual == expected
    }
    _ => to_text(actual) == to_text(expected),
  }
}

fn numeric(actual: &Value, expected: &Value, op: fn(f64, f64) -> bool) -> bool {
  match (as_number(actual), as_number(expected)) {
    (Some(a), Some(b)) => op(a, b),
    _ => false,
  }
}

fn text_op(actual: &Value, expected: &Value, op: fn(&str, &str) -> bool) -> bool {
  match actual {
    Value::String(s) => op(s, &to_text(expected)),
    _ => false,
  }
}

fn contains(actual: &Value, expected: &Value) -> bool {
  match actual {
    Value::String(s) => s.contains(to_text(expected).as_str()),
    Value::Array(items) => items.iter().any(|item| equals(item, expected)),
    Value::Object(map) => map.contains_key(to_text(expected).as_str()),
    _ => false,
  }
}

fn temporal(actual: &Value, expected: &Value, op: fn(DateTime<Utc>, DateTime<Utc>) -> bool) -> bool {
  match (as_datetime(actual), as_datetime(expected)) {
    (Some(a), Some(b)) => op(a, b),
    _ => false,
  }
}

fn is_empty(value: &Value) -> bool {
  match value {
    Value::Null => true,
    Value::String(s) => s.is_empty(),
    Value::Array(items) => items.is_empty(),
    Value::Object(map) => map.is_empty(),
    _ => false,
  }
}

/// Coerce a value to `f64`. Numbers and numeric strings coerce; nothing else
/// does.
pub fn as_number(value: &Value) -> Option<f64> {
  match value {
    Value::Number(n) => n.as_f64(),
    Value::String(s) => s.trim().parse::<f64>().ok().filter(|n| n.is_finite()),
    _ => None,
  }
}

/// Coerce a value to a UTC timestamp. Accepts RFC 3339, `YYYY-MM-DDTHH:MM:SS`
/// (taken as UTC) and `YYYY-MM-DD` (midnight UTC).
pub fn as_datetime(value: &Value) -> Option<DateTime<Utc>> {
  let s = value.as_str()?.trim();
  if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
    return Some(dt.with_timezone(&Utc));
  }
  if let Ok(dt) = NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S") {
    return Some(dt.and_utc());
  }
  NaiveDate::parse_from_str(s, "%Y-%m-%d")
    .ok()
    .and_then(|d| d.and_hms_opt(0, 0, 0))
    .map(|dt| dt.and_utc())
}

fn type_name(value: &Value) -> &'static str {
  match value {
    Value::Null => "null",
    Value::Bool(_) => "bool",
    Value::Number(_) => "number",
    Value::String(_) => "string",
    Value::Array(_) => "array",
    Value::Object(_) => "object",
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  fn context() -> RunContext {
    let mut ctx = RunContext::new(json!({
      "email": "a@b.com",
      "score": "72",
      "plan": "Pro",
      "tags": ["vip", "beta"],
      "nothing": null,
      "blank": "",
      "signup": "2024-03-10",
      "threshold": 50
    }));
    ctx.record_output("http", json!({ "status": 404 }));
    ctx
  }

  fn check(spec: Value) -> bool {
    evaluate(&spec, &context()).unwrap()
  }

  #[test]
  fn test_equals_numeric_and_text() {
    assert!(check(json!({ "path": "trigger.score", "operator": "equals", "value": 72 })));
    assert!(check(json!({ "path": "http.status", "operator": "equals", "value": "404" })));
    assert!(check(json!({ "path": "trigger.plan", "operator": "equals", "value": "Pro" })));
    assert!(check(json!({ "path": "trigger.plan", "operator": "not_equals", "value": "pro" })));
  }

  #[test]
  fn test_string_operators_are_case_sensitive() {
    assert!(check(json!({ "path": "trigger.email", "operator": "ends_with", "value": "@b.com" })));
    assert!(!check(json!({ "path": "trigger.email", "operator": "starts_with", "value": "A@" })));
    assert!(!check(json!({ "path": "trigger.plan", "operator": "contains", "value": "PRO" })));
  }

  #[test]
  fn test_numeric_coercion_fails_closed() {
    assert!(check(json!({ "path": "trigger.score", "operator": "greater_than", "value": 50 })));
    assert!(!check(json!({ "path": "trigger.email", "operator": "greater_than", "value": 50 })));
    assert!(!check(json!({ "path": "trigger.email", "operator": "less_than", "value": 50 })));
    assert!(!check(json!({ "path": "trigger.missing", "operator": "greater_than", "value": 50 })));
    assert!(!check(json!({ "path": "trigger.missing", "operator": "less_than", "value": 50 })));
  }

  #[test]
  fn test_exists_ignores_value() {
    assert!(check(json!({ "path": "trigger.nothing", "operator": "exists" })));
    assert!(check(json!({ "path": "trigger.blank", "operator": "exists" })));
    assert!(!check(json!({ "path": "trigger.missing", "operator": "exists" })));
  }

  #[test]
  fn test_empty() {
    assert!(check(json!({ "path": "trigger.nothing", "operator": "empty" })));
    assert!(check(json!({ "path": "trigger.blank", "operator": "empty" })));
    assert!(check(json!({ "path": "trigger.missing", "operator": "empty" })));
    assert!(!check(json!({ "path": "trigger.tags", "operator": "empty" })));
  }

  #[test]
  fn test_contains_array_member() {
    assert!(check(json!({ "path": "trigger.tags", "operator": "contains", "value": "vip" })));
    assert!(!check(json!({ "path": "trigger.tags", "operator": "contains", "value": "gold" })));
  }

  #[test]
  fn test_dates() {
    assert!(check(json!({ "path": "trigger.signup", "operator": "after", "value": "2024-01-01" })));
    assert!(check(json!({ "path": "trigger.signup", "operator": "before", "value": "2024-03-10T12:00:00Z" })));
    assert!(!check(json!({ "path": "trigger.email", "operator": "before", "value": "2024-01-01" })));
  }

  #[test]
  fn test_groups_and_templated_operand() {
    assert!(check(json!({
      "all": [
        { "path": "trigger.score", "operator": "greater_or_equal", "value": "{{trigger.threshold}}" },
        { "any": [
          { "path": "trigger.plan", "operator": "equals", "value": "Free" },
          { "not": { "path": "trigger.tags", "operator": "empty" } }
        ]}
      ]
    })));
  }

  #[test]
  fn test_field_alias_and_braced_path() {
    assert!(check(json!({ "field": "{{ trigger.plan }}", "operator": "equals", "value": "Pro" })));
  }

  #[test]
  fn test_malformed_predicates_error() {
    let ctx = context();
    assert!(matches!(
      evaluate(&json!("nope"), &ctx),
      Err(EvaluatorError::NotAnObject { .. })
    ));
    assert!(matches!(
      evaluate(&json!({ "path": "trigger.a", "operator": "sounds_like" }), &ctx),
      Err(EvaluatorError::UnknownOperator { .. })
    ));
    assert!(matches!(
      evaluate(&json!({ "operator": "equals" }), &ctx),
      Err(EvaluatorError::MissingField { field: "path" })
    ));
    assert!(matches!(
      evaluate(&json!({ "all": {} }), &ctx),
      Err(EvaluatorError::InvalidGroup { group: "all", .. })
    ));
  }

  #[test]
  fn test_not_keeps_inner_error() {
    let ctx = context();
    assert!(matches!(
      evaluate(&json!({ "not": { "path": "trigger.a", "operator": "sounds_like" } }), &ctx),
      Err(EvaluatorError::UnknownOperator { .. })
    ));
    assert!(matches!(
      evaluate(&json!({ "not": 3 }), &ctx),
      Err(EvaluatorError::NotAnObject { .. })
    ));
  }

  #[test]
  fn test_evaluate_or_false_fails_closed() {
    assert!(!evaluate_or_false(&json!({ "operator": "equals" }), &context()));
  }
}
