use thiserror::Error;

/// A predicate spec that cannot be evaluated.
///
/// Never aborts a run: owners of a predicate treat it as `false`.
#[derive(Debug, Error, PartialEq)]
pub enum EvaluatorError {
  #[error("predicate must be an object, got {found}")]
  NotAnObject { found: String },

  #[error("predicate is missing '{field}'")]
  MissingField { field: &'static str },

  #[error("unknown operator: {operator}")]
  UnknownOperator { operator: String },

  #[error("'{group}' expects {expected}")]
  InvalidGroup {
    group: &'static str,
    expected: &'static str,
  },
}
