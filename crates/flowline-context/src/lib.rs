//! Per-run state and the two evaluators that read it.
//!
//! - [`RunContext`] holds the trigger payload and node outputs of one run.
//! - [`template`] fills `{{scope.path}}` placeholders from a context.
//! - [`condition`] evaluates predicate specs used by conditional connections
//!   and condition/filter nodes.

pub mod condition;
mod context;
mod error;
pub mod template;

pub use condition::{Operator, Predicate, evaluate, evaluate_or_false};
pub use context::{EVENTS_SCOPE, RunContext, TRIGGER_SCOPE};
pub use error::EvaluatorError;
pub use template::{Rendered, resolve, resolve_config, resolve_value};
