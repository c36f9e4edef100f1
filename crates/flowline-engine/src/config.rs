use serde::{Deserialize, Serialize};

/// Configuration for the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
  /// Per-attempt timeout for nodes that don't set `timeoutMs`.
  pub default_node_timeout_ms: u64,

  /// Upper bound on handlers running at once within a run.
  pub max_parallel_nodes: usize,

  /// Cap on a single retry backoff delay.
  pub max_retry_delay_ms: u64,
}

impl Default for EngineConfig {
  fn default() -> Self {
    Self {
      default_node_timeout_ms: 30_000,
      max_parallel_nodes: 8,
      max_retry_delay_ms: 300_000,
    }
  }
}
