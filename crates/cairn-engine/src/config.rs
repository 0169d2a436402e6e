use std::time::Duration;

use cairn_executor::ExecutorConfig;
use serde::{Deserialize, Serialize};

/// Engine-wide settings. Workflow settings override these where both exist.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct EngineConfig {
  /// Identifies this engine as a lease owner.
  pub owner_id: String,
  /// Nodes of one execution running at once, unless the workflow sets `maxConcurrency`.
  pub max_concurrency: usize,
  /// Nodes running at once across all executions.
  pub global_concurrency: usize,
  /// Per-attempt timeout for nodes without `timeoutMs`.
  pub node_timeout_ms: u64,
  pub retry_on_timeout: bool,
  /// How long cancelled attempts may finish cooperatively.
  pub cancel_grace_ms: u64,
  pub lease_ttl_ms: u64,
  /// Execution timeout for workflows without `timeoutMinutes`.
  pub execution_timeout_ms: Option<u64>,
  /// How long finished executions stay queryable in memory.
  pub retention_ms: u64,
  pub mailbox_capacity: usize,
}

impl Default for EngineConfig {
  fn default() -> Self {
    Self {
      owner_id: format!("cairn-{}", uuid::Uuid::new_v4()),
      max_concurrency: 16,
      global_concurrency: 64,
      node_timeout_ms: 5 * 60 * 1000,
      retry_on_timeout: true,
      cancel_grace_ms: 5_000,
      lease_ttl_ms: 30_000,
      execution_timeout_ms: None,
      retention_ms: 60 * 60 * 1000,
      mailbox_capacity: 256,
    }
  }
}

impl EngineConfig {
  pub fn node_timeout(&self) -> Duration {
    Duration::from_millis(self.node_timeout_ms)
  }

  pub fn lease_ttl(&self) -> Duration {
    Duration::from_millis(self.lease_ttl_ms.max(1))
  }

  pub fn cancel_grace(&self) -> Duration {
    Duration::from_millis(self.cancel_grace_ms)
  }

  pub fn retention(&self) -> Duration {
    Duration::from_millis(self.retention_ms)
  }

  pub fn executor_config(&self) -> ExecutorConfig {
    ExecutorConfig {
      max_concurrent: self.global_concurrency,
      cancel_grace: self.cancel_grace(),
      retry_on_timeout: self.retry_on_timeout,
    }
  }
}
