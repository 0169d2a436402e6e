use std::time::Duration;

use crate::error::NodeError;

/// Outcome of one attempt, sent back to the orchestrator.
#[derive(Debug, Clone)]
pub struct NodeReport {
  /// Unique id of this attempt.
  pub task_id: String,
  pub node_id: String,
  pub attempt: u32,
  pub outcome: Result<serde_json::Value, NodeError>,
  pub duration: Duration,
}
