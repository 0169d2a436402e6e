use cairn_config::TriggerType;
use tokio_util::sync::CancellationToken;

/// Everything an Activity knows about the attempt it is running.
#[derive(Debug, Clone)]
pub struct ActivityContext {
  pub execution_id: String,
  pub workflow_id: String,
  pub node_id: String,
  pub node_type: String,
  /// The node's configuration from the workflow definition.
  pub data: serde_json::Value,
  /// 1-based attempt number.
  pub attempt: u32,
  pub organization_id: String,
  pub trigger_type: TriggerType,
  /// Fires when the execution is cancelled or halted. Long running
  /// Activities should select on it and return early.
  pub cancel: CancellationToken,
}

impl ActivityContext {
  /// Logger scoped to this execution and node.
  pub fn logger(&self) -> ActivityLogger<'_> {
    ActivityLogger { context: self }
  }
}

/// Structured logging for Activities, tagged with execution and node ids.
pub struct ActivityLogger<'a> {
  context: &'a ActivityContext,
}

impl ActivityLogger<'_> {
  pub fn debug(&self, message: &str) {
    tracing::debug!(
      execution_id = %self.context.execution_id,
      node_id = %self.context.node_id,
      attempt = self.context.attempt,
      "{}", message
    );
  }

  pub fn info(&self, message: &str) {
    tracing::info!(
      execution_id = %self.context.execution_id,
      node_id = %self.context.node_id,
      attempt = self.context.attempt,
      "{}", message
    );
  }

  pub fn warn(&self, message: &str) {
    tracing::warn!(
      execution_id = %self.context.execution_id,
      node_id = %self.context.node_id,
      attempt = self.context.attempt,
      "{}", message
    );
  }

  pub fn error(&self, message: &str) {
    tracing::error!(
      execution_id = %self.context.execution_id,
      node_id = %self.context.node_id,
      attempt = self.context.attempt,
      "{}", message
    );
  }
}
