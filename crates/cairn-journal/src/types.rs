use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle of an execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
  Initialized,
  Running,
  Paused,
  Succeeded,
  Failed,
  Cancelled,
}

impl ExecutionStatus {
  pub fn is_terminal(&self) -> bool {
    matches!(
      self,
      ExecutionStatus::Succeeded | ExecutionStatus::Failed | ExecutionStatus::Cancelled
    )
  }
}

/// Status of a single node within an execution.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeStatus {
  #[default]
  Idle,
  Running,
  Success,
  Error,
  Skipped,
}

impl NodeStatus {
  pub fn is_terminal(&self) -> bool {
    matches!(
      self,
      NodeStatus::Success | NodeStatus::Error | NodeStatus::Skipped
    )
  }
}

/// Classification of a node failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
  Retryable,
  Terminal,
  Timeout,
  /// The execution was cancelled while the node was in flight.
  Cancelled,
  /// The execution halted (failure elsewhere or execution timeout) while the node was in flight.
  Aborted,
}

/// A node error as recorded in the journal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeFailure {
  pub message: String,
  pub kind: FailureKind,
  pub attempt: u32,
}

impl NodeFailure {
  pub fn new(message: impl Into<String>, kind: FailureKind, attempt: u32) -> Self {
    Self {
      message: message.into(),
      kind,
      attempt,
    }
  }

  /// Failures caused by the execution halting rather than by the node itself.
  pub fn is_halt(&self) -> bool {
    matches!(self.kind, FailureKind::Cancelled | FailureKind::Aborted)
  }
}

/// Why a node never ran.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
  /// Disabled in the editor. Resolution passes through to dependents.
  Disabled,
  /// Every path into the node was blocked by upstream outcomes.
  Unreachable,
  /// The execution stopped before the node was dispatched.
  Halted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionFailureKind {
  NodeFailed,
  Timeout,
}

/// Why an execution ended in `failed`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionFailure {
  pub message: String,
  pub kind: ExecutionFailureKind,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub node_id: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub attempt: Option<u32>,
}

/// Per-node view folded from the journal.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeExecutionState {
  pub status: NodeStatus,
  pub attempt: u32,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub scheduled_at: Option<DateTime<Utc>>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub start_time: Option<DateTime<Utc>>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub end_time: Option<DateTime<Utc>>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub output: Option<serde_json::Value>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub error: Option<NodeFailure>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub skip_reason: Option<SkipReason>,
}

impl NodeExecutionState {
  /// Queued for dispatch but not started yet.
  pub fn is_scheduled(&self) -> bool {
    self.status == NodeStatus::Idle && self.scheduled_at.is_some()
  }
}
