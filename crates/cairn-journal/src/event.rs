use cairn_config::{TriggerType, WorkflowDefinition};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{ExecutionFailure, NodeFailure, SkipReason};

/// One immutable entry in an execution's journal.
///
/// `sequence` starts at 1 and increases by exactly one per event within an
/// execution. The journal assigns both `sequence` and `timestamp` on append.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JournalEvent {
  pub sequence: u64,
  pub execution_id: String,
  pub timestamp: DateTime<Utc>,
  #[serde(flatten)]
  pub kind: EventKind,
}

/// The decision or fact an event records, with its payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "payload", rename_all_fields = "camelCase")]
pub enum EventKind {
  ExecutionStarted {
    workflow_id: String,
    definition: WorkflowDefinition,
    input: serde_json::Value,
    organization_id: String,
    trigger_type: TriggerType,
  },
  NodeScheduled {
    node_id: String,
  },
  NodeStarted {
    node_id: String,
    attempt: u32,
  },
  NodeRetried {
    node_id: String,
    attempt: u32,
    error: NodeFailure,
    delay_ms: u64,
  },
  NodeSucceeded {
    node_id: String,
    attempt: u32,
    output: serde_json::Value,
  },
  NodeFailed {
    node_id: String,
    attempt: u32,
    error: NodeFailure,
  },
  NodeSkipped {
    node_id: String,
    reason: SkipReason,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    output: Option<serde_json::Value>,
  },
  ExecutionPaused,
  ExecutionResumed,
  ExecutionCancelled {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    reason: Option<String>,
  },
  ExecutionCompleted,
  ExecutionFailed {
    failure: ExecutionFailure,
  },
}

impl EventKind {
  /// Stable event name, as stored in the `kind` column.
  pub fn name(&self) -> &'static str {
    match self {
      EventKind::ExecutionStarted { .. } => "ExecutionStarted",
      EventKind::NodeScheduled { .. } => "NodeScheduled",
      EventKind::NodeStarted { .. } => "NodeStarted",
      EventKind::NodeRetried { .. } => "NodeRetried",
      EventKind::NodeSucceeded { .. } => "NodeSucceeded",
      EventKind::NodeFailed { .. } => "NodeFailed",
      EventKind::NodeSkipped { .. } => "NodeSkipped",
      EventKind::ExecutionPaused => "ExecutionPaused",
      EventKind::ExecutionResumed => "ExecutionResumed",
      EventKind::ExecutionCancelled { .. } => "ExecutionCancelled",
      EventKind::ExecutionCompleted => "ExecutionCompleted",
      EventKind::ExecutionFailed { .. } => "ExecutionFailed",
    }
  }

  /// The node an event is about, if any.
  pub fn node_id(&self) -> Option<&str> {
    match self {
      EventKind::NodeScheduled { node_id }
      | EventKind::NodeStarted { node_id, .. }
      | EventKind::NodeRetried { node_id, .. }
      | EventKind::NodeSucceeded { node_id, .. }
      | EventKind::NodeFailed { node_id, .. }
      | EventKind::NodeSkipped { node_id, .. } => Some(node_id),
      _ => None,
    }
  }

  /// Events that end an execution.
  pub fn is_terminal(&self) -> bool {
    matches!(
      self,
      EventKind::ExecutionCancelled { .. }
        | EventKind::ExecutionCompleted
        | EventKind::ExecutionFailed { .. }
    )
  }
}

/// Names of the events that end an execution.
pub const TERMINAL_EVENT_NAMES: [&str; 3] =
  ["ExecutionCompleted", "ExecutionFailed", "ExecutionCancelled"];

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_event_wire_shape() {
    let event = JournalEvent {
      sequence: 4,
      execution_id: "exec-1".to_string(),
      timestamp: Utc::now(),
      kind: EventKind::NodeStarted {
        node_id: "node-2".to_string(),
        attempt: 1,
      },
    };

    let json = serde_json::to_value(&event).unwrap();
    assert_eq!(json["sequence"], 4);
    assert_eq!(json["executionId"], "exec-1");
    assert_eq!(json["kind"], "NodeStarted");
    assert_eq!(json["payload"]["nodeId"], "node-2");
    assert_eq!(json["payload"]["attempt"], 1);
  }

  #[test]
  fn test_unit_event_parses_without_payload() {
    let kind: EventKind =
      serde_json::from_value(serde_json::json!({ "kind": "ExecutionPaused" })).unwrap();
    assert_eq!(kind, EventKind::ExecutionPaused);
    assert!(!kind.is_terminal());
    assert!(kind.node_id().is_none());
  }

  #[test]
  fn test_terminal_names_match_variants() {
    let terminal = [
      EventKind::ExecutionCompleted,
      EventKind::ExecutionCancelled { reason: None },
      EventKind::ExecutionFailed {
        failure: ExecutionFailure {
          message: "boom".to_string(),
          kind: crate::ExecutionFailureKind::NodeFailed,
          node_id: None,
          attempt: None,
        },
      },
    ];
    for kind in terminal {
      assert!(kind.is_terminal());
      assert!(TERMINAL_EVENT_NAMES.contains(&kind.name()));
    }
  }
}
