use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use cairn_journal::{ExecutionRecord, ExecutionStatus, NodeExecutionState};
use serde::{Deserialize, Serialize};

/// Control commands accepted by a running execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Signal {
  /// Stop dispatching new nodes. In-flight nodes keep running.
  Pause,
  Resume,
  /// Stop dispatching and cancel in-flight nodes.
  Cancel,
}

impl fmt::Display for Signal {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(match self {
      Signal::Pause => "pause",
      Signal::Resume => "resume",
      Signal::Cancel => "cancel",
    })
  }
}

impl FromStr for Signal {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s {
      "pause" => Ok(Signal::Pause),
      "resume" => Ok(Signal::Resume),
      "cancel" => Ok(Signal::Cancel),
      other => Err(format!("unknown signal: {}", other)),
    }
  }
}

/// Answer to a state query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionState {
  pub execution_id: String,
  pub status: ExecutionStatus,
  pub completed_nodes: Vec<String>,
  pub node_states: BTreeMap<String, NodeExecutionState>,
}

impl From<&ExecutionRecord> for ExecutionState {
  fn from(record: &ExecutionRecord) -> Self {
    Self {
      execution_id: record.execution_id.clone(),
      status: record.status,
      completed_nodes: record.completed_nodes.clone(),
      node_states: record.node_states.clone(),
    }
  }
}

/// How a finished execution ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultStatus {
  Success,
  Failed,
  Cancelled,
}

/// The final outcome of an execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionResult {
  pub execution_id: String,
  pub status: ResultStatus,
  /// Outputs of the nodes that succeeded.
  pub results: BTreeMap<String, serde_json::Value>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub error: Option<String>,
}

impl ExecutionResult {
  /// Build the result of a terminal record. `None` while the execution is still live.
  pub fn from_record(record: &ExecutionRecord) -> Option<Self> {
    let (status, error) = match record.status {
      ExecutionStatus::Succeeded => (ResultStatus::Success, None),
      ExecutionStatus::Failed => (
        ResultStatus::Failed,
        record.failure.as_ref().map(|f| f.message.clone()),
      ),
      ExecutionStatus::Cancelled => (
        ResultStatus::Cancelled,
        Some("execution cancelled".to_string()),
      ),
      _ => return None,
    };

    Some(Self {
      execution_id: record.execution_id.clone(),
      status,
      results: record.results(),
      error,
    })
  }
}
