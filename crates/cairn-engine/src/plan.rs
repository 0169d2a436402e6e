//! Scheduling decisions derived from the graph and the current record.
//!
//! Everything here is a pure function of its inputs, so a replayed record
//! leads to the same decisions the live run made.

use cairn_config::ErrorHandling;
use cairn_journal::{
  ExecutionRecord, FailureKind, NodeExecutionState, NodeFailure, NodeStatus, SkipReason,
};
use cairn_workflow::{EdgeRef, Graph};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum EdgeState {
  /// The source has not finished.
  Pending,
  /// The source finished and this edge carries a value.
  Resolved,
  /// The source finished but this edge was not taken.
  Blocked,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Readiness {
  Wait,
  Ready,
  Unreachable,
}

pub(crate) fn edge_state(edge: &EdgeRef, source: &NodeExecutionState) -> EdgeState {
  match (source.status, edge.kind.is_error()) {
    (NodeStatus::Idle | NodeStatus::Running, _) => EdgeState::Pending,
    (NodeStatus::Success, false) | (NodeStatus::Error, true) => EdgeState::Resolved,
    (NodeStatus::Skipped, false) if source.skip_reason == Some(SkipReason::Disabled) => {
      EdgeState::Resolved
    }
    _ => EdgeState::Blocked,
  }
}

/// Whether `node_id` can be dispatched now.
///
/// Single-input nodes, and every node under [`ErrorHandling::Stop`], need all
/// incoming edges resolved. Merges under [`ErrorHandling::Continue`] need one.
pub(crate) fn readiness(
  graph: &Graph,
  record: &ExecutionRecord,
  node_id: &str,
  mode: ErrorHandling,
) -> Readiness {
  let incoming = graph.incoming(node_id);
  if incoming.is_empty() {
    return Readiness::Ready;
  }

  let mut resolved = 0;
  let mut blocked = 0;
  for edge in incoming {
    let state = record
      .node(&edge.source)
      .map_or(EdgeState::Blocked, |source| edge_state(edge, source));
    match state {
      EdgeState::Pending => return Readiness::Wait,
      EdgeState::Resolved => resolved += 1,
      EdgeState::Blocked => blocked += 1,
    }
  }

  let requires_all = incoming.len() == 1 || mode == ErrorHandling::Stop;
  let ready = if requires_all {
    blocked == 0
  } else {
    resolved > 0
  };
  if ready {
    Readiness::Ready
  } else {
    Readiness::Unreachable
  }
}

/// Input handed to `node_id`.
///
/// Entry nodes receive the execution input. A single incoming edge passes its
/// value through, a merge receives an object keyed by source node id.
pub(crate) fn node_input(graph: &Graph, record: &ExecutionRecord, node_id: &str) -> serde_json::Value {
  let incoming = graph.incoming(node_id);
  if incoming.is_empty() {
    return record.input.clone();
  }

  let mut values = serde_json::Map::new();
  for edge in incoming {
    let Some(source) = record.node(&edge.source) else {
      continue;
    };
    if edge_state(edge, source) == EdgeState::Resolved {
      values.insert(edge.source.clone(), edge_value(edge, source));
    }
  }

  if incoming.len() == 1 {
    values
      .into_iter()
      .next()
      .map_or(serde_json::Value::Null, |(_, v)| v)
  } else {
    serde_json::Value::Object(values)
  }
}

fn edge_value(edge: &EdgeRef, source: &NodeExecutionState) -> serde_json::Value {
  match (&source.error, edge.kind.is_error()) {
    (Some(error), true) => serde_json::json!({
      "nodeId": edge.source,
      "error": error.message,
      "kind": error.kind,
      "attempt": error.attempt,
    }),
    _ => source.output.clone().unwrap_or(serde_json::Value::Null),
  }
}

/// First failed node, in completion order, with no error edge to handle it.
///
/// Failures caused by a halt are never counted.
pub(crate) fn unhandled_failure<'a>(
  graph: &Graph,
  record: &'a ExecutionRecord,
) -> Option<(&'a str, &'a NodeFailure)> {
  record.completed_nodes.iter().find_map(|id| {
    let state = record.node(id)?;
    if state.status != NodeStatus::Error {
      return None;
    }
    let error = state.error.as_ref()?;
    if error.is_halt() || graph.has_error_edge(id) {
      return None;
    }
    Some((id.as_str(), error))
  })
}

/// A cancel was journaled for some node but the terminal event is missing.
pub(crate) fn cancel_pending(record: &ExecutionRecord) -> bool {
  record
    .halt_failures()
    .any(|(_, f)| f.kind == FailureKind::Cancelled)
}

/// Whether a halt already closed out some nodes.
pub(crate) fn halt_started(record: &ExecutionRecord) -> bool {
  record
    .node_states
    .values()
    .any(|s| s.skip_reason == Some(SkipReason::Halted))
}

pub(crate) fn failure_message(node_id: &str, failure: &NodeFailure) -> String {
  format!(
    "node '{}' failed after {} attempt(s): {}",
    node_id, failure.attempt, failure.message
  )
}
