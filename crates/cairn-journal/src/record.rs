//! The execution record and the reducer that folds journal events into it.
//!
//! `apply` is a pure function of the current record and one event: it never
//! reads the clock or any outside state, so replaying the same journal always
//! yields the same record.

use std::collections::BTreeMap;

use cairn_config::{TriggerType, WorkflowDefinition};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::event::{EventKind, JournalEvent};
use crate::types::{
  ExecutionFailure, ExecutionStatus, NodeExecutionState, NodeFailure, NodeStatus, SkipReason,
};

/// Errors raised when a journal cannot be folded into a record.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ReplayError {
  #[error("journal is empty")]
  Empty,

  #[error("first event must be ExecutionStarted, found {kind} at sequence {sequence}")]
  NotStarted { kind: &'static str, sequence: u64 },

  #[error("event {sequence} belongs to execution '{found}', expected '{expected}'")]
  ForeignEvent {
    sequence: u64,
    expected: String,
    found: String,
  },

  #[error("sequence gap: expected {expected}, found {found}")]
  SequenceGap { expected: u64, found: u64 },

  #[error("{kind} at sequence {sequence} after execution reached {status:?}")]
  AfterTerminal {
    kind: &'static str,
    sequence: u64,
    status: ExecutionStatus,
  },

  #[error("{kind} at sequence {sequence} references unknown node '{node_id}'")]
  UnknownNode {
    kind: &'static str,
    sequence: u64,
    node_id: String,
  },

  #[error("{kind} at sequence {sequence} is illegal for node '{node_id}' in status {from:?}")]
  IllegalNodeTransition {
    kind: &'static str,
    sequence: u64,
    node_id: String,
    from: NodeStatus,
  },

  #[error("{kind} at sequence {sequence} is illegal for execution in status {from:?}")]
  IllegalExecutionTransition {
    kind: &'static str,
    sequence: u64,
    from: ExecutionStatus,
  },
}

/// The complete, replayable state of one execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionRecord {
  pub execution_id: String,
  pub workflow_id: String,
  pub organization_id: String,
  pub trigger_type: TriggerType,
  pub status: ExecutionStatus,
  pub started_at: DateTime<Utc>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub completed_at: Option<DateTime<Utc>>,
  pub input: serde_json::Value,
  pub definition: WorkflowDefinition,
  pub node_states: BTreeMap<String, NodeExecutionState>,
  /// Node ids in the order they reached a terminal status.
  pub completed_nodes: Vec<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub failure: Option<ExecutionFailure>,
  pub last_sequence: u64,
}

impl ExecutionRecord {
  /// Fold a complete journal, from empty state, into a record.
  pub fn replay<'a>(
    events: impl IntoIterator<Item = &'a JournalEvent>,
  ) -> Result<Self, ReplayError> {
    let mut events = events.into_iter();
    let first = events.next().ok_or(ReplayError::Empty)?;
    let mut record = Self::start(first)?;
    for event in events {
      record.apply(event)?;
    }
    Ok(record)
  }

  /// Create a record from its `ExecutionStarted` event.
  pub fn start(event: &JournalEvent) -> Result<Self, ReplayError> {
    if event.sequence != 1 {
      return Err(ReplayError::SequenceGap {
        expected: 1,
        found: event.sequence,
      });
    }

    let EventKind::ExecutionStarted {
      workflow_id,
      definition,
      input,
      organization_id,
      trigger_type,
    } = &event.kind
    else {
      return Err(ReplayError::NotStarted {
        kind: event.kind.name(),
        sequence: event.sequence,
      });
    };

    let node_states = definition
      .nodes
      .iter()
      .map(|n| (n.id.clone(), NodeExecutionState::default()))
      .collect();

    Ok(Self {
      execution_id: event.execution_id.clone(),
      workflow_id: workflow_id.clone(),
      organization_id: organization_id.clone(),
      trigger_type: *trigger_type,
      status: ExecutionStatus::Initialized,
      started_at: event.timestamp,
      completed_at: None,
      input: input.clone(),
      definition: definition.clone(),
      node_states,
      completed_nodes: Vec::new(),
      failure: None,
      last_sequence: event.sequence,
    })
  }

  /// Apply the next event of this execution's journal.
  ///
  /// On error the record is left unchanged.
  pub fn apply(&mut self, event: &JournalEvent) -> Result<(), ReplayError> {
    if event.execution_id != self.execution_id {
      return Err(ReplayError::ForeignEvent {
        sequence: event.sequence,
        expected: self.execution_id.clone(),
        found: event.execution_id.clone(),
      });
    }
    if event.sequence != self.last_sequence + 1 {
      return Err(ReplayError::SequenceGap {
        expected: self.last_sequence + 1,
        found: event.sequence,
      });
    }
    let kind = event.kind.name();
    let sequence = event.sequence;
    if self.status.is_terminal() {
      return Err(ReplayError::AfterTerminal {
        kind,
        sequence,
        status: self.status,
      });
    }

    let illegal_execution = |from| ReplayError::IllegalExecutionTransition {
      kind,
      sequence,
      from,
    };

    match &event.kind {
      EventKind::ExecutionStarted { .. } => return Err(illegal_execution(self.status)),

      EventKind::NodeScheduled { node_id } => {
        let state = self.node_in(event, node_id, &[NodeStatus::Idle])?;
        state.scheduled_at.get_or_insert(event.timestamp);
        self.mark_running();
      }

      EventKind::NodeStarted { node_id, attempt } => {
        let state = self.node_in(event, node_id, &[NodeStatus::Idle, NodeStatus::Running])?;
        if *attempt == 0 || *attempt < state.attempt {
          return Err(illegal_node(event, node_id, state.status));
        }
        state.status = NodeStatus::Running;
        state.attempt = *attempt;
        state.start_time.get_or_insert(event.timestamp);
        self.mark_running();
      }

      EventKind::NodeRetried {
        node_id, error, ..
      } => {
        let state = self.node_in(event, node_id, &[NodeStatus::Running])?;
        state.error = Some(error.clone());
      }

      EventKind::NodeSucceeded {
        node_id,
        attempt,
        output,
      } => {
        let state = self.node_in(event, node_id, &[NodeStatus::Running])?;
        state.status = NodeStatus::Success;
        state.attempt = *attempt;
        state.end_time = Some(event.timestamp);
        state.output = Some(output.clone());
        state.error = None;
        self.completed_nodes.push(node_id.clone());
      }

      EventKind::NodeFailed {
        node_id,
        attempt,
        error,
      } => {
        let state = self.node_in(event, node_id, &[NodeStatus::Running])?;
        state.status = NodeStatus::Error;
        state.attempt = *attempt;
        state.end_time = Some(event.timestamp);
        state.error = Some(error.clone());
        self.completed_nodes.push(node_id.clone());
      }

      EventKind::NodeSkipped {
        node_id,
        reason,
        output,
      } => {
        let state = self.node_in(event, node_id, &[NodeStatus::Idle])?;
        state.status = NodeStatus::Skipped;
        state.end_time = Some(event.timestamp);
        state.skip_reason = Some(*reason);
        if *reason == SkipReason::Disabled {
          state.output = output.clone();
        }
        self.completed_nodes.push(node_id.clone());
        self.mark_running();
      }

      EventKind::ExecutionPaused => match self.status {
        ExecutionStatus::Initialized | ExecutionStatus::Running => {
          self.status = ExecutionStatus::Paused;
        }
        from => return Err(illegal_execution(from)),
      },

      EventKind::ExecutionResumed => match self.status {
        ExecutionStatus::Paused => self.status = ExecutionStatus::Running,
        from => return Err(illegal_execution(from)),
      },

      EventKind::ExecutionCancelled { .. } => {
        self.finish(ExecutionStatus::Cancelled, event.timestamp);
      }

      EventKind::ExecutionCompleted => {
        self.finish(ExecutionStatus::Succeeded, event.timestamp);
      }

      EventKind::ExecutionFailed { failure } => {
        self.failure = Some(failure.clone());
        self.finish(ExecutionStatus::Failed, event.timestamp);
      }
    }

    self.last_sequence = event.sequence;
    Ok(())
  }

  /// Look up a node and check it is in one of `allowed` before mutating it.
  fn node_in(
    &mut self,
    event: &JournalEvent,
    node_id: &str,
    allowed: &[NodeStatus],
  ) -> Result<&mut NodeExecutionState, ReplayError> {
    let state = self
      .node_states
      .get_mut(node_id)
      .ok_or_else(|| ReplayError::UnknownNode {
        kind: event.kind.name(),
        sequence: event.sequence,
        node_id: node_id.to_string(),
      })?;
    if !allowed.contains(&state.status) {
      return Err(illegal_node(event, node_id, state.status));
    }
    Ok(state)
  }

  fn mark_running(&mut self) {
    if self.status == ExecutionStatus::Initialized {
      self.status = ExecutionStatus::Running;
    }
  }

  fn finish(&mut self, status: ExecutionStatus, at: DateTime<Utc>) {
    self.status = status;
    self.completed_at = Some(at);
  }

  pub fn node(&self, node_id: &str) -> Option<&NodeExecutionState> {
    self.node_states.get(node_id)
  }

  pub fn is_terminal(&self) -> bool {
    self.status.is_terminal()
  }

  /// Outputs of every node that succeeded.
  pub fn results(&self) -> BTreeMap<String, serde_json::Value> {
    self
      .node_states
      .iter()
      .filter(|(_, s)| s.status == NodeStatus::Success)
      .filter_map(|(id, s)| s.output.clone().map(|o| (id.clone(), o)))
      .collect()
  }

  /// Node failures that were caused by the execution halting.
  pub fn halt_failures(&self) -> impl Iterator<Item = (&String, &NodeFailure)> {
    self
      .node_states
      .iter()
      .filter_map(|(id, s)| s.error.as_ref().map(|e| (id, e)))
      .filter(|(_, e)| e.is_halt())
  }
}

fn illegal_node(event: &JournalEvent, node_id: &str, from: NodeStatus) -> ReplayError {
  ReplayError::IllegalNodeTransition {
    kind: event.kind.name(),
    sequence: event.sequence,
    node_id: node_id.to_string(),
    from,
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::types::FailureKind;
  use cairn_config::{EdgeDef, NodeDef};

  struct Log {
    events: Vec<JournalEvent>,
  }

  impl Log {
    fn new() -> Self {
      let mut definition = WorkflowDefinition::new("wf");
      definition.nodes = vec![
        NodeDef::new("node-1", "manualTrigger"),
        NodeDef::new("node-2", "noop"),
      ];
      definition.edges = vec![EdgeDef::new("e1", "node-1", "node-2")];

      let mut log = Self { events: Vec::new() };
      log.push(EventKind::ExecutionStarted {
        workflow_id: "wf".to_string(),
        definition,
        input: serde_json::json!({"order": 7}),
        organization_id: "org".to_string(),
        trigger_type: TriggerType::Manual,
      });
      log
    }

    fn push(&mut self, kind: EventKind) -> &mut Self {
      let sequence = self.events.len() as u64 + 1;
      self.events.push(JournalEvent {
        sequence,
        execution_id: "exec-1".to_string(),
        timestamp: DateTime::from_timestamp(1_700_000_000 + sequence as i64, 0).unwrap(),
        kind,
      });
      self
    }

    fn run(&mut self, node: &str, output: serde_json::Value) -> &mut Self {
      self
        .push(EventKind::NodeScheduled {
          node_id: node.to_string(),
        })
        .push(EventKind::NodeStarted {
          node_id: node.to_string(),
          attempt: 1,
        })
        .push(EventKind::NodeSucceeded {
          node_id: node.to_string(),
          attempt: 1,
          output,
        })
    }
  }

  #[test]
  fn test_replay_successful_run() {
    let mut log = Log::new();
    log
      .run("node-1", serde_json::json!({"a": 1}))
      .run("node-2", serde_json::json!({"b": 2}))
      .push(EventKind::ExecutionCompleted);

    let record = ExecutionRecord::replay(&log.events).unwrap();

    assert_eq!(record.status, ExecutionStatus::Succeeded);
    assert_eq!(record.completed_nodes, vec!["node-1", "node-2"]);
    assert_eq!(record.results()["node-2"], serde_json::json!({"b": 2}));
    assert_eq!(record.last_sequence, 8);
    assert_eq!(record.completed_at, Some(log.events[7].timestamp));
    assert_eq!(record.input, serde_json::json!({"order": 7}));
  }

  #[test]
  fn test_replay_is_deterministic() {
    let mut log = Log::new();
    log.run("node-1", serde_json::json!(1));

    let first = ExecutionRecord::replay(&log.events).unwrap();
    let second = ExecutionRecord::replay(&log.events).unwrap();
    assert_eq!(first, second);
  }

  #[test]
  fn test_initialized_until_first_node_event() {
    let log = Log::new();
    let record = ExecutionRecord::replay(&log.events).unwrap();

    assert_eq!(record.status, ExecutionStatus::Initialized);
    assert!(
      record
        .node_states
        .values()
        .all(|s| s.status == NodeStatus::Idle)
    );
  }

  #[test]
  fn test_retry_keeps_node_running() {
    let mut log = Log::new();
    log
      .push(EventKind::NodeScheduled {
        node_id: "node-1".to_string(),
      })
      .push(EventKind::NodeStarted {
        node_id: "node-1".to_string(),
        attempt: 1,
      })
      .push(EventKind::NodeRetried {
        node_id: "node-1".to_string(),
        attempt: 1,
        error: NodeFailure::new("503", FailureKind::Retryable, 1),
        delay_ms: 1000,
      })
      .push(EventKind::NodeStarted {
        node_id: "node-1".to_string(),
        attempt: 2,
      });

    let record = ExecutionRecord::replay(&log.events).unwrap();
    let node = record.node("node-1").unwrap();
    assert_eq!(node.status, NodeStatus::Running);
    assert_eq!(node.attempt, 2);
    assert_eq!(node.start_time, Some(log.events[2].timestamp));
    assert_eq!(node.error.as_ref().unwrap().message, "503");
  }

  #[test]
  fn test_sequence_gap_is_rejected() {
    let mut log = Log::new();
    log.run("node-1", serde_json::json!(1));
    log.events.remove(2);

    let err = ExecutionRecord::replay(&log.events).unwrap_err();
    assert_eq!(
      err,
      ReplayError::SequenceGap {
        expected: 3,
        found: 4
      }
    );
  }

  #[test]
  fn test_node_status_never_reverses() {
    let mut log = Log::new();
    log.run("node-1", serde_json::json!(1)).push(EventKind::NodeStarted {
      node_id: "node-1".to_string(),
      attempt: 2,
    });

    let err = ExecutionRecord::replay(&log.events).unwrap_err();
    assert!(matches!(
      err,
      ReplayError::IllegalNodeTransition {
        from: NodeStatus::Success,
        ..
      }
    ));
  }

  #[test]
  fn test_nothing_after_terminal() {
    let mut log = Log::new();
    log
      .push(EventKind::ExecutionCancelled { reason: None })
      .push(EventKind::ExecutionResumed);

    let err = ExecutionRecord::replay(&log.events).unwrap_err();
    assert!(matches!(
      err,
      ReplayError::AfterTerminal {
        status: ExecutionStatus::Cancelled,
        ..
      }
    ));
  }

  #[test]
  fn test_first_event_must_be_started() {
    let mut log = Log::new();
    log.push(EventKind::ExecutionPaused);
    let mut events = log.events.split_off(1);
    events[0].sequence = 1;

    let err = ExecutionRecord::replay(&events).unwrap_err();
    assert!(matches!(err, ReplayError::NotStarted { .. }));
    assert_eq!(
      ExecutionRecord::replay(&Vec::<JournalEvent>::new()).unwrap_err(),
      ReplayError::Empty
    );
  }

  #[test]
  fn test_pause_and_resume() {
    let mut log = Log::new();
    log.push(EventKind::ExecutionPaused);
    let paused = ExecutionRecord::replay(&log.events).unwrap();
    assert_eq!(paused.status, ExecutionStatus::Paused);

    log.push(EventKind::ExecutionResumed);
    let resumed = ExecutionRecord::replay(&log.events).unwrap();
    assert_eq!(resumed.status, ExecutionStatus::Running);
  }

  #[test]
  fn test_disabled_skip_keeps_passthrough_output() {
    let mut log = Log::new();
    log
      .run("node-1", serde_json::json!({"x": 1}))
      .push(EventKind::NodeSkipped {
        node_id: "node-2".to_string(),
        reason: SkipReason::Disabled,
        output: Some(serde_json::json!({"x": 1})),
      });

    let record = ExecutionRecord::replay(&log.events).unwrap();
    let node = record.node("node-2").unwrap();
    assert_eq!(node.status, NodeStatus::Skipped);
    assert_eq!(node.output, Some(serde_json::json!({"x": 1})));
    assert!(!record.results().contains_key("node-2"));
  }

  #[test]
  fn test_unknown_node_is_rejected() {
    let mut log = Log::new();
    log.push(EventKind::NodeScheduled {
      node_id: "ghost".to_string(),
    });

    let err = ExecutionRecord::replay(&log.events).unwrap_err();
    assert!(matches!(err, ReplayError::UnknownNode { .. }));
  }
}
