use std::collections::HashMap;

use chrono::{DateTime, TimeDelta, Utc};
use cairn_journal::{EventKind, ExecutionRecord, JournalEvent};

/// Work that was decided in the journal but not finished when its owner stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum PendingWork {
  /// Scheduled or started: dispatch `attempt` again.
  Dispatch { node_id: String, attempt: u32 },
  /// A retry was journaled and is due at `due`.
  Retry {
    node_id: String,
    attempt: u32,
    due: DateTime<Utc>,
  },
}

/// Derive outstanding work from a journal and its replayed record.
///
/// Only the last node event of each unfinished node matters. Results are in
/// journal order.
pub(crate) fn pending_work(events: &[JournalEvent], record: &ExecutionRecord) -> Vec<PendingWork> {
  let mut last: HashMap<&str, &JournalEvent> = HashMap::new();
  for event in events {
    if let Some(node_id) = event.kind.node_id() {
      last.insert(node_id, event);
    }
  }

  let mut latest: Vec<&JournalEvent> = last
    .into_iter()
    .filter(|(node_id, _)| record.node(node_id).is_some_and(|s| !s.status.is_terminal()))
    .map(|(_, event)| event)
    .collect();
  latest.sort_by_key(|e| e.sequence);

  latest
    .into_iter()
    .filter_map(|event| match &event.kind {
      EventKind::NodeScheduled { node_id } => Some(PendingWork::Dispatch {
        node_id: node_id.clone(),
        attempt: 1,
      }),
      EventKind::NodeStarted { node_id, attempt } => Some(PendingWork::Dispatch {
        node_id: node_id.clone(),
        attempt: *attempt,
      }),
      EventKind::NodeRetried {
        node_id,
        attempt,
        delay_ms,
        ..
      } => Some(PendingWork::Retry {
        node_id: node_id.clone(),
        attempt: attempt + 1,
        due: event.timestamp + TimeDelta::milliseconds(*delay_ms as i64),
      }),
      _ => None,
    })
    .collect()
}

#[cfg(test)]
mod tests {
  use super::*;
  use cairn_config::{EdgeDef, NodeDef, TriggerType, WorkflowDefinition};
  use cairn_journal::{FailureKind, NodeFailure};

  fn events(kinds: Vec<EventKind>) -> Vec<JournalEvent> {
    let mut def = WorkflowDefinition::new("wf");
    def.nodes = vec![
      NodeDef::new("t", "manualTrigger"),
      NodeDef::new("a", "step"),
      NodeDef::new("b", "step"),
    ];
    def.edges = vec![EdgeDef::new("e1", "t", "a"), EdgeDef::new("e2", "t", "b")];

    let start = EventKind::ExecutionStarted {
      workflow_id: "wf".to_string(),
      definition: def,
      input: serde_json::json!({}),
      organization_id: "org".to_string(),
      trigger_type: TriggerType::Manual,
    };
    std::iter::once(start)
      .chain(kinds)
      .enumerate()
      .map(|(i, kind)| JournalEvent {
        sequence: i as u64 + 1,
        execution_id: "exec".to_string(),
        timestamp: chrono::Utc::now(),
        kind,
      })
      .collect()
  }

  fn scheduled(node_id: &str) -> EventKind {
    EventKind::NodeScheduled {
      node_id: node_id.to_string(),
    }
  }

  #[test]
  fn test_finished_nodes_have_no_pending_work() {
    let events = events(vec![
      scheduled("t"),
      EventKind::NodeStarted {
        node_id: "t".to_string(),
        attempt: 1,
      },
      EventKind::NodeSucceeded {
        node_id: "t".to_string(),
        attempt: 1,
        output: serde_json::json!({}),
      },
    ]);
    let record = ExecutionRecord::replay(&events).unwrap();

    assert!(pending_work(&events, &record).is_empty());
  }

  #[test]
  fn test_scheduled_started_and_retried_nodes() {
    let events = events(vec![
      scheduled("t"),
      EventKind::NodeStarted {
        node_id: "t".to_string(),
        attempt: 1,
      },
      EventKind::NodeSucceeded {
        node_id: "t".to_string(),
        attempt: 1,
        output: serde_json::json!({}),
      },
      scheduled("a"),
      scheduled("b"),
      EventKind::NodeStarted {
        node_id: "b".to_string(),
        attempt: 1,
      },
      EventKind::NodeRetried {
        node_id: "b".to_string(),
        attempt: 1,
        error: NodeFailure::new("flaky", FailureKind::Retryable, 1),
        delay_ms: 500,
      },
    ]);
    let record = ExecutionRecord::replay(&events).unwrap();
    let pending = pending_work(&events, &record);

    assert_eq!(pending.len(), 2);
    assert_eq!(
      pending[0],
      PendingWork::Dispatch {
        node_id: "a".to_string(),
        attempt: 1
      }
    );
    let PendingWork::Retry {
      node_id,
      attempt,
      due,
    } = &pending[1]
    else {
      panic!("expected retry, got {:?}", pending[1]);
    };
    assert_eq!(node_id, "b");
    assert_eq!(*attempt, 2);
    assert_eq!(*due, events[7].timestamp + TimeDelta::milliseconds(500));
  }

  #[test]
  fn test_started_attempt_is_redispatched() {
    let events = events(vec![
      scheduled("t"),
      EventKind::NodeStarted {
        node_id: "t".to_string(),
        attempt: 2,
      },
    ]);
    let record = ExecutionRecord::replay(&events).unwrap();

    assert_eq!(
      pending_work(&events, &record),
      vec![PendingWork::Dispatch {
        node_id: "t".to_string(),
        attempt: 2
      }]
    );
  }
}
