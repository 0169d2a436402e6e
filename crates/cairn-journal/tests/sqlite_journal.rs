use std::time::Duration;

use cairn_config::{EdgeDef, NodeDef, TriggerType, WorkflowDefinition};
use cairn_journal::{
  EventKind, ExecutionRecord, ExecutionStatus, Journal, JournalError, NodeStatus, SqliteJournal,
};

const TTL: Duration = Duration::from_secs(30);

fn started() -> EventKind {
  let mut definition = WorkflowDefinition::new("wf-sqlite");
  definition.nodes = vec![
    NodeDef::new("node-1", "manualTrigger"),
    NodeDef::new("node-2", "noop"),
  ];
  definition.edges = vec![EdgeDef::new("e1", "node-1", "node-2")];

  EventKind::ExecutionStarted {
    workflow_id: definition.id.clone(),
    definition,
    input: serde_json::json!({"customer": "acme"}),
    organization_id: "org-1".to_string(),
    trigger_type: TriggerType::Webhook,
  }
}

#[tokio::test]
async fn test_append_and_replay() {
  let journal = SqliteJournal::in_memory().await.unwrap();
  let lease = journal.acquire_lease("exec-1", "worker-a", TTL).await.unwrap();

  journal.append(&lease, started()).await.unwrap();
  for kind in [
    EventKind::NodeScheduled {
      node_id: "node-1".to_string(),
    },
    EventKind::NodeStarted {
      node_id: "node-1".to_string(),
      attempt: 1,
    },
    EventKind::NodeSucceeded {
      node_id: "node-1".to_string(),
      attempt: 1,
      output: serde_json::json!({"ok": true}),
    },
  ] {
    journal.append(&lease, kind).await.unwrap();
  }

  let events = journal.read("exec-1").await.unwrap();
  assert_eq!(
    events.iter().map(|e| e.sequence).collect::<Vec<_>>(),
    vec![1, 2, 3, 4]
  );

  let record = ExecutionRecord::replay(&events).unwrap();
  assert_eq!(record.status, ExecutionStatus::Running);
  assert_eq!(record.organization_id, "org-1");
  assert_eq!(record.trigger_type, TriggerType::Webhook);
  assert_eq!(record.node("node-1").unwrap().status, NodeStatus::Success);
  assert_eq!(record.node("node-2").unwrap().status, NodeStatus::Idle);
}

#[tokio::test]
async fn test_unfinished_executions() {
  let journal = SqliteJournal::in_memory().await.unwrap();

  let done = journal.acquire_lease("exec-done", "w", TTL).await.unwrap();
  journal.append(&done, started()).await.unwrap();
  journal
    .append(&done, EventKind::ExecutionCompleted)
    .await
    .unwrap();

  let open = journal.acquire_lease("exec-open", "w", TTL).await.unwrap();
  journal.append(&open, started()).await.unwrap();

  assert_eq!(
    journal.list_executions().await.unwrap(),
    vec!["exec-done", "exec-open"]
  );
  assert_eq!(
    journal.unfinished_executions().await.unwrap(),
    vec!["exec-open"]
  );
}

#[tokio::test]
async fn test_fencing_across_connections() {
  let dir = tempfile::tempdir().unwrap();
  let path = dir.path().join("journal.db");

  let first = SqliteJournal::connect(&path).await.unwrap();
  let second = SqliteJournal::connect(&path).await.unwrap();

  let stale = first
    .acquire_lease("exec-1", "worker-a", Duration::from_millis(1))
    .await
    .unwrap();
  first.append(&stale, started()).await.unwrap();

  tokio::time::sleep(Duration::from_millis(20)).await;

  let current = second
    .acquire_lease("exec-1", "worker-b", TTL)
    .await
    .unwrap();
  assert_eq!(current.token, stale.token + 1);

  let err = first
    .append(&stale, EventKind::ExecutionPaused)
    .await
    .unwrap_err();
  assert!(matches!(err, JournalError::Fenced { current: 2, .. }));

  let appended = second
    .append(&current, EventKind::ExecutionPaused)
    .await
    .unwrap();
  assert_eq!(appended.sequence, 2);
}

#[tokio::test]
async fn test_live_lease_is_exclusive() {
  let journal = SqliteJournal::in_memory().await.unwrap();
  let held = journal.acquire_lease("exec-1", "worker-a", TTL).await.unwrap();

  let err = journal
    .acquire_lease("exec-1", "worker-b", TTL)
    .await
    .unwrap_err();
  assert!(matches!(err, JournalError::LeaseHeld { ref owner, .. } if owner == "worker-a"));

  let renewed = journal.renew_lease(&held, TTL).await.unwrap();
  assert_eq!(renewed.token, held.token);

  journal.release_lease(&renewed).await.unwrap();
  let taken = journal.acquire_lease("exec-1", "worker-b", TTL).await.unwrap();
  assert_eq!(taken.token, 2);
}

#[tokio::test]
async fn test_journal_survives_reopen() {
  let dir = tempfile::tempdir().unwrap();
  let path = dir.path().join("journal.db");

  {
    let journal = SqliteJournal::connect(&path).await.unwrap();
    let lease = journal.acquire_lease("exec-1", "w", TTL).await.unwrap();
    journal.append(&lease, started()).await.unwrap();
  }

  let reopened = SqliteJournal::connect(&path).await.unwrap();
  let events = reopened.read("exec-1").await.unwrap();
  assert_eq!(events.len(), 1);
  assert_eq!(events[0].kind.name(), "ExecutionStarted");
}
