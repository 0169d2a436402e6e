#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use cairn_activity::builtin::{DelayActivity, PassthroughActivity};
use cairn_activity::{ActivityError, ActivityRegistry, activity_fn};
use cairn_config::{EdgeDef, NodeDef, WorkflowDefinition};
use cairn_engine::{Engine, EngineConfig, ExecutionState};
use cairn_journal::{
  EventKind, Journal, JournalError, JournalEvent, Lease, MemoryJournal,
};

/// Node types used across the engine tests.
///
/// - `add` returns `{"value": input.value + data.amount}`
/// - `fail` always fails with a terminal error
/// - `flaky` fails with HTTP 503 while `attempt <= data.failures`
pub fn registry() -> ActivityRegistry {
  ActivityRegistry::new()
    .with("manualTrigger", PassthroughActivity)
    .with("passthrough", PassthroughActivity)
    .with("delay", DelayActivity)
    .with(
      "add",
      activity_fn(|input, ctx| async move {
        let value = input.get("value").and_then(|v| v.as_i64()).unwrap_or(0);
        let amount = ctx.data.get("amount").and_then(|v| v.as_i64()).unwrap_or(1);
        Ok::<_, ActivityError>(serde_json::json!({ "value": value + amount }))
      }),
    )
    .with(
      "fail",
      activity_fn(|_, _| async { Err::<serde_json::Value, _>(ActivityError::invalid_input("bad input")) }),
    )
    .with(
      "flaky",
      activity_fn(|input, ctx| async move {
        let failures = ctx.data.get("failures").and_then(|v| v.as_u64()).unwrap_or(0);
        if u64::from(ctx.attempt) <= failures {
          return Err(ActivityError::http(503, "unavailable"));
        }
        Ok(serde_json::json!({ "attempt": ctx.attempt, "input": input }))
      }),
    )
}

pub fn config() -> EngineConfig {
  EngineConfig {
    cancel_grace_ms: 50,
    lease_ttl_ms: 5_000,
    ..EngineConfig::default()
  }
}

pub fn engine(journal: Arc<dyn Journal>) -> Engine {
  Engine::new(journal, registry(), config())
}

pub fn node(id: &str, node_type: &str) -> NodeDef {
  NodeDef::new(id, node_type)
}

pub fn edge(source: &str, target: &str) -> EdgeDef {
  EdgeDef::new(format!("{}-{}", source, target), source, target)
}

/// A workflow with short retry delays.
pub fn workflow(nodes: Vec<NodeDef>, edges: Vec<EdgeDef>) -> WorkflowDefinition {
  let mut definition = WorkflowDefinition::new("test-workflow");
  definition.nodes = nodes;
  definition.edges = edges;
  definition.settings.retry_delay_ms = 5;
  definition.settings.retry_max_delay_ms = 20;
  definition
}

/// Poll until `check` holds for the execution state.
pub async fn wait_until(
  engine: &Engine,
  execution_id: &str,
  check: impl Fn(&ExecutionState) -> bool,
) -> ExecutionState {
  for _ in 0..300 {
    let state = engine.query(execution_id).await.unwrap();
    if check(&state) {
      return state;
    }
    tokio::time::sleep(Duration::from_millis(10)).await;
  }
  panic!("condition not reached for execution {}", execution_id);
}

pub fn event_names(events: &[JournalEvent]) -> Vec<&'static str> {
  events.iter().map(|e| e.kind.name()).collect()
}

pub fn count(events: &[JournalEvent], name: &str) -> usize {
  events.iter().filter(|e| e.kind.name() == name).count()
}

/// One append seen by a [`ControlledJournal`]: the writer and the assigned
/// sequence, `None` when the append was rejected.
pub type AppendEntry = (String, Option<u64>);

/// Memory journal that logs lease traffic and appends, and can swallow one
/// owner's renewals or reject every append.
#[derive(Default)]
pub struct ControlledJournal {
  inner: MemoryJournal,
  stalled_owner: Mutex<Option<String>>,
  reject_appends: AtomicBool,
  appends: Mutex<Vec<AppendEntry>>,
  acquired: Mutex<Vec<Lease>>,
  released: Mutex<Vec<Lease>>,
}

impl ControlledJournal {
  pub fn new() -> Self {
    Self::default()
  }

  /// Renewals by `owner` succeed without extending the lease.
  pub fn stall_renewals(&self, owner: &str) {
    *self.stalled_owner.lock().unwrap() = Some(owner.to_string());
  }

  pub fn reject_appends(&self) {
    self.reject_appends.store(true, Ordering::SeqCst);
  }

  pub fn appends(&self) -> Vec<AppendEntry> {
    self.appends.lock().unwrap().clone()
  }

  pub fn acquired(&self) -> Vec<Lease> {
    self.acquired.lock().unwrap().clone()
  }

  pub fn released(&self) -> Vec<Lease> {
    self.released.lock().unwrap().clone()
  }
}

#[async_trait]
impl Journal for ControlledJournal {
  async fn acquire_lease(
    &self,
    execution_id: &str,
    owner: &str,
    ttl: Duration,
  ) -> Result<Lease, JournalError> {
    let lease = self.inner.acquire_lease(execution_id, owner, ttl).await?;
    self.acquired.lock().unwrap().push(lease.clone());
    Ok(lease)
  }

  async fn renew_lease(&self, lease: &Lease, ttl: Duration) -> Result<Lease, JournalError> {
    let stalled = self.stalled_owner.lock().unwrap().as_deref() == Some(lease.owner.as_str());
    if stalled {
      return Ok(lease.clone());
    }
    self.inner.renew_lease(lease, ttl).await
  }

  async fn release_lease(&self, lease: &Lease) -> Result<(), JournalError> {
    self.released.lock().unwrap().push(lease.clone());
    self.inner.release_lease(lease).await
  }

  async fn append(&self, lease: &Lease, kind: EventKind) -> Result<JournalEvent, JournalError> {
    let result = if self.reject_appends.load(Ordering::SeqCst) {
      Err(JournalError::Serialization(
        serde_json::from_str::<serde_json::Value>("{").unwrap_err(),
      ))
    } else {
      self.inner.append(lease, kind).await
    };
    let sequence = result.as_ref().ok().map(|e| e.sequence);
    self.appends.lock().unwrap().push((lease.owner.clone(), sequence));
    result
  }

  async fn read(&self, execution_id: &str) -> Result<Vec<JournalEvent>, JournalError> {
    self.inner.read(execution_id).await
  }

  async fn list_executions(&self) -> Result<Vec<String>, JournalError> {
    self.inner.list_executions().await
  }

  async fn unfinished_executions(&self) -> Result<Vec<String>, JournalError> {
    self.inner.unfinished_executions().await
  }
}
