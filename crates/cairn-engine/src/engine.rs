//! Control interface over executions.
//!
//! The `Engine` validates definitions, creates executions, routes signals to
//! their orchestrators and answers queries. Each live execution is driven by
//! one orchestrator task; finished executions stay queryable in memory for the
//! configured retention and can always be rebuilt from the journal.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use cairn_activity::ActivityRegistry;
use cairn_config::{TriggerType, WorkflowDefinition};
use cairn_executor::NodeExecutor;
use cairn_journal::{EventKind, ExecutionRecord, Journal, JournalEvent, Lease};
use cairn_workflow::{ValidationReport, validate_with};
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, instrument, warn};

use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::events::{ExecutionNotifier, NoopNotifier};
use crate::orchestrator::{Message, Orchestrator, Services, Wiring};
use crate::recovery::{self, PendingWork};
use crate::result::{ExecutionResult, ExecutionState, Signal};

/// The durable workflow engine.
///
/// Generic over `N: ExecutionNotifier` to allow different notification strategies.
/// Use `Engine::new()` for an engine with no-op notifications, or
/// `Engine::with_notifier()` to observe every journaled event.
pub struct Engine<N: ExecutionNotifier = NoopNotifier> {
  inner: Arc<Inner<N>>,
}

impl<N: ExecutionNotifier> Clone for Engine<N> {
  fn clone(&self) -> Self {
    Self {
      inner: self.inner.clone(),
    }
  }
}

struct Inner<N> {
  services: Services<N>,
  executions: Mutex<HashMap<String, ExecutionHandle>>,
  tasks: TaskTracker,
  shutdown: CancellationToken,
}

#[derive(Clone)]
struct ExecutionHandle {
  mailbox: mpsc::Sender<Message>,
  state: watch::Receiver<ExecutionRecord>,
}

impl ExecutionHandle {
  fn is_terminal(&self) -> bool {
    self.state.borrow().is_terminal()
  }

  fn snapshot(&self) -> ExecutionState {
    ExecutionState::from(&*self.state.borrow())
  }
}

impl<N> Inner<N> {
  fn executions(&self) -> MutexGuard<'_, HashMap<String, ExecutionHandle>> {
    self.executions.lock().unwrap_or_else(|e| e.into_inner())
  }

  fn live(&self, execution_id: &str) -> Option<ExecutionHandle> {
    self.executions().get(execution_id).cloned()
  }

  /// Drop the handle of `execution_id` if it still belongs to `state`.
  fn forget(&self, execution_id: &str, state: &watch::Receiver<ExecutionRecord>) {
    let mut executions = self.executions();
    if executions
      .get(execution_id)
      .is_some_and(|h| h.state.same_channel(state))
    {
      executions.remove(execution_id);
    }
  }
}

impl Engine<NoopNotifier> {
  /// Create an engine with no-op notifications.
  pub fn new(journal: Arc<dyn Journal>, registry: ActivityRegistry, config: EngineConfig) -> Self {
    Self::with_notifier(journal, registry, config, NoopNotifier)
  }
}

impl<N: ExecutionNotifier> Engine<N> {
  /// Create an engine with a custom notifier.
  pub fn with_notifier(
    journal: Arc<dyn Journal>,
    registry: ActivityRegistry,
    config: EngineConfig,
    notifier: N,
  ) -> Self {
    let executor = NodeExecutor::new(config.executor_config());
    Self {
      inner: Arc::new(Inner {
        services: Services {
          journal,
          registry: Arc::new(registry),
          executor,
          notifier: Arc::new(notifier),
          config: Arc::new(config),
        },
        executions: Mutex::new(HashMap::new()),
        tasks: TaskTracker::new(),
        shutdown: CancellationToken::new(),
      }),
    }
  }

  pub fn config(&self) -> &EngineConfig {
    &self.inner.services.config
  }

  pub fn registry(&self) -> &ActivityRegistry {
    &self.inner.services.registry
  }

  pub fn journal(&self) -> &Arc<dyn Journal> {
    &self.inner.services.journal
  }

  /// Validate a definition against the graph rules and this engine's registry.
  pub fn validate(&self, definition: &WorkflowDefinition) -> ValidationReport {
    let registry = &self.inner.services.registry;
    validate_with(definition, |node_type| registry.contains(node_type))
  }

  /// Validate `definition`, journal `ExecutionStarted` and begin driving it.
  ///
  /// Returns the new execution id. Nothing is journaled when validation fails.
  #[instrument(
    name = "workflow_start",
    skip(self, definition, input),
    fields(workflow_id = %definition.id)
  )]
  pub async fn start(
    &self,
    definition: WorkflowDefinition,
    input: serde_json::Value,
    organization_id: &str,
    trigger_type: TriggerType,
  ) -> Result<String, EngineError> {
    if self.inner.shutdown.is_cancelled() {
      return Err(EngineError::ShuttingDown);
    }

    let report = self.validate(&definition);
    if !report.valid {
      let errors = report.messages();
      warn!(errors = ?errors, "workflow_rejected");
      return Err(EngineError::Validation { errors });
    }

    let services = &self.inner.services;
    let execution_id = uuid::Uuid::new_v4().to_string();
    let lease = services
      .journal
      .acquire_lease(
        &execution_id,
        &services.config.owner_id,
        services.config.lease_ttl(),
      )
      .await?;

    let appended = services
      .journal
      .append(
        &lease,
        EventKind::ExecutionStarted {
          workflow_id: definition.id.clone(),
          definition,
          input,
          organization_id: organization_id.to_string(),
          trigger_type,
        },
      )
      .await;
    let event = match appended {
      Ok(event) => event,
      Err(e) => {
        if let Err(release) = services.journal.release_lease(&lease).await {
          warn!(%execution_id, error = %release, "lease_release_failed");
        }
        return Err(e.into());
      }
    };
    let record = ExecutionRecord::start(&event)?;
    services.notifier.notify(&event);

    info!(%execution_id, %trigger_type, "workflow_started");
    self.launch(record, lease, Vec::new());
    Ok(execution_id)
  }

  /// Deliver a control signal.
  ///
  /// Signals to finished executions are ignored. Executions that exist in the
  /// journal but are not driven by this engine must be resumed first.
  #[instrument(name = "workflow_signal", skip(self))]
  pub async fn signal(&self, execution_id: &str, signal: Signal) -> Result<(), EngineError> {
    let Some(handle) = self.inner.live(execution_id) else {
      let record = self.load_record(execution_id).await?;
      if record.is_terminal() {
        debug!("signal_ignored");
        return Ok(());
      }
      return Err(EngineError::Detached(execution_id.to_string()));
    };

    if handle.is_terminal() {
      debug!("signal_ignored");
      return Ok(());
    }
    let delivered = handle.mailbox.send(Message::Signal(signal)).await.is_ok();
    if !delivered && !handle.is_terminal() {
      return Err(EngineError::Detached(execution_id.to_string()));
    }
    Ok(())
  }

  /// Current state of an execution, live if driven here, otherwise replayed.
  pub async fn query(&self, execution_id: &str) -> Result<ExecutionState, EngineError> {
    match self.inner.live(execution_id) {
      Some(handle) => Ok(handle.snapshot()),
      None => Ok(ExecutionState::from(&self.load_record(execution_id).await?)),
    }
  }

  /// Full record of an execution driven by this engine.
  pub fn record(&self, execution_id: &str) -> Result<ExecutionRecord, EngineError> {
    self
      .inner
      .live(execution_id)
      .map(|h| h.state.borrow().clone())
      .ok_or_else(|| EngineError::NotFound(execution_id.to_string()))
  }

  /// Watch the record of an execution driven by this engine.
  pub fn subscribe(
    &self,
    execution_id: &str,
  ) -> Result<watch::Receiver<ExecutionRecord>, EngineError> {
    self
      .inner
      .live(execution_id)
      .map(|h| h.state)
      .ok_or_else(|| EngineError::NotFound(execution_id.to_string()))
  }

  /// Wait for an execution to finish.
  ///
  /// Fails with [`EngineError::Detached`] if the engine stops driving the
  /// execution first (shutdown or lost lease).
  pub async fn await_result(&self, execution_id: &str) -> Result<ExecutionResult, EngineError> {
    let detached = || EngineError::Detached(execution_id.to_string());

    let Some(handle) = self.inner.live(execution_id) else {
      let record = self.load_record(execution_id).await?;
      return ExecutionResult::from_record(&record).ok_or_else(detached);
    };

    let mut state = handle.state;
    let record = state
      .wait_for(|r| r.is_terminal())
      .await
      .map_err(|_| detached())?
      .clone();
    ExecutionResult::from_record(&record).ok_or_else(detached)
  }

  /// Take over an execution from the journal and continue driving it.
  ///
  /// Finished executions are only replayed. Fails with a lease error while
  /// another owner holds a live lease.
  #[instrument(name = "workflow_resume", skip(self))]
  pub async fn resume(&self, execution_id: &str) -> Result<ExecutionState, EngineError> {
    if let Some(handle) = self.inner.live(execution_id) {
      return Ok(handle.snapshot());
    }
    if self.inner.shutdown.is_cancelled() {
      return Err(EngineError::ShuttingDown);
    }

    let services = &self.inner.services;
    let lease = services
      .journal
      .acquire_lease(
        execution_id,
        &services.config.owner_id,
        services.config.lease_ttl(),
      )
      .await?;

    let loaded = self.replay(execution_id).await;

    let (events, record) = match loaded {
      Ok(loaded) if !loaded.1.is_terminal() => loaded,
      other => {
        if let Err(e) = services.journal.release_lease(&lease).await {
          warn!(error = %e, "lease_release_failed");
        }
        return other.map(|(_, record)| ExecutionState::from(&record));
      }
    };

    let pending = recovery::pending_work(&events, &record);
    info!(
      pending = pending.len(),
      sequence = record.last_sequence,
      status = ?record.status,
      "workflow_recovered"
    );
    let state = ExecutionState::from(&record);
    self.launch(record, lease, pending);
    Ok(state)
  }

  /// Resume every unfinished execution in the journal that no one else owns.
  ///
  /// Returns the ids now driven by this engine.
  pub async fn recover(&self) -> Result<Vec<String>, EngineError> {
    let mut resumed = Vec::new();
    for execution_id in self.inner.services.journal.unfinished_executions().await? {
      match self.resume(&execution_id).await {
        Ok(state) if !state.status.is_terminal() => resumed.push(execution_id),
        Ok(_) => {}
        Err(e) => warn!(%execution_id, error = %e, "execution_recovery_skipped"),
      }
    }
    Ok(resumed)
  }

  /// Rebuild an execution record from its journal.
  pub async fn load_record(&self, execution_id: &str) -> Result<ExecutionRecord, EngineError> {
    self.replay(execution_id).await.map(|(_, record)| record)
  }

  async fn replay(
    &self,
    execution_id: &str,
  ) -> Result<(Vec<JournalEvent>, ExecutionRecord), EngineError> {
    let events = self.events(execution_id).await?;
    let record = ExecutionRecord::replay(&events)?;
    Ok((events, record))
  }

  /// The journal of an execution.
  pub async fn events(&self, execution_id: &str) -> Result<Vec<JournalEvent>, EngineError> {
    let events = self.inner.services.journal.read(execution_id).await?;
    if events.is_empty() {
      return Err(EngineError::NotFound(execution_id.to_string()));
    }
    Ok(events)
  }

  /// Stop driving every execution and release their leases.
  ///
  /// In-flight attempts are aborted. Unfinished executions stay in the journal
  /// and can be resumed by any engine.
  pub async fn shutdown(&self) {
    info!(live = self.inner.executions().len(), "engine_shutdown");
    self.inner.shutdown.cancel();
    self.inner.tasks.close();
    self.inner.tasks.wait().await;
  }

  fn launch(&self, record: ExecutionRecord, lease: Lease, pending: Vec<PendingWork>) {
    let inner = &self.inner;
    let execution_id = record.execution_id.clone();
    let (reply, mailbox) = mpsc::channel(inner.services.config.mailbox_capacity.max(1));
    let (state, receiver) = watch::channel(record.clone());

    let orchestrator = Orchestrator::new(
      inner.services.clone(),
      record,
      lease,
      Wiring {
        state,
        mailbox,
        reply: reply.clone(),
        shutdown: inner.shutdown.child_token(),
      },
    );
    inner.executions().insert(
      execution_id.clone(),
      ExecutionHandle {
        mailbox: reply,
        state: receiver.clone(),
      },
    );

    let owner = self.inner.clone();
    inner.tasks.spawn(async move {
      match orchestrator.run(pending).await {
        Ok(record) if record.is_terminal() => {
          retain(Arc::downgrade(&owner), execution_id, receiver)
        }
        _ => owner.forget(&execution_id, &receiver),
      }
    });
  }
}

/// Keep a finished execution queryable for the retention period.
fn retain<N: ExecutionNotifier>(
  owner: Weak<Inner<N>>,
  execution_id: String,
  state: watch::Receiver<ExecutionRecord>,
) {
  let Some(retention) = owner.upgrade().map(|o| o.services.config.retention()) else {
    return;
  };
  tokio::spawn(async move {
    tokio::time::sleep(retention).await;
    if let Some(owner) = owner.upgrade() {
      owner.forget(&execution_id, &state);
      debug!(%execution_id, "execution_evicted");
    }
  });
}
