//! Per-execution orchestrator.
//!
//! One orchestrator owns one execution. It is the only writer of that
//! execution's journal and handles its mailbox one message at a time:
//! control signals, node reports and due retries. Every decision is appended
//! to the journal and applied to the record before it takes effect.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use cairn_activity::ActivityRegistry;
use cairn_config::ErrorHandling;
use cairn_executor::{NodeError, NodeExecutor, NodeReport, NodeRequest, RetryPolicy};
use cairn_journal::{
  EventKind, ExecutionFailure, ExecutionFailureKind, ExecutionRecord, ExecutionStatus,
  FailureKind, Journal, JournalError, Lease, NodeFailure, NodeStatus, SkipReason,
};
use cairn_workflow::Graph;
use chrono::Utc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::events::ExecutionNotifier;
use crate::plan::{self, Readiness};
use crate::recovery::PendingWork;
use crate::result::Signal;

/// Everything an orchestrator reacts to.
#[derive(Debug)]
pub(crate) enum Message {
  Signal(Signal),
  Report(NodeReport),
  RetryDue { node_id: String, attempt: u32 },
}

impl From<NodeReport> for Message {
  fn from(report: NodeReport) -> Self {
    Message::Report(report)
  }
}

/// Why an execution stops before its graph is exhausted.
#[derive(Debug)]
enum Halt {
  Cancel { reason: Option<String> },
  Failure(ExecutionFailure),
  Timeout,
}

struct InFlight {
  attempt: u32,
  cancel: CancellationToken,
  handle: JoinHandle<()>,
}

/// Services shared by every orchestrator of an engine.
pub(crate) struct Services<N> {
  pub journal: Arc<dyn Journal>,
  pub registry: Arc<ActivityRegistry>,
  pub executor: NodeExecutor,
  pub notifier: Arc<N>,
  pub config: Arc<EngineConfig>,
}

impl<N> Clone for Services<N> {
  fn clone(&self) -> Self {
    Self {
      journal: self.journal.clone(),
      registry: self.registry.clone(),
      executor: self.executor.clone(),
      notifier: self.notifier.clone(),
      config: self.config.clone(),
    }
  }
}

/// Channels connecting an orchestrator to its control handle.
pub(crate) struct Wiring {
  pub state: watch::Sender<ExecutionRecord>,
  pub mailbox: mpsc::Receiver<Message>,
  pub reply: mpsc::Sender<Message>,
  pub shutdown: CancellationToken,
}

pub(crate) struct Orchestrator<N> {
  services: Services<N>,
  graph: Graph,
  record: ExecutionRecord,
  lease: Lease,
  state: watch::Sender<ExecutionRecord>,
  mailbox: mpsc::Receiver<Message>,
  reply: mpsc::Sender<Message>,
  shutdown: CancellationToken,
  queue: VecDeque<(String, u32)>,
  in_flight: HashMap<String, InFlight>,
  retries: HashMap<String, JoinHandle<()>>,
}

impl<N: ExecutionNotifier> Orchestrator<N> {
  pub(crate) fn new(
    services: Services<N>,
    record: ExecutionRecord,
    lease: Lease,
    wiring: Wiring,
  ) -> Self {
    Self {
      services,
      graph: Graph::new(&record.definition),
      record,
      lease,
      state: wiring.state,
      mailbox: wiring.mailbox,
      reply: wiring.reply,
      shutdown: wiring.shutdown,
      queue: VecDeque::new(),
      in_flight: HashMap::new(),
      retries: HashMap::new(),
    }
  }

  /// Drive the execution until it is terminal, the engine shuts down, or the
  /// lease is lost. Returns the record as last journaled.
  #[instrument(
    name = "workflow_execute",
    skip(self, pending),
    fields(execution_id = %self.record.execution_id, workflow_id = %self.record.workflow_id)
  )]
  pub(crate) async fn run(mut self, pending: Vec<PendingWork>) -> Result<ExecutionRecord, EngineError> {
    let result = self.drive(pending).await;
    self.abort_in_flight();

    if !matches!(result, Err(EngineError::LeaseLost { .. }))
      && let Err(e) = self.services.journal.release_lease(&self.lease).await
    {
      warn!(error = %e, "lease_release_failed");
    }

    match &result {
      Ok(()) if self.record.is_terminal() => {
        info!(status = ?self.record.status, "workflow_finished")
      }
      Ok(()) => info!(status = ?self.record.status, "workflow_detached"),
      Err(e) => error!(error = %e, "workflow_orchestration_failed"),
    }
    result.map(|()| self.record)
  }

  async fn drive(&mut self, pending: Vec<PendingWork>) -> Result<(), EngineError> {
    self.restore(pending);

    // A deadline too far out to represent never fires
    let deadline = self.execution_timeout().and_then(|t| {
      let elapsed = (Utc::now() - self.record.started_at)
        .to_std()
        .unwrap_or_default();
      tokio::time::Instant::now().checked_add(t.saturating_sub(elapsed))
    });
    let expiry = tokio::time::sleep_until(deadline.unwrap_or_else(tokio::time::Instant::now));
    tokio::pin!(expiry);

    let ttl = self.services.config.lease_ttl();
    let period = (ttl / 3).max(Duration::from_millis(1));
    let mut renewal = tokio::time::interval_at(tokio::time::Instant::now() + period, period);

    self.advance().await?;
    while !self.record.is_terminal() {
      tokio::select! {
        biased;

        _ = self.shutdown.cancelled() => return Ok(()),
        _ = &mut expiry, if deadline.is_some() => self.halt(Halt::Timeout).await?,
        message = self.mailbox.recv() => {
          // Never closed while we hold `reply`
          let Some(message) = message else {
            return Ok(());
          };
          self.handle(message).await?;
        }
        _ = renewal.tick() => self.renew(ttl).await?,
      }
      self.advance().await?;
    }
    Ok(())
  }

  fn restore(&mut self, pending: Vec<PendingWork>) {
    for work in pending {
      match work {
        PendingWork::Dispatch { node_id, attempt } => {
          debug!(%node_id, attempt, "node_redispatch");
          self.queue.push_back((node_id, attempt));
        }
        PendingWork::Retry {
          node_id,
          attempt,
          due,
        } => {
          let delay = (due - Utc::now()).to_std().unwrap_or_default();
          debug!(%node_id, attempt, delay_ms = delay.as_millis() as u64, "node_retry_rearmed");
          self.arm_retry(node_id, attempt, delay);
        }
      }
    }
  }

  async fn handle(&mut self, message: Message) -> Result<(), EngineError> {
    match message {
      Message::Signal(signal) => self.on_signal(signal).await,
      Message::Report(report) => self.on_report(report).await,
      Message::RetryDue { node_id, attempt } => {
        self.retries.remove(&node_id);
        let awaiting = self
          .record
          .node(&node_id)
          .is_some_and(|s| s.status == NodeStatus::Running);
        if awaiting {
          self.queue.push_back((node_id, attempt));
        }
        Ok(())
      }
    }
  }

  async fn on_signal(&mut self, signal: Signal) -> Result<(), EngineError> {
    let status = self.record.status;
    match signal {
      Signal::Pause if matches!(status, ExecutionStatus::Initialized | ExecutionStatus::Running) => {
        self.commit(EventKind::ExecutionPaused).await?;
        info!("workflow_paused");
      }
      Signal::Resume if status == ExecutionStatus::Paused => {
        self.commit(EventKind::ExecutionResumed).await?;
        info!("workflow_resumed");
      }
      Signal::Cancel if !status.is_terminal() => {
        self
          .halt(Halt::Cancel {
            reason: Some("cancelled by request".to_string()),
          })
          .await?;
      }
      _ => debug!(%signal, ?status, "signal_ignored"),
    }
    Ok(())
  }

  async fn on_report(&mut self, report: NodeReport) -> Result<(), EngineError> {
    let current = self
      .in_flight
      .get(&report.node_id)
      .is_some_and(|f| f.attempt == report.attempt);
    if !current {
      debug!(node_id = %report.node_id, attempt = report.attempt, "stale_report_discarded");
      return Ok(());
    }
    self.in_flight.remove(&report.node_id);

    let NodeReport {
      node_id,
      attempt,
      outcome,
      duration,
      ..
    } = report;
    let duration_ms = duration.as_millis() as u64;

    match outcome {
      Ok(output) => {
        self
          .commit(EventKind::NodeSucceeded {
            node_id: node_id.clone(),
            attempt,
            output,
          })
          .await?;
        info!(%node_id, attempt, duration_ms, "node_succeeded");
      }
      Err(error) => {
        let policy = RetryPolicy::from_settings(
          &self.record.definition.settings,
          self.record.definition.node(&node_id),
        );
        let failure = NodeFailure::new(error.to_string(), failure_kind(&error), attempt);

        if policy.should_retry(attempt, &error) {
          let delay = policy.delay_for(attempt);
          let delay_ms = delay.as_millis() as u64;
          self
            .commit(EventKind::NodeRetried {
              node_id: node_id.clone(),
              attempt,
              error: failure,
              delay_ms,
            })
            .await?;
          warn!(%node_id, attempt, delay_ms, error = %error, "node_retry_scheduled");
          self.arm_retry(node_id, attempt + 1, delay);
        } else {
          warn!(%node_id, attempt, duration_ms, error = %error, "node_failed");
          self
            .commit(EventKind::NodeFailed {
              node_id,
              attempt,
              error: failure,
            })
            .await?;
        }
      }
    }
    Ok(())
  }

  fn arm_retry(&mut self, node_id: String, attempt: u32, delay: Duration) {
    let reply = self.reply.clone();
    let due = Message::RetryDue {
      node_id: node_id.clone(),
      attempt,
    };
    let timer = tokio::spawn(async move {
      tokio::time::sleep(delay).await;
      let _ = reply.send(due).await;
    });
    if let Some(previous) = self.retries.insert(node_id, timer) {
      previous.abort();
    }
  }

  /// Journal every decision the current record allows, then dispatch and
  /// check for completion.
  async fn advance(&mut self) -> Result<(), EngineError> {
    if self.record.is_terminal() || self.shutdown.is_cancelled() {
      return Ok(());
    }
    if let Some(halt) = self.pending_halt() {
      return self.halt(halt).await;
    }

    let mode = self.record.definition.settings.error_handling;
    loop {
      let mut progressed = false;
      for node_id in self.graph.nodes().to_vec() {
        let idle = self
          .record
          .node(&node_id)
          .is_some_and(|s| s.status == NodeStatus::Idle && !s.is_scheduled());
        if !idle {
          continue;
        }
        match plan::readiness(&self.graph, &self.record, &node_id, mode) {
          Readiness::Wait => continue,
          Readiness::Unreachable => {
            self
              .commit(EventKind::NodeSkipped {
                node_id: node_id.clone(),
                reason: SkipReason::Unreachable,
                output: None,
              })
              .await?;
            debug!(%node_id, "node_unreachable");
          }
          Readiness::Ready => self.schedule(node_id).await?,
        }
        progressed = true;
      }
      if !progressed {
        break;
      }
    }

    self.dispatch().await?;
    self.finish_if_done().await
  }

  async fn schedule(&mut self, node_id: String) -> Result<(), EngineError> {
    let disabled = self
      .record
      .definition
      .node(&node_id)
      .is_some_and(|n| n.disabled);

    if disabled {
      let input = plan::node_input(&self.graph, &self.record, &node_id);
      self
        .commit(EventKind::NodeSkipped {
          node_id: node_id.clone(),
          reason: SkipReason::Disabled,
          output: Some(input),
        })
        .await?;
      debug!(%node_id, "node_disabled");
    } else {
      self
        .commit(EventKind::NodeScheduled {
          node_id: node_id.clone(),
        })
        .await?;
      self.queue.push_back((node_id, 1));
    }
    Ok(())
  }

  async fn dispatch(&mut self) -> Result<(), EngineError> {
    if self.record.status == ExecutionStatus::Paused {
      return Ok(());
    }
    let limit = self
      .record
      .definition
      .settings
      .max_concurrency
      .unwrap_or(self.services.config.max_concurrency)
      .max(1);

    while self.in_flight.len() < limit {
      let Some((node_id, attempt)) = self.queue.pop_front() else {
        break;
      };
      self.start_attempt(node_id, attempt).await?;
    }
    Ok(())
  }

  async fn start_attempt(&mut self, node_id: String, attempt: u32) -> Result<(), EngineError> {
    let Some(node) = self.record.definition.node(&node_id).cloned() else {
      warn!(%node_id, "node_missing_from_definition");
      return Ok(());
    };

    self
      .commit(EventKind::NodeStarted {
        node_id: node_id.clone(),
        attempt,
      })
      .await?;

    let Some(activity) = self.services.registry.get(&node.node_type) else {
      let message = format!("no activity registered for node type '{}'", node.node_type);
      warn!(%node_id, node_type = %node.node_type, "activity_missing");
      return self
        .commit(EventKind::NodeFailed {
          node_id,
          attempt,
          error: NodeFailure::new(message, FailureKind::Terminal, attempt),
        })
        .await;
    };

    let request = NodeRequest {
      task_id: uuid::Uuid::new_v4().to_string(),
      execution_id: self.record.execution_id.clone(),
      workflow_id: self.record.workflow_id.clone(),
      node_id: node_id.clone(),
      node_type: node.node_type,
      attempt,
      input: plan::node_input(&self.graph, &self.record, &node_id),
      data: node.data,
      organization_id: self.record.organization_id.clone(),
      trigger_type: self.record.trigger_type,
      timeout: node
        .timeout_ms
        .map(Duration::from_millis)
        .unwrap_or_else(|| self.services.config.node_timeout()),
    };

    let cancel = CancellationToken::new();
    let handle = self
      .services
      .executor
      .spawn(activity, request, cancel.clone(), self.reply.clone());
    self.in_flight.insert(
      node_id,
      InFlight {
        attempt,
        cancel,
        handle,
      },
    );
    Ok(())
  }

  fn pending_halt(&self) -> Option<Halt> {
    if plan::cancel_pending(&self.record) {
      return Some(Halt::Cancel { reason: None });
    }
    if self.deadline_passed() {
      return Some(Halt::Timeout);
    }
    if self.record.definition.settings.error_handling == ErrorHandling::Stop
      && let Some((node_id, failure)) = plan::unhandled_failure(&self.graph, &self.record)
    {
      return Some(Halt::Failure(node_failure(node_id, failure)));
    }
    // Only a cancel closes out nodes without leaving one of the causes above
    if plan::halt_started(&self.record) {
      return Some(Halt::Cancel { reason: None });
    }
    None
  }

  /// Stop the execution: close out every unfinished node, then journal the
  /// terminal event.
  ///
  /// A failure or timeout aborts in-flight attempts at once. A cancel fires
  /// their tokens and journals whatever they report within the grace period;
  /// attempts still running after it are failed as cancelled.
  async fn halt(&mut self, halt: Halt) -> Result<(), EngineError> {
    let cancelling = matches!(halt, Halt::Cancel { .. });
    let (kind, message) = if cancelling {
      (FailureKind::Cancelled, "execution cancelled")
    } else {
      (FailureKind::Aborted, "execution halted")
    };
    info!(reason = ?halt, in_flight = self.in_flight.len(), "workflow_halting");

    for (_, timer) in self.retries.drain() {
      timer.abort();
    }
    self.queue.clear();
    for flight in self.in_flight.values() {
      flight.cancel.cancel();
    }

    if !cancelling {
      self.fail_in_flight(kind, message).await?;
    }

    let nodes = self.graph.nodes().to_vec();
    for node_id in &nodes {
      let Some(state) = self.record.node(node_id) else {
        continue;
      };
      if state.status == NodeStatus::Running && !self.in_flight.contains_key(node_id) {
        let attempt = state.attempt;
        self
          .commit(EventKind::NodeFailed {
            node_id: node_id.clone(),
            attempt,
            error: NodeFailure::new(message, kind, attempt),
          })
          .await?;
      }
    }
    for node_id in nodes {
      let idle = self
        .record
        .node(&node_id)
        .is_some_and(|s| s.status == NodeStatus::Idle);
      if idle {
        self
          .commit(EventKind::NodeSkipped {
            node_id,
            reason: SkipReason::Halted,
            output: None,
          })
          .await?;
      }
    }

    if cancelling {
      if !self.drain_cancelled().await? {
        return Ok(());
      }
      self.fail_in_flight(kind, message).await?;
    }

    let terminal = match halt {
      Halt::Cancel { reason } => EventKind::ExecutionCancelled { reason },
      Halt::Failure(failure) => EventKind::ExecutionFailed { failure },
      Halt::Timeout => EventKind::ExecutionFailed {
        failure: ExecutionFailure {
          message: format!(
            "execution exceeded its timeout of {}ms",
            self.execution_timeout().unwrap_or_default().as_millis()
          ),
          kind: ExecutionFailureKind::Timeout,
          node_id: None,
          attempt: None,
        },
      },
    };
    self.commit(terminal).await
  }

  /// Journal the reports of cancelled attempts until they are all in or the
  /// grace period ends. Returns `false` if the engine shut down first.
  async fn drain_cancelled(&mut self) -> Result<bool, EngineError> {
    let grace = tokio::time::sleep(self.services.config.cancel_grace());
    tokio::pin!(grace);

    while !self.in_flight.is_empty() {
      tokio::select! {
        biased;

        _ = self.shutdown.cancelled() => return Ok(false),
        _ = &mut grace => break,
        message = self.mailbox.recv() => match message {
          Some(Message::Report(report)) => self.on_cancelled_report(report).await?,
          Some(other) => debug!(ignored = ?other, "message_ignored_while_cancelling"),
          None => break,
        },
      }
    }
    Ok(true)
  }

  async fn on_cancelled_report(&mut self, report: NodeReport) -> Result<(), EngineError> {
    let current = self
      .in_flight
      .get(&report.node_id)
      .is_some_and(|f| f.attempt == report.attempt);
    if !current {
      debug!(node_id = %report.node_id, attempt = report.attempt, "stale_report_discarded");
      return Ok(());
    }
    self.in_flight.remove(&report.node_id);

    let NodeReport {
      node_id,
      attempt,
      outcome,
      ..
    } = report;
    let event = match outcome {
      Ok(output) => {
        info!(%node_id, attempt, "node_finished_after_cancel");
        EventKind::NodeSucceeded {
          node_id,
          attempt,
          output,
        }
      }
      Err(error) => {
        let message = match error {
          NodeError::Cancelled => "execution cancelled".to_string(),
          other => other.to_string(),
        };
        EventKind::NodeFailed {
          node_id,
          attempt,
          error: NodeFailure::new(message, FailureKind::Cancelled, attempt),
        }
      }
    };
    self.commit(event).await
  }

  /// Fail every attempt still in flight, in node id order.
  async fn fail_in_flight(&mut self, kind: FailureKind, message: &str) -> Result<(), EngineError> {
    let mut flights: Vec<(String, InFlight)> = self.in_flight.drain().collect();
    flights.sort_by(|a, b| a.0.cmp(&b.0));
    for (node_id, flight) in flights {
      flight.cancel.cancel();
      self
        .commit(EventKind::NodeFailed {
          node_id,
          attempt: flight.attempt,
          error: NodeFailure::new(message, kind, flight.attempt),
        })
        .await?;
    }
    Ok(())
  }

  async fn finish_if_done(&mut self) -> Result<(), EngineError> {
    if self.record.is_terminal() || self.record.status == ExecutionStatus::Paused {
      return Ok(());
    }
    if self.record.node_states.values().any(|s| !s.status.is_terminal()) {
      return Ok(());
    }

    let terminal = match plan::unhandled_failure(&self.graph, &self.record) {
      Some((node_id, failure)) => EventKind::ExecutionFailed {
        failure: node_failure(node_id, failure),
      },
      None => EventKind::ExecutionCompleted,
    };
    self.commit(terminal).await
  }

  /// Append an event under the lease, then apply and publish it.
  async fn commit(&mut self, kind: EventKind) -> Result<(), EngineError> {
    let event = match self.services.journal.append(&self.lease, kind).await {
      Ok(event) => event,
      Err(e) => return Err(self.journal_error(e)),
    };
    self.record.apply(&event)?;
    debug!(sequence = event.sequence, event = event.kind.name(), "event_committed");

    self.services.notifier.notify(&event);
    self.state.send_replace(self.record.clone());
    Ok(())
  }

  async fn renew(&mut self, ttl: Duration) -> Result<(), EngineError> {
    match self.services.journal.renew_lease(&self.lease, ttl).await {
      Ok(lease) => {
        self.lease = lease;
        Ok(())
      }
      Err(e @ JournalError::Fenced { .. }) => Err(self.journal_error(e)),
      // The next append surfaces a persistent failure
      Err(e) => {
        warn!(error = %e, "lease_renewal_failed");
        Ok(())
      }
    }
  }

  fn journal_error(&self, error: JournalError) -> EngineError {
    match error {
      JournalError::Fenced { token, current, .. } => {
        error!(token, current, "lease_lost");
        EngineError::LeaseLost {
          execution_id: self.record.execution_id.clone(),
        }
      }
      other => other.into(),
    }
  }

  fn execution_timeout(&self) -> Option<Duration> {
    self
      .record
      .definition
      .settings
      .timeout_minutes
      .map(|m| Duration::from_secs(m.saturating_mul(60)))
      .or_else(|| {
        self
          .services
          .config
          .execution_timeout_ms
          .map(Duration::from_millis)
      })
  }

  fn deadline_passed(&self) -> bool {
    self.execution_timeout().is_some_and(|timeout| {
      (Utc::now() - self.record.started_at)
        .to_std()
        .is_ok_and(|elapsed| elapsed >= timeout)
    })
  }

  fn abort_in_flight(&mut self) {
    for (_, flight) in self.in_flight.drain() {
      flight.cancel.cancel();
      flight.handle.abort();
    }
    for (_, timer) in self.retries.drain() {
      timer.abort();
    }
  }
}

fn failure_kind(error: &NodeError) -> FailureKind {
  match error {
    NodeError::Retryable { .. } => FailureKind::Retryable,
    NodeError::Timeout { .. } => FailureKind::Timeout,
    NodeError::Terminal { .. } | NodeError::Cancelled => FailureKind::Terminal,
  }
}

fn node_failure(node_id: &str, failure: &NodeFailure) -> ExecutionFailure {
  ExecutionFailure {
    message: plan::failure_message(node_id, failure),
    kind: ExecutionFailureKind::NodeFailed,
    node_id: Some(node_id.to_string()),
    attempt: Some(failure.attempt),
  }
}
