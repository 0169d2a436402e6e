//! Workflow runner with channel-based triggering.
//!
//! The `WorkflowRunner` owns an mpsc channel for receiving trigger payloads
//! and starts one execution of its workflow per payload.

use std::sync::Arc;

use cairn_config::{TriggerType, WorkflowDefinition};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::engine::Engine;
use crate::error::EngineError;
use crate::events::ExecutionNotifier;
use crate::result::{ExecutionResult, Signal};

/// A runner that executes a workflow in response to trigger payloads.
///
/// # Usage
///
/// ```ignore
/// let runner = WorkflowRunner::new(engine, definition, "org-1", TriggerType::Webhook);
///
/// // Get sender for external triggers (webhooks, UI, etc.)
/// let sender = runner.sender();
///
/// // Start the execution loop
/// let cancel = CancellationToken::new();
/// runner.start(cancel).await?;
/// ```
pub struct WorkflowRunner<N: ExecutionNotifier> {
  sender: mpsc::Sender<serde_json::Value>,
  receiver: mpsc::Receiver<serde_json::Value>,
  engine: Engine<N>,
  definition: Arc<WorkflowDefinition>,
  organization_id: String,
  trigger_type: TriggerType,
}

impl<N: ExecutionNotifier> WorkflowRunner<N> {
  pub fn new(
    engine: Engine<N>,
    definition: WorkflowDefinition,
    organization_id: impl Into<String>,
    trigger_type: TriggerType,
  ) -> Self {
    Self::with_buffer_size(engine, definition, organization_id, trigger_type, 100)
  }

  /// Create a new workflow runner with a custom buffer size.
  pub fn with_buffer_size(
    engine: Engine<N>,
    definition: WorkflowDefinition,
    organization_id: impl Into<String>,
    trigger_type: TriggerType,
    buffer_size: usize,
  ) -> Self {
    let (sender, receiver) = mpsc::channel(buffer_size);
    Self {
      sender,
      receiver,
      engine,
      definition: Arc::new(definition),
      organization_id: organization_id.into(),
      trigger_type,
    }
  }

  /// Get a sender handle for triggering workflow executions.
  pub fn sender(&self) -> mpsc::Sender<serde_json::Value> {
    self.sender.clone()
  }

  /// Queue a payload for the execution loop.
  pub async fn run(&self, payload: serde_json::Value) -> Result<(), EngineError> {
    self
      .sender
      .send(payload)
      .await
      .map_err(|_| EngineError::RunnerClosed)
  }

  /// Start the execution loop.
  ///
  /// Payloads are executed one at a time. Cancelling the token cancels the
  /// execution in progress and ends the loop.
  pub async fn start(mut self, cancel: CancellationToken) -> Result<(), EngineError> {
    let workflow_id = self.definition.id.clone();
    info!(%workflow_id, trigger_type = %self.trigger_type, "workflow_runner_started");

    loop {
      let payload = tokio::select! {
        _ = cancel.cancelled() => {
          info!(%workflow_id, "workflow_runner_cancelled");
          break;
        }
        payload = self.receiver.recv() => payload,
      };
      let Some(payload) = payload else {
        info!(%workflow_id, "workflow_runner_closed");
        break;
      };

      let execution_id = match self.trigger(payload).await {
        Ok(execution_id) => execution_id,
        Err(e) => {
          error!(%workflow_id, error = %e, "workflow_trigger_failed");
          continue;
        }
      };

      tokio::select! {
        result = self.engine.await_result(&execution_id) => match result {
          Ok(result) => info!(
            %workflow_id,
            %execution_id,
            status = ?result.status,
            nodes_succeeded = result.results.len(),
            "workflow_execution_finished"
          ),
          Err(e) => error!(%workflow_id, %execution_id, error = %e, "workflow_execution_lost"),
        },
        _ = cancel.cancelled() => {
          if let Err(e) = self.engine.signal(&execution_id, Signal::Cancel).await {
            warn!(%execution_id, error = %e, "workflow_cancel_failed");
          }
          info!(%workflow_id, "workflow_runner_cancelled");
          break;
        }
      }
    }

    Ok(())
  }

  /// Start one execution and wait for its result, without the loop.
  pub async fn execute_once(
    &self,
    payload: serde_json::Value,
  ) -> Result<ExecutionResult, EngineError> {
    let execution_id = self.trigger(payload).await?;
    self.engine.await_result(&execution_id).await
  }

  pub fn definition(&self) -> &WorkflowDefinition {
    &self.definition
  }

  async fn trigger(&self, payload: serde_json::Value) -> Result<String, EngineError> {
    self
      .engine
      .start(
        self.definition.as_ref().clone(),
        payload,
        &self.organization_id,
        self.trigger_type,
      )
      .await
  }
}
