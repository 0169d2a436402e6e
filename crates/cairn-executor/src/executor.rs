//! Node executor implementation.

use std::sync::Arc;
use std::time::{Duration, Instant};

use cairn_activity::{Activity, ActivityContext, ErrorClass};
use cairn_config::TriggerType;
use tokio::sync::{Semaphore, mpsc};
use tokio::task::{AbortHandle, JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::error::NodeError;
use crate::result::NodeReport;

/// Everything needed to run one attempt of one node.
#[derive(Debug, Clone)]
pub struct NodeRequest {
  /// Unique id of this attempt.
  pub task_id: String,
  pub execution_id: String,
  pub workflow_id: String,
  pub node_id: String,
  pub node_type: String,
  /// 1-based attempt number.
  pub attempt: u32,
  /// Input resolved from upstream outputs.
  pub input: serde_json::Value,
  /// Node configuration from the definition.
  pub data: serde_json::Value,
  pub organization_id: String,
  pub trigger_type: TriggerType,
  pub timeout: Duration,
}

/// Limits shared by every attempt run through one executor.
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
  /// Attempts running at once across all executions.
  pub max_concurrent: usize,
  /// How long a cancelled attempt may keep running before it is aborted.
  pub cancel_grace: Duration,
  /// Whether attempts that time out may be retried.
  pub retry_on_timeout: bool,
}

impl Default for ExecutorConfig {
  fn default() -> Self {
    Self {
      max_concurrent: 64,
      cancel_grace: Duration::from_secs(5),
      retry_on_timeout: true,
    }
  }
}

/// Runs node attempts against their Activities.
#[derive(Clone)]
pub struct NodeExecutor {
  permits: Arc<Semaphore>,
  config: ExecutorConfig,
}

/// Aborts the activity task when the attempt future is dropped.
struct AbortOnDrop(AbortHandle);

impl Drop for AbortOnDrop {
  fn drop(&mut self) {
    self.0.abort();
  }
}

impl NodeExecutor {
  pub fn new(config: ExecutorConfig) -> Self {
    Self {
      permits: Arc::new(Semaphore::new(config.max_concurrent.max(1))),
      config,
    }
  }

  pub fn config(&self) -> &ExecutorConfig {
    &self.config
  }

  /// Execute one attempt and report its outcome. Never panics on Activity panics.
  #[instrument(
    name = "task_execute",
    skip(self, activity, request, cancel),
    fields(
      execution_id = %request.execution_id,
      node_id = %request.node_id,
      task_id = %request.task_id,
      attempt = request.attempt,
    )
  )]
  pub async fn execute(
    &self,
    activity: Arc<dyn Activity>,
    request: NodeRequest,
    cancel: CancellationToken,
  ) -> NodeReport {
    let started = Instant::now();
    let outcome = self.execute_inner(activity, &request, cancel).await;
    let duration = started.elapsed();

    match &outcome {
      Ok(_) => {
        info!(duration_ms = duration.as_millis() as u64, "task_completed");
      }
      Err(e) => {
        warn!(
          error = %e,
          retryable = e.is_retryable(),
          duration_ms = duration.as_millis() as u64,
          "task_failed"
        );
      }
    }

    NodeReport {
      task_id: request.task_id,
      node_id: request.node_id,
      attempt: request.attempt,
      outcome,
      duration,
    }
  }

  async fn execute_inner(
    &self,
    activity: Arc<dyn Activity>,
    request: &NodeRequest,
    cancel: CancellationToken,
  ) -> Result<serde_json::Value, NodeError> {
    if cancel.is_cancelled() {
      return Err(NodeError::Cancelled);
    }

    let _permit = tokio::select! {
      permit = self.permits.clone().acquire_owned() => {
        permit.map_err(|_| NodeError::terminal("node executor is shut down"))?
      }
      _ = cancel.cancelled() => return Err(NodeError::Cancelled),
    };

    info!(input = %request.input, "task_started");

    let ctx = ActivityContext {
      execution_id: request.execution_id.clone(),
      workflow_id: request.workflow_id.clone(),
      node_id: request.node_id.clone(),
      node_type: request.node_type.clone(),
      data: request.data.clone(),
      attempt: request.attempt,
      organization_id: request.organization_id.clone(),
      trigger_type: request.trigger_type,
      cancel: cancel.clone(),
    };

    let classifier = activity.clone();
    let input = request.input.clone();
    let mut work: JoinHandle<_> = tokio::spawn(async move { activity.execute(input, ctx).await });
    let _guard = AbortOnDrop(work.abort_handle());

    let first = tokio::select! {
      joined = tokio::time::timeout(request.timeout, &mut work) => Some(joined),
      _ = cancel.cancelled() => None,
    };

    let joined = match first {
      Some(Ok(joined)) => joined,
      Some(Err(_elapsed)) => {
        return Err(NodeError::Timeout {
          timeout_ms: request.timeout.as_millis() as u64,
          retryable: self.config.retry_on_timeout,
        });
      }
      None => match tokio::time::timeout(self.config.cancel_grace, &mut work).await {
        Ok(joined) => {
          debug!("cancelled task finished within grace period");
          joined
        }
        Err(_) => return Err(NodeError::Cancelled),
      },
    };

    match joined {
      Ok(Ok(output)) => Ok(output),
      Ok(Err(e)) => Err(match classifier.classify(&e) {
        ErrorClass::Retryable => NodeError::retryable(e.to_string()),
        ErrorClass::Terminal => NodeError::terminal(e.to_string()),
      }),
      Err(join_error) if join_error.is_panic() => {
        Err(NodeError::terminal("activity panicked"))
      }
      Err(_) => Err(NodeError::Cancelled),
    }
  }

  /// Run an attempt in the background and send its report to `reply`.
  ///
  /// Aborting the returned handle also aborts the Activity.
  pub fn spawn<M>(
    &self,
    activity: Arc<dyn Activity>,
    request: NodeRequest,
    cancel: CancellationToken,
    reply: mpsc::Sender<M>,
  ) -> JoinHandle<()>
  where
    M: From<NodeReport> + Send + 'static,
  {
    let executor = self.clone();
    tokio::spawn(async move {
      let report = executor.execute(activity, request, cancel).await;
      if reply.send(M::from(report)).await.is_err() {
        debug!("node report discarded, execution no longer listening");
      }
    })
  }
}
