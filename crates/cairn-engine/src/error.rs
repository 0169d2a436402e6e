use cairn_journal::{JournalError, ReplayError};

/// Errors surfaced by the control interface and the orchestrator.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
  /// The definition was rejected. No execution was created.
  #[error("workflow validation failed: {}", errors.join("; "))]
  Validation { errors: Vec<String> },

  #[error("execution not found: {0}")]
  NotFound(String),

  #[error("journal error: {0}")]
  Journal(#[from] JournalError),

  #[error("journal replay failed: {0}")]
  Replay(#[from] ReplayError),

  /// Another owner took over the execution; this engine stopped writing.
  #[error("lease lost for execution '{execution_id}'")]
  LeaseLost { execution_id: String },

  /// The execution stopped being driven here before it finished.
  #[error("execution '{0}' was detached before it finished")]
  Detached(String),

  #[error("engine is shutting down")]
  ShuttingDown,

  #[error("workflow runner channel closed")]
  RunnerClosed,
}
