//! Node attempt errors.

/// Why an attempt did not produce an output.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NodeError {
  /// The Activity failed and classified the failure as retryable.
  #[error("{message}")]
  Retryable { message: String },

  /// The Activity failed and classified the failure as terminal.
  #[error("{message}")]
  Terminal { message: String },

  /// The attempt exceeded its timeout and was aborted.
  #[error("timed out after {timeout_ms}ms")]
  Timeout { timeout_ms: u64, retryable: bool },

  /// The execution was cancelled or halted while the attempt was running.
  #[error("cancelled")]
  Cancelled,
}

impl NodeError {
  pub fn terminal(message: impl Into<String>) -> Self {
    Self::Terminal {
      message: message.into(),
    }
  }

  pub fn retryable(message: impl Into<String>) -> Self {
    Self::Retryable {
      message: message.into(),
    }
  }

  pub fn is_retryable(&self) -> bool {
    match self {
      NodeError::Retryable { .. } => true,
      NodeError::Timeout { retryable, .. } => *retryable,
      NodeError::Terminal { .. } | NodeError::Cancelled => false,
    }
  }
}
