use thiserror::Error;

/// Whether a failed attempt may be retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
  Retryable,
  Terminal,
}

/// Errors an Activity can return.
#[derive(Debug, Error)]
pub enum ActivityError {
  /// Temporary condition such as a dropped connection.
  #[error("transient failure: {message}")]
  Transient { message: String },

  /// A remote service answered with a non-success status.
  #[error("http {status}: {message}")]
  Http { status: u16, message: String },

  #[error("invalid input: {message}")]
  InvalidInput { message: String },

  #[error("unauthorized: {message}")]
  Unauthorized { message: String },

  /// Any other failure. Not retried by default.
  #[error("{message}")]
  Failed { message: String },
}

impl ActivityError {
  pub fn transient(message: impl Into<String>) -> Self {
    Self::Transient {
      message: message.into(),
    }
  }

  pub fn http(status: u16, message: impl Into<String>) -> Self {
    Self::Http {
      status,
      message: message.into(),
    }
  }

  pub fn invalid_input(message: impl Into<String>) -> Self {
    Self::InvalidInput {
      message: message.into(),
    }
  }

  pub fn unauthorized(message: impl Into<String>) -> Self {
    Self::Unauthorized {
      message: message.into(),
    }
  }

  pub fn failed(message: impl Into<String>) -> Self {
    Self::Failed {
      message: message.into(),
    }
  }

  /// Default classification used when an Activity does not override it.
  ///
  /// Transient errors, request timeouts (408), rate limiting (429) and server
  /// errors (5xx) are retryable. Everything else is terminal.
  pub fn class(&self) -> ErrorClass {
    match self {
      ActivityError::Transient { .. } => ErrorClass::Retryable,
      ActivityError::Http { status, .. } if *status == 408 || *status == 429 => {
        ErrorClass::Retryable
      }
      ActivityError::Http { status, .. } if (500..600).contains(status) => ErrorClass::Retryable,
      _ => ErrorClass::Terminal,
    }
  }
}
