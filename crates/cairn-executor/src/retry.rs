use std::time::Duration;

use cairn_config::{NodeDef, WorkflowSettings};

use crate::error::NodeError;

/// Exponential backoff with a cap.
///
/// `delay_for(n) = min(max_delay, initial_delay * multiplier^(n - 1))` where
/// `n` is the 1-based attempt that just failed.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
  /// Total attempts, including the first one.
  pub max_attempts: u32,
  pub initial_delay: Duration,
  pub max_delay: Duration,
  pub multiplier: f64,
}

impl Default for RetryPolicy {
  fn default() -> Self {
    Self::from_settings(&WorkflowSettings::default(), None)
  }
}

impl RetryPolicy {
  /// Policy for a node: the node's `maxRetries` overrides the workflow's.
  pub fn from_settings(settings: &WorkflowSettings, node: Option<&NodeDef>) -> Self {
    let max_attempts = node
      .and_then(|n| n.max_retries)
      .unwrap_or(settings.max_retries)
      .max(1);

    Self {
      max_attempts,
      initial_delay: Duration::from_millis(settings.retry_delay_ms),
      max_delay: Duration::from_millis(settings.retry_max_delay_ms),
      multiplier: settings.retry_backoff_multiplier,
    }
  }

  /// Delay before retrying after `failed_attempt` failed.
  pub fn delay_for(&self, failed_attempt: u32) -> Duration {
    let exponent = failed_attempt.saturating_sub(1).min(64) as i32;
    let initial = self.initial_delay.as_millis() as f64;
    let max = self.max_delay.as_millis() as f64;

    let delay = initial * self.multiplier.powi(exponent);
    let capped = if delay.is_finite() {
      delay.clamp(0.0, max)
    } else {
      max
    };
    Duration::from_millis(capped as u64)
  }

  /// Whether another attempt should follow `failed_attempt`.
  pub fn should_retry(&self, failed_attempt: u32, error: &NodeError) -> bool {
    error.is_retryable() && failed_attempt < self.max_attempts
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_defaults() {
    let policy = RetryPolicy::default();
    assert_eq!(policy.max_attempts, 3);
    assert_eq!(policy.initial_delay, Duration::from_millis(1000));
    assert_eq!(policy.max_delay, Duration::from_millis(30_000));
    assert_eq!(policy.multiplier, 2.0);
  }

  #[test]
  fn test_exponential_delay_with_cap() {
    let policy = RetryPolicy::default();
    assert_eq!(policy.delay_for(1), Duration::from_millis(1000));
    assert_eq!(policy.delay_for(2), Duration::from_millis(2000));
    assert_eq!(policy.delay_for(3), Duration::from_millis(4000));
    assert_eq!(policy.delay_for(5), Duration::from_millis(16_000));
    assert_eq!(policy.delay_for(6), Duration::from_millis(30_000));
    assert_eq!(policy.delay_for(500), Duration::from_millis(30_000));
  }

  #[test]
  fn test_should_retry() {
    let policy = RetryPolicy::default();
    let retryable = NodeError::retryable("503");
    let terminal = NodeError::terminal("400");

    assert!(policy.should_retry(1, &retryable));
    assert!(policy.should_retry(2, &retryable));
    assert!(!policy.should_retry(3, &retryable));
    assert!(!policy.should_retry(1, &terminal));
    assert!(!policy.should_retry(1, &NodeError::Cancelled));
    assert!(policy.should_retry(
      1,
      &NodeError::Timeout {
        timeout_ms: 10,
        retryable: true
      }
    ));
  }

  #[test]
  fn test_node_override() {
    let settings = WorkflowSettings {
      max_retries: 5,
      retry_delay_ms: 10,
      ..WorkflowSettings::default()
    };
    let mut node = NodeDef::new("n", "noop");
    node.max_retries = Some(1);

    assert_eq!(RetryPolicy::from_settings(&settings, None).max_attempts, 5);
    let policy = RetryPolicy::from_settings(&settings, Some(&node));
    assert_eq!(policy.max_attempts, 1);
    assert!(!policy.should_retry(1, &NodeError::retryable("x")));
    assert_eq!(policy.delay_for(1), Duration::from_millis(10));
  }
}
