use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// What happens to the rest of the run when a node fails without an error edge.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorHandling {
  /// Halt the execution: nothing else is dispatched and the run fails.
  #[default]
  Stop,
  /// Keep going: only the failed node's dependents are blocked.
  Continue,
}

/// How an execution was initiated.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerType {
  #[default]
  Manual,
  Webhook,
  Schedule,
  Poll,
  Api,
}

impl TriggerType {
  pub fn as_str(&self) -> &'static str {
    match self {
      TriggerType::Manual => "manual",
      TriggerType::Webhook => "webhook",
      TriggerType::Schedule => "schedule",
      TriggerType::Poll => "poll",
      TriggerType::Api => "api",
    }
  }
}

impl fmt::Display for TriggerType {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

/// Returned when parsing an unrecognized trigger type name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownTriggerType(pub String);

impl fmt::Display for UnknownTriggerType {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "unknown trigger type: {}", self.0)
  }
}

impl std::error::Error for UnknownTriggerType {}

impl FromStr for TriggerType {
  type Err = UnknownTriggerType;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.to_ascii_lowercase().as_str() {
      "manual" => Ok(TriggerType::Manual),
      "webhook" => Ok(TriggerType::Webhook),
      "schedule" => Ok(TriggerType::Schedule),
      "poll" => Ok(TriggerType::Poll),
      "api" => Ok(TriggerType::Api),
      _ => Err(UnknownTriggerType(s.to_string())),
    }
  }
}
