use serde::{Deserialize, Serialize};

use crate::edge::EdgeDef;
use crate::enums::ErrorHandling;
use crate::node::NodeDef;

pub const DEFAULT_MAX_RETRIES: u32 = 3;
pub const DEFAULT_RETRY_DELAY_MS: u64 = 1_000;
pub const DEFAULT_RETRY_MAX_DELAY_MS: u64 = 30_000;
pub const DEFAULT_RETRY_BACKOFF_MULTIPLIER: f64 = 2.0;

/// Execution settings attached to a workflow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowSettings {
  #[serde(default)]
  pub error_handling: ErrorHandling,
  /// Total attempts per node, including the first one.
  #[serde(default = "default_max_retries")]
  pub max_retries: u32,
  /// Delay before the first retry.
  #[serde(default = "default_retry_delay_ms")]
  pub retry_delay_ms: u64,
  #[serde(default = "default_retry_max_delay_ms")]
  pub retry_max_delay_ms: u64,
  #[serde(default = "default_retry_backoff_multiplier")]
  pub retry_backoff_multiplier: f64,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub timeout_minutes: Option<u64>,
  /// Maximum nodes of this workflow running at once.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub max_concurrency: Option<usize>,
}

fn default_max_retries() -> u32 {
  DEFAULT_MAX_RETRIES
}

fn default_retry_delay_ms() -> u64 {
  DEFAULT_RETRY_DELAY_MS
}

fn default_retry_max_delay_ms() -> u64 {
  DEFAULT_RETRY_MAX_DELAY_MS
}

fn default_retry_backoff_multiplier() -> f64 {
  DEFAULT_RETRY_BACKOFF_MULTIPLIER
}

impl Default for WorkflowSettings {
  fn default() -> Self {
    Self {
      error_handling: ErrorHandling::default(),
      max_retries: DEFAULT_MAX_RETRIES,
      retry_delay_ms: DEFAULT_RETRY_DELAY_MS,
      retry_max_delay_ms: DEFAULT_RETRY_MAX_DELAY_MS,
      retry_backoff_multiplier: DEFAULT_RETRY_BACKOFF_MULTIPLIER,
      timeout_minutes: None,
      max_concurrency: None,
    }
  }
}

/// A workflow as authored in the editor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowDefinition {
  pub id: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub name: Option<String>,
  pub nodes: Vec<NodeDef>,
  #[serde(default)]
  pub edges: Vec<EdgeDef>,
  #[serde(default)]
  pub settings: WorkflowSettings,
}

impl WorkflowDefinition {
  pub fn new(id: impl Into<String>) -> Self {
    Self {
      id: id.into(),
      name: None,
      nodes: Vec::new(),
      edges: Vec::new(),
      settings: WorkflowSettings::default(),
    }
  }

  pub fn node(&self, node_id: &str) -> Option<&NodeDef> {
    self.nodes.iter().find(|n| n.id == node_id)
  }

  pub fn triggers(&self) -> impl Iterator<Item = &NodeDef> {
    self.nodes.iter().filter(|n| n.is_trigger())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::EdgeKind;

  #[test]
  fn test_deserialize_editor_workflow() {
    let json = serde_json::json!({
      "id": "wf-1",
      "name": "Order sync",
      "nodes": [
        { "id": "node-1", "type": "webhookTrigger", "data": { "path": "/orders" } },
        { "id": "node-2", "type": "httpRequest", "data": { "url": "https://example.com" }, "timeoutMs": 5000 },
        { "id": "node-3", "type": "slack", "disabled": true }
      ],
      "edges": [
        { "id": "e1", "source": "node-1", "target": "node-2" },
        { "id": "e2", "source": "node-2", "target": "node-3", "sourceHandle": "error" }
      ],
      "settings": { "errorHandling": "continue", "maxRetries": 5, "timeoutMinutes": 10 }
    });

    let workflow: WorkflowDefinition = serde_json::from_value(json).unwrap();

    assert_eq!(workflow.nodes.len(), 3);
    assert_eq!(workflow.settings.error_handling, ErrorHandling::Continue);
    assert_eq!(workflow.settings.max_retries, 5);
    assert_eq!(workflow.settings.retry_delay_ms, DEFAULT_RETRY_DELAY_MS);
    assert_eq!(workflow.settings.timeout_minutes, Some(10));
    assert_eq!(workflow.edges[1].kind(), EdgeKind::Error);
    assert_eq!(workflow.node("node-2").unwrap().timeout_ms, Some(5000));
    assert!(workflow.node("node-3").unwrap().disabled);
    assert_eq!(workflow.triggers().count(), 1);
  }

  #[test]
  fn test_settings_default_when_missing() {
    let workflow: WorkflowDefinition = serde_json::from_value(serde_json::json!({
      "id": "wf",
      "nodes": []
    }))
    .unwrap();

    assert_eq!(workflow.settings, WorkflowSettings::default());
    assert!(workflow.edges.is_empty());
  }
}
