use serde::{Deserialize, Serialize};

/// A unit of work in a workflow graph.
///
/// `node_type` selects the Activity that runs the node. `data` is the node's
/// configuration as authored in the editor and is handed to the Activity untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeDef {
  pub id: String,
  #[serde(rename = "type")]
  pub node_type: String,
  #[serde(default = "empty_object")]
  pub data: serde_json::Value,
  #[serde(default)]
  pub disabled: bool,
  /// Overrides `settings.maxRetries` for this node.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub max_retries: Option<u32>,
  /// Per-attempt timeout. Falls back to the engine default.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub timeout_ms: Option<u64>,
}

fn empty_object() -> serde_json::Value {
  serde_json::Value::Object(serde_json::Map::new())
}

impl NodeDef {
  pub fn new(id: impl Into<String>, node_type: impl Into<String>) -> Self {
    Self {
      id: id.into(),
      node_type: node_type.into(),
      data: empty_object(),
      disabled: false,
      max_retries: None,
      timeout_ms: None,
    }
  }

  pub fn with_data(mut self, data: serde_json::Value) -> Self {
    self.data = data;
    self
  }

  pub fn disabled(mut self) -> Self {
    self.disabled = true;
    self
  }

  /// Trigger nodes are the entry points of a run.
  ///
  /// Editors name them `manualTrigger`, `webhookTrigger`, `scheduleTrigger`, ...
  pub fn is_trigger(&self) -> bool {
    self.node_type == "trigger" || self.node_type.ends_with("Trigger")
  }
}
