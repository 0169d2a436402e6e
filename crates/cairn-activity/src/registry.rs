use std::collections::HashMap;
use std::sync::Arc;

use crate::activity::Activity;

/// Maps node types to the Activities that run them.
#[derive(Clone, Default)]
pub struct ActivityRegistry {
  activities: HashMap<String, Arc<dyn Activity>>,
}

impl ActivityRegistry {
  pub fn new() -> Self {
    Self::default()
  }

  /// Register `activity` for `node_type`, replacing any previous registration.
  pub fn register(&mut self, node_type: impl Into<String>, activity: impl Activity + 'static) {
    self.activities.insert(node_type.into(), Arc::new(activity));
  }

  /// Register an already shared Activity.
  pub fn register_arc(&mut self, node_type: impl Into<String>, activity: Arc<dyn Activity>) {
    self.activities.insert(node_type.into(), activity);
  }

  /// Builder style [`register`](Self::register).
  pub fn with(mut self, node_type: impl Into<String>, activity: impl Activity + 'static) -> Self {
    self.register(node_type, activity);
    self
  }

  pub fn get(&self, node_type: &str) -> Option<Arc<dyn Activity>> {
    self.activities.get(node_type).cloned()
  }

  pub fn contains(&self, node_type: &str) -> bool {
    self.activities.contains_key(node_type)
  }

  /// Registered node types, sorted.
  pub fn node_types(&self) -> Vec<&str> {
    let mut types: Vec<&str> = self.activities.keys().map(|k| k.as_str()).collect();
    types.sort_unstable();
    types
  }

  pub fn len(&self) -> usize {
    self.activities.len()
  }

  pub fn is_empty(&self) -> bool {
    self.activities.is_empty()
  }
}

impl std::fmt::Debug for ActivityRegistry {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("ActivityRegistry")
      .field("node_types", &self.node_types())
      .finish()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::builtin::PassthroughActivity;
  use crate::{ActivityContext, ActivityError, activity_fn};
  use cairn_config::TriggerType;
  use tokio_util::sync::CancellationToken;

  fn context() -> ActivityContext {
    ActivityContext {
      execution_id: "exec-1".to_string(),
      workflow_id: "wf".to_string(),
      node_id: "node-1".to_string(),
      node_type: "double".to_string(),
      data: serde_json::json!({}),
      attempt: 1,
      organization_id: "org".to_string(),
      trigger_type: TriggerType::Manual,
      cancel: CancellationToken::new(),
    }
  }

  #[test]
  fn test_register_and_lookup() {
    let registry = ActivityRegistry::new()
      .with("manualTrigger", PassthroughActivity)
      .with("noop", PassthroughActivity);

    assert_eq!(registry.len(), 2);
    assert!(registry.contains("noop"));
    assert!(registry.get("httpRequest").is_none());
    assert_eq!(registry.node_types(), vec!["manualTrigger", "noop"]);
  }

  #[tokio::test]
  async fn test_closure_activity() {
    let registry = ActivityRegistry::new().with(
      "double",
      activity_fn(|input: serde_json::Value, _ctx| async move {
        let n = input["n"]
          .as_i64()
          .ok_or_else(|| ActivityError::invalid_input("n must be a number"))?;
        Ok::<_, ActivityError>(serde_json::json!({ "n": n * 2 }))
      }),
    );

    let activity = registry.get("double").unwrap();
    let output = activity
      .execute(serde_json::json!({"n": 21}), context())
      .await
      .unwrap();
    assert_eq!(output["n"], 42);

    let err = activity
      .execute(serde_json::json!({}), context())
      .await
      .unwrap_err();
    assert!(matches!(err, ActivityError::InvalidInput { .. }));
  }
}
