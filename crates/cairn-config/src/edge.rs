use serde::{Deserialize, Serialize};

/// Which outcome of the source node activates an edge.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeKind {
  /// Followed when the source succeeds.
  #[default]
  Default,
  /// Followed when the source succeeds. Emitted by editors with an explicit success handle.
  Success,
  /// Followed only when the source fails terminally.
  Error,
}

impl EdgeKind {
  /// Edge kind implied by an editor handle name.
  pub fn from_handle(handle: &str) -> Self {
    match handle {
      "error" => EdgeKind::Error,
      "success" => EdgeKind::Success,
      _ => EdgeKind::Default,
    }
  }

  pub fn is_error(&self) -> bool {
    matches!(self, EdgeKind::Error)
  }
}

/// A directed edge between two nodes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EdgeDef {
  pub id: String,
  pub source: String,
  pub target: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub source_handle: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub target_handle: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub kind: Option<EdgeKind>,
}

impl EdgeDef {
  /// A default edge between two nodes.
  pub fn new(id: impl Into<String>, source: impl Into<String>, target: impl Into<String>) -> Self {
    Self {
      id: id.into(),
      source: source.into(),
      target: target.into(),
      source_handle: None,
      target_handle: None,
      kind: None,
    }
  }

  pub fn with_kind(mut self, kind: EdgeKind) -> Self {
    self.kind = Some(kind);
    self
  }

  /// The effective kind: an explicit `kind` wins, otherwise it is derived from `sourceHandle`.
  pub fn kind(&self) -> EdgeKind {
    match (self.kind, &self.source_handle) {
      (Some(kind), _) => kind,
      (None, Some(handle)) => EdgeKind::from_handle(handle),
      (None, None) => EdgeKind::Default,
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_kind_derived_from_source_handle() {
    let edge: EdgeDef = serde_json::from_value(serde_json::json!({
      "id": "e1",
      "source": "a",
      "target": "b",
      "sourceHandle": "error"
    }))
    .unwrap();

    assert_eq!(edge.kind(), EdgeKind::Error);
  }

  #[test]
  fn test_explicit_kind_wins_over_handle() {
    let mut edge = EdgeDef::new("e1", "a", "b").with_kind(EdgeKind::Success);
    edge.source_handle = Some("error".to_string());

    assert_eq!(edge.kind(), EdgeKind::Success);
  }

  #[test]
  fn test_unlabelled_edge_is_default() {
    let edge = EdgeDef::new("e1", "a", "b");
    assert_eq!(edge.kind(), EdgeKind::Default);
    assert!(!edge.kind().is_error());
  }
}
