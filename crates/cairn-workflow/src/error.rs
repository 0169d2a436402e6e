use thiserror::Error;

/// A single reason a workflow definition cannot be executed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GraphIssue {
  #[error("workflow has no trigger node")]
  NoTrigger,

  #[error("duplicate node id: {0}")]
  DuplicateNode(String),

  #[error("duplicate edge id: {0}")]
  DuplicateEdge(String),

  #[error("edge '{edge_id}' references unknown source node '{node_id}'")]
  UnknownSource { edge_id: String, node_id: String },

  #[error("edge '{edge_id}' references unknown target node '{node_id}'")]
  UnknownTarget { edge_id: String, node_id: String },

  #[error("node '{0}' has no incoming edge and is not a trigger (orphan node)")]
  OrphanNode(String),

  #[error("cycle detected: {}", path.join(" -> "))]
  Cycle { path: Vec<String> },

  #[error("node '{node_id}' has unknown type '{node_type}'")]
  UnknownNodeType { node_id: String, node_type: String },
}
