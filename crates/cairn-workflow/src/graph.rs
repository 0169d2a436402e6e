use std::collections::HashMap;

use cairn_config::{EdgeKind, WorkflowDefinition};

/// An edge as seen from one of its endpoints.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EdgeRef {
  pub edge_id: String,
  pub source: String,
  pub target: String,
  pub kind: EdgeKind,
}

/// Graph structure for traversal and analysis.
///
/// Node order follows the definition, which keeps scheduling decisions
/// deterministic. Edges whose endpoints are unknown are left out; the
/// validator reports them.
#[derive(Debug, Clone)]
pub struct Graph {
  nodes: Vec<String>,
  outgoing: HashMap<String, Vec<EdgeRef>>,
  incoming: HashMap<String, Vec<EdgeRef>>,
  triggers: Vec<String>,
}

impl Graph {
  /// Build a graph from a workflow definition.
  pub fn new(definition: &WorkflowDefinition) -> Self {
    let mut nodes = Vec::with_capacity(definition.nodes.len());
    let mut outgoing: HashMap<String, Vec<EdgeRef>> = HashMap::new();
    let mut incoming: HashMap<String, Vec<EdgeRef>> = HashMap::new();

    for node in &definition.nodes {
      if outgoing.contains_key(&node.id) {
        continue;
      }
      nodes.push(node.id.clone());
      outgoing.insert(node.id.clone(), Vec::new());
      incoming.insert(node.id.clone(), Vec::new());
    }

    for edge in &definition.edges {
      if !outgoing.contains_key(&edge.source) || !incoming.contains_key(&edge.target) {
        continue;
      }
      let edge_ref = EdgeRef {
        edge_id: edge.id.clone(),
        source: edge.source.clone(),
        target: edge.target.clone(),
        kind: edge.kind(),
      };
      if let Some(out) = outgoing.get_mut(&edge.source) {
        out.push(edge_ref.clone());
      }
      if let Some(inc) = incoming.get_mut(&edge.target) {
        inc.push(edge_ref);
      }
    }

    let triggers = definition
      .nodes
      .iter()
      .filter(|n| n.is_trigger())
      .map(|n| n.id.clone())
      .collect();

    Self {
      nodes,
      outgoing,
      incoming,
      triggers,
    }
  }

  /// All node ids in definition order.
  pub fn nodes(&self) -> &[String] {
    &self.nodes
  }

  pub fn contains(&self, node_id: &str) -> bool {
    self.outgoing.contains_key(node_id)
  }

  /// Trigger node ids in definition order.
  pub fn triggers(&self) -> &[String] {
    &self.triggers
  }

  /// Nodes with no incoming edges.
  pub fn entry_points(&self) -> Vec<&str> {
    self
      .nodes
      .iter()
      .filter(|id| self.incoming(id).is_empty())
      .map(|id| id.as_str())
      .collect()
  }

  pub fn incoming(&self, node_id: &str) -> &[EdgeRef] {
    self
      .incoming
      .get(node_id)
      .map(|v| v.as_slice())
      .unwrap_or(&[])
  }

  pub fn outgoing(&self, node_id: &str) -> &[EdgeRef] {
    self
      .outgoing
      .get(node_id)
      .map(|v| v.as_slice())
      .unwrap_or(&[])
  }

  /// Get downstream node ids for a given node.
  pub fn downstream(&self, node_id: &str) -> impl Iterator<Item = &str> {
    self.outgoing(node_id).iter().map(|e| e.target.as_str())
  }

  /// Get upstream node ids for a given node.
  pub fn upstream(&self, node_id: &str) -> impl Iterator<Item = &str> {
    self.incoming(node_id).iter().map(|e| e.source.as_str())
  }

  /// A merge node waits on more than one incoming edge.
  pub fn is_merge(&self, node_id: &str) -> bool {
    self.incoming(node_id).len() > 1
  }

  /// Whether failures of this node are routed somewhere.
  pub fn has_error_edge(&self, node_id: &str) -> bool {
    self.outgoing(node_id).iter().any(|e| e.kind.is_error())
  }
}
