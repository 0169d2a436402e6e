//! Pre-execution checks for workflow definitions.
//!
//! Every check runs on every call so the editor can show all problems at
//! once. Nothing here touches the journal: a rejected definition never
//! becomes an execution.

use std::collections::{HashMap, HashSet};

use cairn_config::WorkflowDefinition;

use crate::error::GraphIssue;
use crate::graph::Graph;

/// Outcome of validating a workflow definition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationReport {
  pub valid: bool,
  pub errors: Vec<GraphIssue>,
}

impl ValidationReport {
  fn from_errors(errors: Vec<GraphIssue>) -> Self {
    Self {
      valid: errors.is_empty(),
      errors,
    }
  }

  /// Human readable error messages, in the order they were found.
  pub fn messages(&self) -> Vec<String> {
    self.errors.iter().map(|e| e.to_string()).collect()
  }
}

/// Validate the structure of a workflow definition.
pub fn validate(definition: &WorkflowDefinition) -> ValidationReport {
  validate_with(definition, |_| true)
}

/// Validate structure and check every enabled node type with `is_known_type`.
pub fn validate_with(
  definition: &WorkflowDefinition,
  is_known_type: impl Fn(&str) -> bool,
) -> ValidationReport {
  let mut errors = Vec::new();

  check_identifiers(definition, &mut errors);

  let graph = Graph::new(definition);

  if graph.triggers().is_empty() {
    errors.push(GraphIssue::NoTrigger);
  }

  for node in &definition.nodes {
    if !node.is_trigger() && graph.incoming(&node.id).is_empty() {
      errors.push(GraphIssue::OrphanNode(node.id.clone()));
    }
  }

  for path in find_cycles(&graph) {
    errors.push(GraphIssue::Cycle { path });
  }

  for node in definition.nodes.iter().filter(|n| !n.disabled) {
    if !is_known_type(&node.node_type) {
      errors.push(GraphIssue::UnknownNodeType {
        node_id: node.id.clone(),
        node_type: node.node_type.clone(),
      });
    }
  }

  ValidationReport::from_errors(errors)
}

fn check_identifiers(definition: &WorkflowDefinition, errors: &mut Vec<GraphIssue>) {
  let mut node_ids = HashSet::new();
  for node in &definition.nodes {
    if !node_ids.insert(node.id.as_str()) {
      errors.push(GraphIssue::DuplicateNode(node.id.clone()));
    }
  }

  let mut edge_ids = HashSet::new();
  for edge in &definition.edges {
    if !edge_ids.insert(edge.id.as_str()) {
      errors.push(GraphIssue::DuplicateEdge(edge.id.clone()));
    }
    if !node_ids.contains(edge.source.as_str()) {
      errors.push(GraphIssue::UnknownSource {
        edge_id: edge.id.clone(),
        node_id: edge.source.clone(),
      });
    }
    if !node_ids.contains(edge.target.as_str()) {
      errors.push(GraphIssue::UnknownTarget {
        edge_id: edge.id.clone(),
        node_id: edge.target.clone(),
      });
    }
  }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Color {
  White,
  Gray,
  Black,
}

/// Three-state DFS, rooted at the triggers first and then at any node not yet
/// visited. Each back edge yields one cycle, reported as the path that closes it.
fn find_cycles(graph: &Graph) -> Vec<Vec<String>> {
  fn dfs<'a>(
    node: &'a str,
    graph: &'a Graph,
    color: &mut HashMap<&'a str, Color>,
    stack: &mut Vec<&'a str>,
    cycles: &mut Vec<Vec<String>>,
  ) {
    color.insert(node, Color::Gray);
    stack.push(node);

    for edge in graph.outgoing(node) {
      let next = edge.target.as_str();
      match color.get(next).copied().unwrap_or(Color::White) {
        Color::Gray => {
          let start = stack.iter().position(|n| *n == next).unwrap_or(0);
          let mut path: Vec<String> = stack[start..].iter().map(|n| n.to_string()).collect();
          path.push(next.to_string());
          cycles.push(path);
        }
        Color::White => dfs(next, graph, color, stack, cycles),
        Color::Black => {}
      }
    }

    stack.pop();
    color.insert(node, Color::Black);
  }

  let mut color: HashMap<&str, Color> = HashMap::new();
  let mut stack = Vec::new();
  let mut cycles = Vec::new();

  let roots = graph
    .triggers()
    .iter()
    .chain(graph.nodes().iter())
    .map(|id| id.as_str());

  for root in roots {
    if color.get(root).copied().unwrap_or(Color::White) == Color::White {
      dfs(root, graph, &mut color, &mut stack, &mut cycles);
    }
  }

  cycles
}

#[cfg(test)]
mod tests {
  use super::*;
  use cairn_config::{EdgeDef, NodeDef};

  fn workflow(nodes: &[(&str, &str)], edges: &[(&str, &str)]) -> WorkflowDefinition {
    let mut def = WorkflowDefinition::new("wf");
    def.nodes = nodes.iter().map(|(id, ty)| NodeDef::new(*id, *ty)).collect();
    def.edges = edges
      .iter()
      .enumerate()
      .map(|(i, (from, to))| EdgeDef::new(format!("e{}", i), *from, *to))
      .collect();
    def
  }

  #[test]
  fn test_linear_workflow_is_valid() {
    let def = workflow(
      &[("t", "manualTrigger"), ("a", "noop"), ("b", "noop")],
      &[("t", "a"), ("a", "b")],
    );

    let report = validate(&def);
    assert!(report.valid, "{:?}", report.errors);
    assert!(report.errors.is_empty());
  }

  #[test]
  fn test_missing_trigger() {
    let def = workflow(&[("a", "noop")], &[]);

    let report = validate(&def);
    assert!(!report.valid);
    assert!(report.errors.contains(&GraphIssue::NoTrigger));
  }

  #[test]
  fn test_orphan_node() {
    let def = workflow(
      &[("t", "manualTrigger"), ("a", "noop"), ("lonely", "noop")],
      &[("t", "a")],
    );

    let report = validate(&def);
    assert_eq!(
      report.errors,
      vec![GraphIssue::OrphanNode("lonely".to_string())]
    );
  }

  #[test]
  fn test_back_edge_is_a_cycle() {
    let def = workflow(
      &[("t", "manualTrigger"), ("a", "noop"), ("b", "noop")],
      &[("t", "a"), ("a", "b"), ("b", "a")],
    );

    let report = validate(&def);
    assert!(!report.valid);
    assert_eq!(
      report.errors,
      vec![GraphIssue::Cycle {
        path: vec!["a".to_string(), "b".to_string(), "a".to_string()]
      }]
    );
    assert!(report.messages()[0].contains("a -> b -> a"));
  }

  #[test]
  fn test_self_loop() {
    let def = workflow(&[("t", "manualTrigger"), ("a", "noop")], &[("t", "a"), ("a", "a")]);

    let report = validate(&def);
    assert!(
      report
        .errors
        .iter()
        .any(|e| matches!(e, GraphIssue::Cycle { .. }))
    );
  }

  #[test]
  fn test_all_checks_are_reported_together() {
    let def = workflow(
      &[("a", "noop"), ("b", "noop"), ("c", "noop")],
      &[("a", "b"), ("b", "a"), ("c", "ghost")],
    );

    let report = validate(&def);
    assert!(report.errors.contains(&GraphIssue::NoTrigger));
    assert!(report.errors.contains(&GraphIssue::OrphanNode("c".to_string())));
    assert!(report.errors.contains(&GraphIssue::UnknownTarget {
      edge_id: "e2".to_string(),
      node_id: "ghost".to_string(),
    }));
    assert!(
      report
        .errors
        .iter()
        .any(|e| matches!(e, GraphIssue::Cycle { .. }))
    );
  }

  #[test]
  fn test_diamond_is_not_a_cycle() {
    let def = workflow(
      &[("t", "manualTrigger"), ("a", "noop"), ("b", "noop"), ("m", "noop")],
      &[("t", "a"), ("t", "b"), ("a", "m"), ("b", "m")],
    );

    assert!(validate(&def).valid);
  }

  #[test]
  fn test_duplicate_ids() {
    let mut def = workflow(&[("t", "manualTrigger"), ("a", "noop")], &[("t", "a")]);
    def.nodes.push(NodeDef::new("a", "noop"));
    def.edges.push(EdgeDef::new("e0", "t", "a"));

    let report = validate(&def);
    assert!(report.errors.contains(&GraphIssue::DuplicateNode("a".to_string())));
    assert!(report.errors.contains(&GraphIssue::DuplicateEdge("e0".to_string())));
  }

  #[test]
  fn test_unknown_types_skip_disabled_nodes() {
    let mut def = workflow(
      &[("t", "manualTrigger"), ("a", "mystery"), ("b", "mystery")],
      &[("t", "a"), ("a", "b")],
    );
    def.nodes[2].disabled = true;

    let report = validate_with(&def, |ty| ty != "mystery");
    assert_eq!(
      report.errors,
      vec![GraphIssue::UnknownNodeType {
        node_id: "a".to_string(),
        node_type: "mystery".to_string(),
      }]
    );
  }
}
