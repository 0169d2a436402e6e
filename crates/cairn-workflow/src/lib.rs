//! Cairn Workflow
//!
//! The runtime view of a [`WorkflowDefinition`]: a [`Graph`] indexed for
//! traversal by edge kind, and the validator that every definition must pass
//! before an execution is created.
//!
//! [`WorkflowDefinition`]: cairn_config::WorkflowDefinition

mod error;
mod graph;
mod validate;

pub use error::GraphIssue;
pub use graph::{EdgeRef, Graph};
pub use validate::{ValidationReport, validate, validate_with};
