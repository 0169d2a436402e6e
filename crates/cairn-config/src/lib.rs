//! Cairn Config
//!
//! This crate contains the serializable workflow definition types for Cairn.
//! A definition is the graph a user builds in the editor: nodes, typed edges
//! and execution settings. It is immutable for the lifetime of an execution.
//!
//! Definitions are exchanged as camelCase JSON:
//! - files passed to the CLI (`cairn run workflow.json`)
//! - the `ExecutionStarted` journal event, which embeds the full definition

mod edge;
mod enums;
mod node;
mod workflow;

pub use edge::{EdgeDef, EdgeKind};
pub use enums::{ErrorHandling, TriggerType, UnknownTriggerType};
pub use node::NodeDef;
pub use workflow::{WorkflowDefinition, WorkflowSettings};
