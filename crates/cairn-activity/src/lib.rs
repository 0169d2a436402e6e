//! Cairn Activity
//!
//! An Activity is the code behind a node type. The engine knows nothing about
//! what an Activity does: it hands over the node's input and context, and
//! expects either an output value or an [`ActivityError`] that the Activity
//! itself classifies as retryable or terminal.

mod activity;
pub mod builtin;
mod context;
mod error;
mod registry;

pub use activity::{Activity, FnActivity, activity_fn};
pub use context::{ActivityContext, ActivityLogger};
pub use error::{ActivityError, ErrorClass};
pub use registry::ActivityRegistry;
