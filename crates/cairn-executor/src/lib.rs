//! Node execution for Cairn workflows.
//!
//! The [`NodeExecutor`] runs exactly one attempt of one node: it bounds
//! global concurrency, applies the per-node timeout, honours cancellation
//! with a grace period, and classifies failures. Whether to retry is decided
//! by the orchestrator using a [`RetryPolicy`].

mod error;
mod executor;
mod result;
mod retry;

pub use error::NodeError;
pub use executor::{ExecutorConfig, NodeExecutor, NodeRequest};
pub use result::NodeReport;
pub use retry::RetryPolicy;
