//! Cairn Engine
//!
//! Durable execution of workflow definitions. The engine journals every
//! scheduling decision before acting on it, so any engine holding the
//! journal can rebuild an execution and carry on after a crash.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                          Engine                             │
//! │  - start / signal / query / await_result / resume           │
//! │  - validates definitions before anything is journaled       │
//! └─────────────────────────────────────────────────────────────┘
//!                               │ mailbox (signals, reports, retries)
//!                               ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                 Orchestrator (one per execution)            │
//! │  - readiness, retries, halts, termination                   │
//! │  - append to journal, then apply, then notify               │
//! └─────────────────────────────────────────────────────────────┘
//!                               │
//!                               ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       NodeExecutor                          │
//! │  - one attempt per request, timeout, cancellation grace     │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use cairn_engine::{Engine, EngineConfig};
//! use cairn_journal::SqliteJournal;
//!
//! let journal = Arc::new(SqliteJournal::connect("journal.db").await?);
//! let engine = Engine::new(journal, registry, EngineConfig::default());
//!
//! let execution_id = engine.start(definition, input, "org-1", TriggerType::Manual).await?;
//! let result = engine.await_result(&execution_id).await?;
//! ```

mod config;
mod engine;
mod error;
mod events;
mod orchestrator;
mod plan;
mod recovery;
mod result;
mod runner;

pub use config::EngineConfig;
pub use engine::Engine;
pub use error::EngineError;
pub use events::{ChannelNotifier, ExecutionNotifier, NoopNotifier};
pub use result::{ExecutionResult, ExecutionState, ResultStatus, Signal};
pub use runner::WorkflowRunner;

pub use cairn_journal::{ExecutionRecord, ExecutionStatus, NodeExecutionState, NodeStatus};
