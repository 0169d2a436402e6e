//! Cairn Journal
//!
//! The journal is the only source of truth for an execution. Every decision
//! the orchestrator makes is appended here before it takes effect, and the
//! [`ExecutionRecord`] is nothing more than a fold over those events.
//!
//! The [`Journal`] trait defines:
//! - leases with fencing tokens, so exactly one owner appends to an execution
//! - append-only writes with journal-assigned sequence numbers
//! - reads of a full execution journal for replay
//!
//! Two backends are provided: [`MemoryJournal`] and [`SqliteJournal`].

mod event;
mod memory;
mod record;
mod sqlite;
mod types;

pub use event::{EventKind, JournalEvent, TERMINAL_EVENT_NAMES};
pub use memory::MemoryJournal;
pub use record::{ExecutionRecord, ReplayError};
pub use sqlite::SqliteJournal;
pub use types::{
  ExecutionFailure, ExecutionFailureKind, ExecutionStatus, FailureKind, NodeExecutionState,
  NodeFailure, NodeStatus, SkipReason,
};

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

/// Error type for journal operations.
#[derive(Debug, thiserror::Error)]
pub enum JournalError {
  /// Another owner holds a live lease on the execution.
  #[error("execution '{execution_id}' is leased by '{owner}' until {expires_at}")]
  LeaseHeld {
    execution_id: String,
    owner: String,
    expires_at: DateTime<Utc>,
  },

  /// The caller's lease was superseded; it must stop writing.
  #[error("stale lease token {token} for execution '{execution_id}' (current token {current})")]
  Fenced {
    execution_id: String,
    token: u64,
    current: u64,
  },

  #[error("serialization error: {0}")]
  Serialization(#[from] serde_json::Error),

  #[error("database error: {0}")]
  Database(#[from] sqlx::Error),

  #[error("migration error: {0}")]
  Migrate(#[from] sqlx::migrate::MigrateError),
}

/// Exclusive ownership of an execution's journal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lease {
  pub execution_id: String,
  pub owner: String,
  /// Fencing token. Increases on every acquisition.
  pub token: u64,
  pub expires_at: DateTime<Utc>,
}

/// Durable, append-only storage for execution journals.
#[async_trait]
pub trait Journal: Send + Sync {
  /// Take ownership of an execution.
  ///
  /// Succeeds when no lease exists, the current lease expired, or `owner`
  /// already holds it. Every success returns a larger token than before.
  async fn acquire_lease(
    &self,
    execution_id: &str,
    owner: &str,
    ttl: Duration,
  ) -> Result<Lease, JournalError>;

  /// Extend a lease. Fails with [`JournalError::Fenced`] once superseded.
  async fn renew_lease(&self, lease: &Lease, ttl: Duration) -> Result<Lease, JournalError>;

  /// Give up a lease so another owner can take over immediately.
  async fn release_lease(&self, lease: &Lease) -> Result<(), JournalError>;

  /// Append one event under `lease` and return it with its sequence number.
  async fn append(&self, lease: &Lease, kind: EventKind) -> Result<JournalEvent, JournalError>;

  /// All events of an execution in sequence order. Unknown executions are empty.
  async fn read(&self, execution_id: &str) -> Result<Vec<JournalEvent>, JournalError>;

  /// Ids of every execution with at least one event.
  async fn list_executions(&self) -> Result<Vec<String>, JournalError>;

  /// Ids of executions without a terminal event.
  async fn unfinished_executions(&self) -> Result<Vec<String>, JournalError>;
}

pub(crate) fn expiry(now: DateTime<Utc>, ttl: Duration) -> DateTime<Utc> {
  let ttl = TimeDelta::from_std(ttl).unwrap_or_else(|_| TimeDelta::days(365));
  now + ttl
}
