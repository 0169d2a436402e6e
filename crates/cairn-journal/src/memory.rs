use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Mutex;

use crate::{EventKind, Journal, JournalError, JournalEvent, Lease, expiry};

#[derive(Default)]
struct Inner {
  events: BTreeMap<String, Vec<JournalEvent>>,
  leases: HashMap<String, Lease>,
}

/// In-process journal. Clones share the same storage.
///
/// Useful for tests and for embedding the engine where durability across
/// process restarts is not needed.
#[derive(Clone, Default)]
pub struct MemoryJournal {
  inner: Arc<Mutex<Inner>>,
}

impl MemoryJournal {
  pub fn new() -> Self {
    Self::default()
  }
}

fn check_token(inner: &Inner, lease: &Lease) -> Result<(), JournalError> {
  match inner.leases.get(&lease.execution_id) {
    Some(current) if current.token == lease.token && current.owner == lease.owner => Ok(()),
    current => Err(JournalError::Fenced {
      execution_id: lease.execution_id.clone(),
      token: lease.token,
      current: current.map(|l| l.token).unwrap_or(0),
    }),
  }
}

#[async_trait]
impl Journal for MemoryJournal {
  async fn acquire_lease(
    &self,
    execution_id: &str,
    owner: &str,
    ttl: Duration,
  ) -> Result<Lease, JournalError> {
    let mut inner = self.inner.lock().await;
    let now = Utc::now();

    let token = match inner.leases.get(execution_id) {
      Some(current) if current.owner != owner && current.expires_at > now => {
        return Err(JournalError::LeaseHeld {
          execution_id: execution_id.to_string(),
          owner: current.owner.clone(),
          expires_at: current.expires_at,
        });
      }
      Some(current) => current.token + 1,
      None => 1,
    };

    let lease = Lease {
      execution_id: execution_id.to_string(),
      owner: owner.to_string(),
      token,
      expires_at: expiry(now, ttl),
    };
    inner.leases.insert(execution_id.to_string(), lease.clone());
    Ok(lease)
  }

  async fn renew_lease(&self, lease: &Lease, ttl: Duration) -> Result<Lease, JournalError> {
    let mut inner = self.inner.lock().await;
    check_token(&inner, lease)?;

    let renewed = Lease {
      expires_at: expiry(Utc::now(), ttl),
      ..lease.clone()
    };
    inner
      .leases
      .insert(lease.execution_id.clone(), renewed.clone());
    Ok(renewed)
  }

  async fn release_lease(&self, lease: &Lease) -> Result<(), JournalError> {
    let mut inner = self.inner.lock().await;
    if check_token(&inner, lease).is_ok()
      && let Some(current) = inner.leases.get_mut(&lease.execution_id)
    {
      current.expires_at = Utc::now();
    }
    Ok(())
  }

  async fn append(&self, lease: &Lease, kind: EventKind) -> Result<JournalEvent, JournalError> {
    let mut inner = self.inner.lock().await;
    check_token(&inner, lease)?;

    let events = inner.events.entry(lease.execution_id.clone()).or_default();
    let event = JournalEvent {
      sequence: events.len() as u64 + 1,
      execution_id: lease.execution_id.clone(),
      timestamp: Utc::now(),
      kind,
    };
    events.push(event.clone());
    Ok(event)
  }

  async fn read(&self, execution_id: &str) -> Result<Vec<JournalEvent>, JournalError> {
    let inner = self.inner.lock().await;
    Ok(inner.events.get(execution_id).cloned().unwrap_or_default())
  }

  async fn list_executions(&self) -> Result<Vec<String>, JournalError> {
    let inner = self.inner.lock().await;
    Ok(inner.events.keys().cloned().collect())
  }

  async fn unfinished_executions(&self) -> Result<Vec<String>, JournalError> {
    let inner = self.inner.lock().await;
    Ok(
      inner
        .events
        .iter()
        .filter(|(_, events)| !events.iter().any(|e| e.kind.is_terminal()))
        .map(|(id, _)| id.clone())
        .collect(),
    )
  }
}
