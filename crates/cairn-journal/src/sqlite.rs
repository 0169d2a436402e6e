use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::types::Json;
use sqlx::{FromRow, SqlitePool};
use tracing::debug;

use crate::{EventKind, Journal, JournalError, JournalEvent, Lease, TERMINAL_EVENT_NAMES, expiry};

/// SQLite-based journal implementation.
///
/// Appends are single statements, so the sequence number and the fencing
/// check are evaluated atomically by SQLite.
pub struct SqliteJournal {
  pool: SqlitePool,
}

#[derive(FromRow)]
struct EventRow {
  execution_id: String,
  sequence: i64,
  recorded_at: DateTime<Utc>,
  body: Json<EventKind>,
}

impl From<EventRow> for JournalEvent {
  fn from(row: EventRow) -> Self {
    JournalEvent {
      sequence: row.sequence as u64,
      execution_id: row.execution_id,
      timestamp: row.recorded_at,
      kind: row.body.0,
    }
  }
}

#[derive(FromRow)]
struct LeaseRow {
  owner: String,
  token: i64,
  expires_at_ms: i64,
}

impl SqliteJournal {
  /// Create a new SQLite journal with the given connection pool.
  pub fn new(pool: SqlitePool) -> Self {
    Self { pool }
  }

  /// Open (creating if needed) a journal database file and run migrations.
  pub async fn connect(path: impl AsRef<Path>) -> Result<Self, JournalError> {
    let options = SqliteConnectOptions::new()
      .filename(path)
      .create_if_missing(true)
      .journal_mode(SqliteJournalMode::Wal)
      .busy_timeout(Duration::from_secs(5));
    let pool = SqlitePoolOptions::new()
      .max_connections(4)
      .connect_with(options)
      .await?;

    let journal = Self::new(pool);
    journal.migrate().await?;
    Ok(journal)
  }

  /// A private in-memory database. Lives as long as the journal.
  pub async fn in_memory() -> Result<Self, JournalError> {
    let options = SqliteConnectOptions::from_str("sqlite::memory:")?;
    let pool = SqlitePoolOptions::new()
      .max_connections(1)
      .idle_timeout(None)
      .max_lifetime(None)
      .connect_with(options)
      .await?;

    let journal = Self::new(pool);
    journal.migrate().await?;
    Ok(journal)
  }

  /// Run database migrations.
  pub async fn migrate(&self) -> Result<(), sqlx::migrate::MigrateError> {
    sqlx::migrate!("../../migrations").run(&self.pool).await
  }

  async fn current_lease(&self, execution_id: &str) -> Result<Option<LeaseRow>, JournalError> {
    let row = sqlx::query_as(
      r#"
      SELECT owner, token, expires_at_ms
      FROM journal_leases
      WHERE execution_id = ?
      "#,
    )
    .bind(execution_id)
    .fetch_optional(&self.pool)
    .await?;
    Ok(row)
  }

  async fn fenced(&self, lease: &Lease) -> Result<JournalError, JournalError> {
    let current = self.current_lease(&lease.execution_id).await?;
    Ok(JournalError::Fenced {
      execution_id: lease.execution_id.clone(),
      token: lease.token,
      current: current.map(|l| l.token as u64).unwrap_or(0),
    })
  }
}

#[async_trait]
impl Journal for SqliteJournal {
  async fn acquire_lease(
    &self,
    execution_id: &str,
    owner: &str,
    ttl: Duration,
  ) -> Result<Lease, JournalError> {
    let now = Utc::now();
    let expires_at = expiry(now, ttl);

    let token: Option<i64> = sqlx::query_scalar(
      r#"
      INSERT INTO journal_leases (execution_id, owner, token, expires_at_ms)
      VALUES (?1, ?2, 1, ?3)
      ON CONFLICT(execution_id) DO UPDATE
        SET owner = excluded.owner,
            token = journal_leases.token + 1,
            expires_at_ms = excluded.expires_at_ms
        WHERE journal_leases.expires_at_ms <= ?4 OR journal_leases.owner = excluded.owner
      RETURNING token
      "#,
    )
    .bind(execution_id)
    .bind(owner)
    .bind(expires_at.timestamp_millis())
    .bind(now.timestamp_millis())
    .fetch_optional(&self.pool)
    .await?;

    match token {
      Some(token) => {
        debug!(execution_id = %execution_id, owner = %owner, token, "lease_acquired");
        Ok(Lease {
          execution_id: execution_id.to_string(),
          owner: owner.to_string(),
          token: token as u64,
          expires_at,
        })
      }
      None => {
        let current = self.current_lease(execution_id).await?;
        let (holder, until) = current
          .map(|l| (l.owner, DateTime::from_timestamp_millis(l.expires_at_ms)))
          .unwrap_or_default();
        Err(JournalError::LeaseHeld {
          execution_id: execution_id.to_string(),
          owner: holder,
          expires_at: until.unwrap_or(now),
        })
      }
    }
  }

  async fn renew_lease(&self, lease: &Lease, ttl: Duration) -> Result<Lease, JournalError> {
    let expires_at = expiry(Utc::now(), ttl);
    let result = sqlx::query(
      r#"
      UPDATE journal_leases
      SET expires_at_ms = ?
      WHERE execution_id = ? AND token = ? AND owner = ?
      "#,
    )
    .bind(expires_at.timestamp_millis())
    .bind(&lease.execution_id)
    .bind(lease.token as i64)
    .bind(&lease.owner)
    .execute(&self.pool)
    .await?;

    if result.rows_affected() == 0 {
      return Err(self.fenced(lease).await?);
    }

    Ok(Lease {
      expires_at,
      ..lease.clone()
    })
  }

  async fn release_lease(&self, lease: &Lease) -> Result<(), JournalError> {
    sqlx::query(
      r#"
      UPDATE journal_leases
      SET expires_at_ms = 0
      WHERE execution_id = ? AND token = ? AND owner = ?
      "#,
    )
    .bind(&lease.execution_id)
    .bind(lease.token as i64)
    .bind(&lease.owner)
    .execute(&self.pool)
    .await?;

    Ok(())
  }

  async fn append(&self, lease: &Lease, kind: EventKind) -> Result<JournalEvent, JournalError> {
    let timestamp = Utc::now();
    let sequence: Option<i64> = sqlx::query_scalar(
      r#"
      INSERT INTO journal_events (execution_id, sequence, recorded_at, kind, body)
      SELECT ?1, next.seq, ?2, ?3, ?4
      FROM (
        SELECT COALESCE(MAX(sequence), 0) + 1 AS seq
        FROM journal_events
        WHERE execution_id = ?1
      ) AS next
      WHERE EXISTS (
        SELECT 1 FROM journal_leases
        WHERE execution_id = ?1 AND token = ?5 AND owner = ?6
      )
      RETURNING sequence
      "#,
    )
    .bind(&lease.execution_id)
    .bind(timestamp)
    .bind(kind.name())
    .bind(Json(&kind))
    .bind(lease.token as i64)
    .bind(&lease.owner)
    .fetch_optional(&self.pool)
    .await?;

    let Some(sequence) = sequence else {
      return Err(self.fenced(lease).await?);
    };

    Ok(JournalEvent {
      sequence: sequence as u64,
      execution_id: lease.execution_id.clone(),
      timestamp,
      kind,
    })
  }

  async fn read(&self, execution_id: &str) -> Result<Vec<JournalEvent>, JournalError> {
    let rows: Vec<EventRow> = sqlx::query_as(
      r#"
      SELECT execution_id, sequence, recorded_at, body
      FROM journal_events
      WHERE execution_id = ?
      ORDER BY sequence ASC
      "#,
    )
    .bind(execution_id)
    .fetch_all(&self.pool)
    .await?;

    Ok(rows.into_iter().map(JournalEvent::from).collect())
  }

  async fn list_executions(&self) -> Result<Vec<String>, JournalError> {
    let ids = sqlx::query_scalar(
      r#"
      SELECT DISTINCT execution_id
      FROM journal_events
      ORDER BY execution_id
      "#,
    )
    .fetch_all(&self.pool)
    .await?;
    Ok(ids)
  }

  async fn unfinished_executions(&self) -> Result<Vec<String>, JournalError> {
    let ids = sqlx::query_scalar(
      r#"
      SELECT DISTINCT execution_id
      FROM journal_events
      WHERE execution_id NOT IN (
        SELECT execution_id FROM journal_events WHERE kind IN (?, ?, ?)
      )
      ORDER BY execution_id
      "#,
    )
    .bind(TERMINAL_EVENT_NAMES[0])
    .bind(TERMINAL_EVENT_NAMES[1])
    .bind(TERMINAL_EVENT_NAMES[2])
    .fetch_all(&self.pool)
    .await?;
    Ok(ids)
  }
}
