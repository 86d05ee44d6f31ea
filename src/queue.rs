//! Durable queue of writes waiting for remote confirmation.

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use rusqlite::params;
use std::fmt;
use uuid::Uuid;

use crate::db::Database;

/// A mutation that failed for lack of connectivity and awaits replay.
#[derive(Clone, PartialEq)]
pub struct PendingWrite {
  /// Clock-ordered unique id
  pub id: Uuid,
  /// Resource the write targets
  pub resource_id: String,
  /// Opaque JSON body, replayed verbatim
  pub payload: serde_json::Value,
  /// Bearer credential captured at enqueue time
  pub credential: String,
  pub enqueued_at: DateTime<Utc>,
}

impl fmt::Debug for PendingWrite {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("PendingWrite")
      .field("id", &self.id)
      .field("resource_id", &self.resource_id)
      .field("payload", &self.payload)
      .field("credential", &"<redacted>")
      .field("enqueued_at", &self.enqueued_at)
      .finish()
  }
}

/// Ordered pending-write queue stored in SQLite.
///
/// Appends and removals are single-row statements; draining is serialized
/// by the sync coordinator.
#[derive(Clone)]
pub struct PendingWriteQueue {
  db: Database,
}

impl PendingWriteQueue {
  pub fn new(db: Database) -> Self {
    Self { db }
  }

  /// Append a record to the tail of the queue.
  pub fn enqueue(
    &self,
    resource_id: &str,
    payload: serde_json::Value,
    credential: &str,
  ) -> Result<PendingWrite> {
    let write = PendingWrite {
      id: Uuid::now_v7(),
      resource_id: resource_id.to_string(),
      payload,
      credential: credential.to_string(),
      enqueued_at: Utc::now(),
    };
    let payload = serde_json::to_string(&write.payload)
      .map_err(|e| eyre!("Failed to serialize payload: {}", e))?;

    let conn = self.db.conn()?;
    conn
      .execute(
        "INSERT INTO pending_writes (id, resource_id, payload, credential, enqueued_at)
         VALUES (?, ?, ?, ?, ?)",
        params![
          write.id.to_string(),
          write.resource_id,
          payload,
          write.credential,
          write.enqueued_at.to_rfc3339()
        ],
      )
      .map_err(|e| eyre!("Failed to enqueue write for {}: {}", resource_id, e))?;

    Ok(write)
  }

  /// Every record, in enqueue order.
  pub fn list(&self) -> Result<Vec<PendingWrite>> {
    let conn = self.db.conn()?;
    let mut stmt = conn
      .prepare(
        "SELECT id, resource_id, payload, credential, enqueued_at
         FROM pending_writes ORDER BY seq",
      )
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let rows = stmt
      .query_map([], |row| {
        Ok((
          row.get::<_, String>(0)?,
          row.get::<_, String>(1)?,
          row.get::<_, String>(2)?,
          row.get::<_, String>(3)?,
          row.get::<_, String>(4)?,
        ))
      })
      .map_err(|e| eyre!("Failed to read pending writes: {}", e))?
      .collect::<rusqlite::Result<Vec<_>>>()
      .map_err(|e| eyre!("Failed to read pending write: {}", e))?;

    rows
      .into_iter()
      .map(|(id, resource_id, payload, credential, enqueued_at)| {
        Ok(PendingWrite {
          id: Uuid::parse_str(&id).map_err(|e| eyre!("Corrupt write id '{}': {}", id, e))?,
          payload: serde_json::from_str(&payload)
            .map_err(|e| eyre!("Corrupt payload for {}: {}", id, e))?,
          enqueued_at: DateTime::parse_from_rfc3339(&enqueued_at)
            .map_err(|e| eyre!("Corrupt timestamp for {}: {}", id, e))?
            .with_timezone(&Utc),
          resource_id,
          credential,
        })
      })
      .collect()
  }

  /// Remove a confirmed record. Returns false if it was already gone.
  pub fn remove(&self, id: &Uuid) -> Result<bool> {
    let conn = self.db.conn()?;
    let removed = conn
      .execute(
        "DELETE FROM pending_writes WHERE id = ?",
        params![id.to_string()],
      )
      .map_err(|e| eyre!("Failed to remove pending write {}: {}", id, e))?;
    Ok(removed > 0)
  }

  pub fn len(&self) -> Result<usize> {
    let conn = self.db.conn()?;
    let count: i64 = conn
      .query_row("SELECT COUNT(*) FROM pending_writes", [], |row| row.get(0))
      .map_err(|e| eyre!("Failed to count pending writes: {}", e))?;
    Ok(count as usize)
  }

  pub fn is_empty(&self) -> Result<bool> {
    Ok(self.len()? == 0)
  }

  /// Drop every record. The manual escape hatch for writes the server keeps rejecting.
  pub fn clear(&self) -> Result<usize> {
    let conn = self.db.conn()?;
    conn
      .execute("DELETE FROM pending_writes", [])
      .map_err(|e| eyre!("Failed to clear pending writes: {}", e))
  }
}
