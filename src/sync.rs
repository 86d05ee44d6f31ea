//! Background sync: replaying queued writes once connectivity returns.

use color_eyre::{eyre::eyre, Result};
use rusqlite::params;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use url::Url;
use uuid::Uuid;

use crate::db::Database;
use crate::http::{Network, Request};
use crate::queue::{PendingWrite, PendingWriteQueue};

/// Outcome of one pass over the queue.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
  /// Records removed after a 2xx, in replay order
  pub delivered: Vec<Uuid>,
  /// Records left in place, in replay order
  pub failed: Vec<Uuid>,
}

impl SyncReport {
  pub fn attempted(&self) -> usize {
    self.delivered.len() + self.failed.len()
  }
}

/// Result of submitting a write directly.
#[derive(Debug)]
pub enum Submission {
  /// The server answered; `status` may still be a rejection
  Sent { status: u16 },
  /// The network was unreachable, the write was queued and sync registered
  Queued(PendingWrite),
}

/// Outstanding reconnect signals, keyed by tag.
#[derive(Clone)]
pub struct SyncRegistrations {
  db: Database,
}

impl SyncRegistrations {
  pub fn new(db: Database) -> Self {
    Self { db }
  }

  pub fn register(&self, tag: &str) -> Result<()> {
    let conn = self.db.conn()?;
    conn
      .execute(
        "INSERT OR IGNORE INTO sync_registrations (tag) VALUES (?)",
        params![tag],
      )
      .map_err(|e| eyre!("Failed to register sync {}: {}", tag, e))?;
    Ok(())
  }

  pub fn unregister(&self, tag: &str) -> Result<bool> {
    let conn = self.db.conn()?;
    let removed = conn
      .execute("DELETE FROM sync_registrations WHERE tag = ?", params![tag])
      .map_err(|e| eyre!("Failed to unregister sync {}: {}", tag, e))?;
    Ok(removed > 0)
  }

  pub fn tags(&self) -> Result<Vec<String>> {
    let conn = self.db.conn()?;
    let mut stmt = conn
      .prepare("SELECT tag FROM sync_registrations ORDER BY registered_at, tag")
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let tags = stmt
      .query_map([], |row| row.get(0))
      .map_err(|e| eyre!("Failed to list sync registrations: {}", e))?
      .collect::<rusqlite::Result<Vec<String>>>()
      .map_err(|e| eyre!("Failed to read sync registration: {}", e))?;
    Ok(tags)
  }
}

/// Replays the pending-write queue against the remote API.
pub struct SyncCoordinator<N: Network> {
  queue: PendingWriteQueue,
  registrations: SyncRegistrations,
  network: Arc<N>,
  tag: String,
  /// Relative endpoints resolve against this
  origin: Url,
  /// Template with an `{id}` placeholder
  endpoint: String,
  /// Held for a whole pass so two triggers never replay the same record
  drain_lock: Mutex<()>,
}

impl<N: Network> SyncCoordinator<N> {
  pub fn new(
    queue: PendingWriteQueue,
    registrations: SyncRegistrations,
    network: Arc<N>,
    tag: &str,
    origin: Url,
    endpoint: &str,
  ) -> Self {
    Self {
      queue,
      registrations,
      network,
      tag: tag.to_string(),
      origin,
      endpoint: endpoint.to_string(),
      drain_lock: Mutex::new(()),
    }
  }

  pub fn tag(&self) -> &str {
    &self.tag
  }

  pub fn queue(&self) -> &PendingWriteQueue {
    &self.queue
  }

  pub fn registrations(&self) -> &SyncRegistrations {
    &self.registrations
  }

  /// The id always lands as one encoded path segment.
  fn endpoint_for(&self, resource_id: &str) -> Result<Url> {
    if resource_id.is_empty() || resource_id == "." || resource_id == ".." {
      return Err(eyre!("Invalid resource id '{}'", resource_id));
    }
    let url = self
      .endpoint
      .replace("{id}", &urlencoding::encode(resource_id));
    self
      .origin
      .join(&url)
      .map_err(|e| eyre!("Invalid sync endpoint '{}': {}", url, e))
  }

  fn replay_request(&self, write: &PendingWrite) -> Result<Request> {
    Request::put_json(
      self.endpoint_for(&write.resource_id)?,
      &write.payload,
      &write.credential,
    )
  }

  /// Try a write now; queue it and register a sync if the network is down.
  pub async fn submit(
    &self,
    resource_id: &str,
    payload: serde_json::Value,
    credential: &str,
  ) -> Result<Submission> {
    let request = Request::put_json(self.endpoint_for(resource_id)?, &payload, credential)?;

    match self.network.fetch(&request).await {
      Ok(response) => Ok(Submission::Sent {
        status: response.status,
      }),
      Err(e) => {
        info!(resource_id, error = %e, "write failed offline, queueing");
        let write = self.enqueue(resource_id, payload, credential)?;
        Ok(Submission::Queued(write))
      }
    }
  }

  /// Queue a write and register the reconnect signal.
  pub fn enqueue(
    &self,
    resource_id: &str,
    payload: serde_json::Value,
    credential: &str,
  ) -> Result<PendingWrite> {
    self.endpoint_for(resource_id)?;
    let write = self.queue.enqueue(resource_id, payload, credential)?;
    self.registrations.register(&self.tag)?;
    debug!(id = %write.id, resource_id, "queued pending write");
    Ok(write)
  }

  /// One pass over the queue, in enqueue order.
  ///
  /// A record is removed only after a 2xx. Failures (unreachable network or
  /// any non-2xx status) leave the record in place and never stop the pass.
  pub async fn drain(&self) -> Result<SyncReport> {
    let _guard = self.drain_lock.lock().await;

    let pending = self.queue.list()?;
    let mut report = SyncReport::default();
    if pending.is_empty() {
      debug!("no pending writes");
      return Ok(report);
    }

    info!(count = pending.len(), "replaying pending writes");
    for write in pending {
      let outcome = match self.replay_request(&write) {
        Ok(request) => self.network.fetch(&request).await,
        Err(e) => Err(e),
      };

      match outcome {
        Ok(response) if response.is_success() => {
          self.queue.remove(&write.id)?;
          debug!(id = %write.id, status = response.status, "write delivered");
          report.delivered.push(write.id);
        }
        Ok(response) => {
          warn!(id = %write.id, status = response.status, "write rejected, keeping");
          report.failed.push(write.id);
        }
        Err(e) => {
          warn!(id = %write.id, error = %e, "write replay failed, keeping");
          report.failed.push(write.id);
        }
      }
    }

    info!(
      delivered = report.delivered.len(),
      failed = report.failed.len(),
      "sync pass finished"
    );
    Ok(report)
  }

  /// Handle a reconnect signal. Unknown tags are ignored.
  ///
  /// The registration is dropped once the queue is empty.
  pub async fn on_sync(&self, tag: &str) -> Result<Option<SyncReport>> {
    if tag != self.tag {
      debug!(tag, "ignoring sync for unknown tag");
      return Ok(None);
    }

    let report = self.drain().await?;
    if self.queue.is_empty()? {
      self.registrations.unregister(tag)?;
    }
    Ok(Some(report))
  }
}
