//! Worker versions, install/activate transitions and stale-partition eviction.

use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};
use url::Url;

use crate::cache::{add_all, CacheStore, PartitionKind, PartitionNames};
use crate::clients::ClientRegistry;
use crate::db::Database;
use crate::http::Network;

/// A deployed worker version: semantic tag plus build timestamp.
///
/// Written as `<tag>-<build>`, where the build is all digits. The tag may
/// itself contain dashes (`v2.0.0-rc1-20240301`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct WorkerVersion {
  tag: String,
  build: String,
}

impl WorkerVersion {
  pub fn new(tag: &str, build: &str) -> Result<Self> {
    if tag.is_empty() {
      return Err(eyre!("Version tag must not be empty"));
    }
    if build.is_empty() || !build.chars().all(|c| c.is_ascii_digit()) {
      return Err(eyre!("Version build must be a numeric timestamp: '{}'", build));
    }
    Ok(Self {
      tag: tag.to_string(),
      build: build.to_string(),
    })
  }

  pub fn parse(s: &str) -> Result<Self> {
    let (tag, build) = s
      .rsplit_once('-')
      .ok_or_else(|| eyre!("Version must look like <tag>-<build>: '{}'", s))?;
    Self::new(tag, build)
  }

  pub fn tag(&self) -> &str {
    &self.tag
  }

  pub fn build(&self) -> &str {
    &self.build
  }
}

impl fmt::Display for WorkerVersion {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}-{}", self.tag, self.build)
  }
}

impl FromStr for WorkerVersion {
  type Err = color_eyre::Report;

  fn from_str(s: &str) -> Result<Self> {
    Self::parse(s)
  }
}

impl TryFrom<String> for WorkerVersion {
  type Error = color_eyre::Report;

  fn try_from(s: String) -> Result<Self> {
    Self::parse(&s)
  }
}

impl From<WorkerVersion> for String {
  fn from(v: WorkerVersion) -> Self {
    v.to_string()
  }
}

/// Lifecycle state of this worker instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
  /// Not installed yet
  Parsed,
  Installing,
  /// Installed, held back until activation
  Waiting,
  /// Controlling clients
  Active,
  /// Install failed or replaced by a newer version
  Redundant,
}

impl fmt::Display for WorkerState {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let s = match self {
      Self::Parsed => "parsed",
      Self::Installing => "installing",
      Self::Waiting => "waiting",
      Self::Active => "active",
      Self::Redundant => "redundant",
    };
    f.write_str(s)
  }
}

/// Durable record of the active and waiting versions.
#[derive(Clone)]
pub struct Registration {
  db: Database,
}

const ACTIVE: &str = "active";
const WAITING: &str = "waiting";

impl Registration {
  pub fn new(db: Database) -> Self {
    Self { db }
  }

  pub fn active(&self) -> Result<Option<WorkerVersion>> {
    self.slot(ACTIVE)
  }

  pub fn waiting(&self) -> Result<Option<WorkerVersion>> {
    self.slot(WAITING)
  }

  fn slot(&self, slot: &str) -> Result<Option<WorkerVersion>> {
    let conn = self.db.conn()?;
    let version: Option<String> = conn
      .query_row(
        "SELECT version FROM registration WHERE slot = ?",
        params![slot],
        |row| row.get(0),
      )
      .optional()
      .map_err(|e| eyre!("Failed to read {} registration: {}", slot, e))?;

    version.map(|v| WorkerVersion::parse(&v)).transpose()
  }

  /// Record `version` as installed and waiting, replacing any older waiter.
  pub fn record_waiting(&self, version: &WorkerVersion) -> Result<()> {
    let conn = self.db.conn()?;
    conn
      .execute(
        "INSERT OR REPLACE INTO registration (slot, version, updated_at)
         VALUES (?, ?, datetime('now'))",
        params![WAITING, version.to_string()],
      )
      .map_err(|e| eyre!("Failed to record waiting version: {}", e))?;
    Ok(())
  }

  /// Make `version` active and clear the waiting slot, atomically.
  pub fn promote(&self, version: &WorkerVersion) -> Result<()> {
    let conn = self.db.conn()?;
    let tx = conn
      .unchecked_transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    tx.execute(
      "INSERT OR REPLACE INTO registration (slot, version, updated_at)
       VALUES (?, ?, datetime('now'))",
      params![ACTIVE, version.to_string()],
    )
    .map_err(|e| eyre!("Failed to record active version: {}", e))?;
    tx.execute("DELETE FROM registration WHERE slot = ?", params![WAITING])
      .map_err(|e| eyre!("Failed to clear waiting version: {}", e))?;

    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;
    Ok(())
  }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallReport {
  pub version: WorkerVersion,
  pub partition: String,
  pub assets: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActivationReport {
  pub version: WorkerVersion,
  /// Partitions deleted by the reconciliation sweep
  pub evicted: Vec<String>,
  /// Clients whose controller changed
  pub claimed: usize,
}

/// Drives one worker version through install and activation.
pub struct LifecycleManager<S: CacheStore, N: Network> {
  version: WorkerVersion,
  partitions: PartitionNames,
  bootstrap: Vec<Url>,
  cache: Arc<S>,
  network: Arc<N>,
  registration: Registration,
  clients: Arc<ClientRegistry>,
  state: Mutex<WorkerState>,
}

impl<S: CacheStore, N: Network> LifecycleManager<S, N> {
  /// Create the manager, resuming from whatever the registration recorded.
  pub fn new(
    version: WorkerVersion,
    partitions: PartitionNames,
    bootstrap: Vec<Url>,
    cache: Arc<S>,
    network: Arc<N>,
    registration: Registration,
    clients: Arc<ClientRegistry>,
  ) -> Result<Self> {
    let state = if registration.active()?.as_ref() == Some(&version) {
      WorkerState::Active
    } else if registration.waiting()?.as_ref() == Some(&version) {
      WorkerState::Waiting
    } else {
      WorkerState::Parsed
    };
    debug!(%version, %state, "lifecycle resumed");

    Ok(Self {
      version,
      partitions,
      bootstrap,
      cache,
      network,
      registration,
      clients,
      state: Mutex::new(state),
    })
  }

  pub fn version(&self) -> &WorkerVersion {
    &self.version
  }

  pub fn registration(&self) -> &Registration {
    &self.registration
  }

  pub fn state(&self) -> Result<WorkerState> {
    self
      .state
      .lock()
      .map(|s| *s)
      .map_err(|e| eyre!("Lock poisoned: {}", e))
  }

  fn set_state(&self, next: WorkerState) -> Result<()> {
    let mut state = self
      .state
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    debug!(version = %self.version, from = %*state, to = %next, "state transition");
    *state = next;
    Ok(())
  }

  /// Populate the static partition with the bootstrap assets.
  ///
  /// All-or-nothing: if any asset fails, the instance becomes redundant and
  /// never reaches the waiting state. An instance that was already active
  /// stays active. Re-running with the same asset list overwrites the same
  /// entries.
  pub async fn install(&self) -> Result<InstallReport> {
    let previous = self.state()?;
    if previous == WorkerState::Installing {
      return Err(eyre!("Install of {} already in progress", self.version));
    }
    self.set_state(WorkerState::Installing)?;

    let partition = self.partitions.name(PartitionKind::Static).to_string();
    info!(version = %self.version, %partition, "installing");

    let populated = async {
      self.cache.open_partition(&partition)?;
      add_all(
        self.cache.as_ref(),
        self.network.as_ref(),
        &partition,
        &self.bootstrap,
      )
      .await
    }
    .await;

    match populated {
      Ok(assets) => {
        self.registration.record_waiting(&self.version)?;
        self.set_state(WorkerState::Waiting)?;
        info!(version = %self.version, assets, "installed");
        Ok(InstallReport {
          version: self.version.clone(),
          partition,
          assets,
        })
      }
      Err(e) => {
        warn!(version = %self.version, error = %e, "install failed");
        // A failed re-install leaves an active version in control
        let next = if previous == WorkerState::Active {
          WorkerState::Active
        } else {
          WorkerState::Redundant
        };
        self.set_state(next)?;
        Err(e.wrap_err(format!("Install of {} aborted", self.version)))
      }
    }
  }

  /// Evict stale partitions, take over the registration and claim clients.
  pub async fn activate(&self) -> Result<ActivationReport> {
    match self.state()? {
      WorkerState::Waiting | WorkerState::Active => {}
      other => {
        return Err(eyre!(
          "Cannot activate {} while {}",
          self.version,
          other
        ))
      }
    }

    let mut evicted = Vec::new();
    for name in self.cache.partition_names()? {
      if !self.partitions.is_live(&name) {
        info!(partition = %name, "evicting stale partition");
        self.cache.delete_partition(&name)?;
        evicted.push(name);
      }
    }

    self.registration.promote(&self.version)?;
    self.set_state(WorkerState::Active)?;
    let claimed = self.clients.claim(&self.version)?;
    info!(version = %self.version, evicted = evicted.len(), claimed, "activated");

    Ok(ActivationReport {
      version: self.version.clone(),
      evicted,
      claimed,
    })
  }

  /// Honor a skip-waiting signal. Only a waiting instance activates.
  pub async fn skip_waiting(&self) -> Result<Option<ActivationReport>> {
    let state = self.state()?;
    if state != WorkerState::Waiting {
      debug!(version = %self.version, %state, "skip waiting ignored");
      return Ok(None);
    }
    self.activate().await.map(Some)
  }
}
