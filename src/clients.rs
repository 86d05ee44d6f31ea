//! Open clients (windows/tabs) and which worker version controls them.

use color_eyre::{eyre::eyre, Result};
use std::collections::BTreeMap;
use std::sync::Mutex;
use tracing::info;
use url::Url;
use uuid::Uuid;

use crate::lifecycle::WorkerVersion;

/// Notices the worker posts to its clients.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientNotice {
  /// A new version is installed and waiting for SKIP_WAITING
  UpdateAvailable { version: WorkerVersion },
  /// The client is now controlled by `version`
  ControllerChanged { version: WorkerVersion },
}

#[derive(Debug, Clone)]
pub struct Client {
  pub id: Uuid,
  pub url: Url,
  /// Version controlling this client, if any
  pub controller: Option<WorkerVersion>,
  notices: Vec<ClientNotice>,
}

/// Registry of open clients.
#[derive(Debug, Default)]
pub struct ClientRegistry {
  clients: Mutex<BTreeMap<Uuid, Client>>,
}

impl ClientRegistry {
  pub fn new() -> Self {
    Self::default()
  }

  /// Register a newly opened client. It stays uncontrolled until a claim.
  pub fn connect(&self, url: Url) -> Result<Uuid> {
    let id = Uuid::now_v7();
    self.lock()?.insert(
      id,
      Client {
        id,
        url,
        controller: None,
        notices: Vec::new(),
      },
    );
    Ok(id)
  }

  pub fn disconnect(&self, id: &Uuid) -> Result<bool> {
    Ok(self.lock()?.remove(id).is_some())
  }

  /// Open a new window controlled by `controller`.
  pub fn open_window(&self, url: Url, controller: Option<WorkerVersion>) -> Result<Uuid> {
    info!(%url, "opening window");
    let id = Uuid::now_v7();
    self.lock()?.insert(
      id,
      Client {
        id,
        url,
        controller,
        notices: Vec::new(),
      },
    );
    Ok(id)
  }

  /// Make `version` the controller of every open client in one step.
  ///
  /// Returns the number of clients whose controller changed.
  pub fn claim(&self, version: &WorkerVersion) -> Result<usize> {
    let mut clients = self.lock()?;
    let mut changed = 0;
    for client in clients.values_mut() {
      if client.controller.as_ref() != Some(version) {
        client.controller = Some(version.clone());
        client.notices.push(ClientNotice::ControllerChanged {
          version: version.clone(),
        });
        changed += 1;
      }
    }
    Ok(changed)
  }

  /// Post a notice to every open client.
  pub fn post_all(&self, notice: ClientNotice) -> Result<usize> {
    let mut clients = self.lock()?;
    for client in clients.values_mut() {
      client.notices.push(notice.clone());
    }
    info!(?notice, clients = clients.len(), "posted notice");
    Ok(clients.len())
  }

  /// Take every notice queued for one client.
  pub fn take_notices(&self, id: &Uuid) -> Result<Vec<ClientNotice>> {
    let mut clients = self.lock()?;
    Ok(
      clients
        .get_mut(id)
        .map(|c| std::mem::take(&mut c.notices))
        .unwrap_or_default(),
    )
  }

  pub fn get(&self, id: &Uuid) -> Result<Option<Client>> {
    Ok(self.lock()?.get(id).cloned())
  }

  pub fn snapshot(&self) -> Result<Vec<Client>> {
    Ok(self.lock()?.values().cloned().collect())
  }

  fn lock(&self) -> Result<std::sync::MutexGuard<'_, BTreeMap<Uuid, Client>>> {
    self
      .clients
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))
  }
}
