//! Event dispatch over a single explicit worker context.

use color_eyre::{eyre::eyre, Result};
use std::future::Future;
use std::sync::{Arc, Mutex};
use tokio::task::JoinSet;
use tracing::{debug, error, info};
use url::Url;
use uuid::Uuid;

use crate::cache::{add_all, CacheKey, CacheStore, PartitionKind, PartitionNames};
use crate::clients::{ClientNotice, ClientRegistry};
use crate::config::Config;
use crate::db::Database;
use crate::event::Event;
use crate::http::Network;
use crate::lifecycle::{ActivationReport, InstallReport, LifecycleManager, Registration};
use crate::messaging::ControlMessage;
use crate::notification::{ActionKind, Notification, Notifier};
use crate::queue::PendingWriteQueue;
use crate::strategy::{RouteTable, Served, StrategyEngine};
use crate::sync::{SyncCoordinator, SyncRegistrations, SyncReport};

/// What a handled event produced.
#[derive(Debug)]
pub enum Outcome {
  Installed {
    install: InstallReport,
    /// Set when the new version took over right away
    activation: Option<ActivationReport>,
  },
  Activated(Option<ActivationReport>),
  Fetched(Served),
  Synced(Option<SyncReport>),
  Notified(Notification),
  Clicked { opened: Option<Uuid> },
  Cached(usize),
}

/// Everything one worker instance owns, built once.
pub struct WorkerContext<S: CacheStore, N: Network> {
  config: Config,
  cache: Arc<S>,
  network: Arc<N>,
  partitions: PartitionNames,
  engine: StrategyEngine<S, N>,
  lifecycle: LifecycleManager<S, N>,
  sync: SyncCoordinator<N>,
  clients: Arc<ClientRegistry>,
  notifier: Arc<dyn Notifier>,
}

impl<S: CacheStore, N: Network> WorkerContext<S, N> {
  pub fn new(
    config: Config,
    db: Database,
    cache: Arc<S>,
    network: Arc<N>,
    notifier: Arc<dyn Notifier>,
  ) -> Result<Self> {
    let partitions = PartitionNames::new(&config.cache_prefix, &config.version);
    let clients = Arc::new(ClientRegistry::new());

    let engine = StrategyEngine::new(
      Arc::clone(&cache),
      Arc::clone(&network),
      RouteTable::from_config(&config.api),
      partitions.clone(),
      CacheKey::from_url(&config.offline_url()?),
    );

    let lifecycle = LifecycleManager::new(
      config.version.clone(),
      partitions.clone(),
      config.bootstrap_urls()?,
      Arc::clone(&cache),
      Arc::clone(&network),
      Registration::new(db.clone()),
      Arc::clone(&clients),
    )?;

    let sync = SyncCoordinator::new(
      PendingWriteQueue::new(db.clone()),
      SyncRegistrations::new(db),
      Arc::clone(&network),
      &config.sync.tag,
      config.origin.clone(),
      &config.sync.endpoint,
    );

    Ok(Self {
      config,
      cache,
      network,
      partitions,
      engine,
      lifecycle,
      sync,
      clients,
      notifier,
    })
  }

  pub fn config(&self) -> &Config {
    &self.config
  }

  pub fn cache(&self) -> &S {
    &self.cache
  }

  pub fn network(&self) -> &Arc<N> {
    &self.network
  }

  pub fn partitions(&self) -> &PartitionNames {
    &self.partitions
  }

  pub fn lifecycle(&self) -> &LifecycleManager<S, N> {
    &self.lifecycle
  }

  pub fn sync(&self) -> &SyncCoordinator<N> {
    &self.sync
  }

  pub fn clients(&self) -> &Arc<ClientRegistry> {
    &self.clients
  }

  /// Route an event to its handler and run it to completion.
  pub async fn dispatch(&self, event: Event) -> Result<Outcome> {
    debug!(event = event.name(), "dispatching");

    match event {
      Event::Install => self.on_install().await,
      Event::Activate => self.lifecycle.activate().await.map(|r| Outcome::Activated(Some(r))),
      Event::Fetch(request) => self.engine.handle(&request).await.map(Outcome::Fetched),
      Event::Sync { tag } => self.sync.on_sync(&tag).await.map(Outcome::Synced),
      Event::ConnectivityRestored => self
        .sync
        .on_sync(self.sync.tag())
        .await
        .map(Outcome::Synced),
      Event::Push { payload } => self.on_push(payload.as_deref()),
      Event::NotificationClick { action } => self.on_notification_click(action),
      Event::Message(message) => self.on_message(message).await,
    }
  }

  /// Install, then either take over immediately or announce the update.
  ///
  /// With no active version there is nobody to wait for, so the new
  /// version activates straight away.
  async fn on_install(&self) -> Result<Outcome> {
    let install = self.lifecycle.install().await?;

    let active = self.lifecycle.registration().active()?;
    let take_over = self.config.skip_waiting_on_install
      || active.as_ref().map_or(true, |v| v == self.lifecycle.version());

    let activation = if take_over {
      self.lifecycle.skip_waiting().await?
    } else {
      let notified = self.clients.post_all(ClientNotice::UpdateAvailable {
        version: self.lifecycle.version().clone(),
      })?;
      info!(version = %self.lifecycle.version(), notified, "update waiting");
      None
    };

    Ok(Outcome::Installed { install, activation })
  }

  fn on_push(&self, payload: Option<&str>) -> Result<Outcome> {
    let notification = Notification::from_push(payload, &self.config.notifications);
    self.notifier.show(&notification)?;
    Ok(Outcome::Notified(notification))
  }

  fn on_notification_click(&self, action: Option<ActionKind>) -> Result<Outcome> {
    match action {
      Some(ActionKind::Explore) => {
        let url = self.config.resolve(&self.config.notifications.explore_url)?;
        let controller = self.lifecycle.registration().active()?;
        let id = self.clients.open_window(url.clone(), controller)?;
        info!(%url, client = %id, "opened window");
        Ok(Outcome::Clicked { opened: Some(id) })
      }
      Some(ActionKind::Close) | None => {
        debug!("notification dismissed");
        Ok(Outcome::Clicked { opened: None })
      }
    }
  }

  async fn on_message(&self, message: ControlMessage) -> Result<Outcome> {
    match message {
      ControlMessage::SkipWaiting => self.lifecycle.skip_waiting().await.map(Outcome::Activated),
      ControlMessage::CacheUrls { urls } => {
        let urls = urls
          .iter()
          .map(|u| self.config.resolve(u))
          .collect::<Result<Vec<Url>>>()?;
        let partition = self.partitions.name(PartitionKind::Runtime);
        let cached = add_all(self.cache.as_ref(), self.network.as_ref(), partition, &urls).await?;
        info!(partition, cached, "cached urls on request");
        Ok(Outcome::Cached(cached))
      }
    }
  }
}

/// Dispatcher plus the set of `wait_until` tasks it must finish before exit.
pub struct Worker<S: CacheStore, N: Network> {
  ctx: Arc<WorkerContext<S, N>>,
  tasks: Mutex<JoinSet<()>>,
}

impl<S: CacheStore + 'static, N: Network + 'static> Worker<S, N> {
  pub fn new(ctx: WorkerContext<S, N>) -> Self {
    Self {
      ctx: Arc::new(ctx),
      tasks: Mutex::new(JoinSet::new()),
    }
  }

  pub fn context(&self) -> &Arc<WorkerContext<S, N>> {
    &self.ctx
  }

  /// Handle an event inline.
  pub async fn dispatch(&self, event: Event) -> Result<Outcome> {
    self.ctx.dispatch(event).await
  }

  /// Keep the worker alive until `fut` resolves.
  pub fn wait_until<F>(&self, fut: F) -> Result<()>
  where
    F: Future<Output = ()> + Send + 'static,
  {
    let mut tasks = self
      .tasks
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    while tasks.try_join_next().is_some() {}
    tasks.spawn(fut);
    Ok(())
  }

  /// Handle an event in the background; the outcome is only logged.
  pub fn spawn(&self, event: Event) -> Result<()> {
    let ctx = Arc::clone(&self.ctx);
    let name = event.name();
    self.wait_until(async move {
      match ctx.dispatch(event).await {
        Ok(outcome) => debug!(event = name, ?outcome, "event handled"),
        Err(e) => error!(event = name, error = %e, "event failed"),
      }
    })
  }

  /// Background handlers still running.
  pub fn in_flight(&self) -> Result<usize> {
    let mut tasks = self
      .tasks
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    while tasks.try_join_next().is_some() {}
    Ok(tasks.len())
  }

  /// Wait for every `wait_until` task to finish.
  pub async fn shutdown(&self) -> Result<()> {
    let mut tasks = {
      let mut guard = self
        .tasks
        .lock()
        .map_err(|e| eyre!("Lock poisoned: {}", e))?;
      std::mem::take(&mut *guard)
    };

    if !tasks.is_empty() {
      info!(pending = tasks.len(), "waiting for in-flight work");
    }
    while let Some(joined) = tasks.join_next().await {
      if let Err(e) = joined {
        error!(error = %e, "background task panicked");
      }
    }
    Ok(())
  }
}
