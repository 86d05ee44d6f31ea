use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::{info, warn};
use url::Url;

use crate::connectivity::{probe, ConnectivityMonitor};
use crate::http::{Network, Request};
use crate::messaging::ControlMessage;
use crate::notification::ActionKind;
use crate::sync::SyncRegistrations;

/// Worker events
#[derive(Debug)]
pub enum Event {
  /// Populate the static partition for this version
  Install,
  /// Evict stale partitions and take control
  Activate,
  /// An intercepted request
  Fetch(Request),
  /// Reconnect signal registered by a failed write
  Sync { tag: String },
  /// The network became reachable again
  ConnectivityRestored,
  /// Push payload from the remote server
  Push { payload: Option<String> },
  /// The user picked a notification action (or clicked its body)
  NotificationClick { action: Option<ActionKind> },
  /// Control message posted by a client
  Message(ControlMessage),
}

impl Event {
  pub fn name(&self) -> &'static str {
    match self {
      Self::Install => "install",
      Self::Activate => "activate",
      Self::Fetch(_) => "fetch",
      Self::Sync { .. } => "sync",
      Self::ConnectivityRestored => "online",
      Self::Push { .. } => "push",
      Self::NotificationClick { .. } => "notificationclick",
      Self::Message(_) => "message",
    }
  }
}

/// Event handler that produces events from connectivity probes and stdin
pub struct EventHandler {
  tx: mpsc::UnboundedSender<Event>,
  rx: mpsc::UnboundedReceiver<Event>,
}

impl EventHandler {
  pub fn new() -> Self {
    let (tx, rx) = mpsc::unbounded_channel();
    Self { tx, rx }
  }

  /// Probe `url` every `interval`.
  ///
  /// Emits `ConnectivityRestored` on each offline → online edge. On every
  /// other online tick, emits `Sync` for each registered tag so writes queued
  /// while already online still get replayed. A probe slower than `interval`
  /// counts as offline.
  pub fn watch_connectivity<N: Network + 'static>(
    &self,
    network: Arc<N>,
    url: Url,
    interval: Duration,
    registrations: SyncRegistrations,
  ) {
    let tx = self.tx.clone();

    tokio::spawn(async move {
      let mut monitor = ConnectivityMonitor::new();
      let mut ticker = tokio::time::interval(interval);
      loop {
        ticker.tick().await;
        let reachable = probe(network.as_ref(), &url, interval).await;

        let events = if monitor.observe(reachable) {
          info!("connectivity restored");
          vec![Event::ConnectivityRestored]
        } else if reachable {
          match registrations.tags() {
            Ok(tags) => tags.into_iter().map(|tag| Event::Sync { tag }).collect(),
            Err(e) => {
              warn!(error = %e, "failed to read sync registrations");
              Vec::new()
            }
          }
        } else {
          Vec::new()
        };

        for event in events {
          if tx.send(event).is_err() {
            return;
          }
        }
        if tx.is_closed() {
          break;
        }
      }
    });
  }

  /// Read one JSON control message per line from stdin.
  pub fn watch_stdin(&self) {
    let tx = self.tx.clone();

    tokio::spawn(async move {
      let mut lines = BufReader::new(tokio::io::stdin()).lines();
      while let Ok(Some(line)) = lines.next_line().await {
        let line = line.trim();
        if line.is_empty() {
          continue;
        }
        match ControlMessage::parse(line) {
          Ok(message) => {
            if tx.send(Event::Message(message)).is_err() {
              break;
            }
          }
          Err(e) => warn!(error = %e, "ignoring stdin line"),
        }
      }
    });
  }

  /// Get a sender for injecting events
  pub fn sender(&self) -> mpsc::UnboundedSender<Event> {
    self.tx.clone()
  }

  /// Receive the next event
  pub async fn next(&mut self) -> Option<Event> {
    self.rx.recv().await
  }
}

impl Default for EventHandler {
  fn default() -> Self {
    Self::new()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::db::Database;
  use crate::queue::PendingWriteQueue;
  use crate::sync::SyncCoordinator;
  use crate::testing::MockNetwork;
  use serde_json::json;

  fn registrations() -> SyncRegistrations {
    SyncRegistrations::new(Database::open_in_memory().unwrap())
  }

  #[tokio::test]
  async fn test_injected_events_are_received() {
    let mut events = EventHandler::new();
    events
      .sender()
      .send(Event::Sync {
        tag: "sync-tasks".to_string(),
      })
      .unwrap();

    let event = events.next().await.unwrap();
    assert_eq!(event.name(), "sync");
  }

  #[tokio::test]
  async fn test_connectivity_restored_is_emitted() {
    let mut events = EventHandler::new();
    let network = Arc::new(MockNetwork::new());
    network.set_offline(true);
    events.watch_connectivity(
      Arc::clone(&network),
      Url::parse("https://app.test/").unwrap(),
      Duration::from_millis(10),
      registrations(),
    );

    // Let the first (offline) probe run
    tokio::time::sleep(Duration::from_millis(50)).await;
    network.set_offline(false);

    let event = tokio::time::timeout(Duration::from_secs(5), events.next())
      .await
      .unwrap()
      .unwrap();
    assert!(matches!(event, Event::ConnectivityRestored));
  }

  #[tokio::test]
  async fn test_registered_tag_replays_while_online() {
    let db = Database::open_in_memory().unwrap();
    let network = Arc::new(MockNetwork::new());
    network.respond("https://api.test/tasks/1", 200, "{}");
    let sync = SyncCoordinator::new(
      PendingWriteQueue::new(db.clone()),
      SyncRegistrations::new(db.clone()),
      Arc::clone(&network),
      "sync-tasks",
      Url::parse("https://app.test").unwrap(),
      "https://api.test/tasks/{id}",
    );
    sync.enqueue("1", json!({"done": true}), "token").unwrap();

    let mut events = EventHandler::new();
    events.watch_connectivity(
      Arc::clone(&network),
      Url::parse("https://app.test/").unwrap(),
      Duration::from_millis(10),
      SyncRegistrations::new(db),
    );

    let event = tokio::time::timeout(Duration::from_secs(5), events.next())
      .await
      .unwrap()
      .unwrap();
    let Event::Sync { tag } = event else {
      panic!("expected a sync event");
    };
    assert_eq!(tag, "sync-tasks");

    let report = sync.on_sync(&tag).await.unwrap().unwrap();
    assert_eq!(report.delivered.len(), 1);
    assert!(sync.queue().is_empty().unwrap());
    assert!(sync.registrations().tags().unwrap().is_empty());
  }

  #[tokio::test]
  async fn test_hung_health_check_counts_as_offline() {
    let mut events = EventHandler::new();
    let network = Arc::new(MockNetwork::new());
    network.hang("https://app.test/");
    events.watch_connectivity(
      Arc::clone(&network),
      Url::parse("https://app.test/").unwrap(),
      Duration::from_millis(10),
      registrations(),
    );

    // Several checks time out, then the host answers again
    tokio::time::sleep(Duration::from_millis(50)).await;
    network.respond("https://app.test/", 200, "");

    let event = tokio::time::timeout(Duration::from_secs(5), events.next())
      .await
      .unwrap()
      .unwrap();
    assert!(matches!(event, Event::ConnectivityRestored));
  }
}
