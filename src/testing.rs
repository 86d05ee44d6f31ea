//! Test doubles shared by the unit tests.

use color_eyre::{eyre::eyre, Result};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use crate::config::Config;
use crate::http::{Network, Request, Response};
use crate::notification::{Notification, Notifier};

enum Reply {
  Respond(Response),
  Fail,
  Hang,
}

/// Scripted network: replies by exact URL, 404 for anything unscripted.
#[derive(Default)]
pub struct MockNetwork {
  replies: Mutex<HashMap<String, Reply>>,
  requests: Mutex<Vec<Request>>,
  offline: AtomicBool,
}

impl MockNetwork {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn respond(&self, url: &str, status: u16, body: &str) {
    self
      .replies
      .lock()
      .unwrap()
      .insert(url.to_string(), Reply::Respond(Response::new(status, vec![], body)));
  }

  /// Requests to `url` fail as if the host were unreachable.
  pub fn fail(&self, url: &str) {
    self
      .replies
      .lock()
      .unwrap()
      .insert(url.to_string(), Reply::Fail);
  }

  /// Requests to `url` never complete.
  pub fn hang(&self, url: &str) {
    self
      .replies
      .lock()
      .unwrap()
      .insert(url.to_string(), Reply::Hang);
  }

  /// Every request fails while offline.
  pub fn set_offline(&self, offline: bool) {
    self.offline.store(offline, Ordering::SeqCst);
  }

  pub fn requests(&self) -> Vec<Request> {
    self.requests.lock().unwrap().clone()
  }

  /// URLs requested so far, in order.
  pub fn calls(&self) -> Vec<String> {
    self
      .requests()
      .iter()
      .map(|r| r.url.to_string())
      .collect()
  }
}

impl Network for MockNetwork {
  async fn fetch(&self, request: &Request) -> Result<Response> {
    self.requests.lock().unwrap().push(request.clone());

    if self.offline.load(Ordering::SeqCst) {
      return Err(eyre!("Failed to fetch {}: network unreachable", request.url));
    }

    let reply = match self.replies.lock().unwrap().get(request.url.as_str()) {
      Some(Reply::Respond(response)) => Some(Ok(response.clone())),
      Some(Reply::Fail) => Some(Err(eyre!(
        "Failed to fetch {}: connection refused",
        request.url
      ))),
      Some(Reply::Hang) => None,
      None => Some(Ok(Response::new(404, vec![], "not found"))),
    };

    match reply {
      Some(result) => result,
      None => std::future::pending().await,
    }
  }
}

/// Notifier that remembers what it displayed.
#[derive(Default)]
pub struct RecordingNotifier {
  shown: Mutex<Vec<Notification>>,
}

impl RecordingNotifier {
  pub fn shown(&self) -> Vec<Notification> {
    self.shown.lock().unwrap().clone()
  }
}

impl Notifier for RecordingNotifier {
  fn show(&self, notification: &Notification) -> Result<()> {
    self.shown.lock().unwrap().push(notification.clone());
    Ok(())
  }
}

pub fn test_config() -> Config {
  Config::from_yaml(
    r#"
origin: https://app.test
cache_prefix: tb
version: v1.0.0-1
bootstrap_assets: [/, /manifest.json, /offline.html]
offline_document: /offline.html
api:
  hosts: [api.test]
  path_prefixes: [/api/]
sync:
  tag: sync-tasks
  endpoint: https://api.test/tasks/{id}
notifications:
  title: Taskboard
  icon: /icons/icon-192x192.png
  explore_url: /dashboard
skip_waiting_on_install: false
"#,
  )
  .unwrap()
}
