//! Local notifications synthesized from push payloads.

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::config::NotificationConfig;

/// Body used when a push arrives without a payload.
const DEFAULT_BODY: &str = "You have a new notification";

/// User actions offered on every notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ActionKind {
  /// Open the configured view
  Explore,
  /// Dismiss only
  Close,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NotificationAction {
  pub action: ActionKind,
  pub title: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NotificationData {
  pub date_of_arrival: DateTime<Utc>,
  pub primary_key: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notification {
  pub title: String,
  pub body: String,
  pub icon: Option<String>,
  pub badge: Option<String>,
  pub vibrate: Vec<u32>,
  pub data: NotificationData,
  pub actions: Vec<NotificationAction>,
}

impl Notification {
  /// Build the notification for an opaque push payload.
  pub fn from_push(payload: Option<&str>, config: &NotificationConfig) -> Self {
    let body = payload
      .map(str::trim)
      .filter(|p| !p.is_empty())
      .unwrap_or(DEFAULT_BODY)
      .to_string();

    Self {
      title: config.title.clone(),
      body,
      icon: config.icon.clone(),
      badge: config.badge.clone(),
      vibrate: vec![100, 50, 100],
      data: NotificationData {
        date_of_arrival: Utc::now(),
        primary_key: 1,
      },
      actions: vec![
        NotificationAction {
          action: ActionKind::Explore,
          title: "Explore".to_string(),
        },
        NotificationAction {
          action: ActionKind::Close,
          title: "Close".to_string(),
        },
      ],
    }
  }
}

/// Displays notifications to the user.
pub trait Notifier: Send + Sync {
  fn show(&self, notification: &Notification) -> Result<()>;
}

/// Writes notifications to stdout as JSON.
pub struct ConsoleNotifier;

impl Notifier for ConsoleNotifier {
  fn show(&self, notification: &Notification) -> Result<()> {
    info!(title = %notification.title, "showing notification");
    let json = serde_json::to_string_pretty(notification)
      .map_err(|e| eyre!("Failed to serialize notification: {}", e))?;
    println!("{}", json);
    Ok(())
  }
}
