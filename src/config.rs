use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

use crate::lifecycle::WorkerVersion;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
  /// Origin of the controlled application; relative paths resolve against it
  pub origin: Url,
  /// Prefix shared by every partition name of this application
  #[serde(default = "default_cache_prefix")]
  pub cache_prefix: String,
  /// `<tag>-<build>`, e.g. "v1.4.0-20240301120000"
  pub version: WorkerVersion,
  /// Paths fetched into the static partition at install time, in order
  #[serde(default)]
  pub bootstrap_assets: Vec<String>,
  /// Document served when a navigation fails on both network and cache
  #[serde(default = "default_offline_document")]
  pub offline_document: String,
  #[serde(default)]
  pub api: ApiConfig,
  pub sync: SyncConfig,
  #[serde(default)]
  pub notifications: NotificationConfig,
  /// Activate immediately after install instead of waiting for SKIP_WAITING
  #[serde(default = "default_true")]
  pub skip_waiting_on_install: bool,
  #[serde(default)]
  pub connectivity: ConnectivityConfig,
  /// Database path (defaults to the user data directory)
  pub database: Option<PathBuf>,
}

/// How API requests are recognized.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
  /// Hosts whose requests are API calls (case-insensitive)
  #[serde(default, deserialize_with = "deserialize_lowercase_set")]
  pub hosts: BTreeSet<String>,
  /// Path prefixes whose requests are API calls
  #[serde(default = "default_api_prefixes")]
  pub path_prefixes: Vec<String>,
}

impl Default for ApiConfig {
  fn default() -> Self {
    Self {
      hosts: BTreeSet::new(),
      path_prefixes: default_api_prefixes(),
    }
  }
}

fn deserialize_lowercase_set<'de, D>(deserializer: D) -> Result<BTreeSet<String>, D::Error>
where
  D: serde::Deserializer<'de>,
{
  let v: Vec<String> = Vec::deserialize(deserializer)?;
  Ok(v.into_iter().map(|s| s.to_lowercase()).collect())
}

#[derive(Debug, Clone, Deserialize)]
pub struct SyncConfig {
  /// Tag of the reconnect signal that drains the pending-write queue
  #[serde(default = "default_sync_tag")]
  pub tag: String,
  /// Replay endpoint; `{id}` is replaced by the resource id
  pub endpoint: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NotificationConfig {
  #[serde(default = "default_notification_title")]
  pub title: String,
  pub icon: Option<String>,
  pub badge: Option<String>,
  /// View opened by the `explore` action
  #[serde(default = "default_explore_url")]
  pub explore_url: String,
}

impl Default for NotificationConfig {
  fn default() -> Self {
    Self {
      title: default_notification_title(),
      icon: None,
      badge: None,
      explore_url: default_explore_url(),
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ConnectivityConfig {
  /// URL probed to detect restored connectivity (defaults to the origin)
  pub probe_url: Option<String>,
  #[serde(default = "default_interval_secs")]
  pub interval_secs: u64,
}

impl Default for ConnectivityConfig {
  fn default() -> Self {
    Self {
      probe_url: None,
      interval_secs: default_interval_secs(),
    }
  }
}

fn default_cache_prefix() -> String {
  "offline-worker".to_string()
}

fn default_offline_document() -> String {
  "/offline.html".to_string()
}

fn default_api_prefixes() -> Vec<String> {
  vec!["/api/".to_string()]
}

fn default_sync_tag() -> String {
  "sync-pending-writes".to_string()
}

fn default_notification_title() -> String {
  "New update".to_string()
}

fn default_explore_url() -> String {
  "/".to_string()
}

fn default_interval_secs() -> u64 {
  30
}

fn default_true() -> bool {
  true
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./offline-worker.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/offline-worker/config.yaml
  pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
    let path = if let Some(p) = explicit_path {
      if p.exists() {
        Some(p.to_path_buf())
      } else {
        return Err(eyre!("Config file not found: {}", p.display()));
      }
    } else {
      Self::find_config_file()
    };

    match path {
      Some(p) => Self::load_from_path(&p),
      None => Err(eyre!(
        "No configuration file found. Create one at ~/.config/offline-worker/config.yaml\n\
                 See config.example.yaml for the format."
      )),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("offline-worker.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("offline-worker").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    Self::from_yaml(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))
  }

  pub fn from_yaml(contents: &str) -> Result<Self> {
    let config: Config = serde_yaml::from_str(contents).map_err(|e| eyre!("{}", e))?;
    config.validate()?;
    Ok(config)
  }

  fn validate(&self) -> Result<()> {
    if !self.sync.endpoint.contains("{id}") {
      return Err(eyre!(
        "sync.endpoint must contain an {{id}} placeholder: {}",
        self.sync.endpoint
      ));
    }
    if self.cache_prefix.is_empty() {
      return Err(eyre!("cache_prefix must not be empty"));
    }
    self.bootstrap_urls()?;
    self.offline_url()?;
    Ok(())
  }

  /// Resolve a path (or absolute URL) against the origin.
  pub fn resolve(&self, path: &str) -> Result<Url> {
    self
      .origin
      .join(path)
      .map_err(|e| eyre!("Invalid url '{}': {}", path, e))
  }

  pub fn bootstrap_urls(&self) -> Result<Vec<Url>> {
    self
      .bootstrap_assets
      .iter()
      .map(|path| self.resolve(path))
      .collect()
  }

  pub fn offline_url(&self) -> Result<Url> {
    self.resolve(&self.offline_document)
  }

  pub fn probe_url(&self) -> Result<Url> {
    match &self.connectivity.probe_url {
      Some(url) => self.resolve(url),
      None => Ok(self.origin.clone()),
    }
  }

  pub fn probe_interval(&self) -> Duration {
    Duration::from_secs(self.connectivity.interval_secs.max(1))
  }

  /// Get the bearer credential for queued writes from the environment.
  pub fn get_token() -> Result<String> {
    std::env::var("OFFLINE_WORKER_TOKEN").map_err(|_| {
      eyre!("Bearer token not found. Pass --token or set OFFLINE_WORKER_TOKEN.")
    })
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::io::Write;

  const MINIMAL: &str = r#"
origin: https://app.test
version: v1.0.0-20240301
sync:
  endpoint: /api/tasks/{id}
"#;

  #[test]
  fn test_defaults() {
    let config = Config::from_yaml(MINIMAL).unwrap();

    assert_eq!(config.cache_prefix, "offline-worker");
    assert_eq!(config.offline_document, "/offline.html");
    assert_eq!(config.api.path_prefixes, vec!["/api/".to_string()]);
    assert!(config.api.hosts.is_empty());
    assert_eq!(config.sync.tag, "sync-pending-writes");
    assert!(config.skip_waiting_on_install);
    assert_eq!(config.probe_url().unwrap().as_str(), "https://app.test/");
    assert_eq!(config.probe_interval(), Duration::from_secs(30));
    assert_eq!(config.version.tag(), "v1.0.0");
  }

  #[test]
  fn test_full_config() {
    let yaml = r#"
origin: https://app.test
cache_prefix: taskboard
version: v2.1.0-beta-20240301
bootstrap_assets: [/, /index.html, /manifest.json, /offline.html]
api:
  hosts: [API.Example.com]
  path_prefixes: [/api/, /graphql]
sync:
  tag: sync-tasks
  endpoint: https://api.example.com/tasks/{id}
notifications:
  title: Taskboard
  icon: /icons/icon-192x192.png
  explore_url: /dashboard
skip_waiting_on_install: false
connectivity:
  probe_url: /health
  interval_secs: 5
"#;
    let config = Config::from_yaml(yaml).unwrap();

    assert!(config.api.hosts.contains("api.example.com"));
    assert_eq!(config.version.tag(), "v2.1.0-beta");
    assert_eq!(config.version.build(), "20240301");
    assert_eq!(config.bootstrap_urls().unwrap().len(), 4);
    assert_eq!(config.sync.endpoint, "https://api.example.com/tasks/{id}");
    assert_eq!(config.probe_url().unwrap().as_str(), "https://app.test/health");
    assert!(!config.skip_waiting_on_install);
  }

  #[test]
  fn test_endpoint_requires_placeholder() {
    let yaml = MINIMAL.replace("/api/tasks/{id}", "/api/tasks");
    assert!(Config::from_yaml(&yaml).is_err());
  }

  #[test]
  fn test_bad_version_rejected() {
    let yaml = MINIMAL.replace("v1.0.0-20240301", "latest");
    assert!(Config::from_yaml(&yaml).is_err());
  }

  #[test]
  fn test_resolve_keeps_absolute_urls() {
    let config = Config::from_yaml(MINIMAL).unwrap();
    assert_eq!(
      config.resolve("/tasks").unwrap().as_str(),
      "https://app.test/tasks"
    );
    assert_eq!(
      config.resolve("https://cdn.test/app.js").unwrap().as_str(),
      "https://cdn.test/app.js"
    );
  }

  #[test]
  fn test_load_explicit_path() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(MINIMAL.as_bytes()).unwrap();

    let config = Config::load(Some(file.path())).unwrap();
    assert_eq!(config.origin.as_str(), "https://app.test/");
  }

  #[test]
  fn test_load_missing_explicit_path() {
    let err = Config::load(Some(Path::new("/nonexistent/offline-worker.yaml"))).unwrap_err();
    assert!(err.to_string().contains("Config file not found"));
  }
}
