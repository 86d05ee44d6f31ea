//! Control messages posted by clients to the worker.

use color_eyre::{eyre::eyre, Result};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ControlMessage {
  /// Activate a waiting worker immediately
  SkipWaiting,
  /// Add these URLs to the runtime partition
  CacheUrls { urls: Vec<String> },
}

impl ControlMessage {
  pub fn parse(json: &str) -> Result<Self> {
    serde_json::from_str(json).map_err(|e| eyre!("Invalid control message '{}': {}", json, e))
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_parse_skip_waiting() {
    assert_eq!(
      ControlMessage::parse(r#"{"type":"SKIP_WAITING"}"#).unwrap(),
      ControlMessage::SkipWaiting
    );
  }

  #[test]
  fn test_parse_cache_urls() {
    assert_eq!(
      ControlMessage::parse(r#"{"type":"CACHE_URLS","urls":["/a","/b"]}"#).unwrap(),
      ControlMessage::CacheUrls {
        urls: vec!["/a".to_string(), "/b".to_string()]
      }
    );
  }

  #[test]
  fn test_unknown_type_rejected() {
    assert!(ControlMessage::parse(r#"{"type":"RELOAD"}"#).is_err());
    assert!(ControlMessage::parse("not json").is_err());
  }
}
