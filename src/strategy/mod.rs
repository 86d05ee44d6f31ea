//! Request interception: routing plus the cache-first and network-first strategies.

mod engine;
mod route;

use chrono::{DateTime, Utc};

use crate::cache::CacheEntry;
use crate::http::Response;

pub use engine::StrategyEngine;
pub use route::{Matcher, Route, RouteTable, Strategy};

/// A response produced by the engine, with where it came from.
#[derive(Debug, Clone)]
pub struct Served {
  pub response: Response,
  pub source: ResponseSource,
  /// When the entry was stored (if served from a partition)
  pub stored_at: Option<DateTime<Utc>>,
}

impl Served {
  pub fn from_network(response: Response) -> Self {
    Self {
      response,
      source: ResponseSource::Network,
      stored_at: None,
    }
  }

  pub fn from_cache(entry: CacheEntry) -> Self {
    Self {
      response: entry.response,
      source: ResponseSource::Cache,
      stored_at: Some(entry.stored_at),
    }
  }

  pub fn offline_fallback(entry: CacheEntry) -> Self {
    Self {
      response: entry.response,
      source: ResponseSource::OfflineFallback,
      stored_at: Some(entry.stored_at),
    }
  }

  pub fn synthesized(response: Response) -> Self {
    Self {
      response,
      source: ResponseSource::Synthesized,
      stored_at: None,
    }
  }

  pub fn passthrough(response: Response) -> Self {
    Self {
      response,
      source: ResponseSource::Passthrough,
      stored_at: None,
    }
  }
}

/// Indicates where a served response came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseSource {
  /// Live network response
  Network,
  /// Entry from the route's partition
  Cache,
  /// The cached offline document
  OfflineFallback,
  /// Generated 503
  Synthesized,
  /// Request bypassed the engine
  Passthrough,
}

impl std::fmt::Display for ResponseSource {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    let s = match self {
      Self::Network => "network",
      Self::Cache => "cache",
      Self::OfflineFallback => "offline-fallback",
      Self::Synthesized => "synthesized",
      Self::Passthrough => "passthrough",
    };
    f.write_str(s)
  }
}
