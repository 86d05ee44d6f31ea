//! Core types for the cache store.

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use std::fmt;
use url::Url;

use crate::http::{Request, Response};

/// Normalized identity of a cacheable request.
///
/// Only GET requests have a key. The URL is absolute with the fragment
/// removed; host case, default ports and path encoding are normalized by
/// the URL parser.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
  url: Url,
}

impl CacheKey {
  pub fn from_url(url: &Url) -> Self {
    let mut url = url.clone();
    url.set_fragment(None);
    Self { url }
  }

  /// Key for `request`, or `None` when the method never participates in caching.
  pub fn for_request(request: &Request) -> Option<Self> {
    request.is_read().then(|| Self::from_url(&request.url))
  }

  pub fn url(&self) -> &Url {
    &self.url
  }

  /// SHA256 hash for stable, fixed-length storage keys.
  pub fn hash(&self) -> String {
    let mut hasher = Sha256::new();
    hasher.update(b"GET ");
    hasher.update(self.url.as_str().as_bytes());
    hex::encode(hasher.finalize())
  }
}

impl fmt::Display for CacheKey {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "GET {}", self.url)
  }
}

/// A stored response snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
  pub url: Url,
  pub response: Response,
  /// When the entry was last written
  pub stored_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::http::Method;

  fn url(s: &str) -> Url {
    Url::parse(s).unwrap()
  }

  #[test]
  fn test_fragment_is_ignored() {
    let a = CacheKey::from_url(&url("https://app.test/page#top"));
    let b = CacheKey::from_url(&url("https://app.test/page"));
    assert_eq!(a, b);
    assert_eq!(a.hash(), b.hash());
  }

  #[test]
  fn test_host_case_and_default_port_normalized() {
    let a = CacheKey::from_url(&url("https://APP.test:443/page"));
    let b = CacheKey::from_url(&url("https://app.test/page"));
    assert_eq!(a.hash(), b.hash());
  }

  #[test]
  fn test_query_is_significant() {
    let a = CacheKey::from_url(&url("https://app.test/page?a=1"));
    let b = CacheKey::from_url(&url("https://app.test/page?a=2"));
    assert_ne!(a.hash(), b.hash());
  }

  #[test]
  fn test_writes_have_no_key() {
    let req = Request::get(url("https://app.test/tasks")).with_method(Method::POST);
    assert!(CacheKey::for_request(&req).is_none());
    assert!(CacheKey::for_request(&Request::get(url("https://app.test/tasks"))).is_some());
  }

  #[test]
  fn test_hash_is_fixed_length_hex() {
    let key = CacheKey::from_url(&url("https://app.test/a/very/long/path?with=query"));
    let hash = key.hash();
    assert_eq!(hash.len(), 64);
    assert!(hash.chars().all(|c| c.is_ascii_hexdigit()));
  }
}
