//! Strategy engine that orchestrates partitions with network fetching.

use color_eyre::Result;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::route::{RouteTable, Strategy};
use super::Served;
use crate::cache::{CacheKey, CacheStore, PartitionNames};
use crate::http::{Network, Request, Response};

/// Serves intercepted requests from the network and the cache partitions.
///
/// This sits between the application and the network, choosing a strategy
/// per request through the route table.
pub struct StrategyEngine<S: CacheStore, N: Network> {
  cache: Arc<S>,
  network: Arc<N>,
  routes: RouteTable,
  partitions: PartitionNames,
  offline_document: CacheKey,
}

impl<S: CacheStore, N: Network> StrategyEngine<S, N> {
  pub fn new(
    cache: Arc<S>,
    network: Arc<N>,
    routes: RouteTable,
    partitions: PartitionNames,
    offline_document: CacheKey,
  ) -> Self {
    Self {
      cache,
      network,
      routes,
      partitions,
      offline_document,
    }
  }

  /// Classify the request and run the matching strategy.
  ///
  /// Requests with no route are passed to the network unmodified.
  pub async fn handle(&self, request: &Request) -> Result<Served> {
    let Some(route) = self.routes.classify(request) else {
      debug!(method = %request.method, url = %request.url, "bypassing engine");
      let response = self.network.fetch(request).await?;
      return Ok(Served::passthrough(response));
    };

    let partition = self.partitions.name(route.partition);
    debug!(url = %request.url, route = route.name, partition, "routed");

    match route.strategy {
      Strategy::CacheFirst => self.cache_first(request, partition).await,
      Strategy::NetworkFirst => self.network_first(request, partition).await,
    }
  }

  /// Serve from `partition` when present; only consult the network on a miss.
  ///
  /// 1. Hit: return the entry, no revalidation
  /// 2. Miss: fetch, store a copy if the status is 200
  /// 3. Network failure: offline document, or a synthesized 503
  pub async fn cache_first(&self, request: &Request, partition: &str) -> Result<Served> {
    let Some(key) = CacheKey::for_request(request) else {
      let response = self.network.fetch(request).await?;
      return Ok(Served::passthrough(response));
    };

    if let Some(entry) = self.cache.get(partition, &key)? {
      debug!(%key, partition, "cache hit");
      return Ok(Served::from_cache(entry));
    }

    debug!(%key, partition, "cache miss");
    match self.network.fetch(request).await {
      Ok(response) => {
        self.store(partition, &key, &response)?;
        Ok(Served::from_network(response))
      }
      Err(e) => {
        warn!(%key, error = %e, "network failed on cache miss");
        self.offline_fallback()
      }
    }
  }

  /// Always try the network; fall back to `partition` only on failure.
  ///
  /// 1. Network response: store a copy if the status is 200, return it as is
  /// 2. Failure with a cached entry: return the entry
  /// 3. Failure on a navigation: offline document, or a synthesized 503
  /// 4. Any other failure propagates to the caller
  pub async fn network_first(&self, request: &Request, partition: &str) -> Result<Served> {
    let Some(key) = CacheKey::for_request(request) else {
      let response = self.network.fetch(request).await?;
      return Ok(Served::passthrough(response));
    };

    let error = match self.network.fetch(request).await {
      Ok(response) => {
        self.store(partition, &key, &response)?;
        return Ok(Served::from_network(response));
      }
      Err(e) => e,
    };

    if let Some(entry) = self.cache.get(partition, &key)? {
      info!(%key, partition, "network failed, serving cached copy");
      return Ok(Served::from_cache(entry));
    }

    if request.is_navigation() {
      warn!(%key, error = %error, "network failed on uncached navigation");
      return self.offline_fallback();
    }

    Err(error)
  }

  /// Only exact 200 responses are written.
  fn store(&self, partition: &str, key: &CacheKey, response: &Response) -> Result<()> {
    if response.is_cacheable() {
      self.cache.put(partition, key, response)?;
      debug!(%key, partition, "stored response");
    } else {
      debug!(%key, status = response.status, "not caching response");
    }
    Ok(())
  }

  fn offline_fallback(&self) -> Result<Served> {
    match self.cache.match_any(&self.offline_document)? {
      Some(entry) => {
        info!("serving offline document");
        Ok(Served::offline_fallback(entry))
      }
      None => {
        info!("no offline document cached, synthesizing 503");
        Ok(Served::synthesized(Response::service_unavailable()))
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::{PartitionKind, SqliteCacheStore};
  use crate::config::ApiConfig;
  use crate::db::Database;
  use crate::http::{Destination, Method};
  use crate::lifecycle::WorkerVersion;
  use crate::strategy::ResponseSource;
  use crate::testing::MockNetwork;
  use url::Url;

  const RUNTIME: &str = "tb-runtime";
  const API: &str = "tb-api";
  const STATIC: &str = "tb-static-v1.0.0-1";

  struct Fixture {
    cache: Arc<SqliteCacheStore>,
    network: Arc<MockNetwork>,
    engine: StrategyEngine<SqliteCacheStore, MockNetwork>,
  }

  fn fixture() -> Fixture {
    let cache = Arc::new(SqliteCacheStore::new(Database::open_in_memory().unwrap()));
    let network = Arc::new(MockNetwork::new());
    let version = WorkerVersion::parse("v1.0.0-1").unwrap();
    let partitions = PartitionNames::new("tb", &version);
    assert_eq!(partitions.name(PartitionKind::Runtime), RUNTIME);

    let engine = StrategyEngine::new(
      Arc::clone(&cache),
      Arc::clone(&network),
      RouteTable::from_config(&ApiConfig::default()),
      partitions,
      key("https://app.test/offline.html"),
    );
    Fixture {
      cache,
      network,
      engine,
    }
  }

  fn url(s: &str) -> Url {
    Url::parse(s).unwrap()
  }

  fn key(s: &str) -> CacheKey {
    CacheKey::from_url(&url(s))
  }

  fn ok(body: &str) -> Response {
    Response::new(200, vec![], body)
  }

  fn script(s: &str) -> Request {
    Request::get(url(s)).with_destination(Destination::Script)
  }

  #[tokio::test]
  async fn test_cache_first_hit_skips_network() {
    let fx = fixture();
    let entry = Response::new(
      200,
      vec![("content-type".to_string(), "text/javascript".to_string())],
      "cached()",
    );
    fx.cache
      .put(RUNTIME, &key("https://app.test/app.js"), &entry)
      .unwrap();
    fx.network.respond("https://app.test/app.js", 200, "fresh()");

    let served = fx.engine.handle(&script("https://app.test/app.js")).await.unwrap();

    assert_eq!(served.source, ResponseSource::Cache);
    assert_eq!(served.response, entry);
    assert!(fx.network.calls().is_empty());
  }

  #[tokio::test]
  async fn test_cache_first_miss_stores_200() {
    let fx = fixture();
    fx.network.respond("https://app.test/app.js", 200, "fresh()");

    let served = fx.engine.handle(&script("https://app.test/app.js")).await.unwrap();

    assert_eq!(served.source, ResponseSource::Network);
    assert_eq!(
      fx.cache
        .get(RUNTIME, &key("https://app.test/app.js"))
        .unwrap()
        .unwrap()
        .response,
      ok("fresh()")
    );

    // Second request is served from the partition
    let served = fx.engine.handle(&script("https://app.test/app.js")).await.unwrap();
    assert_eq!(served.source, ResponseSource::Cache);
    assert_eq!(fx.network.calls().len(), 1);
  }

  #[tokio::test]
  async fn test_cache_first_offline_serves_offline_document() {
    let fx = fixture();
    fx.cache
      .put(STATIC, &key("https://app.test/offline.html"), &ok("offline"))
      .unwrap();
    fx.network.set_offline(true);

    let served = fx.engine.handle(&script("https://app.test/app.js")).await.unwrap();

    assert_eq!(served.source, ResponseSource::OfflineFallback);
    assert_eq!(served.response.body, b"offline");
  }

  #[tokio::test]
  async fn test_cache_first_offline_without_document_synthesizes_503() {
    let fx = fixture();
    fx.network.set_offline(true);

    let served = fx.engine.handle(&script("https://app.test/app.js")).await.unwrap();

    assert_eq!(served.source, ResponseSource::Synthesized);
    assert_eq!(served.response.status, 503);
  }

  #[tokio::test]
  async fn test_network_first_stores_identical_copy() {
    let fx = fixture();
    fx.network.respond("https://app.test/api/tasks", 200, r#"[{"id":1}]"#);

    let served = fx
      .engine
      .handle(&Request::get(url("https://app.test/api/tasks")))
      .await
      .unwrap();

    assert_eq!(served.source, ResponseSource::Network);
    assert_eq!(served.response, ok(r#"[{"id":1}]"#));
    let stored = fx
      .cache
      .get(API, &key("https://app.test/api/tasks"))
      .unwrap()
      .unwrap();
    assert_eq!(stored.response, served.response);
  }

  #[tokio::test]
  async fn test_non_200_never_cached() {
    let fx = fixture();
    for (path, status) in [("/a", 404), ("/b", 301), ("/c", 204), ("/d", 500)] {
      let u = format!("https://app.test{}", path);
      fx.network.respond(&u, status, "x");

      let served = fx.engine.handle(&Request::get(url(&u))).await.unwrap();
      assert_eq!(served.response.status, status);

      let served = fx.engine.handle(&script(&u)).await.unwrap();
      assert_eq!(served.response.status, status);
    }

    assert!(fx.cache.keys(RUNTIME).unwrap().is_empty());
  }

  #[tokio::test]
  async fn test_network_first_falls_back_to_cache() {
    let fx = fixture();
    fx.network.respond("https://app.test/tasks", 200, "<html>tasks</html>");
    let nav = Request::navigate(url("https://app.test/tasks"));
    fx.engine.handle(&nav).await.unwrap();

    fx.network.set_offline(true);
    let served = fx.engine.handle(&nav).await.unwrap();

    assert_eq!(served.source, ResponseSource::Cache);
    assert_eq!(served.response.status, 200);
    assert_eq!(served.response.body, b"<html>tasks</html>");
  }

  #[tokio::test]
  async fn test_offline_unvisited_navigation_gets_fallback() {
    let fx = fixture();
    fx.network.set_offline(true);
    let nav = Request::navigate(url("https://app.test/never-seen"));

    let served = fx.engine.handle(&nav).await.unwrap();
    assert_eq!(served.source, ResponseSource::Synthesized);
    assert_eq!(served.response.status, 503);

    fx.cache
      .put(STATIC, &key("https://app.test/offline.html"), &ok("offline"))
      .unwrap();
    let served = fx.engine.handle(&nav).await.unwrap();
    assert_eq!(served.source, ResponseSource::OfflineFallback);
    assert_eq!(served.response.body, b"offline");
  }

  #[tokio::test]
  async fn test_network_first_non_navigation_propagates_failure() {
    let fx = fixture();
    fx.cache
      .put(STATIC, &key("https://app.test/offline.html"), &ok("offline"))
      .unwrap();
    fx.network.set_offline(true);

    let result = fx
      .engine
      .handle(&Request::get(url("https://app.test/api/tasks")))
      .await;

    assert!(result.is_err());
  }

  #[tokio::test]
  async fn test_writes_pass_through_unmodified() {
    let fx = fixture();
    fx.network.respond("https://app.test/api/tasks", 201, "created");
    let post = Request::get(url("https://app.test/api/tasks")).with_method(Method::POST);

    let served = fx.engine.handle(&post).await.unwrap();

    assert_eq!(served.source, ResponseSource::Passthrough);
    assert_eq!(served.response.status, 201);
    assert_eq!(fx.network.requests()[0].method, Method::POST);
    assert!(fx.cache.partition_names().unwrap().is_empty());
  }

  #[tokio::test]
  async fn test_writes_propagate_network_failure() {
    let fx = fixture();
    fx.network.set_offline(true);
    let post = Request::get(url("https://app.test/api/tasks")).with_method(Method::POST);

    assert!(fx.engine.handle(&post).await.is_err());
  }

  #[tokio::test]
  async fn test_stale_entry_overwritten_by_network_first() {
    let fx = fixture();
    fx.cache
      .put(RUNTIME, &key("https://app.test/about"), &ok("old"))
      .unwrap();
    fx.network.respond("https://app.test/about", 200, "new");

    let served = fx
      .engine
      .handle(&Request::navigate(url("https://app.test/about")))
      .await
      .unwrap();

    assert_eq!(served.response.body, b"new");
    assert_eq!(fx.cache.keys(RUNTIME).unwrap().len(), 1);
    assert_eq!(
      fx.cache
        .get(RUNTIME, &key("https://app.test/about"))
        .unwrap()
        .unwrap()
        .response
        .body,
      b"new"
    );
  }
}
