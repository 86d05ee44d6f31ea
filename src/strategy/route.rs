//! Routing table: which strategy and partition serve a request.

use std::collections::BTreeSet;

use crate::cache::PartitionKind;
use crate::config::ApiConfig;
use crate::http::{Destination, Request};

/// How a request is served.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
  CacheFirst,
  NetworkFirst,
}

/// Predicate over an intercepted request.
#[derive(Debug, Clone)]
pub enum Matcher {
  /// Host in `hosts` or path starting with one of `path_prefixes`
  Api {
    hosts: BTreeSet<String>,
    path_prefixes: Vec<String>,
  },
  /// Resource type is one of these
  Destination(Vec<Destination>),
  /// Top-level document navigation
  Navigation,
  Any,
}

impl Matcher {
  pub fn matches(&self, request: &Request) -> bool {
    match self {
      Self::Api {
        hosts,
        path_prefixes,
      } => {
        let host_match = request
          .url
          .host_str()
          .map(|h| hosts.contains(&h.to_lowercase()))
          .unwrap_or(false);
        host_match
          || path_prefixes
            .iter()
            .any(|p| request.url.path().starts_with(p.as_str()))
      }
      Self::Destination(kinds) => kinds.contains(&request.destination),
      Self::Navigation => request.is_navigation(),
      Self::Any => true,
    }
  }
}

#[derive(Debug, Clone)]
pub struct Route {
  pub name: &'static str,
  pub matcher: Matcher,
  pub strategy: Strategy,
  pub partition: PartitionKind,
}

/// Ordered routes; the first match wins.
#[derive(Debug, Clone)]
pub struct RouteTable {
  routes: Vec<Route>,
}

impl RouteTable {
  pub fn new(routes: Vec<Route>) -> Self {
    Self { routes }
  }

  /// The standard table:
  /// API calls → network-first/api, assets → cache-first/runtime,
  /// documents → network-first/runtime, rest → network-first/runtime.
  pub fn from_config(api: &ApiConfig) -> Self {
    Self::new(vec![
      Route {
        name: "api",
        matcher: Matcher::Api {
          hosts: api.hosts.clone(),
          path_prefixes: api.path_prefixes.clone(),
        },
        strategy: Strategy::NetworkFirst,
        partition: PartitionKind::Api,
      },
      Route {
        name: "assets",
        matcher: Matcher::Destination(vec![
          Destination::Script,
          Destination::Style,
          Destination::Font,
          Destination::Image,
        ]),
        strategy: Strategy::CacheFirst,
        partition: PartitionKind::Runtime,
      },
      Route {
        name: "documents",
        matcher: Matcher::Navigation,
        strategy: Strategy::NetworkFirst,
        partition: PartitionKind::Runtime,
      },
      Route {
        name: "default",
        matcher: Matcher::Any,
        strategy: Strategy::NetworkFirst,
        partition: PartitionKind::Runtime,
      },
    ])
  }

  /// Route for `request`, or `None` when it bypasses caching entirely
  /// (any method but GET, or a non-HTTP scheme).
  pub fn classify(&self, request: &Request) -> Option<&Route> {
    if !request.is_read() || !matches!(request.url.scheme(), "http" | "https") {
      return None;
    }
    self.routes.iter().find(|r| r.matcher.matches(request))
  }

  pub fn routes(&self) -> &[Route] {
    &self.routes
  }
}
