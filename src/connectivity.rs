//! Connectivity tracking for opportunistic sync.

use std::time::Duration;
use tracing::debug;
use url::Url;

use crate::http::{Method, Network, Request};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Connectivity {
  Unknown,
  Online,
  Offline,
}

/// Turns periodic reachability probes into "connectivity restored" edges.
#[derive(Debug)]
pub struct ConnectivityMonitor {
  state: Connectivity,
}

impl ConnectivityMonitor {
  pub fn new() -> Self {
    Self {
      state: Connectivity::Unknown,
    }
  }

  pub fn state(&self) -> Connectivity {
    self.state
  }

  /// Record a probe result. Returns true only on an offline → online edge.
  pub fn observe(&mut self, reachable: bool) -> bool {
    let next = if reachable {
      Connectivity::Online
    } else {
      Connectivity::Offline
    };
    let restored = self.state == Connectivity::Offline && next == Connectivity::Online;
    self.state = next;
    restored
  }
}

impl Default for ConnectivityMonitor {
  fn default() -> Self {
    Self::new()
  }
}

/// Any response, whatever its status, means the network is reachable.
/// No answer within `timeout` means it is not.
pub async fn probe<N: Network>(network: &N, url: &Url, timeout: Duration) -> bool {
  let request = Request::get(url.clone()).with_method(Method::HEAD);
  match tokio::time::timeout(timeout, network.fetch(&request)).await {
    Ok(result) => result.is_ok(),
    Err(_) => {
      debug!(%url, "connectivity probe timed out");
      false
    }
  }
}
