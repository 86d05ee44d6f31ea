//! Partition naming for one worker version.

use serde::{Deserialize, Serialize};

use crate::lifecycle::WorkerVersion;

/// Which logical partition a route addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PartitionKind {
  /// Bootstrap assets, bound to one version
  Static,
  /// Long-lived, shared across versions
  Runtime,
  /// Long-lived API responses
  Api,
}

/// The three partition names a worker version may address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionNames {
  static_name: String,
  runtime: String,
  api: String,
}

impl PartitionNames {
  pub fn new(prefix: &str, version: &WorkerVersion) -> Self {
    Self {
      static_name: format!("{}-static-{}", prefix, version),
      runtime: format!("{}-runtime", prefix),
      api: format!("{}-api", prefix),
    }
  }

  pub fn name(&self, kind: PartitionKind) -> &str {
    match kind {
      PartitionKind::Static => &self.static_name,
      PartitionKind::Runtime => &self.runtime,
      PartitionKind::Api => &self.api,
    }
  }

  /// Whether `name` survives activation of this version.
  pub fn is_live(&self, name: &str) -> bool {
    name == self.static_name || name == self.runtime || name == self.api
  }
}
