//! Named cache partitions holding full response snapshots.
//!
//! This module provides:
//! - Request identity normalization (`CacheKey`)
//! - Partition naming per worker version
//! - A durable SQLite-backed store with last-writer-wins entries
//! - All-or-nothing bulk population of a partition

mod entry;
mod partition;
mod populate;
mod storage;

pub use entry::{CacheEntry, CacheKey};
pub use partition::{PartitionKind, PartitionNames};
pub use populate::add_all;
pub use storage::{CacheStore, SqliteCacheStore};
