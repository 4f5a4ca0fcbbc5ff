//! Key-value namespace with TTL support.
//!
//! The token store only needs four operations from its backing storage:
//! point reads, writes with an optional time-to-live, idempotent deletes and
//! prefix listing. Entries whose TTL has elapsed are invisible to reads.

use anyhow::Result;
use async_trait::async_trait;
use std::time::Duration;

mod memory;
mod sqlite;

pub use memory::MemoryKv;
pub use sqlite::SqliteKv;

#[async_trait]
pub trait KvStore: Send + Sync {
    /// Returns the live value for `key`, if any.
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Writes `value`, replacing any previous one. `None` ttl persists forever.
    async fn put(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()>;

    /// Removes `key`. Deleting a missing key is not an error.
    async fn delete(&self, key: &str) -> Result<()>;

    /// Live keys starting with `prefix`, sorted.
    async fn list(&self, prefix: &str) -> Result<Vec<String>>;

    /// Drops expired entries, returning how many were removed.
    async fn purge_expired(&self) -> Result<usize>;
}

/// Background task to periodically purge expired entries
pub async fn run_purge(kv: std::sync::Arc<dyn KvStore>, interval_seconds: u64) {
    let mut interval = tokio::time::interval(Duration::from_secs(interval_seconds));

    loop {
        interval.tick().await;
        match kv.purge_expired().await {
            Ok(removed) => tracing::debug!(removed, "KV purge complete"),
            Err(e) => tracing::error!(error = %e, "KV purge failed"),
        }
    }
}
