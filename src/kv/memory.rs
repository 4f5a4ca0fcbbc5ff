use super::KvStore;
use anyhow::Result;
use async_trait::async_trait;
use dashmap::DashMap;
use std::time::{Duration, Instant};

struct Entry {
    value: String,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.map_or(true, |deadline| deadline > now)
    }
}

/// In-process KV backend.
///
/// Expired entries are dropped lazily on read and by [`KvStore::purge_expired`].
/// State is lost on restart.
#[derive(Default)]
pub struct MemoryKv {
    entries: DashMap<String, Entry>,
}

impl MemoryKv {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }

    /// Number of stored entries, expired ones included.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Raw stored value, bypassing expiry. For inspecting at-rest data.
    pub fn raw(&self, key: &str) -> Option<String> {
        self.entries.get(key).map(|e| e.value.clone())
    }

    /// Remaining TTL of `key`, `None` when absent or stored without expiry.
    pub fn ttl(&self, key: &str) -> Option<Duration> {
        let entry = self.entries.get(key)?;
        entry
            .expires_at
            .map(|deadline| deadline.saturating_duration_since(Instant::now()))
    }
}

#[async_trait]
impl KvStore for MemoryKv {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let now = Instant::now();
        match self.entries.get(key) {
            Some(entry) if entry.is_live(now) => return Ok(Some(entry.value.clone())),
            Some(_) => {}
            None => return Ok(None),
        }

        // Expired: evict (read guard above is already released)
        self.entries.remove_if(key, |_, e| !e.is_live(now));
        Ok(None)
    }

    async fn put(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()> {
        let entry = Entry {
            value: value.to_string(),
            expires_at: ttl.map(|ttl| Instant::now() + ttl),
        };
        self.entries.insert(key.to_string(), entry);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.entries.remove(key);
        Ok(())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        let now = Instant::now();
        let mut keys: Vec<String> = self
            .entries
            .iter()
            .filter(|e| e.key().starts_with(prefix) && e.value().is_live(now))
            .map(|e| e.key().clone())
            .collect();
        keys.sort();
        Ok(keys)
    }

    async fn purge_expired(&self) -> Result<usize> {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, e| e.is_live(now));
        Ok(before.saturating_sub(self.entries.len()))
    }
}
