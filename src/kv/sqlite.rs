//! SQLite-backed KV namespace.

use super::KvStore;
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

/// Durable KV backend.
///
/// # Schema
/// ```sql
/// CREATE TABLE kv (
///     key TEXT PRIMARY KEY,
///     value TEXT NOT NULL,
///     expires_at INTEGER          -- epoch milliseconds, NULL = never
/// );
/// ```
///
/// Expired rows are filtered on every read and physically removed by
/// [`KvStore::purge_expired`].
pub struct SqliteKv {
    conn: Mutex<Connection>,
}

impl SqliteKv {
    /// Creates or opens a KV database. `":memory:"` gives a private in-memory one.
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let conn = Connection::open(db_path).context("Failed to open database")?;

        conn.execute(
            r#"
            CREATE TABLE IF NOT EXISTS kv (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                expires_at INTEGER
            )
            "#,
            [],
        )
        .context("Failed to create kv table")?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_kv_expires_at ON kv(expires_at)",
            [],
        )
        .context("Failed to create index")?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow!("KV connection lock poisoned"))
    }
}

fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

/// Escape LIKE wildcards so prefixes match literally.
fn like_prefix(prefix: &str) -> String {
    let mut pattern = String::with_capacity(prefix.len() + 1);
    for c in prefix.chars() {
        if matches!(c, '%' | '_' | '\\') {
            pattern.push('\\');
        }
        pattern.push(c);
    }
    pattern.push('%');
    pattern
}

#[async_trait]
impl KvStore for SqliteKv {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let conn = self.conn()?;
        conn.query_row(
            "SELECT value FROM kv WHERE key = ?1 AND (expires_at IS NULL OR expires_at > ?2)",
            params![key, now_millis()],
            |row| row.get(0),
        )
        .optional()
        .context("Failed to read key")
    }

    async fn put(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()> {
        let expires_at = ttl.map(|ttl| now_millis().saturating_add(ttl.as_millis() as i64));

        self.conn()?
            .execute(
                r#"
                INSERT INTO kv (key, value, expires_at)
                VALUES (?1, ?2, ?3)
                ON CONFLICT(key) DO UPDATE SET
                    value = excluded.value,
                    expires_at = excluded.expires_at
                "#,
                params![key, value, expires_at],
            )
            .context("Failed to write key")?;

        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.conn()?
            .execute("DELETE FROM kv WHERE key = ?1", params![key])
            .context("Failed to delete key")?;
        Ok(())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(
                r#"
                SELECT key FROM kv
                WHERE key LIKE ?1 ESCAPE '\'
                  AND (expires_at IS NULL OR expires_at > ?2)
                ORDER BY key
                "#,
            )
            .context("Failed to prepare query")?;

        let keys = stmt
            .query_map(params![like_prefix(prefix), now_millis()], |row| row.get(0))
            .context("Failed to execute query")?
            .collect::<Result<Vec<String>, _>>()
            .context("Failed to read results")?;

        // LIKE is case-insensitive for ASCII; keep exact-prefix semantics
        Ok(keys.into_iter().filter(|k| k.starts_with(prefix)).collect())
    }

    async fn purge_expired(&self) -> Result<usize> {
        let removed = self
            .conn()?
            .execute(
                "DELETE FROM kv WHERE expires_at IS NOT NULL AND expires_at <= ?1",
                params![now_millis()],
            )
            .context("Failed to purge expired keys")?;
        Ok(removed)
    }
}
