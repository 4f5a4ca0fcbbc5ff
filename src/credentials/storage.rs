//! Encrypted token storage on top of a [`KvStore`].
//!
//! Stores one [`TokenBundle`] per `(device_id, service)`. Bundles are sealed
//! with AES-256-GCM before they reach the backend, and the backend TTL is
//! derived from the bundle's expiry so stale entries evict themselves.

use super::{encryption, validate_key_parts, EncryptionKey, TokenBundle, ValidationError};
use crate::kv::KvStore;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

/// Shortest eviction TTL, in seconds
const MIN_TTL_SECONDS: i64 = 60;

/// Longest eviction TTL (365 days), in seconds
const MAX_TTL_SECONDS: i64 = 365 * 24 * 60 * 60;

/// Token store errors
#[derive(Debug, Error)]
pub enum StoreError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("failed to encrypt token bundle: {0}")]
    Encryption(#[from] encryption::CodecError),

    #[error("storage backend error: {0:#}")]
    Backend(#[from] anyhow::Error),
}

/// Builds the `{device_id}:{service}` key. Callers validate first.
pub fn storage_key(device_id: &str, service: &str) -> String {
    format!("{}:{}", device_id, service)
}

/// Eviction TTL for a bundle expiring at `expires_at` (epoch seconds).
///
/// Clamped to `[60s, 365d]`; `None` when the bundle never expires.
pub fn eviction_ttl(expires_at: Option<i64>, now: i64) -> Option<Duration> {
    let remaining = expires_at?.saturating_sub(now);
    let seconds = remaining.clamp(MIN_TTL_SECONDS, MAX_TTL_SECONDS);
    Some(Duration::from_secs(seconds as u64))
}

/// Encrypted per-device token storage.
///
/// # Security
/// - Device ids and service names are validated before any backend call
/// - Bundles are encrypted with a fresh nonce on every write
/// - Entries that fail to decrypt (key rotation, corruption) are deleted
///   and reported as absent
#[derive(Clone)]
pub struct TokenStore {
    kv: Arc<dyn KvStore>,
    encryption_key: EncryptionKey,
}

impl TokenStore {
    pub fn new(kv: Arc<dyn KvStore>, encryption_key: EncryptionKey) -> Self {
        Self { kv, encryption_key }
    }

    /// Stores a bundle, replacing any existing one for the pair.
    pub async fn put(
        &self,
        device_id: &str,
        service: &str,
        bundle: &TokenBundle,
    ) -> Result<(), StoreError> {
        validate_key_parts(device_id, service)?;

        let key = storage_key(device_id, service);
        let ttl = eviction_ttl(bundle.expires_at, Utc::now().timestamp());
        let sealed = encryption::encrypt(bundle, &self.encryption_key)?;

        self.kv.put(&key, &sealed, ttl).await?;

        debug!(
            device_id = %device_id,
            service = %service,
            ttl_seconds = ?ttl.map(|t| t.as_secs()),
            has_refresh_token = bundle.refresh_token.is_some(),
            "Stored token bundle"
        );

        Ok(())
    }

    /// Retrieves a bundle.
    ///
    /// # Returns
    /// * `Ok(Some(bundle))` - Found and decrypted
    /// * `Ok(None)` - Never stored, evicted, or undecryptable (entry purged)
    /// * `Err` - Invalid identifiers or backend failure
    pub async fn get(
        &self,
        device_id: &str,
        service: &str,
    ) -> Result<Option<TokenBundle>, StoreError> {
        validate_key_parts(device_id, service)?;

        let key = storage_key(device_id, service);
        let Some(sealed) = self.kv.get(&key).await? else {
            return Ok(None);
        };

        match encryption::decrypt(&sealed, &self.encryption_key) {
            Ok(bundle) => Ok(Some(bundle)),
            Err(e) => {
                warn!(
                    device_id = %device_id,
                    service = %service,
                    error = %e,
                    "Token decryption failed, purging entry"
                );
                self.kv.delete(&key).await?;
                Ok(None)
            }
        }
    }

    /// Removes a bundle. Missing entries are not an error.
    pub async fn delete(&self, device_id: &str, service: &str) -> Result<(), StoreError> {
        validate_key_parts(device_id, service)?;

        self.kv.delete(&storage_key(device_id, service)).await?;

        debug!(device_id = %device_id, service = %service, "Deleted token bundle");
        Ok(())
    }

    /// Lists the services connected for a device.
    pub async fn list_services(&self, device_id: &str) -> Result<Vec<String>, StoreError> {
        super::validate_identifier("device_id", device_id)?;

        let prefix = format!("{}:", device_id);
        let services = self
            .kv
            .list(&prefix)
            .await?
            .into_iter()
            .filter_map(|key| key.strip_prefix(&prefix).map(str::to_string))
            .collect();

        Ok(services)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::ProviderExtension;
    use crate::kv::MemoryKv;
    use anyhow::Result;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// KV wrapper counting every backend call.
    #[derive(Default)]
    struct CountingKv {
        inner: MemoryKv,
        calls: AtomicUsize,
    }

    impl CountingKv {
        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }

        fn bump(&self) {
            self.calls.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl KvStore for CountingKv {
        async fn get(&self, key: &str) -> Result<Option<String>> {
            self.bump();
            self.inner.get(key).await
        }
        async fn put(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()> {
            self.bump();
            self.inner.put(key, value, ttl).await
        }
        async fn delete(&self, key: &str) -> Result<()> {
            self.bump();
            self.inner.delete(key).await
        }
        async fn list(&self, prefix: &str) -> Result<Vec<String>> {
            self.bump();
            self.inner.list(prefix).await
        }
        async fn purge_expired(&self) -> Result<usize> {
            self.inner.purge_expired().await
        }
    }

    fn test_key() -> EncryptionKey {
        EncryptionKey::from_bytes([3u8; 32])
    }

    fn create_test_store() -> (TokenStore, Arc<MemoryKv>) {
        let kv = Arc::new(MemoryKv::new());
        (TokenStore::new(kv.clone(), test_key()), kv)
    }

    fn create_test_bundle() -> TokenBundle {
        TokenBundle::new("access-token-12345")
            .with_refresh_token("refresh-token-67890")
            .with_expires_at(Utc::now().timestamp() + 3600)
    }

    #[test]
    fn test_eviction_ttl_bounds() {
        let now = 1_700_000_000;

        assert_eq!(eviction_ttl(None, now), None);
        assert_eq!(
            eviction_ttl(Some(now + 3600), now),
            Some(Duration::from_secs(3600))
        );

        // Already expired or nearly so: clamped up to 60s
        assert_eq!(eviction_ttl(Some(now + 5), now), Some(Duration::from_secs(60)));
        assert_eq!(eviction_ttl(Some(now - 500), now), Some(Duration::from_secs(60)));

        // Far future: clamped down to 365 days
        assert_eq!(
            eviction_ttl(Some(now + 10 * 365 * 24 * 3600), now),
            Some(Duration::from_secs(365 * 24 * 3600))
        );
    }

    #[tokio::test]
    async fn test_put_and_get() {
        let (store, _) = create_test_store();
        let bundle = create_test_bundle();

        store.put("dev1", "gmail", &bundle).await.expect("Failed to store");

        let retrieved = store
            .get("dev1", "gmail")
            .await
            .expect("Failed to get")
            .expect("Bundle not found");
        assert_eq!(retrieved, bundle);
    }

    #[tokio::test]
    async fn test_plaintext_never_persists() {
        let (store, kv) = create_test_store();
        let bundle = create_test_bundle().with_extension(ProviderExtension::Slack {
            workspace_id: Some("T123".to_string()),
            workspace_name: None,
            user_id: Some("U1".to_string()),
            user_name: None,
        });

        store.put("dev1", "slack", &bundle).await.unwrap();

        let raw = kv.raw("dev1:slack").expect("Entry not written");
        assert!(!raw.contains("access-token-12345"));
        assert!(!raw.contains("refresh-token-67890"));
        assert!(!raw.contains("T123"));
        assert!(raw.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[tokio::test]
    async fn test_ttl_follows_expiry() {
        let (store, kv) = create_test_store();

        store.put("dev1", "gmail", &create_test_bundle()).await.unwrap();
        let ttl = kv.ttl("dev1:gmail").expect("TTL should be set");
        assert!(ttl > Duration::from_secs(3500) && ttl <= Duration::from_secs(3600));

        store
            .put("dev1", "slack", &TokenBundle::new("xoxp-1"))
            .await
            .unwrap();
        assert!(kv.ttl("dev1:slack").is_none());
    }

    #[tokio::test]
    async fn test_get_nonexistent() {
        let (store, _) = create_test_store();
        assert!(store.get("dev1", "notion").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_put_overwrites() {
        let (store, _) = create_test_store();
        store.put("dev1", "linear", &create_test_bundle()).await.unwrap();

        let replacement = TokenBundle::new("new-access").with_refresh_token("new-refresh");
        store.put("dev1", "linear", &replacement).await.unwrap();

        let retrieved = store.get("dev1", "linear").await.unwrap().unwrap();
        assert_eq!(retrieved, replacement);
        assert_eq!(store.list_services("dev1").await.unwrap(), vec!["linear"]);
    }

    #[tokio::test]
    async fn test_delete() {
        let (store, _) = create_test_store();
        store.put("dev1", "gmail", &create_test_bundle()).await.unwrap();

        store.delete("dev1", "gmail").await.unwrap();
        assert!(store.get("dev1", "gmail").await.unwrap().is_none());

        // Deleting again is not an error
        store.delete("dev1", "gmail").await.unwrap();
    }

    #[tokio::test]
    async fn test_undecryptable_entry_is_purged() {
        let kv = Arc::new(MemoryKv::new());
        let old = TokenStore::new(kv.clone(), test_key());
        old.put("dev1", "notion", &create_test_bundle()).await.unwrap();

        // Key rotated
        let rotated = TokenStore::new(kv.clone(), EncryptionKey::from_bytes([4u8; 32]));
        assert!(rotated.get("dev1", "notion").await.unwrap().is_none());
        assert!(kv.raw("dev1:notion").is_none());
    }

    #[tokio::test]
    async fn test_corrupted_entry_is_purged() {
        let (store, kv) = create_test_store();
        kv.put("dev1:gmail", "deadbeef-not-a-bundle", None).await.unwrap();

        assert!(store.get("dev1", "gmail").await.unwrap().is_none());
        assert!(kv.raw("dev1:gmail").is_none());
    }

    #[tokio::test]
    async fn test_list_services() {
        let (store, _) = create_test_store();
        let bundle = create_test_bundle();

        store.put("dev1", "gmail", &bundle).await.unwrap();
        store.put("dev1", "notion", &bundle).await.unwrap();
        store.put("dev1", "slack", &bundle).await.unwrap();
        store.put("dev10", "linear", &bundle).await.unwrap();
        store.put("dev2", "gmail", &bundle).await.unwrap();

        let services = store.list_services("dev1").await.unwrap();
        assert_eq!(services, vec!["gmail", "notion", "slack"]);

        let services = store.list_services("dev2").await.unwrap();
        assert_eq!(services, vec!["gmail"]);

        assert!(store.list_services("dev3").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_invalid_identifiers_never_reach_backend() {
        let kv = Arc::new(CountingKv::default());
        let store = TokenStore::new(kv.clone(), test_key());
        let bundle = create_test_bundle();

        let err = store.put("a b", "gmail", &bundle).await.unwrap_err();
        assert!(matches!(err, StoreError::Validation(_)));

        let err = store.get("a b", "gmail").await.unwrap_err();
        assert!(matches!(err, StoreError::Validation(_)));

        let err = store.delete("a b", "gmail").await.unwrap_err();
        assert!(matches!(err, StoreError::Validation(_)));

        assert!(store.put("dev1", "", &bundle).await.is_err());
        assert!(store.get("dev1", "gm:ail").await.is_err());
        assert!(store.list_services("dev/1").await.is_err());

        assert_eq!(kv.calls(), 0);
    }
}
