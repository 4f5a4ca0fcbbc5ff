//! Encrypted token storage for third-party OAuth connections.
//!
//! Every connected provider account is persisted as a [`TokenBundle`] keyed by
//! `{device_id}:{service}`. Bundles are serialized to JSON and sealed with
//! AES-256-GCM before they reach the key-value backend; plaintext never
//! persists.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │       TokenStore                         │
//! │  - identifier validation                 │
//! │  - TTL derived from expires_at           │
//! │  - purge on undecryptable entries        │
//! └─────────────────────────────────────────┘
//!          ↓                    ↑
//!    (encrypt)            (decrypt)
//!          ↓                    ↑
//! ┌─────────────────────────────────────────┐
//! │       Encryption codec                   │
//! │  - AES-256-GCM, fresh 96-bit nonce       │
//! │  - hex(nonce ‖ ciphertext ‖ tag)         │
//! └─────────────────────────────────────────┘
//!          ↓                    ↑
//! ┌─────────────────────────────────────────┐
//! │       KvStore (memory / SQLite)          │
//! └─────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```no_run
//! use std::sync::Arc;
//! use tokenvault::credentials::{EncryptionKey, TokenBundle, TokenStore};
//! use tokenvault::kv::MemoryKv;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let key = EncryptionKey::from_hex(&std::env::var("TOKEN_ENCRYPTION_KEY")?)?;
//! let store = TokenStore::new(Arc::new(MemoryKv::new()), key);
//!
//! store.put("dev1", "notion", &TokenBundle::new("secret_access")).await?;
//! if let Some(bundle) = store.get("dev1", "notion").await? {
//!     println!("connected, has_refresh_token={}", bundle.refresh_token.is_some());
//! }
//! store.delete("dev1", "notion").await?;
//! # Ok(())
//! # }
//! ```

use serde::{Deserialize, Serialize};

mod encryption;
mod storage;
mod validation;

pub use encryption::{decrypt, encrypt, CodecError, EncryptionKey};
pub use storage::{eviction_ttl, storage_key, StoreError, TokenStore};
pub use validation::{validate_identifier, validate_key_parts, ValidationError};

/// Credentials for one provider connection.
///
/// The common OAuth fields live at the top level; anything a single provider
/// returns (workspace, bot, user profile) is carried in [`ProviderExtension`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TokenBundle {
    /// Bearer credential for the downstream provider
    pub access_token: String,

    /// Used to mint new access tokens; absent means re-authorization on expiry
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,

    /// Expiry as epoch seconds; absent means the token never expires
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<i64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_type: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,

    #[serde(default)]
    pub extension: ProviderExtension,
}

impl TokenBundle {
    /// Bundle holding only an access token (no refresh, no expiry).
    pub fn new(access_token: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token: None,
            expires_at: None,
            token_type: None,
            scope: None,
            extension: ProviderExtension::None,
        }
    }

    pub fn with_refresh_token(mut self, refresh_token: impl Into<String>) -> Self {
        self.refresh_token = Some(refresh_token.into());
        self
    }

    pub fn with_expires_at(mut self, expires_at: i64) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    pub fn with_extension(mut self, extension: ProviderExtension) -> Self {
        self.extension = extension;
        self
    }
}

/// Provider-specific metadata captured at connect time.
///
/// Opaque to the lifecycle core; refreshes preserve it untouched.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "provider", rename_all = "lowercase")]
pub enum ProviderExtension {
    #[default]
    None,
    Gmail {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        user_id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        user_email: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        user_name: Option<String>,
    },
    Notion {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        workspace_id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        workspace_name: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        workspace_icon: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        bot_id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        user_id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        user_name: Option<String>,
    },
    Slack {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        workspace_id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        workspace_name: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        user_id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        user_name: Option<String>,
    },
    Linear,
}
