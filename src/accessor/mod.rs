//! Valid-token accessor.
//!
//! The one entry point downstream features use to get a token they can send
//! right away. Reads the stored bundle, refreshes it when it is inside the
//! expiry buffer, persists the result, and hands back the access token.
//!
//! ```text
//! get_valid_token(device, service)
//!   └─ TokenStore::get ──▶ None ─────────────────────────▶ NotConnected
//!        └─ expires_at > now + buffer (or absent) ───────▶ access_token
//!        └─ refresh_token present, refreshable service ─▶ RefreshStrategy
//!             ├─ Refreshed ─▶ merge, TokenStore::put ─────▶ new access_token
//!             ├─ Revoked   ─▶ TokenStore::delete ─────────▶ NotConnected
//!             └─ Failed    ──────────────────────────────▶ RefreshFailed
//!        └─ not refreshable, already expired ────────────▶ NotConnected
//!        └─ not refreshable, still valid ────────────────▶ access_token
//! ```
//!
//! Two concurrent callers that both see an expiring token may both refresh.
//! Nothing serializes them; the last `put` wins.

use crate::credentials::{validate_key_parts, StoreError, TokenBundle, TokenStore, ValidationError};
use crate::providers::{ProviderRegistry, RefreshOutcome, Service};
use chrono::Utc;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, error, info, warn};

/// Tokens expiring within this many seconds are refreshed before use.
pub const DEFAULT_EXPIRY_BUFFER_SECONDS: i64 = 300;

/// Why no usable token could be produced.
#[derive(Debug, Error, PartialEq)]
pub enum AccessError {
    #[error(transparent)]
    Invalid(#[from] ValidationError),

    /// Never connected, revoked, undecryptable, or expired with no way to refresh
    #[error("Not connected to {service}")]
    NotConnected { service: String },

    /// Provider or network failure during refresh; the stored bundle is kept
    #[error("{reason}")]
    RefreshFailed { reason: String },

    #[error("Token storage failure: {0}")]
    Storage(String),
}

impl From<StoreError> for AccessError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Validation(e) => AccessError::Invalid(e),
            other => AccessError::Storage(other.to_string()),
        }
    }
}

/// Tagged result handed across the accessor boundary: `{"token": ..}` or `{"error": ..}`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum TokenResponse {
    Token { token: String },
    Error { error: String },
}

impl From<Result<String, AccessError>> for TokenResponse {
    fn from(result: Result<String, AccessError>) -> Self {
        match result {
            Ok(token) => TokenResponse::Token { token },
            Err(e) => TokenResponse::Error {
                error: e.to_string(),
            },
        }
    }
}

/// Fetch-check-refresh orchestration over a [`TokenStore`].
#[derive(Clone)]
pub struct TokenAccessor {
    store: TokenStore,
    providers: ProviderRegistry,
    http: reqwest::Client,
    expiry_buffer_seconds: i64,
}

impl TokenAccessor {
    pub fn new(store: TokenStore, providers: ProviderRegistry, http: reqwest::Client) -> Self {
        Self {
            store,
            providers,
            http,
            expiry_buffer_seconds: DEFAULT_EXPIRY_BUFFER_SECONDS,
        }
    }

    pub fn with_expiry_buffer(mut self, seconds: i64) -> Self {
        self.expiry_buffer_seconds = seconds;
        self
    }

    pub fn store(&self) -> &TokenStore {
        &self.store
    }

    pub fn providers(&self) -> &ProviderRegistry {
        &self.providers
    }

    /// Returns an access token that stays valid for at least the expiry buffer.
    pub async fn get_valid_token(&self, device_id: &str, service: &str) -> Result<String, AccessError> {
        self.ensure_fresh(device_id, service)
            .await
            .map(|bundle| bundle.access_token)
    }

    /// [`get_valid_token`](Self::get_valid_token) folded into the tagged response shape.
    pub async fn token_response(&self, device_id: &str, service: &str) -> TokenResponse {
        self.get_valid_token(device_id, service).await.into()
    }

    /// Returns the stored bundle, refreshed and persisted first if it is expiring.
    pub async fn ensure_fresh(
        &self,
        device_id: &str,
        service: &str,
    ) -> Result<TokenBundle, AccessError> {
        validate_key_parts(device_id, service)?;

        let not_connected = || AccessError::NotConnected {
            service: service_label(service),
        };

        let Some(bundle) = self.store.get(device_id, service).await? else {
            debug!(device_id = %device_id, service = %service, "No stored token");
            return Err(not_connected());
        };

        let now = Utc::now().timestamp();
        let Some(expires_at) = bundle.expires_at else {
            return Ok(bundle);
        };
        if expires_at >= now + self.expiry_buffer_seconds {
            return Ok(bundle);
        }

        let refreshable = service
            .parse::<Service>()
            .map(|known| known.supports_refresh())
            .unwrap_or(false);

        // Nothing can renew it: usable until the real expiry
        if bundle.refresh_token.is_none() || !refreshable {
            if expires_at <= now {
                debug!(
                    device_id = %device_id,
                    service = %service,
                    "Token expired and cannot be refreshed"
                );
                return Err(not_connected());
            }
            return Ok(bundle);
        }

        self.refresh(device_id, service, bundle).await
    }

    async fn refresh(
        &self,
        device_id: &str,
        service: &str,
        bundle: TokenBundle,
    ) -> Result<TokenBundle, AccessError> {
        let not_connected = || AccessError::NotConnected {
            service: service_label(service),
        };

        let Ok(known) = service.parse::<Service>() else {
            return Err(not_connected());
        };

        let provider = self.providers.get(known).ok_or_else(|| {
            error!(service = %known, "OAuth client not configured, cannot refresh");
            AccessError::RefreshFailed {
                reason: format!("{} OAuth client is not configured", known.display_name()),
            }
        })?;
        let strategy = provider
            .refresh_strategy(&self.http)
            .ok_or_else(not_connected)?;

        match strategy.refresh(&bundle, &provider.client).await {
            RefreshOutcome::Refreshed(token) => {
                let rotated = token.refresh_token.is_some();
                let updated = token.merge_into(&bundle);
                self.store.put(device_id, service, &updated).await?;

                info!(
                    device_id = %device_id,
                    service = %service,
                    rotated_refresh_token = rotated,
                    expires_at = ?updated.expires_at,
                    "Refreshed access token"
                );
                Ok(updated)
            }
            RefreshOutcome::Revoked { reason } => {
                warn!(
                    device_id = %device_id,
                    service = %service,
                    reason = %reason,
                    "Refresh grant revoked, disconnecting"
                );
                self.store.delete(device_id, service).await?;
                Err(not_connected())
            }
            RefreshOutcome::Failed { reason } => {
                warn!(
                    device_id = %device_id,
                    service = %service,
                    reason = %reason,
                    "Token refresh failed, keeping stored token"
                );
                Err(AccessError::RefreshFailed { reason })
            }
        }
    }
}

fn service_label(service: &str) -> String {
    service
        .parse::<Service>()
        .map(|s| s.display_name().to_string())
        .unwrap_or_else(|_| service.to_string())
}
