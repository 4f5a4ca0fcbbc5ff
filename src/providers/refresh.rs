//! Refresh-token exchange contract shared by all providers.

use super::{ClientCredentials, Service};
use crate::credentials::TokenBundle;
use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;

/// Result of one refresh attempt.
///
/// The contract is uniform across providers:
/// - `Refreshed`: new access token (and possibly a rotated refresh token)
/// - `Revoked`: the grant is permanently invalid (`invalid_grant`); the stored
///   bundle must be dropped and the user must re-authorize
/// - `Failed`: transient provider or network failure; the stored bundle is kept
#[derive(Debug, Clone, PartialEq)]
pub enum RefreshOutcome {
    Refreshed(RefreshedToken),
    Revoked { reason: String },
    Failed { reason: String },
}

/// Fresh credentials returned by a token endpoint
#[derive(Debug, Clone, PartialEq)]
pub struct RefreshedToken {
    pub access_token: String,

    /// Present only when the provider rotated the refresh token
    pub refresh_token: Option<String>,

    /// `now + expires_in`, epoch seconds
    pub expires_at: Option<i64>,
}

impl RefreshedToken {
    /// Shallow-merges into `current`.
    ///
    /// Access token and expiry are replaced; the refresh token is replaced
    /// only if rotated (dropping it would break every later refresh); all
    /// other fields are preserved.
    pub fn merge_into(self, current: &TokenBundle) -> TokenBundle {
        TokenBundle {
            access_token: self.access_token,
            refresh_token: self.refresh_token.or_else(|| current.refresh_token.clone()),
            expires_at: self.expires_at,
            ..current.clone()
        }
    }
}

/// Provider-specific refresh-token exchange.
#[async_trait]
pub trait RefreshStrategy: Send + Sync {
    fn service(&self) -> Service;

    /// Exchanges `bundle.refresh_token` for a new access token.
    ///
    /// Never deletes anything itself; the caller acts on `Revoked`.
    async fn refresh(&self, bundle: &TokenBundle, client: &ClientCredentials) -> RefreshOutcome;
}

/// Standard OAuth 2.0 token endpoint response, success or error shape.
#[derive(Deserialize, Debug, Default)]
struct TokenEndpointResponse {
    #[serde(default)]
    access_token: Option<String>,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    expires_in: Option<i64>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    error_description: Option<String>,
}

/// Error code meaning the refresh token will never work again
const INVALID_GRANT: &str = "invalid_grant";

/// Classifies a token endpoint reply into a [`RefreshOutcome`].
pub(super) async fn read_refresh_response(
    service: Service,
    sent: reqwest::Result<reqwest::Response>,
) -> RefreshOutcome {
    let response = match sent {
        Ok(response) => response,
        Err(e) => {
            return RefreshOutcome::Failed {
                reason: format!("Failed to send {} token refresh request: {}", service, e),
            }
        }
    };

    let status = response.status();
    let body = match response.text().await {
        Ok(body) => body,
        Err(e) => {
            return RefreshOutcome::Failed {
                reason: format!("Failed to read {} token refresh response: {}", service, e),
            }
        }
    };

    let parsed: TokenEndpointResponse = serde_json::from_str(&body).unwrap_or_default();
    classify(service, status, parsed, Utc::now().timestamp())
}

fn classify(
    service: Service,
    status: reqwest::StatusCode,
    parsed: TokenEndpointResponse,
    now: i64,
) -> RefreshOutcome {
    if status.is_success() {
        if let Some(access_token) = parsed.access_token {
            return RefreshOutcome::Refreshed(RefreshedToken {
                access_token,
                refresh_token: parsed.refresh_token.filter(|t| !t.is_empty()),
                expires_at: parsed.expires_in.map(|secs| now.saturating_add(secs)),
            });
        }
    }

    let reason = parsed
        .error_description
        .clone()
        .or_else(|| parsed.error.clone())
        .unwrap_or_else(|| format!("{} token refresh failed with status {}", service, status));

    if parsed.error.as_deref() == Some(INVALID_GRANT) {
        RefreshOutcome::Revoked { reason }
    } else {
        RefreshOutcome::Failed { reason }
    }
}

/// Pulls the refresh token out of a bundle or reports why it cannot.
pub(super) fn require_refresh_token(bundle: &TokenBundle) -> Result<&str, RefreshOutcome> {
    bundle
        .refresh_token
        .as_deref()
        .filter(|t| !t.is_empty())
        .ok_or_else(|| RefreshOutcome::Failed {
            reason: "No refresh token available".to_string(),
        })
}
