//! OAuth 2.0 authorization-code flow for connecting a device to a service.
//!
//! 1. Client asks for an authorization URL for `(service, device_id)`
//! 2. User authorizes on the provider's site
//! 3. Provider redirects back with `code` and `state`
//! 4. Callback consumes the state, exchanges the code, stores the encrypted bundle
//! 5. The device is now "connected" and the accessor can hand out tokens

mod exchange;
mod state;

pub use exchange::exchange_code;
pub use state::{run_state_cleanup, StateEntry, StateManager};

use crate::credentials::{validate_identifier, StoreError, TokenBundle, TokenStore, ValidationError};
use crate::providers::{ProviderConfig, ProviderRegistry, Service, UnknownService};
use thiserror::Error;
use tracing::{debug, error, info, warn};

/// Errors from the authorization flow
#[derive(Debug, Error)]
pub enum OAuthError {
    #[error(transparent)]
    UnknownService(#[from] UnknownService),

    #[error(transparent)]
    Invalid(#[from] ValidationError),

    #[error("{0} is required")]
    MissingParameter(&'static str),

    #[error("{service} OAuth is not configured. Set {prefix}_CLIENT_ID and {prefix}_CLIENT_SECRET environment variables.")]
    NotConfigured { service: Service, prefix: &'static str },

    #[error("Invalid or expired OAuth state")]
    InvalidState,

    #[error("OAuth state was issued for {expected}, not {actual}")]
    ServiceMismatch { expected: Service, actual: Service },

    #[error("Failed to exchange authorization code: {0}")]
    Exchange(String),

    #[error("Failed to store tokens: {0}")]
    Storage(#[from] StoreError),
}

/// Result of a completed callback
#[derive(Debug, Clone)]
pub struct Connection {
    pub service: Service,
    pub device_id: String,
    pub bundle: TokenBundle,
}

/// Authorization flow over the configured providers
#[derive(Clone)]
pub struct OAuthFlow {
    providers: ProviderRegistry,
    states: StateManager,
    store: TokenStore,
    http: reqwest::Client,
}

impl OAuthFlow {
    pub fn new(
        providers: ProviderRegistry,
        states: StateManager,
        store: TokenStore,
        http: reqwest::Client,
    ) -> Self {
        Self {
            providers,
            states,
            store,
            http,
        }
    }

    pub fn states(&self) -> &StateManager {
        &self.states
    }

    fn provider(&self, service: Service) -> Result<&ProviderConfig, OAuthError> {
        self.providers.get(service).ok_or_else(|| {
            error!(service = %service, "OAuth provider config not found (missing env vars?)");
            OAuthError::NotConfigured {
                service,
                prefix: service.env_prefix(),
            }
        })
    }

    /// Mints a CSRF state for the device and builds the provider's authorize URL.
    pub fn authorization_url(
        &self,
        service: Service,
        device_id: &str,
        redirect_uri: &str,
    ) -> Result<String, OAuthError> {
        validate_identifier("device_id", device_id)?;
        if redirect_uri.is_empty() {
            return Err(OAuthError::MissingParameter("redirect_uri"));
        }

        let provider = self.provider(service)?;
        let csrf_state = self.states.create_state(service, device_id);

        info!(service = %service, device_id = %device_id, "Starting OAuth flow");

        Ok(provider.build_auth_url(&csrf_state, redirect_uri))
    }

    /// Exchanges an authorization code without touching state or storage.
    pub async fn exchange_code(
        &self,
        service: Service,
        code: &str,
        redirect_uri: &str,
    ) -> Result<TokenBundle, OAuthError> {
        let provider = self.provider(service)?;

        exchange::exchange_code(&self.http, provider, code, redirect_uri)
            .await
            .map_err(|e| {
                error!(service = %service, error = %e, "Token exchange failed");
                OAuthError::Exchange(e.to_string())
            })
    }

    /// Completes a callback: consumes the state, exchanges the code, stores the bundle.
    ///
    /// # Security
    /// - State is single-use and expires
    /// - The state must have been issued for the same service
    /// - The device id comes from the state, never from the callback request
    pub async fn complete(
        &self,
        service: Service,
        code: &str,
        redirect_uri: &str,
        csrf_state: &str,
    ) -> Result<Connection, OAuthError> {
        if code.is_empty() {
            return Err(OAuthError::MissingParameter("code"));
        }
        if redirect_uri.is_empty() {
            return Err(OAuthError::MissingParameter("redirect_uri"));
        }

        let entry = self.states.validate_and_consume(csrf_state).ok_or_else(|| {
            warn!(service = %service, "Invalid or expired OAuth state");
            OAuthError::InvalidState
        })?;

        if entry.service != service {
            warn!(expected = %entry.service, actual = %service, "OAuth state service mismatch");
            return Err(OAuthError::ServiceMismatch {
                expected: entry.service,
                actual: service,
            });
        }

        debug!(service = %service, device_id = %entry.device_id, "CSRF state validated");

        let bundle = self.exchange_code(service, code, redirect_uri).await?;
        self.store
            .put(&entry.device_id, service.as_str(), &bundle)
            .await?;

        info!(
            service = %service,
            device_id = %entry.device_id,
            has_refresh_token = bundle.refresh_token.is_some(),
            "OAuth flow completed successfully"
        );

        Ok(Connection {
            service,
            device_id: entry.device_id,
            bundle,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::EncryptionKey;
    use crate::kv::MemoryKv;
    use crate::providers::ClientCredentials;
    use std::sync::Arc;

    fn flow(base_url: &str) -> (OAuthFlow, TokenStore) {
        let store = TokenStore::new(Arc::new(MemoryKv::new()), EncryptionKey::from_bytes([9u8; 32]));
        let providers = ProviderRegistry::new()
            .with_provider(
                ProviderConfig::new(Service::Linear, ClientCredentials::new("lid", "lsecret"))
                    .with_base_url(base_url),
            )
            .with_provider(
                ProviderConfig::new(Service::Gmail, ClientCredentials::new("gid", "gsecret"))
                    .with_base_url(base_url),
            );
        let flow = OAuthFlow::new(
            providers,
            StateManager::new(600),
            store.clone(),
            reqwest::Client::new(),
        );
        (flow, store)
    }

    fn state_from(url: &str) -> String {
        url.split("state=").nth(1).unwrap().to_string()
    }

    #[tokio::test]
    async fn test_full_flow_stores_bundle() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/token")
            .with_status(200)
            .with_body(r#"{"access_token":"lin_1","refresh_token":"lr_1","expires_in":86399}"#)
            .create_async()
            .await;

        let (flow, store) = flow(&server.url());
        let url = flow
            .authorization_url(Service::Linear, "dev1", "http://localhost/cb")
            .unwrap();
        assert!(url.starts_with(&format!("{}/authorize?", server.url())));

        let connection = flow
            .complete(Service::Linear, "code", "http://localhost/cb", &state_from(&url))
            .await
            .unwrap();
        assert_eq!(connection.device_id, "dev1");

        let stored = store.get("dev1", "linear").await.unwrap().unwrap();
        assert_eq!(stored.access_token, "lin_1");
        assert_eq!(stored.refresh_token.as_deref(), Some("lr_1"));

        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_state_cannot_be_replayed_or_crossed() {
        let (flow, _) = flow("http://127.0.0.1:9");

        let url = flow
            .authorization_url(Service::Gmail, "dev1", "http://localhost/cb")
            .unwrap();
        let state = state_from(&url);

        assert!(matches!(
            flow.complete(Service::Linear, "code", "http://localhost/cb", &state)
                .await,
            Err(OAuthError::ServiceMismatch { .. })
        ));
        // Consumed by the failed attempt
        assert!(matches!(
            flow.complete(Service::Gmail, "code", "http://localhost/cb", &state)
                .await,
            Err(OAuthError::InvalidState)
        ));
    }

    #[tokio::test]
    async fn test_authorization_url_validation() {
        let (flow, _) = flow("http://127.0.0.1:9");

        assert!(matches!(
            flow.authorization_url(Service::Gmail, "bad id", "http://localhost/cb"),
            Err(OAuthError::Invalid(_))
        ));
        assert!(matches!(
            flow.authorization_url(Service::Gmail, "dev1", ""),
            Err(OAuthError::MissingParameter("redirect_uri"))
        ));
        assert!(matches!(
            flow.authorization_url(Service::Notion, "dev1", "http://localhost/cb"),
            Err(OAuthError::NotConfigured { .. })
        ));
        assert_eq!(flow.states().count(), 0);
    }

    #[tokio::test]
    async fn test_failed_exchange_stores_nothing() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/token")
            .with_status(400)
            .with_body(r#"{"error":"invalid_grant"}"#)
            .create_async()
            .await;

        let (flow, store) = flow(&server.url());
        let url = flow
            .authorization_url(Service::Gmail, "dev2", "http://localhost/cb")
            .unwrap();

        assert!(matches!(
            flow.complete(Service::Gmail, "code", "http://localhost/cb", &state_from(&url))
                .await,
            Err(OAuthError::Exchange(_))
        ));
        assert!(store.get("dev2", "gmail").await.unwrap().is_none());

        mock.assert_async().await;
    }
}
