//! Third-party OAuth providers.
//!
//! Each supported [`Service`] has fixed authorize/token endpoints and a client
//! id/secret pair read from the environment. Providers that can mint new
//! access tokens expose a [`RefreshStrategy`]; the transport quirks (Basic
//! auth vs body credentials, rotating vs static refresh tokens) stay inside
//! the per-provider modules.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

mod gmail;
mod linear;
mod notion;
mod refresh;

pub use gmail::GmailRefresh;
pub use linear::LinearRefresh;
pub use notion::NotionRefresh;
pub use refresh::{RefreshOutcome, RefreshStrategy, RefreshedToken};

/// A third-party provider a device can connect.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Service {
    Gmail,
    Notion,
    Slack,
    Linear,
}

impl Service {
    pub const ALL: [Service; 4] = [Service::Gmail, Service::Notion, Service::Slack, Service::Linear];

    /// Key component used in storage (`{device_id}:{service}`)
    pub fn as_str(&self) -> &'static str {
        match self {
            Service::Gmail => "gmail",
            Service::Notion => "notion",
            Service::Slack => "slack",
            Service::Linear => "linear",
        }
    }

    /// Human-facing name for error messages
    pub fn display_name(&self) -> &'static str {
        match self {
            Service::Gmail => "Gmail",
            Service::Notion => "Notion",
            Service::Slack => "Slack",
            Service::Linear => "Linear",
        }
    }

    /// Prefix of the `{PREFIX}_CLIENT_ID` / `{PREFIX}_CLIENT_SECRET` env vars
    pub fn env_prefix(&self) -> &'static str {
        match self {
            Service::Gmail => "GOOGLE",
            Service::Notion => "NOTION",
            Service::Slack => "SLACK",
            Service::Linear => "LINEAR",
        }
    }

    /// Slack user tokens do not expire and have no refresh grant.
    pub fn supports_refresh(&self) -> bool {
        !matches!(self, Service::Slack)
    }

    /// Identity lookup made with a freshly exchanged token
    fn default_profile_url(&self) -> Option<&'static str> {
        match self {
            Service::Gmail => Some("https://www.googleapis.com/oauth2/v2/userinfo"),
            Service::Slack => Some("https://slack.com/api/auth.test"),
            Service::Notion | Service::Linear => None,
        }
    }

    fn default_endpoints(&self) -> (&'static str, &'static str, &'static [&'static str]) {
        match self {
            Service::Gmail => (
                "https://accounts.google.com/o/oauth2/v2/auth",
                "https://oauth2.googleapis.com/token",
                &["https://www.googleapis.com/auth/gmail.readonly"],
            ),
            Service::Notion => (
                "https://api.notion.com/v1/oauth/authorize",
                "https://api.notion.com/v1/oauth/token",
                &[],
            ),
            Service::Slack => (
                "https://slack.com/oauth/v2/authorize",
                "https://slack.com/api/oauth.v2.access",
                &["search:read", "channels:read", "users:read"],
            ),
            Service::Linear => (
                "https://linear.app/oauth/authorize",
                "https://api.linear.app/oauth/token",
                &["read", "write", "issues:create", "comments:create"],
            ),
        }
    }
}

impl fmt::Display for Service {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Service '{0}' not found")]
pub struct UnknownService(pub String);

impl FromStr for Service {
    type Err = UnknownService;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Service::ALL
            .into_iter()
            .find(|service| service.as_str() == s)
            .ok_or_else(|| UnknownService(s.to_string()))
    }
}

/// OAuth client id/secret pair. The secret is never printed.
#[derive(Clone, PartialEq, Eq)]
pub struct ClientCredentials {
    pub client_id: String,
    pub client_secret: String,
}

impl ClientCredentials {
    pub fn new(client_id: impl Into<String>, client_secret: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret: client_secret.into(),
        }
    }

    /// Reads `{PREFIX}_CLIENT_ID` and `{PREFIX}_CLIENT_SECRET`; `None` if either is unset or empty.
    pub fn from_env(service: Service) -> Option<Self> {
        let prefix = service.env_prefix();
        let client_id = std::env::var(format!("{}_CLIENT_ID", prefix)).ok()?;
        let client_secret = std::env::var(format!("{}_CLIENT_SECRET", prefix)).ok()?;

        if client_id.is_empty() || client_secret.is_empty() {
            return None;
        }

        Some(Self::new(client_id, client_secret))
    }
}

impl fmt::Debug for ClientCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientCredentials")
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .finish()
    }
}

/// OAuth provider configuration
#[derive(Clone, Debug)]
pub struct ProviderConfig {
    pub service: Service,

    /// OAuth authorization endpoint URL
    pub auth_url: String,

    /// OAuth token endpoint URL
    pub token_url: String,

    /// Requested OAuth scopes
    pub scopes: Vec<String>,

    /// User profile endpoint queried after the code exchange
    pub profile_url: Option<String>,

    pub client: ClientCredentials,
}

impl ProviderConfig {
    /// Configuration with the provider's fixed endpoints.
    pub fn new(service: Service, client: ClientCredentials) -> Self {
        let (auth_url, token_url, scopes) = service.default_endpoints();
        Self {
            service,
            auth_url: auth_url.to_string(),
            token_url: token_url.to_string(),
            scopes: scopes.iter().map(|s| s.to_string()).collect(),
            profile_url: service.default_profile_url().map(str::to_string),
            client,
        }
    }

    /// Points every endpoint at another host (local mocks).
    pub fn with_base_url(mut self, base_url: &str) -> Self {
        let base = base_url.trim_end_matches('/');
        self.auth_url = format!("{}/authorize", base);
        self.token_url = format!("{}/token", base);
        self.profile_url = match self.service {
            Service::Gmail => Some(format!("{}/userinfo", base)),
            Service::Slack => Some(format!("{}/auth.test", base)),
            Service::Notion | Service::Linear => None,
        };
        self
    }

    /// Build the provider authorization URL for `state` and `redirect_uri`.
    pub fn build_auth_url(&self, state: &str, redirect_uri: &str) -> String {
        let mut params: Vec<(&str, String)> = vec![
            ("client_id", self.client.client_id.clone()),
            ("redirect_uri", redirect_uri.to_string()),
        ];

        match self.service {
            Service::Gmail => {
                params.push(("response_type", "code".to_string()));
                params.push(("scope", self.scopes.join(" ")));
                // Required for a refresh token on every consent
                params.push(("access_type", "offline".to_string()));
                params.push(("prompt", "consent".to_string()));
            }
            Service::Notion => {
                params.push(("response_type", "code".to_string()));
                params.push(("owner", "user".to_string()));
            }
            Service::Slack => {
                params.push(("user_scope", self.scopes.join(",")));
            }
            Service::Linear => {
                params.push(("response_type", "code".to_string()));
                params.push(("scope", self.scopes.join(",")));
                params.push(("actor", "app".to_string()));
            }
        }

        params.push(("state", state.to_string()));

        let query = params
            .iter()
            .map(|(k, v)| format!("{}={}", k, urlencoding::encode(v)))
            .collect::<Vec<_>>()
            .join("&");

        format!("{}?{}", self.auth_url, query)
    }

    /// Refresh strategy bound to this provider's token endpoint.
    ///
    /// `None` for providers without a refresh grant.
    pub fn refresh_strategy(&self, http: &reqwest::Client) -> Option<Arc<dyn RefreshStrategy>> {
        let http = http.clone();
        let token_url = self.token_url.clone();

        match self.service {
            Service::Gmail => Some(Arc::new(GmailRefresh::new(http, token_url))),
            Service::Notion => Some(Arc::new(NotionRefresh::new(http, token_url))),
            Service::Linear => Some(Arc::new(LinearRefresh::new(http, token_url))),
            Service::Slack => None,
        }
    }
}

/// Configured providers, keyed by service.
#[derive(Clone, Debug, Default)]
pub struct ProviderRegistry {
    providers: HashMap<Service, ProviderConfig>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers every provider whose client id/secret are set in the environment.
    pub fn from_env() -> Self {
        let mut registry = Self::new();
        for service in Service::ALL {
            match ClientCredentials::from_env(service) {
                Some(client) => {
                    registry = registry.with_provider(ProviderConfig::new(service, client));
                }
                None => tracing::debug!(
                    service = %service,
                    "OAuth client not configured ({}_CLIENT_ID / {}_CLIENT_SECRET unset)",
                    service.env_prefix(),
                    service.env_prefix()
                ),
            }
        }
        registry
    }

    pub fn with_provider(mut self, config: ProviderConfig) -> Self {
        self.providers.insert(config.service, config);
        self
    }

    pub fn get(&self, service: Service) -> Option<&ProviderConfig> {
        self.providers.get(&service)
    }

    pub fn configured(&self) -> Vec<Service> {
        Service::ALL
            .into_iter()
            .filter(|s| self.providers.contains_key(s))
            .collect()
    }
}
