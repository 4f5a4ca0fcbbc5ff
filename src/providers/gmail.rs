//! Google refresh grant.
//!
//! Client credentials travel in the form body (not Basic auth). Google keeps
//! the refresh token stable and usually omits it from refresh responses.

use super::refresh::{read_refresh_response, require_refresh_token};
use super::{ClientCredentials, RefreshOutcome, RefreshStrategy, Service};
use crate::credentials::TokenBundle;
use async_trait::async_trait;
use tracing::debug;

pub struct GmailRefresh {
    http: reqwest::Client,
    token_url: String,
}

impl GmailRefresh {
    pub fn new(http: reqwest::Client, token_url: String) -> Self {
        Self { http, token_url }
    }
}

#[async_trait]
impl RefreshStrategy for GmailRefresh {
    fn service(&self) -> Service {
        Service::Gmail
    }

    async fn refresh(&self, bundle: &TokenBundle, client: &ClientCredentials) -> RefreshOutcome {
        let refresh_token = match require_refresh_token(bundle) {
            Ok(token) => token,
            Err(outcome) => return outcome,
        };

        debug!(token_url = %self.token_url, "Refreshing Gmail token");

        let form = [
            ("client_id", client.client_id.as_str()),
            ("client_secret", client.client_secret.as_str()),
            ("refresh_token", refresh_token),
            ("grant_type", "refresh_token"),
        ];

        let sent = self
            .http
            .post(&self.token_url)
            .header("Accept", "application/json")
            .form(&form)
            .send()
            .await;

        read_refresh_response(Service::Gmail, sent).await
    }
}
