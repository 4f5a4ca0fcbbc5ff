//! Linear refresh grant.
//!
//! Form-encoded body with client credentials. Linear rotates the refresh
//! token on every use, so the new one must be persisted.

use super::refresh::{read_refresh_response, require_refresh_token};
use super::{ClientCredentials, RefreshOutcome, RefreshStrategy, Service};
use crate::credentials::TokenBundle;
use async_trait::async_trait;
use tracing::debug;

pub struct LinearRefresh {
    http: reqwest::Client,
    token_url: String,
}

impl LinearRefresh {
    pub fn new(http: reqwest::Client, token_url: String) -> Self {
        Self { http, token_url }
    }
}

#[async_trait]
impl RefreshStrategy for LinearRefresh {
    fn service(&self) -> Service {
        Service::Linear
    }

    async fn refresh(&self, bundle: &TokenBundle, client: &ClientCredentials) -> RefreshOutcome {
        let refresh_token = match require_refresh_token(bundle) {
            Ok(token) => token,
            Err(outcome) => return outcome,
        };

        debug!(token_url = %self.token_url, "Refreshing Linear token");

        let form = [
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
            ("client_id", client.client_id.as_str()),
            ("client_secret", client.client_secret.as_str()),
        ];

        let sent = self
            .http
            .post(&self.token_url)
            .form(&form)
            .send()
            .await;

        read_refresh_response(Service::Linear, sent).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;

    #[tokio::test]
    async fn test_refresh_returns_rotated_token() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/oauth/token")
            .match_body(Matcher::AllOf(vec![
                Matcher::UrlEncoded("grant_type".into(), "refresh_token".into()),
                Matcher::UrlEncoded("refresh_token".into(), "lr1".into()),
                Matcher::UrlEncoded("client_id".into(), "lid".into()),
            ]))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"access_token":"lin_new","refresh_token":"lr2","expires_in":86399}"#)
            .create_async()
            .await;

        let strategy =
            LinearRefresh::new(reqwest::Client::new(), format!("{}/oauth/token", server.url()));
        let bundle = TokenBundle::new("lin_old").with_refresh_token("lr1");

        let outcome = strategy
            .refresh(&bundle, &ClientCredentials::new("lid", "lsecret"))
            .await;

        let RefreshOutcome::Refreshed(token) = outcome else {
            panic!("Expected Refreshed, got {:?}", outcome);
        };
        let merged = token.merge_into(&bundle);
        assert_eq!(merged.access_token, "lin_new");
        assert_eq!(merged.refresh_token.as_deref(), Some("lr2"));

        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_refresh_invalid_grant() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/oauth/token")
            .with_status(400)
            .with_body(r#"{"error":"invalid_grant","error_description":"refresh token revoked"}"#)
            .create_async()
            .await;

        let strategy =
            LinearRefresh::new(reqwest::Client::new(), format!("{}/oauth/token", server.url()));
        let bundle = TokenBundle::new("lin_old").with_refresh_token("lr1");

        assert_eq!(
            strategy
                .refresh(&bundle, &ClientCredentials::new("lid", "lsecret"))
                .await,
            RefreshOutcome::Revoked {
                reason: "refresh token revoked".to_string()
            }
        );

        mock.assert_async().await;
    }
}
