//! Notion refresh grant.
//!
//! Notion authenticates the client with HTTP Basic auth and takes a JSON body.
//! It may return a rotated refresh token.

use super::refresh::{read_refresh_response, require_refresh_token};
use super::{ClientCredentials, RefreshOutcome, RefreshStrategy, Service};
use crate::credentials::TokenBundle;
use async_trait::async_trait;
use serde::Serialize;
use tracing::debug;

#[derive(Serialize)]
struct RefreshRequest<'a> {
    grant_type: &'a str,
    refresh_token: &'a str,
}

pub struct NotionRefresh {
    http: reqwest::Client,
    token_url: String,
}

impl NotionRefresh {
    pub fn new(http: reqwest::Client, token_url: String) -> Self {
        Self { http, token_url }
    }
}

#[async_trait]
impl RefreshStrategy for NotionRefresh {
    fn service(&self) -> Service {
        Service::Notion
    }

    async fn refresh(&self, bundle: &TokenBundle, client: &ClientCredentials) -> RefreshOutcome {
        let refresh_token = match require_refresh_token(bundle) {
            Ok(token) => token,
            Err(outcome) => return outcome,
        };

        debug!(token_url = %self.token_url, "Refreshing Notion token");

        let sent = self
            .http
            .post(&self.token_url)
            .basic_auth(&client.client_id, Some(&client.client_secret))
            .json(&RefreshRequest {
                grant_type: "refresh_token",
                refresh_token,
            })
            .send()
            .await;

        read_refresh_response(Service::Notion, sent).await
    }
}
