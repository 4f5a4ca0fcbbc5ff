//! OAuth authorization-code exchange.
//!
//! Turns the `code` handed to the callback into a [`TokenBundle`], following
//! each provider's transport and response shape.

use crate::credentials::{ProviderExtension, TokenBundle};
use crate::providers::{ProviderConfig, Service};
use anyhow::{anyhow, Context, Result};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Standard OAuth 2.0 token response (Google, Linear)
#[derive(Deserialize, Debug)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    expires_in: Option<i64>,
    #[serde(default)]
    token_type: Option<String>,
    #[serde(default)]
    scope: Option<String>,
}

/// Notion token response (standard fields plus workspace and owner)
#[derive(Deserialize, Debug)]
struct NotionTokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    expires_in: Option<i64>,
    #[serde(default)]
    token_type: Option<String>,
    #[serde(default)]
    bot_id: Option<String>,
    #[serde(default)]
    workspace_id: Option<String>,
    #[serde(default)]
    workspace_name: Option<String>,
    #[serde(default)]
    workspace_icon: Option<String>,
    #[serde(default)]
    owner: Option<NotionOwner>,
}

#[derive(Deserialize, Debug)]
struct NotionOwner {
    #[serde(default)]
    user: Option<NotionUser>,
}

#[derive(Deserialize, Debug)]
struct NotionUser {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    name: Option<String>,
}

#[derive(Serialize)]
struct NotionCodeRequest<'a> {
    grant_type: &'a str,
    code: &'a str,
    redirect_uri: &'a str,
}

/// Slack `oauth.v2.access` response. Always HTTP 200; `ok` carries the verdict.
#[derive(Deserialize, Debug)]
struct SlackTokenResponse {
    ok: bool,
    #[serde(default)]
    authed_user: Option<SlackAuthedUser>,
    #[serde(default)]
    team: Option<SlackTeam>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Deserialize, Debug)]
struct SlackAuthedUser {
    id: Option<String>,
    #[serde(default)]
    scope: Option<String>,
    #[serde(default)]
    access_token: Option<String>,
    #[serde(default)]
    token_type: Option<String>,
}

#[derive(Deserialize, Debug)]
struct SlackTeam {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    name: Option<String>,
}

/// Google `oauth2/v2/userinfo` response
#[derive(Deserialize, Debug, Default)]
struct GoogleUserInfo {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    name: Option<String>,
}

/// Slack `auth.test` response
#[derive(Deserialize, Debug, Default)]
struct SlackAuthTest {
    ok: bool,
    #[serde(default)]
    user: Option<String>,
    #[serde(default)]
    user_id: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Deserialize, Debug, Default)]
struct ErrorResponse {
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    error_description: Option<String>,
}

/// Exchange an authorization code for a token bundle
///
/// # Returns
/// * `Ok(TokenBundle)` - Tokens plus provider metadata, expiry as epoch seconds
/// * `Err` - Transport failure or the provider rejected the code
pub async fn exchange_code(
    http: &reqwest::Client,
    provider: &ProviderConfig,
    code: &str,
    redirect_uri: &str,
) -> Result<TokenBundle> {
    debug!(
        service = %provider.service,
        token_url = %provider.token_url,
        "Exchanging authorization code for token"
    );

    let bundle = match provider.service {
        Service::Gmail => exchange_standard(http, provider, code, redirect_uri, true).await?,
        Service::Linear => exchange_standard(http, provider, code, redirect_uri, false).await?,
        Service::Notion => exchange_notion(http, provider, code, redirect_uri).await?,
        Service::Slack => exchange_slack(http, provider, code, redirect_uri).await?,
    };

    debug!(
        service = %provider.service,
        has_refresh_token = bundle.refresh_token.is_some(),
        expires_at = ?bundle.expires_at,
        "Token exchange successful"
    );

    Ok(bundle)
}

async fn exchange_standard(
    http: &reqwest::Client,
    provider: &ProviderConfig,
    code: &str,
    redirect_uri: &str,
    google: bool,
) -> Result<TokenBundle> {
    let form = [
        ("grant_type", "authorization_code"),
        ("code", code),
        ("redirect_uri", redirect_uri),
        ("client_id", provider.client.client_id.as_str()),
        ("client_secret", provider.client.client_secret.as_str()),
    ];

    let response = http
        .post(&provider.token_url)
        .header("Accept", "application/json")
        .form(&form)
        .send()
        .await
        .context("Failed to send token exchange request")?;

    let token: TokenResponse = read_json(response).await?;

    let extension = if google {
        let profile = google_profile(http, provider, &token.access_token).await;
        ProviderExtension::Gmail {
            user_id: profile.id,
            user_email: profile.email,
            user_name: profile.name,
        }
    } else {
        ProviderExtension::Linear
    };
    let default_type = if google { "Bearer" } else { "bearer" };

    Ok(TokenBundle {
        access_token: token.access_token,
        refresh_token: token.refresh_token,
        expires_at: expires_at(token.expires_in),
        token_type: Some(token.token_type.unwrap_or_else(|| default_type.to_string())),
        scope: token.scope,
        extension,
    })
}

async fn exchange_notion(
    http: &reqwest::Client,
    provider: &ProviderConfig,
    code: &str,
    redirect_uri: &str,
) -> Result<TokenBundle> {
    let response = http
        .post(&provider.token_url)
        .basic_auth(&provider.client.client_id, Some(&provider.client.client_secret))
        .json(&NotionCodeRequest {
            grant_type: "authorization_code",
            code,
            redirect_uri,
        })
        .send()
        .await
        .context("Failed to send token exchange request")?;

    let token: NotionTokenResponse = read_json(response).await?;
    let user = token.owner.and_then(|owner| owner.user);
    let (user_id, user_name) = match user {
        Some(user) => (user.id, user.name),
        None => (None, None),
    };

    Ok(TokenBundle {
        access_token: token.access_token,
        refresh_token: token.refresh_token,
        expires_at: expires_at(token.expires_in),
        token_type: Some(token.token_type.unwrap_or_else(|| "bearer".to_string())),
        scope: None,
        extension: ProviderExtension::Notion {
            workspace_id: token.workspace_id,
            workspace_name: token.workspace_name,
            workspace_icon: token.workspace_icon,
            bot_id: token.bot_id,
            user_id,
            user_name,
        },
    })
}

async fn exchange_slack(
    http: &reqwest::Client,
    provider: &ProviderConfig,
    code: &str,
    redirect_uri: &str,
) -> Result<TokenBundle> {
    let form = [
        ("client_id", provider.client.client_id.as_str()),
        ("client_secret", provider.client.client_secret.as_str()),
        ("code", code),
        ("redirect_uri", redirect_uri),
    ];

    let response = http
        .post(&provider.token_url)
        .form(&form)
        .send()
        .await
        .context("Failed to send token exchange request")?;

    let token: SlackTokenResponse = read_json(response).await?;
    if !token.ok {
        return Err(anyhow!(
            "{}",
            token
                .error
                .unwrap_or_else(|| "Failed to exchange code for token".to_string())
        ));
    }

    let user = token
        .authed_user
        .ok_or_else(|| anyhow!("Slack response has no authed_user"))?;
    let access_token = user
        .access_token
        .ok_or_else(|| anyhow!("Slack response has no user access token"))?;
    let (workspace_id, workspace_name) = match token.team {
        Some(team) => (team.id, team.name),
        None => (None, None),
    };

    let identity = slack_identity(http, provider, &access_token).await;

    // Slack user tokens do not expire
    Ok(TokenBundle {
        access_token,
        refresh_token: None,
        expires_at: None,
        token_type: Some(user.token_type.unwrap_or_else(|| "user".to_string())),
        scope: user.scope,
        extension: ProviderExtension::Slack {
            workspace_id,
            workspace_name,
            user_id: identity.user_id.or(user.id),
            user_name: identity.user,
        },
    })
}

/// Google profile for a fresh token. Empty when the lookup fails.
async fn google_profile(
    http: &reqwest::Client,
    provider: &ProviderConfig,
    access_token: &str,
) -> GoogleUserInfo {
    let url = match provider.profile_url.as_deref() {
        Some(url) => url,
        None => return GoogleUserInfo::default(),
    };

    match fetch_google_profile(http, url, access_token).await {
        Ok(profile) => profile,
        Err(e) => {
            warn!(error = %e, "Failed to fetch Google user info");
            GoogleUserInfo::default()
        }
    }
}

async fn fetch_google_profile(
    http: &reqwest::Client,
    url: &str,
    access_token: &str,
) -> Result<GoogleUserInfo> {
    let response = http
        .get(url)
        .bearer_auth(access_token)
        .send()
        .await
        .context("Failed to send userinfo request")?;

    let status = response.status();
    if !status.is_success() {
        return Err(anyhow!("userinfo returned status {}", status));
    }

    response
        .json()
        .await
        .context("Failed to parse userinfo response")
}

/// Slack identity for a fresh user token. Empty when `auth.test` fails.
async fn slack_identity(
    http: &reqwest::Client,
    provider: &ProviderConfig,
    access_token: &str,
) -> SlackAuthTest {
    let url = match provider.profile_url.as_deref() {
        Some(url) => url,
        None => return SlackAuthTest::default(),
    };

    match fetch_slack_identity(http, url, access_token).await {
        Ok(identity) => identity,
        Err(e) => {
            warn!(error = %e, "Slack auth.test failed");
            SlackAuthTest::default()
        }
    }
}

async fn fetch_slack_identity(
    http: &reqwest::Client,
    url: &str,
    access_token: &str,
) -> Result<SlackAuthTest> {
    let response = http
        .post(url)
        .bearer_auth(access_token)
        .send()
        .await
        .context("Failed to send auth.test request")?;

    let status = response.status();
    if !status.is_success() {
        return Err(anyhow!("auth.test returned status {}", status));
    }

    let identity: SlackAuthTest = response
        .json()
        .await
        .context("Failed to parse auth.test response")?;
    if !identity.ok {
        return Err(anyhow!(
            "{}",
            identity.error.unwrap_or_else(|| "auth.test not ok".to_string())
        ));
    }

    Ok(identity)
}

/// Parse a success body, or turn an error status into a readable error
async fn read_json<T: serde::de::DeserializeOwned>(response: reqwest::Response) -> Result<T> {
    let status = response.status();
    let body = response
        .text()
        .await
        .context("Failed to read token response")?;

    if !status.is_success() {
        let parsed: ErrorResponse = serde_json::from_str(&body).unwrap_or_default();
        let message = parsed
            .error_description
            .or(parsed.error)
            .unwrap_or(body);
        return Err(anyhow!(
            "Token exchange failed with status {}: {}",
            status,
            message
        ));
    }

    serde_json::from_str(&body).context("Failed to parse token response")
}

fn expires_at(expires_in: Option<i64>) -> Option<i64> {
    expires_in.map(|seconds| Utc::now().timestamp().saturating_add(seconds))
}
