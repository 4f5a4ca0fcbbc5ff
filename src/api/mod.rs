//! HTTP API for connecting, inspecting, and disconnecting services.
//!
//! ```text
//! GET  /api/services?device_id=                     connected + configured services
//! GET  /api/:service/auth?device_id=&redirect_uri=  start authorization
//! POST /api/:service/callback                       {code, redirect_uri, state}
//! GET  /api/:service/status?device_id=              connection status (refreshes if expiring)
//! POST /api/:service/disconnect?device_id=          drop stored tokens
//! ```
//!
//! Every response is JSON with a `success` flag. CORS is permissive.

use crate::accessor::{AccessError, TokenAccessor};
use crate::credentials::{ProviderExtension, StoreError};
use crate::oauth::{OAuthError, OAuthFlow};
use crate::providers::Service;
use axum::{
    extract::{rejection::JsonRejection, Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tracing::{debug, error, warn};

/// Error response
#[derive(Serialize)]
struct ErrorResponse {
    success: bool,
    error: String,
}

/// Application error types for the API
#[derive(Debug)]
pub enum AppError {
    BadRequest(String),
    NotFound(String),
    ServerError(String),
    BadGateway(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_message) = match self {
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            AppError::ServerError(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
            AppError::BadGateway(msg) => (StatusCode::BAD_GATEWAY, msg),
        };

        let body = Json(ErrorResponse {
            success: false,
            error: error_message,
        });

        (status, body).into_response()
    }
}

impl From<OAuthError> for AppError {
    fn from(err: OAuthError) -> Self {
        let msg = err.to_string();
        match err {
            OAuthError::UnknownService(_) => AppError::NotFound(msg),
            OAuthError::Invalid(_)
            | OAuthError::MissingParameter(_)
            | OAuthError::InvalidState
            | OAuthError::ServiceMismatch { .. }
            | OAuthError::Storage(StoreError::Validation(_)) => AppError::BadRequest(msg),
            OAuthError::Exchange(_) => AppError::BadGateway(msg),
            OAuthError::NotConfigured { .. } | OAuthError::Storage(_) => AppError::ServerError(msg),
        }
    }
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Validation(e) => AppError::BadRequest(e.to_string()),
            other => {
                error!(error = %other, "Token storage failure");
                AppError::ServerError(other.to_string())
            }
        }
    }
}

/// Shared application state
#[derive(Clone)]
pub struct ApiState {
    pub accessor: TokenAccessor,
    pub oauth: OAuthFlow,
}

/// `?device_id=` (plus `redirect_uri` for auth)
#[derive(Debug, Deserialize)]
pub struct DeviceQuery {
    device_id: Option<String>,
    redirect_uri: Option<String>,
}

impl DeviceQuery {
    fn device_id(&self) -> Result<&str, AppError> {
        self.device_id
            .as_deref()
            .filter(|d| !d.is_empty())
            .ok_or_else(|| AppError::BadRequest("device_id is required".to_string()))
    }
}

/// Callback body
#[derive(Debug, Deserialize)]
pub struct CallbackRequest {
    code: Option<String>,
    redirect_uri: Option<String>,
    state: Option<String>,
}

#[derive(Serialize)]
struct AuthResponse {
    success: bool,
    auth_url: String,
}

#[derive(Serialize)]
struct CallbackResponse {
    success: bool,
    service: Service,
    #[serde(skip_serializing_if = "Option::is_none")]
    profile: Option<Profile>,
}

#[derive(Serialize)]
struct StatusResponse {
    success: bool,
    connected: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    profile: Option<Profile>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

#[derive(Serialize)]
struct SuccessResponse {
    success: bool,
}

#[derive(Serialize)]
struct ServicesResponse {
    success: bool,
    /// Services with stored tokens for the device
    services: Vec<String>,
    /// Services with an OAuth client configured on this server
    available: Vec<Service>,
}

/// Connection profile shown to clients (never contains tokens)
#[derive(Debug, Default, PartialEq, Serialize)]
pub struct Profile {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workspace: Option<WorkspaceProfile>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<UserProfile>,
}

#[derive(Debug, PartialEq, Serialize)]
pub struct WorkspaceProfile {
    pub id: Option<String>,
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
}

#[derive(Debug, PartialEq, Serialize)]
pub struct UserProfile {
    pub id: Option<String>,
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

impl Profile {
    /// Profile from provider metadata; `None` when there is nothing to show.
    pub fn from_extension(extension: &ProviderExtension) -> Option<Self> {
        let profile = match extension {
            ProviderExtension::None | ProviderExtension::Linear => return None,
            ProviderExtension::Gmail {
                user_id,
                user_email,
                user_name,
            } => Profile {
                workspace: None,
                user: user(user_id, user_name, user_email),
            },
            ProviderExtension::Notion {
                workspace_id,
                workspace_name,
                workspace_icon,
                user_id,
                user_name,
                ..
            } => Profile {
                workspace: workspace(workspace_id, workspace_name, workspace_icon),
                user: user(user_id, user_name, &None),
            },
            ProviderExtension::Slack {
                workspace_id,
                workspace_name,
                user_id,
                user_name,
            } => Profile {
                workspace: workspace(workspace_id, workspace_name, &None),
                user: user(user_id, user_name, &None),
            },
        };

        (profile != Profile::default()).then_some(profile)
    }
}

fn workspace(
    id: &Option<String>,
    name: &Option<String>,
    icon: &Option<String>,
) -> Option<WorkspaceProfile> {
    (id.is_some() || name.is_some()).then(|| WorkspaceProfile {
        id: id.clone(),
        name: name.clone(),
        icon: icon.clone(),
    })
}

fn user(id: &Option<String>, name: &Option<String>, email: &Option<String>) -> Option<UserProfile> {
    (id.is_some() || email.is_some()).then(|| UserProfile {
        id: id.clone(),
        name: name.clone(),
        email: email.clone(),
    })
}

fn parse_service(name: &str) -> Result<Service, AppError> {
    name.parse::<Service>().map_err(|e| {
        warn!(service = %name, "Unknown service");
        AppError::NotFound(e.to_string())
    })
}

/// Create API router
pub fn create_router(state: ApiState) -> Router {
    Router::new()
        .route("/api/services", get(list_services))
        .route("/api/:service/auth", get(start_auth))
        .route("/api/:service/callback", post(callback))
        .route("/api/:service/status", get(status))
        .route("/api/:service/disconnect", post(disconnect))
        .layer(CorsLayer::permissive())
        .with_state(Arc::new(state))
}

/// GET /api/:service/auth
///
/// Returns the provider authorization URL. The state parameter inside it is
/// single-use and expires after the configured TTL.
async fn start_auth(
    State(state): State<Arc<ApiState>>,
    Path(service_name): Path<String>,
    Query(query): Query<DeviceQuery>,
) -> Result<Json<AuthResponse>, AppError> {
    let service = parse_service(&service_name)?;
    let device_id = query.device_id()?;
    let redirect_uri = query
        .redirect_uri
        .as_deref()
        .filter(|r| !r.is_empty())
        .ok_or_else(|| AppError::BadRequest("redirect_uri is required".to_string()))?;

    let auth_url = state
        .oauth
        .authorization_url(service, device_id, redirect_uri)?;

    Ok(Json(AuthResponse {
        success: true,
        auth_url,
    }))
}

/// POST /api/:service/callback
///
/// Exchanges the authorization code and stores the encrypted tokens for the
/// device the state was issued to.
async fn callback(
    State(state): State<Arc<ApiState>>,
    Path(service_name): Path<String>,
    payload: Result<Json<CallbackRequest>, JsonRejection>,
) -> Result<Json<CallbackResponse>, AppError> {
    let service = parse_service(&service_name)?;
    let Json(body) = payload.map_err(|rejection| AppError::BadRequest(rejection.body_text()))?;

    let code = body
        .code
        .filter(|c| !c.is_empty())
        .ok_or_else(|| AppError::BadRequest("code is required".to_string()))?;
    let redirect_uri = body
        .redirect_uri
        .filter(|r| !r.is_empty())
        .ok_or_else(|| AppError::BadRequest("redirect_uri is required".to_string()))?;
    let csrf_state = body
        .state
        .filter(|s| !s.is_empty())
        .ok_or_else(|| AppError::BadRequest("state is required".to_string()))?;

    let connection = state
        .oauth
        .complete(service, &code, &redirect_uri, &csrf_state)
        .await?;

    Ok(Json(CallbackResponse {
        success: true,
        service,
        profile: Profile::from_extension(&connection.bundle.extension),
    }))
}

/// GET /api/:service/status
async fn status(
    State(state): State<Arc<ApiState>>,
    Path(service_name): Path<String>,
    Query(query): Query<DeviceQuery>,
) -> Result<Json<StatusResponse>, AppError> {
    let service = parse_service(&service_name)?;
    let device_id = query.device_id()?;

    let response = match state.accessor.ensure_fresh(device_id, service.as_str()).await {
        Ok(bundle) => StatusResponse {
            success: true,
            connected: true,
            profile: Profile::from_extension(&bundle.extension),
            error: None,
        },
        Err(AccessError::NotConnected { .. }) => StatusResponse {
            success: true,
            connected: false,
            profile: None,
            error: None,
        },
        Err(AccessError::RefreshFailed { reason }) => {
            debug!(service = %service, device_id = %device_id, reason = %reason, "Status check refresh failed");
            StatusResponse {
                success: true,
                connected: false,
                profile: None,
                error: Some(format!("Token expired and refresh failed: {}", reason)),
            }
        }
        Err(AccessError::Invalid(e)) => return Err(AppError::BadRequest(e.to_string())),
        Err(AccessError::Storage(msg)) => {
            error!(service = %service, error = %msg, "Token storage failure");
            return Err(AppError::ServerError(msg));
        }
    };

    Ok(Json(response))
}

/// POST /api/:service/disconnect
async fn disconnect(
    State(state): State<Arc<ApiState>>,
    Path(service_name): Path<String>,
    Query(query): Query<DeviceQuery>,
) -> Result<Json<SuccessResponse>, AppError> {
    let service = parse_service(&service_name)?;
    let device_id = query.device_id()?;

    state
        .accessor
        .store()
        .delete(device_id, service.as_str())
        .await?;

    tracing::info!(service = %service, device_id = %device_id, "Service disconnected");

    Ok(Json(SuccessResponse { success: true }))
}

/// GET /api/services
async fn list_services(
    State(state): State<Arc<ApiState>>,
    Query(query): Query<DeviceQuery>,
) -> Result<Json<ServicesResponse>, AppError> {
    let device_id = query.device_id()?;
    let services = state.accessor.store().list_services(device_id).await?;

    Ok(Json(ServicesResponse {
        success: true,
        services,
        available: state.accessor.providers().configured(),
    }))
}
