//! Authentication REST route handlers for Tandem
//!
//! Provides the session manager endpoints:
//! - `POST /auth/register` - Create a listener and open its session
//! - `POST /auth/login` - Authenticate and get tokens
//! - `POST /auth/refresh` - Exchange a refresh secret for a new access token
//! - `POST /auth/logout` - Disable the caller's session
//!
//! Register, login and refresh run under a timeout so a saturated hashing
//! pool surfaces as 503 instead of a hung request.

use axum::{
    extract::State,
    http::{header, HeaderMap, StatusCode},
    response::IntoResponse,
    routing::post,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;

use crate::error::{ApiError, ApiResult};
use crate::middleware::AuthUser;
use crate::models::{AuthTokens, DeviceDescriptor, Identity, ListenerRole};
use crate::services::AuthService;

/// Default bound on a single auth call
pub const DEFAULT_AUTH_TIMEOUT: Duration = Duration::from_secs(10);

/// Shared application state for auth handlers
#[derive(Clone)]
pub struct AuthState {
    pub auth_service: AuthService,
    pub request_timeout: Duration,
}

impl AuthState {
    pub fn new(auth_service: AuthService) -> Self {
        Self {
            auth_service,
            request_timeout: DEFAULT_AUTH_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, request_timeout: Duration) -> Self {
        self.request_timeout = request_timeout;
        self
    }

    async fn bounded<T>(&self, fut: impl Future<Output = ApiResult<T>>) -> ApiResult<T> {
        tokio::time::timeout(self.request_timeout, fut)
            .await
            .map_err(|_| {
                tracing::warn!(
                    timeout_ms = self.request_timeout.as_millis() as u64,
                    "Auth request timed out"
                );
                ApiError::ServiceBusy("authentication timed out".to_string())
            })?
    }
}

/// Create authentication router
///
/// `AuthService` must also be present as an `Extension` for logout's
/// `AuthUser` extractor.
pub fn auth_router(state: AuthState) -> Router {
    Router::new()
        .route("/register", post(register))
        .route("/login", post(login))
        .route("/refresh", post(refresh))
        .route("/logout", post(logout))
        .with_state(state)
}

// ========== Request/Response Types ==========

/// Registration request body
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterRequest {
    pub email: String,
    pub password: String,
    pub display_name: String,
    #[serde(default)]
    pub role: Option<ListenerRole>,
    #[serde(default)]
    pub device: Option<DeviceDescriptor>,
}

/// Login request body
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
    #[serde(default)]
    pub device: Option<DeviceDescriptor>,
}

/// Refresh request body
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshRequest {
    pub refresh_secret: String,
}

/// Register/login response: the token pair plus who it belongs to
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthResponse {
    #[serde(flatten)]
    pub tokens: AuthTokens,
    pub identity: Identity,
}

/// Body for endpoints that only acknowledge
#[derive(Debug, Serialize)]
pub struct OkResponse {
    pub ok: bool,
}

impl OkResponse {
    pub fn ok() -> Json<Self> {
        Json(Self { ok: true })
    }
}

/// Attach the caller's User-Agent to the device descriptor
fn describe_device(device: Option<DeviceDescriptor>, headers: &HeaderMap) -> Option<DeviceDescriptor> {
    let user_agent = headers
        .get(header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .map(String::from);

    match (device, user_agent) {
        (None, None) => None,
        (device, user_agent) => {
            let mut device = device.unwrap_or_default();
            if device.user_agent.is_none() {
                device.user_agent = user_agent;
            }
            Some(device)
        }
    }
}

// ========== Route Handlers ==========

/// Register a new listener
///
/// # Response
/// - 201 Created: listener created and logged in
/// - 400 Bad Request: invalid email or weak password
/// - 409 Conflict: email already registered
async fn register(
    State(state): State<AuthState>,
    headers: HeaderMap,
    Json(request): Json<RegisterRequest>,
) -> ApiResult<impl IntoResponse> {
    let device = describe_device(request.device, &headers);
    let (tokens, listener) = state
        .bounded(state.auth_service.register(
            &request.email,
            &request.password,
            &request.display_name,
            request.role.unwrap_or_default(),
            device,
        ))
        .await?;

    let response = AuthResponse {
        tokens,
        identity: listener.into(),
    };

    Ok((StatusCode::CREATED, Json(response)))
}

/// Login with email and password
///
/// # Response
/// - 200 OK: login successful
/// - 401 Unauthorized: invalid credentials
async fn login(
    State(state): State<AuthState>,
    headers: HeaderMap,
    Json(request): Json<LoginRequest>,
) -> ApiResult<impl IntoResponse> {
    let device = describe_device(request.device, &headers);
    let (tokens, listener) = state
        .bounded(
            state
                .auth_service
                .login(&request.email, &request.password, device),
        )
        .await?;

    Ok(Json(AuthResponse {
        tokens,
        identity: listener.into(),
    }))
}

/// Exchange a refresh secret for a new access token
///
/// # Response
/// - 200 OK: `{accessToken, expiresIn, refreshSecret?}`
/// - 401 Unauthorized: unknown, disabled, mismatched or expired session
async fn refresh(
    State(state): State<AuthState>,
    Json(request): Json<RefreshRequest>,
) -> ApiResult<impl IntoResponse> {
    let tokens = state
        .bounded(state.auth_service.refresh(&request.refresh_secret))
        .await?;

    Ok(Json(tokens))
}

/// Disable the caller's session
async fn logout(State(state): State<AuthState>, auth: AuthUser) -> ApiResult<impl IntoResponse> {
    state.auth_service.logout(auth.listener_id).await?;
    Ok(OkResponse::ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_describe_device_adds_user_agent() {
        let mut headers = HeaderMap::new();
        headers.insert(header::USER_AGENT, HeaderValue::from_static("tandem-ios/2.1"));

        let device = describe_device(None, &headers).unwrap();
        assert_eq!(device.user_agent.as_deref(), Some("tandem-ios/2.1"));

        let given = DeviceDescriptor {
            device_id: Some("phone".into()),
            user_agent: Some("custom".into()),
            ..Default::default()
        };
        let device = describe_device(Some(given), &headers).unwrap();
        assert_eq!(device.device_id.as_deref(), Some("phone"));
        assert_eq!(device.user_agent.as_deref(), Some("custom"));

        assert!(describe_device(None, &HeaderMap::new()).is_none());
    }

    #[test]
    fn test_register_request_defaults() {
        let request: RegisterRequest = serde_json::from_str(
            r#"{"email":"a@example.com","password":"password123","displayName":"A"}"#,
        )
        .unwrap();
        assert!(request.role.is_none());
        assert!(request.device.is_none());

        let request: RegisterRequest = serde_json::from_str(
            r#"{"email":"a@example.com","password":"password123","displayName":"A","role":"artist"}"#,
        )
        .unwrap();
        assert_eq!(request.role, Some(ListenerRole::Artist));
    }

    #[test]
    fn test_auth_response_shape() {
        let response = AuthResponse {
            tokens: AuthTokens::new("access".into(), "secret".into(), 900),
            identity: Identity {
                id: uuid::Uuid::new_v4(),
                email: "a@example.com".into(),
                display_name: "A".into(),
                role: ListenerRole::User,
            },
        };
        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["accessToken"], "access");
        assert_eq!(json["refreshSecret"], "secret");
        assert_eq!(json["expiresIn"], 900);
        assert_eq!(json["identity"]["email"], "a@example.com");
    }

    #[tokio::test]
    async fn test_bounded_times_out_as_service_busy() {
        use crate::repositories::{MemoryListenerStore, MemorySessionStore};
        use crate::services::AuthConfig;
        use std::sync::Arc;

        let state = AuthState::new(AuthService::new(
            Arc::new(MemoryListenerStore::new()),
            Arc::new(MemorySessionStore::new()),
            AuthConfig::new("route-test-secret-long-enough-xx".into()),
        ))
        .with_timeout(Duration::from_millis(10));

        let result: ApiResult<()> = state
            .bounded(async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(())
            })
            .await;
        assert!(matches!(result, Err(ApiError::ServiceBusy(_))));
    }
}
