//! Authentication extractors for Axum handlers
//!
//! Access tokens are verified statelessly against the `AuthService` found in
//! the request extensions. Every rejection renders the same 401 body so the
//! caller cannot tell a missing token from an expired one.
//!
//! ```rust,ignore
//! async fn handler(auth: AuthUser) -> impl IntoResponse {
//!     format!("Listener: {}", auth.listener_id)
//! }
//! ```

use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{header::AUTHORIZATION, request::Parts, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use uuid::Uuid;

use crate::error::{ApiError, ErrorResponse};
use crate::models::{Claims, ListenerRole};
use crate::services::AuthService;

/// Authenticated listener extractor
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub listener_id: Uuid,
    pub role: ListenerRole,
    /// JWT claims from the access token
    pub claims: Claims,
}

/// Authentication rejection types
#[derive(Debug)]
pub enum AuthRejection {
    /// Missing or non-bearer Authorization header
    MissingToken,
    /// Token is malformed, expired, or signed with another key
    InvalidToken(String),
    /// `AuthService` was not added to the router's extensions
    MissingServices,
}

impl IntoResponse for AuthRejection {
    fn into_response(self) -> Response {
        let (status, error) = match self {
            AuthRejection::MissingToken => {
                tracing::debug!("Authentication rejected: missing token");
                (StatusCode::UNAUTHORIZED, ApiError::Unauthorized)
            }
            AuthRejection::InvalidToken(reason) => {
                tracing::debug!(reason = %reason, "Authentication rejected: invalid token");
                (StatusCode::UNAUTHORIZED, ApiError::InvalidToken(reason))
            }
            AuthRejection::MissingServices => {
                tracing::error!("Authentication rejected: missing services in app state");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ApiError::Internal("authentication services not configured".to_string()),
                )
            }
        };

        let body = Json(ErrorResponse {
            code: error.error_code(),
            message: error.public_message(),
            error: None,
            details: None,
        });

        (status, body).into_response()
    }
}

/// Extract the bearer token from the Authorization header
fn extract_bearer_token(parts: &Parts) -> Option<&str> {
    parts
        .headers
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .filter(|token| !token.is_empty())
}

fn verify(parts: &Parts) -> Result<Claims, AuthRejection> {
    let token = extract_bearer_token(parts).ok_or(AuthRejection::MissingToken)?;

    let auth_service = parts
        .extensions
        .get::<AuthService>()
        .ok_or(AuthRejection::MissingServices)?;

    auth_service
        .verify_access_token(token)
        .map_err(|e| AuthRejection::InvalidToken(e.to_string()))
}

#[async_trait]
impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
{
    type Rejection = AuthRejection;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let claims = verify(parts)?;
        Ok(AuthUser {
            listener_id: claims.sub,
            role: claims.role,
            claims,
        })
    }
}
