//! Error handling for the Tandem API
//!
//! One error type for every layer, with HTTP status mapping via Axum's
//! `IntoResponse`. Authentication failures of any kind collapse into the same
//! 401 body so callers cannot tell which check rejected them; the precise
//! cause only reaches the logs.

use axum::{
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

/// API error response body
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    /// Error code for client-side handling
    pub code: &'static str,
    /// Human-readable error message
    pub message: String,
    /// Machine-readable variant name, for errors clients branch on
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<&'static str>,
    /// Optional additional details
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

/// Main API error type
#[derive(Error, Debug)]
pub enum ApiError {
    // ========== Authentication & Authorization ==========
    /// Missing authentication credentials
    #[error("authentication required")]
    Unauthorized,

    /// Login identifier or password did not match
    #[error("invalid credentials")]
    InvalidCredentials,

    /// No live session matches the presented refresh secret
    #[error("invalid session")]
    InvalidSession,

    /// A session was found but the refresh secret failed verification
    #[error("invalid refresh secret")]
    InvalidRefresh,

    /// The session's refresh window has passed
    #[error("session expired")]
    SessionExpired,

    /// Invalid access token (expired, malformed, bad signature)
    #[error("invalid authentication token: {0}")]
    InvalidToken(String),

    /// Caller lacks permission for the requested operation
    #[error("insufficient permissions: {0}")]
    Forbidden(String),

    // ========== Resource Errors ==========
    /// Requested resource not found
    #[error("{resource_type} not found: {id}")]
    NotFound {
        resource_type: &'static str,
        id: String,
    },

    /// Resource already exists
    #[error("{resource_type} already exists: {id}")]
    Conflict {
        resource_type: &'static str,
        id: String,
    },

    // ========== Validation Errors ==========
    /// Request validation failed
    #[error("validation error: {0}")]
    ValidationError(String),

    /// Missing required field
    #[error("missing required field: {0}")]
    MissingField(&'static str),

    // ========== Playback Routing ==========
    /// A control command had no live connection to go to
    #[error("no active device")]
    NoActiveDevice,

    // ========== Database Errors ==========
    /// Database query failed
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Service temporarily unavailable
    #[error("service temporarily unavailable: {0}")]
    ServiceBusy(String),

    // ========== Audio/Streaming Errors ==========
    /// Audio file not found or inaccessible
    #[error("audio file not found: {0}")]
    AudioFileNotFound(String),

    /// A track path resolved outside the storage root
    #[error("path escapes storage root: {0}")]
    PathEscape(String),

    /// Range not satisfiable (416)
    #[error("range not satisfiable")]
    RangeNotSatisfiable { file_size: u64 },

    // ========== Internal Errors ==========
    /// Internal server error (catch-all for unexpected errors)
    #[error("internal server error: {0}")]
    Internal(String),

    /// Filesystem error outside the not-found/permission cases
    #[error("i/o error: {0}")]
    Io(String),

    /// JSON serialization/deserialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// JWT encoding error
    #[error("JWT error: {0}")]
    Jwt(#[from] jsonwebtoken::errors::Error),
}

impl ApiError {
    /// Get the HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            // 401 Unauthorized
            Self::Unauthorized
            | Self::InvalidCredentials
            | Self::InvalidSession
            | Self::InvalidRefresh
            | Self::SessionExpired
            | Self::InvalidToken(_) => StatusCode::UNAUTHORIZED,

            // 403 Forbidden
            Self::Forbidden(_) | Self::PathEscape(_) => StatusCode::FORBIDDEN,

            // 404 Not Found
            Self::NotFound { .. } | Self::AudioFileNotFound(_) => StatusCode::NOT_FOUND,

            // 409 Conflict
            Self::Conflict { .. } | Self::NoActiveDevice => StatusCode::CONFLICT,

            // 400 Bad Request
            Self::ValidationError(_) | Self::MissingField(_) => {
                StatusCode::BAD_REQUEST
            }

            // 416 Range Not Satisfiable
            Self::RangeNotSatisfiable { .. } => StatusCode::RANGE_NOT_SATISFIABLE,

            // 503 Service Unavailable
            Self::ServiceBusy(_) => StatusCode::SERVICE_UNAVAILABLE,

            // 500 Internal Server Error
            Self::Database(_)
            | Self::Internal(_)
            | Self::Io(_)
            | Self::Serialization(_)
            | Self::Jwt(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Get the error code string for client-side handling
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Unauthorized
            | Self::InvalidCredentials
            | Self::InvalidSession
            | Self::InvalidRefresh
            | Self::SessionExpired
            | Self::InvalidToken(_) => "UNAUTHORIZED",
            Self::Forbidden(_) | Self::PathEscape(_) => "FORBIDDEN",
            Self::NotFound { .. } => "NOT_FOUND",
            Self::Conflict { .. } => "CONFLICT",
            Self::ValidationError(_) => "VALIDATION_ERROR",
            Self::MissingField(_) => "MISSING_FIELD",
            Self::NoActiveDevice => "NO_ACTIVE_DEVICE",
            Self::Database(_) => "DATABASE_ERROR",
            Self::ServiceBusy(_) => "SERVICE_BUSY",
            Self::AudioFileNotFound(_) => "AUDIO_NOT_FOUND",
            Self::RangeNotSatisfiable { .. } => "RANGE_NOT_SATISFIABLE",
            Self::Internal(_) => "INTERNAL_ERROR",
            Self::Io(_) => "IO_ERROR",
            Self::Serialization(_) => "SERIALIZATION_ERROR",
            Self::Jwt(_) => "JWT_ERROR",
        }
    }

    /// Whether this error is one of the authentication failures
    pub fn is_auth_failure(&self) -> bool {
        self.status_code() == StatusCode::UNAUTHORIZED
    }

    /// Create a not found error for a specific resource
    pub fn not_found(resource_type: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            resource_type,
            id: id.into(),
        }
    }

    /// Create a conflict error for a specific resource
    pub fn conflict(resource_type: &'static str, id: impl Into<String>) -> Self {
        Self::Conflict {
            resource_type,
            id: id.into(),
        }
    }

    /// Message safe to show the caller
    ///
    /// Internal details and auth root causes are replaced by generic text.
    pub fn public_message(&self) -> String {
        match self {
            _ if self.is_auth_failure() => "unauthorized".to_string(),
            Self::PathEscape(_) => "access denied".to_string(),
            Self::Database(_) | Self::Internal(_) | Self::Io(_) | Self::Jwt(_) => {
                "internal server error".to_string()
            }
            _ => self.to_string(),
        }
    }

    /// Log the error with appropriate severity based on status code
    pub fn log(&self) {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(
                error = %self,
                code = self.error_code(),
                status = status.as_u16(),
                "Server error occurred"
            );
        } else if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            tracing::warn!(
                error = %self,
                code = self.error_code(),
                status = status.as_u16(),
                "Authorization error"
            );
        } else {
            tracing::debug!(
                error = %self,
                code = self.error_code(),
                status = status.as_u16(),
                "Client error"
            );
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        self.log();

        let status = self.status_code();

        // RFC 7233: 416 carries the complete length and no body
        if let Self::RangeNotSatisfiable { file_size } = &self {
            return (
                status,
                [
                    (header::CONTENT_RANGE, format!("bytes */{}", file_size)),
                    (header::ACCEPT_RANGES, "bytes".to_string()),
                ],
            )
                .into_response();
        }

        let error = match &self {
            Self::NoActiveDevice => Some("NoActiveDevice"),
            _ => None,
        };

        let error_response = ErrorResponse {
            code: self.error_code(),
            message: self.public_message(),
            error,
            details: None,
        };

        (status, Json(error_response)).into_response()
    }
}

/// Result type alias for API operations
pub type ApiResult<T> = Result<T, ApiError>;

// ========== Conversion Implementations ==========

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        match err.downcast::<ApiError>() {
            Ok(api_err) => api_err,
            Err(err) => Self::Internal(err.to_string()),
        }
    }
}

impl From<std::io::Error> for ApiError {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound => Self::AudioFileNotFound(err.to_string()),
            std::io::ErrorKind::PermissionDenied => {
                Self::Forbidden("file access denied".to_string())
            }
            _ => Self::Io(err.to_string()),
        }
    }
}

impl From<tokio::task::JoinError> for ApiError {
    fn from(err: tokio::task::JoinError) -> Self {
        Self::Internal(format!("background task failed: {}", err))
    }
}
