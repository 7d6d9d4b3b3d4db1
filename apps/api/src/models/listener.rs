//! Listener identity and token models
//!
//! This module contains:
//! - Listener accounts (the actor a session belongs to)
//! - JWT access-token claims
//! - Token pairs returned by login/register/refresh

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Listener role, matching the PostgreSQL `listener_role` type
///
/// Fixed at creation time and copied into every access token.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "listener_role", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum ListenerRole {
    #[default]
    User,
    Artist,
}

impl std::fmt::Display for ListenerRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::User => write!(f, "user"),
            Self::Artist => write!(f, "artist"),
        }
    }
}

/// Listener account from the listeners table
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Listener {
    /// Unique listener identifier
    pub id: Uuid,

    /// Login identifier (unique, stored lower-cased)
    pub email: String,

    /// Argon2id PHC hash of the password
    #[serde(skip_serializing)]
    pub password_hash: String,

    /// Display name shown on other devices
    pub display_name: String,

    /// Immutable role
    pub role: ListenerRole,

    /// Account creation timestamp
    pub created_at: DateTime<Utc>,
}

/// Data for creating a listener
#[derive(Debug, Clone)]
pub struct NewListener {
    pub email: String,
    pub password_hash: String,
    pub display_name: String,
    pub role: ListenerRole,
}

/// Public identity returned alongside tokens
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Identity {
    pub id: Uuid,
    pub email: String,
    pub display_name: String,
    pub role: ListenerRole,
}

impl From<Listener> for Identity {
    fn from(listener: Listener) -> Self {
        Self {
            id: listener.id,
            email: listener.email,
            display_name: listener.display_name,
            role: listener.role,
        }
    }
}

/// JWT claims carried by an access token
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Listener id
    pub sub: Uuid,
    /// Listener role
    pub role: ListenerRole,
    /// Issued at (unix seconds)
    pub iat: i64,
    /// Expiry (unix seconds)
    pub exp: i64,
    pub iss: String,
    pub aud: String,
}

impl Claims {
    pub fn new(
        listener_id: Uuid,
        role: ListenerRole,
        ttl_secs: i64,
        issuer: &str,
        audience: &str,
    ) -> Self {
        let now = Utc::now().timestamp();
        Self {
            sub: listener_id,
            role,
            iat: now,
            exp: now + ttl_secs,
            iss: issuer.to_string(),
            aud: audience.to_string(),
        }
    }
}

/// Tokens issued by login and register
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthTokens {
    /// Short-lived signed access token
    pub access_token: String,
    /// Opaque long-lived refresh secret
    pub refresh_secret: String,
    /// Access token lifetime in seconds
    pub expires_in: i64,
    pub token_type: String,
}

impl AuthTokens {
    pub fn new(access_token: String, refresh_secret: String, expires_in: i64) -> Self {
        Self {
            access_token,
            refresh_secret,
            expires_in,
            token_type: "Bearer".to_string(),
        }
    }
}

/// Result of a refresh call
///
/// `refresh_secret` is only present when the stored secret was rotated.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshedTokens {
    pub access_token: String,
    pub expires_in: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refresh_secret: Option<String>,
}
