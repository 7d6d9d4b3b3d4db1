//! Authentication service for Tandem
//!
//! This module provides the session manager:
//! - Listener registration with Argon2id password hashing
//! - Login issuing a short-lived JWT access token and an opaque refresh secret
//! - Refresh with optional secret rotation
//! - Logout by disabling the listener's session
//!
//! A listener owns exactly one session row. Refresh secrets are never stored:
//! the row keeps a SHA-256 fingerprint for lookup and an Argon2id hash for the
//! comparison itself.

use argon2::{
    password_hash::{
        rand_core::{OsRng, RngCore},
        PasswordHash, PasswordHasher, PasswordVerifier, SaltString,
    },
    Argon2,
};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use uuid::Uuid;

use crate::error::{ApiError, ApiResult};
use crate::models::{
    AuthTokens, Claims, DeviceDescriptor, Listener, ListenerRole, NewListener, NewSession,
    RefreshedTokens,
};
use crate::repositories::{ListenerStore, SessionStore};

/// Number of random bytes in a refresh secret
const REFRESH_SECRET_BYTES: usize = 32;

/// Minimum accepted password length
const MIN_PASSWORD_LEN: usize = 8;

/// Authentication service configuration
#[derive(Debug, Clone)]
pub struct AuthConfig {
    /// JWT signing secret
    pub jwt_secret: String,
    /// Access token TTL in seconds (default: 15 minutes)
    pub access_token_ttl_secs: i64,
    /// Refresh window in seconds (default: 30 days)
    pub refresh_token_ttl_secs: i64,
    /// JWT issuer
    pub issuer: String,
    /// JWT audience
    pub audience: String,
    /// Issue a new refresh secret on every refresh
    pub rotate_refresh_tokens: bool,
}

impl AuthConfig {
    /// Create a new AuthConfig with default TTLs
    pub fn new(jwt_secret: String) -> Self {
        Self {
            jwt_secret,
            access_token_ttl_secs: 15 * 60,         // 15 minutes
            refresh_token_ttl_secs: 30 * 24 * 3600, // 30 days
            issuer: "tandem".to_string(),
            audience: "tandem".to_string(),
            rotate_refresh_tokens: true,
        }
    }

    /// Create AuthConfig from expiry strings (e.g., "15m", "30d")
    pub fn with_expiry_strings(
        jwt_secret: String,
        access_expiry: &str,
        refresh_expiry: &str,
    ) -> Self {
        let defaults = Self::new(jwt_secret);
        Self {
            access_token_ttl_secs: parse_duration_string(access_expiry)
                .unwrap_or(defaults.access_token_ttl_secs),
            refresh_token_ttl_secs: parse_duration_string(refresh_expiry)
                .unwrap_or(defaults.refresh_token_ttl_secs),
            ..defaults
        }
    }

    pub fn with_rotation(mut self, rotate_refresh_tokens: bool) -> Self {
        self.rotate_refresh_tokens = rotate_refresh_tokens;
        self
    }
}

/// Parse duration strings like "15m", "30d", "24h" to seconds
pub fn parse_duration_string(s: &str) -> Option<i64> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }

    let (split, unit) = s.char_indices().last()?;
    let num = s[..split].parse::<i64>().ok().filter(|n| *n >= 0)?;

    let multiplier = match unit {
        's' => 1,
        'm' => 60,
        'h' => 3600,
        'd' => 24 * 3600,
        'w' => 7 * 24 * 3600,
        _ => return None,
    };
    num.checked_mul(multiplier)
}

/// Session manager: registration, login, refresh and logout
#[derive(Clone)]
pub struct AuthService {
    listeners: Arc<dyn ListenerStore>,
    sessions: Arc<dyn SessionStore>,
    config: AuthConfig,
    argon2: Argon2<'static>,
    /// Pre-computed dummy hash for timing attack prevention.
    /// Login verifies against it when the email is unknown so both paths
    /// cost one Argon2 verification.
    dummy_password_hash: String,
}

impl AuthService {
    /// Create a new AuthService instance
    pub fn new(
        listeners: Arc<dyn ListenerStore>,
        sessions: Arc<dyn SessionStore>,
        config: AuthConfig,
    ) -> Self {
        let argon2 = Argon2::default();

        let dummy_salt = SaltString::generate(&mut OsRng);
        let dummy_password_hash = argon2
            .hash_password(b"dummy_password_for_timing_attack_prevention", &dummy_salt)
            .expect("dummy password hashing should not fail")
            .to_string();

        Self {
            listeners,
            sessions,
            config,
            argon2,
            dummy_password_hash,
        }
    }

    pub fn config(&self) -> &AuthConfig {
        &self.config
    }

    /// Register a new listener and open their session
    ///
    /// # Errors
    /// - `ApiError::ValidationError` if the email or password is invalid
    /// - `ApiError::Conflict` if the email is already registered
    pub async fn register(
        &self,
        email: &str,
        password: &str,
        display_name: &str,
        role: ListenerRole,
        device: Option<DeviceDescriptor>,
    ) -> ApiResult<(AuthTokens, Listener)> {
        let email = normalize_email(email);

        if !is_valid_email(&email) {
            return Err(ApiError::ValidationError(
                "invalid email format".to_string(),
            ));
        }

        if password.len() < MIN_PASSWORD_LEN {
            return Err(ApiError::ValidationError(format!(
                "password must be at least {MIN_PASSWORD_LEN} characters"
            )));
        }

        let display_name = display_name.trim();
        if display_name.is_empty() {
            return Err(ApiError::ValidationError(
                "displayName cannot be empty".to_string(),
            ));
        }

        if self.listeners.find_by_email(&email).await?.is_some() {
            return Err(ApiError::conflict("listener", email));
        }

        let password_hash = self.hash_secret(password).await?;

        let listener = self
            .listeners
            .create(&NewListener {
                email,
                password_hash,
                display_name: display_name.to_string(),
                role,
            })
            .await?;

        let tokens = self.open_session(&listener, device).await?;

        tracing::info!(listener_id = %listener.id, role = %listener.role, "Listener registered");

        Ok((tokens, listener))
    }

    /// Authenticate with email and password
    ///
    /// Replaces the listener's session, so any refresh secret issued before
    /// this login stops working.
    pub async fn login(
        &self,
        email: &str,
        password: &str,
        device: Option<DeviceDescriptor>,
    ) -> ApiResult<(AuthTokens, Listener)> {
        let email = normalize_email(email);
        let listener = self.listeners.find_by_email(&email).await?;

        // Unknown emails still pay for one verification against the dummy hash
        let (listener, password_valid) = match listener {
            Some(l) => {
                let valid = self.verify_secret(password, &l.password_hash).await?;
                (Some(l), valid)
            }
            None => {
                let _ = self
                    .verify_secret(password, &self.dummy_password_hash)
                    .await;
                (None, false)
            }
        };

        let listener = match (listener, password_valid) {
            (Some(l), true) => l,
            (Some(l), false) => {
                tracing::warn!(listener_id = %l.id, "Login failed: invalid password");
                return Err(ApiError::InvalidCredentials);
            }
            (None, _) => {
                tracing::warn!("Login failed: unknown email");
                return Err(ApiError::InvalidCredentials);
            }
        };

        let tokens = self.open_session(&listener, device).await?;

        tracing::info!(listener_id = %listener.id, "Listener logged in");

        Ok((tokens, listener))
    }

    /// Exchange a refresh secret for a new access token
    ///
    /// With rotation enabled the stored secret is replaced and the new one is
    /// returned; the presented secret is dead afterwards.
    ///
    /// # Errors
    /// - `InvalidSession`: no session for this secret, or it was logged out
    /// - `InvalidRefresh`: the secret failed hash verification
    /// - `SessionExpired`: the refresh window has passed
    pub async fn refresh(&self, refresh_secret: &str) -> ApiResult<RefreshedTokens> {
        let fingerprint = hash_token(refresh_secret);

        let session = self
            .sessions
            .find_by_fingerprint(&fingerprint)
            .await?
            .filter(|s| !s.disabled)
            .ok_or(ApiError::InvalidSession)?;

        if !self
            .verify_secret(refresh_secret, &session.refresh_hash)
            .await?
        {
            tracing::warn!(listener_id = %session.listener_id, "Refresh secret failed verification");
            return Err(ApiError::InvalidRefresh);
        }

        if session.is_expired(Utc::now()) {
            return Err(ApiError::SessionExpired);
        }

        let listener = self
            .listeners
            .find_by_id(session.listener_id)
            .await?
            .ok_or(ApiError::InvalidSession)?;

        let access_token = self.issue_access_token(&listener)?;

        let refresh_secret = if self.config.rotate_refresh_tokens {
            let secret = generate_refresh_secret();
            let refresh_hash = self.hash_secret(&secret).await?;
            let expires_at = Utc::now() + Duration::seconds(self.config.refresh_token_ttl_secs);

            let rotated = self
                .sessions
                .rotate(
                    listener.id,
                    &fingerprint,
                    &refresh_hash,
                    &hash_token(&secret),
                    expires_at,
                )
                .await?;

            if !rotated {
                // A concurrent refresh or logout changed the row first
                return Err(ApiError::InvalidSession);
            }
            Some(secret)
        } else {
            None
        };

        tracing::debug!(
            listener_id = %listener.id,
            rotated = refresh_secret.is_some(),
            "Token refreshed"
        );

        Ok(RefreshedTokens {
            access_token,
            expires_in: self.config.access_token_ttl_secs,
            refresh_secret,
        })
    }

    /// Disable the listener's session. Idempotent.
    ///
    /// Access tokens already issued stay valid until they expire.
    pub async fn logout(&self, listener_id: Uuid) -> ApiResult<()> {
        let existed = self.sessions.disable(listener_id).await?;
        tracing::info!(listener_id = %listener_id, existed, "Session disabled");
        Ok(())
    }

    /// Verify and decode an access token
    pub fn verify_access_token(&self, token: &str) -> ApiResult<Claims> {
        let mut validation = Validation::default();
        validation.set_issuer(&[&self.config.issuer]);
        validation.set_audience(&[&self.config.audience]);

        let token_data = decode::<Claims>(
            token,
            &DecodingKey::from_secret(self.config.jwt_secret.as_bytes()),
            &validation,
        )
        .map_err(|e| {
            tracing::debug!(error = %e, "Access token verification failed");
            ApiError::InvalidToken(e.to_string())
        })?;

        Ok(token_data.claims)
    }

    fn issue_access_token(&self, listener: &Listener) -> ApiResult<String> {
        let claims = Claims::new(
            listener.id,
            listener.role,
            self.config.access_token_ttl_secs,
            &self.config.issuer,
            &self.config.audience,
        );

        Ok(encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(self.config.jwt_secret.as_bytes()),
        )?)
    }

    /// Create or replace the listener's session and issue both tokens
    async fn open_session(
        &self,
        listener: &Listener,
        device: Option<DeviceDescriptor>,
    ) -> ApiResult<AuthTokens> {
        let access_token = self.issue_access_token(listener)?;
        let refresh_secret = generate_refresh_secret();
        let refresh_hash = self.hash_secret(&refresh_secret).await?;

        self.sessions
            .upsert(&NewSession {
                listener_id: listener.id,
                refresh_hash,
                refresh_fingerprint: hash_token(&refresh_secret),
                expires_at: Utc::now() + Duration::seconds(self.config.refresh_token_ttl_secs),
                last_device: device,
            })
            .await?;

        Ok(AuthTokens::new(
            access_token,
            refresh_secret,
            self.config.access_token_ttl_secs,
        ))
    }

    /// Argon2id hash on the blocking pool
    async fn hash_secret(&self, secret: &str) -> ApiResult<String> {
        let argon2 = self.argon2.clone();
        let secret = secret.to_owned();

        tokio::task::spawn_blocking(move || {
            let salt = SaltString::generate(&mut OsRng);
            argon2
                .hash_password(secret.as_bytes(), &salt)
                .map(|hash| hash.to_string())
                .map_err(|e| ApiError::Internal(format!("Password hashing failed: {}", e)))
        })
        .await?
    }

    /// Argon2 verification on the blocking pool
    async fn verify_secret(&self, secret: &str, hash: &str) -> ApiResult<bool> {
        let argon2 = self.argon2.clone();
        let secret = secret.to_owned();
        let hash = hash.to_owned();

        tokio::task::spawn_blocking(move || {
            let parsed_hash = PasswordHash::new(&hash)
                .map_err(|e| ApiError::Internal(format!("Invalid password hash format: {}", e)))?;
            Ok::<bool, ApiError>(
                argon2
                    .verify_password(secret.as_bytes(), &parsed_hash)
                    .is_ok(),
            )
        })
        .await?
    }
}

/// 32 random bytes from the OS CSPRNG, base64url without padding
fn generate_refresh_secret() -> String {
    let mut bytes = [0u8; REFRESH_SECRET_BYTES];
    OsRng.fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Lowercase hex SHA-256, used as the session lookup key
fn hash_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    format!("{:x}", hasher.finalize())
}

fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

fn is_valid_email(email: &str) -> bool {
    let email = email.trim();
    if email.is_empty() || email.len() > 254 {
        return false;
    }

    // Must have exactly one @ symbol
    let parts: Vec<&str> = email.split('@').collect();
    if parts.len() != 2 {
        return false;
    }

    let (local, domain) = (parts[0], parts[1]);

    if local.is_empty() || local.len() > 64 {
        return false;
    }

    // Domain must have at least one dot and no empty labels
    if domain.is_empty() || !domain.contains('.') {
        return false;
    }

    domain.split('.').all(|part| !part.is_empty())
}
