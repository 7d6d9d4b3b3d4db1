//! API server configuration

use std::env;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use tandem_shared_config::{parse_env, CommonConfig, DatabaseConfig, Environment};

use crate::services::auth::parse_duration_string;
use crate::services::stream::DEFAULT_CHUNK_BYTES;
use crate::services::AuthConfig;
use crate::websocket::WsConfig;

/// Minimum required length for JWT_SECRET to be considered secure
const MIN_JWT_SECRET_LENGTH: usize = 32;

/// API server configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    /// Common configuration shared with other services
    pub common: CommonConfig,

    /// Server port (default: 8080)
    pub port: u16,

    /// JWT secret for authentication
    pub jwt_secret: String,

    /// JWT access token expiry (default: 15m)
    pub jwt_access_expiry: String,

    /// Refresh window (default: 30d)
    pub jwt_refresh_expiry: String,

    /// Issue a new refresh secret on every refresh (default: true)
    pub refresh_token_rotation: bool,

    /// Realtime ping cadence (default: 30s)
    pub ws_ping_interval: Duration,

    /// Silent intervals tolerated before a socket is closed (default: 2)
    pub ws_max_missed_pongs: u32,

    /// Per-connection outbound queue size (default: 64)
    pub ws_send_queue_capacity: usize,

    /// Largest body served for an open-ended range (default: 1 MiB)
    pub stream_chunk_bytes: u64,

    /// Upper bound on register/login/refresh (default: 10s)
    pub auth_request_timeout: Duration,

    /// CORS allowed origins (optional)
    pub cors_allowed_origins: Option<Vec<String>>,
}

impl Config {
    /// Load configuration from environment variables
    ///
    /// In production mode, this function requires:
    /// - `JWT_SECRET`: Must be set and at least 32 characters long
    /// - `DATABASE_URL`: Must be set (in-memory stores are development only)
    ///
    /// In development/staging mode, sensible defaults are used for convenience.
    pub fn from_env() -> Result<Self> {
        let environment = Environment::from_str(
            &env::var("ENVIRONMENT").unwrap_or_else(|_| "development".to_string()),
        )
        .unwrap_or_default();
        let is_production = environment.is_production();

        let jwt_secret = Self::load_jwt_secret(is_production)?;

        if is_production {
            Self::validate_database_url()?;
        }

        let common = CommonConfig::from_env()
            .map_err(|e| anyhow::anyhow!("Failed to load config: {}", e))?;

        Ok(Self {
            common,

            port: env::var("PORT")
                .unwrap_or_else(|_| "8080".to_string())
                .parse()
                .context("Invalid PORT value")?,

            jwt_secret,

            jwt_access_expiry: Self::load_seconds("JWT_ACCESS_EXPIRY", "15m")?.0,

            jwt_refresh_expiry: Self::load_seconds("JWT_REFRESH_EXPIRY", "30d")?.0,

            refresh_token_rotation: parse_env("REFRESH_TOKEN_ROTATION", true)?,

            ws_ping_interval: Self::load_duration("WS_PING_INTERVAL", "30s")?,

            ws_max_missed_pongs: parse_env("WS_MAX_MISSED_PONGS", 2)?,

            ws_send_queue_capacity: parse_env("WS_SEND_QUEUE_CAPACITY", 64)?,

            stream_chunk_bytes: parse_env("STREAM_CHUNK_BYTES", DEFAULT_CHUNK_BYTES)?,

            auth_request_timeout: Self::load_duration("AUTH_REQUEST_TIMEOUT", "10s")?,

            cors_allowed_origins: env::var("CORS_ORIGINS").ok().map(|s| {
                s.split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect()
            }),
        })
    }

    /// Load and validate JWT_SECRET
    ///
    /// In production it must be set and at least MIN_JWT_SECRET_LENGTH
    /// characters. In development a default is used with a warning.
    fn load_jwt_secret(is_production: bool) -> Result<String> {
        match env::var("JWT_SECRET") {
            Ok(secret) if !secret.is_empty() => {
                if is_production && secret.len() < MIN_JWT_SECRET_LENGTH {
                    bail!(
                        "JWT_SECRET must be at least {} characters in production (got {})",
                        MIN_JWT_SECRET_LENGTH,
                        secret.len()
                    );
                }
                Ok(secret)
            }
            _ if is_production => {
                bail!(
                    "JWT_SECRET environment variable is required in production. \
                     Please set a secure secret of at least {} characters.",
                    MIN_JWT_SECRET_LENGTH
                );
            }
            _ => {
                tracing::warn!(
                    "JWT_SECRET not set, using insecure default. \
                     This is only acceptable in development mode."
                );
                Ok("development-secret-change-in-production".to_string())
            }
        }
    }

    /// Validate that DATABASE_URL is explicitly set in production
    fn validate_database_url() -> Result<()> {
        match env::var("DATABASE_URL") {
            Ok(url) if !url.is_empty() => Ok(()),
            _ => {
                bail!(
                    "DATABASE_URL environment variable is required in production. \
                     Please set your PostgreSQL connection string."
                );
            }
        }
    }

    /// Parse a non-zero duration string such as "30s" or "2m"
    fn load_duration(name: &str, default: &str) -> Result<Duration> {
        let (_, secs) = Self::load_seconds(name, default)?;
        Ok(Duration::from_secs(secs))
    }

    /// Read a positive duration string, returning it with its length in seconds
    fn load_seconds(name: &str, default: &str) -> Result<(String, u64)> {
        let raw = env::var(name).unwrap_or_else(|_| default.to_string());
        match parse_duration_string(&raw) {
            Some(secs) if secs > 0 => Ok((raw, secs as u64)),
            _ => bail!("Invalid {} value '{}': expected a duration like 30s or 5m", name, raw),
        }
    }

    /// Get database configuration, if durable storage is configured
    pub fn database(&self) -> Option<&DatabaseConfig> {
        self.common.database.as_ref()
    }

    /// Get environment mode
    pub fn environment(&self) -> Environment {
        self.common.environment
    }

    /// Check if running in production
    pub fn is_production(&self) -> bool {
        self.common.environment.is_production()
    }

    /// Session manager settings
    pub fn auth_config(&self) -> AuthConfig {
        AuthConfig::with_expiry_strings(
            self.jwt_secret.clone(),
            &self.jwt_access_expiry,
            &self.jwt_refresh_expiry,
        )
        .with_rotation(self.refresh_token_rotation)
    }

    /// Realtime liveness settings
    pub fn ws_config(&self) -> WsConfig {
        WsConfig {
            ping_interval: self.ws_ping_interval,
            max_missed_pongs: self.ws_max_missed_pongs,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    // Mutex to ensure tests that modify environment variables don't run in parallel
    static ENV_MUTEX: Mutex<()> = Mutex::new(());

    /// Helper to temporarily set environment variables for a test
    struct EnvGuard {
        vars: Vec<(String, Option<String>)>,
    }

    impl EnvGuard {
        fn new(vars: &[(&str, &str)]) -> Self {
            let saved: Vec<_> = vars
                .iter()
                .map(|(k, v)| {
                    let old = env::var(*k).ok();
                    env::set_var(*k, *v);
                    (k.to_string(), old)
                })
                .collect();
            Self { vars: saved }
        }

        fn remove_vars(vars: &[&str]) -> Self {
            let saved: Vec<_> = vars
                .iter()
                .map(|k| {
                    let old = env::var(*k).ok();
                    env::remove_var(*k);
                    (k.to_string(), old)
                })
                .collect();
            Self { vars: saved }
        }
    }

    impl Drop for EnvGuard {
        fn drop(&mut self) {
            for (k, v) in &self.vars {
                match v {
                    Some(val) => env::set_var(k, val),
                    None => env::remove_var(k),
                }
            }
        }
    }

    const TUNABLES: &[&str] = &[
        "ENVIRONMENT",
        "PORT",
        "DATABASE_URL",
        "JWT_SECRET",
        "JWT_ACCESS_EXPIRY",
        "JWT_REFRESH_EXPIRY",
        "REFRESH_TOKEN_ROTATION",
        "WS_PING_INTERVAL",
        "WS_MAX_MISSED_PONGS",
        "WS_SEND_QUEUE_CAPACITY",
        "STREAM_CHUNK_BYTES",
        "AUTH_REQUEST_TIMEOUT",
        "CORS_ORIGINS",
    ];

    #[test]
    fn test_jwt_secret_required_in_production() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let _guard = EnvGuard::remove_vars(&["JWT_SECRET"]);

        let result = Config::load_jwt_secret(true);
        assert!(result.is_err());
        let err = result.unwrap_err().to_string();
        assert!(err.contains("JWT_SECRET"));
        assert!(err.contains("required in production"));
    }

    #[test]
    fn test_jwt_secret_minimum_length_in_production() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let _guard = EnvGuard::new(&[("JWT_SECRET", "short")]);

        let result = Config::load_jwt_secret(true);
        assert!(result.is_err());
        let err = result.unwrap_err().to_string();
        assert!(err.contains("at least 32 characters"));
    }

    #[test]
    fn test_jwt_secret_valid_in_production() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let secret = "a".repeat(MIN_JWT_SECRET_LENGTH);
        let _guard = EnvGuard::new(&[("JWT_SECRET", &secret)]);

        let result = Config::load_jwt_secret(true);
        assert_eq!(result.unwrap(), secret);
    }

    #[test]
    fn test_jwt_secret_uses_default_in_development() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let _guard = EnvGuard::remove_vars(&["JWT_SECRET"]);

        let result = Config::load_jwt_secret(false);
        assert_eq!(result.unwrap(), "development-secret-change-in-production");
    }

    #[test]
    fn test_database_url_required_in_production() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let _guard = EnvGuard::remove_vars(&["DATABASE_URL"]);

        let err = Config::validate_database_url().unwrap_err().to_string();
        assert!(err.contains("DATABASE_URL"));
        assert!(err.contains("required in production"));
    }

    #[test]
    fn test_empty_database_url_fails() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let _guard = EnvGuard::new(&[("DATABASE_URL", "")]);

        assert!(Config::validate_database_url().is_err());
    }

    #[test]
    fn test_defaults_in_development() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let _guard = EnvGuard::remove_vars(TUNABLES);

        let config = Config::from_env().unwrap();
        assert_eq!(config.port, 8080);
        assert!(config.database().is_none());
        assert!(config.refresh_token_rotation);
        assert_eq!(config.ws_ping_interval, Duration::from_secs(30));
        assert_eq!(config.ws_max_missed_pongs, 2);
        assert_eq!(config.ws_send_queue_capacity, 64);
        assert_eq!(config.stream_chunk_bytes, 1024 * 1024);
        assert_eq!(config.auth_request_timeout, Duration::from_secs(10));
        assert!(config.cors_allowed_origins.is_none());

        let auth = config.auth_config();
        assert_eq!(auth.access_token_ttl_secs, 900);
        assert_eq!(auth.refresh_token_ttl_secs, 30 * 24 * 3600);
    }

    #[test]
    fn test_overrides() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let _clear = EnvGuard::remove_vars(TUNABLES);
        let _guard = EnvGuard::new(&[
            ("PORT", "9000"),
            ("REFRESH_TOKEN_ROTATION", "false"),
            ("WS_PING_INTERVAL", "5s"),
            ("WS_MAX_MISSED_PONGS", "4"),
            ("STREAM_CHUNK_BYTES", "65536"),
            ("JWT_ACCESS_EXPIRY", "5m"),
            ("CORS_ORIGINS", "https://a.example, ,https://b.example"),
        ]);

        let config = Config::from_env().unwrap();
        assert_eq!(config.port, 9000);
        assert!(!config.auth_config().rotate_refresh_tokens);
        assert_eq!(config.auth_config().access_token_ttl_secs, 300);
        assert_eq!(config.ws_config().max_idle(), Duration::from_secs(20));
        assert_eq!(config.stream_chunk_bytes, 65536);
        assert_eq!(
            config.cors_allowed_origins.unwrap(),
            vec!["https://a.example", "https://b.example"]
        );
    }

    #[test]
    fn test_invalid_duration_rejected() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let _clear = EnvGuard::remove_vars(TUNABLES);
        let _guard = EnvGuard::new(&[("WS_PING_INTERVAL", "soon")]);

        let err = Config::from_env().unwrap_err().to_string();
        assert!(err.contains("WS_PING_INTERVAL"));
    }

    #[test]
    fn test_multibyte_duration_rejected() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let _clear = EnvGuard::remove_vars(TUNABLES);
        let _guard = EnvGuard::new(&[("WS_PING_INTERVAL", "30µ")]);

        let err = Config::from_env().unwrap_err().to_string();
        assert!(err.contains("WS_PING_INTERVAL"));
    }

    #[test]
    fn test_invalid_jwt_expiry_rejected() {
        let _lock = ENV_MUTEX.lock().unwrap();

        for name in ["JWT_ACCESS_EXPIRY", "JWT_REFRESH_EXPIRY"] {
            for value in ["-5m", "0m", "15", "soon"] {
                let _clear = EnvGuard::remove_vars(TUNABLES);
                let _guard = EnvGuard::new(&[(name, value)]);

                let err = Config::from_env().unwrap_err().to_string();
                assert!(err.contains(name), "{name}={value} gave: {err}");
            }
        }
    }

    #[test]
    fn test_production_requires_database() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let _clear = EnvGuard::remove_vars(TUNABLES);
        let secret = "s".repeat(MIN_JWT_SECRET_LENGTH);
        let _guard = EnvGuard::new(&[("ENVIRONMENT", "production"), ("JWT_SECRET", &secret)]);

        assert!(Config::from_env().is_err());
    }
}
