//! Session (refresh chain) storage
//!
//! A listener has at most one session row. Login and register upsert it, which
//! replaces the stored fingerprint and so retires any earlier refresh secret.
//! Refresh rotation swaps the fingerprint in place, guarded by the previous
//! fingerprint so two concurrent refreshes cannot both rotate.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{types::Json, FromRow, PgPool};
use uuid::Uuid;

use super::utils::SESSION_COLUMNS;
use crate::error::ApiResult;
use crate::models::{DeviceDescriptor, NewSession, Session};

/// Session persistence
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Create or replace the listener's session, re-enabling it
    async fn upsert(&self, session: &NewSession) -> ApiResult<Session>;

    /// Look up a session by the SHA-256 fingerprint of its refresh secret
    async fn find_by_fingerprint(&self, fingerprint: &str) -> ApiResult<Option<Session>>;

    /// Replace the refresh secret if the stored fingerprint still equals
    /// `previous_fingerprint`
    ///
    /// Returns `false` when another refresh got there first.
    async fn rotate(
        &self,
        listener_id: Uuid,
        previous_fingerprint: &str,
        refresh_hash: &str,
        refresh_fingerprint: &str,
        expires_at: DateTime<Utc>,
    ) -> ApiResult<bool>;

    /// Mark the listener's session disabled. Returns whether a row existed.
    async fn disable(&self, listener_id: Uuid) -> ApiResult<bool>;
}

/// Row shape for the sessions table (`last_device` is JSONB)
#[derive(Debug, FromRow)]
struct SessionRow {
    listener_id: Uuid,
    refresh_hash: String,
    refresh_fingerprint: String,
    issued_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
    disabled: bool,
    last_device: Option<Json<DeviceDescriptor>>,
}

impl From<SessionRow> for Session {
    fn from(row: SessionRow) -> Self {
        Self {
            listener_id: row.listener_id,
            refresh_hash: row.refresh_hash,
            refresh_fingerprint: row.refresh_fingerprint,
            issued_at: row.issued_at,
            expires_at: row.expires_at,
            disabled: row.disabled,
            last_device: row.last_device.map(|Json(device)| device),
        }
    }
}

/// Postgres-backed session store
#[derive(Clone)]
pub struct PgSessionStore {
    pool: PgPool,
}

impl PgSessionStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SessionStore for PgSessionStore {
    async fn upsert(&self, session: &NewSession) -> ApiResult<Session> {
        let query = format!(
            r#"
            INSERT INTO sessions (
                listener_id, refresh_hash, refresh_fingerprint,
                issued_at, expires_at, disabled, last_device
            )
            VALUES ($1, $2, $3, NOW(), $4, false, $5)
            ON CONFLICT (listener_id) DO UPDATE SET
                refresh_hash = EXCLUDED.refresh_hash,
                refresh_fingerprint = EXCLUDED.refresh_fingerprint,
                issued_at = EXCLUDED.issued_at,
                expires_at = EXCLUDED.expires_at,
                disabled = false,
                last_device = COALESCE(EXCLUDED.last_device, sessions.last_device)
            RETURNING {SESSION_COLUMNS}
            "#
        );

        let row = sqlx::query_as::<_, SessionRow>(&query)
            .bind(session.listener_id)
            .bind(&session.refresh_hash)
            .bind(&session.refresh_fingerprint)
            .bind(session.expires_at)
            .bind(session.last_device.clone().map(Json))
            .fetch_one(&self.pool)
            .await?;

        Ok(row.into())
    }

    async fn find_by_fingerprint(&self, fingerprint: &str) -> ApiResult<Option<Session>> {
        let query =
            format!("SELECT {SESSION_COLUMNS} FROM sessions WHERE refresh_fingerprint = $1");

        let row = sqlx::query_as::<_, SessionRow>(&query)
            .bind(fingerprint)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(Session::from))
    }

    async fn rotate(
        &self,
        listener_id: Uuid,
        previous_fingerprint: &str,
        refresh_hash: &str,
        refresh_fingerprint: &str,
        expires_at: DateTime<Utc>,
    ) -> ApiResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE sessions
            SET refresh_hash = $1,
                refresh_fingerprint = $2,
                expires_at = $3
            WHERE listener_id = $4
              AND refresh_fingerprint = $5
              AND disabled = false
            "#,
        )
        .bind(refresh_hash)
        .bind(refresh_fingerprint)
        .bind(expires_at)
        .bind(listener_id)
        .bind(previous_fingerprint)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn disable(&self, listener_id: Uuid) -> ApiResult<bool> {
        let result = sqlx::query("UPDATE sessions SET disabled = true WHERE listener_id = $1")
            .bind(listener_id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }
}
