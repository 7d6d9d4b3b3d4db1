//! Listener account storage

use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use super::utils::{map_unique_violation, LISTENER_COLUMNS};
use crate::error::ApiResult;
use crate::models::{Listener, NewListener};

/// Listener account persistence
#[async_trait]
pub trait ListenerStore: Send + Sync {
    /// Insert a new listener; `Conflict` when the email is taken
    async fn create(&self, listener: &NewListener) -> ApiResult<Listener>;

    /// Find a listener by (already lower-cased) email
    async fn find_by_email(&self, email: &str) -> ApiResult<Option<Listener>>;

    async fn find_by_id(&self, id: Uuid) -> ApiResult<Option<Listener>>;
}

/// Postgres-backed listener store
#[derive(Clone)]
pub struct PgListenerStore {
    pool: PgPool,
}

impl PgListenerStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ListenerStore for PgListenerStore {
    async fn create(&self, listener: &NewListener) -> ApiResult<Listener> {
        let query = format!(
            r#"
            INSERT INTO listeners (email, password_hash, display_name, role)
            VALUES ($1, $2, $3, $4)
            RETURNING {LISTENER_COLUMNS}
            "#
        );

        sqlx::query_as::<_, Listener>(&query)
            .bind(&listener.email)
            .bind(&listener.password_hash)
            .bind(&listener.display_name)
            .bind(listener.role)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| map_unique_violation(e, "listener", &listener.email))
    }

    async fn find_by_email(&self, email: &str) -> ApiResult<Option<Listener>> {
        let query = format!("SELECT {LISTENER_COLUMNS} FROM listeners WHERE email = $1");

        Ok(sqlx::query_as::<_, Listener>(&query)
            .bind(email)
            .fetch_optional(&self.pool)
            .await?)
    }

    async fn find_by_id(&self, id: Uuid) -> ApiResult<Option<Listener>> {
        let query = format!("SELECT {LISTENER_COLUMNS} FROM listeners WHERE id = $1");

        Ok(sqlx::query_as::<_, Listener>(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?)
    }
}
