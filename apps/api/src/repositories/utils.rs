//! Shared helpers for the Postgres repositories

use crate::error::ApiError;

// ============================================================================
// SQL Column Constants
//
// SELECT column lists kept in one place so every query returns rows in the
// shape the `FromRow` structs expect.
// ============================================================================

/// SQL columns for listener queries
pub const LISTENER_COLUMNS: &str = r#"
    id, email, password_hash, display_name, role, created_at
"#;

/// SQL columns for session queries
pub const SESSION_COLUMNS: &str = r#"
    listener_id, refresh_hash, refresh_fingerprint,
    issued_at, expires_at, disabled, last_device
"#;

/// SQL columns for playback state queries
pub const PLAYBACK_COLUMNS: &str = r#"
    listener_id, track_id, position_ms, is_playing,
    queue, current_index, active_device_id,
    updated_at, updated_by
"#;

/// SQL columns for device queries
pub const DEVICE_COLUMNS: &str = r#"
    listener_id, device_id, display_name, app, platform,
    capabilities, last_seen_at
"#;

/// Map a unique-constraint violation to `Conflict`, anything else to `Database`
pub fn map_unique_violation(
    err: sqlx::Error,
    resource_type: &'static str,
    id: impl Into<String>,
) -> ApiError {
    match err {
        sqlx::Error::Database(db_err) if db_err.is_unique_violation() => {
            ApiError::conflict(resource_type, id)
        }
        other => ApiError::Database(other),
    }
}
