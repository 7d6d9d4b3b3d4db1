//! Session (refresh chain) records

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Device details captured at login, kept for the audit trail
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceDescriptor {
    #[serde(default)]
    pub device_id: Option<String>,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub app: Option<String>,
    #[serde(default)]
    pub platform: Option<String>,
    #[serde(default)]
    pub user_agent: Option<String>,
}

/// A listener's session record
///
/// There is at most one per listener. Logout flips `disabled`; rows are
/// never deleted.
#[derive(Debug, Clone, PartialEq)]
pub struct Session {
    pub listener_id: Uuid,
    /// Argon2id hash of the refresh secret
    pub refresh_hash: String,
    /// SHA-256 hex of the refresh secret, used for lookup
    pub refresh_fingerprint: String,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub disabled: bool,
    pub last_device: Option<DeviceDescriptor>,
}

impl Session {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

/// Data written by login/register (upsert) and by refresh rotation
#[derive(Debug, Clone)]
pub struct NewSession {
    pub listener_id: Uuid,
    pub refresh_hash: String,
    pub refresh_fingerprint: String,
    pub expires_at: DateTime<Utc>,
    pub last_device: Option<DeviceDescriptor>,
}
