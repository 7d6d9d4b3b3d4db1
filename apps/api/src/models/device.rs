//! Device records for the device picker
//!
//! Devices are upserted on every heartbeat and realtime `hello`. They are
//! presentation data only and never consulted for authorization.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use thiserror::Error;
use uuid::Uuid;

/// Maximum length for device_id (matches database constraint)
pub const MAX_DEVICE_ID_LEN: usize = 128;
/// Maximum length for display names
pub const MAX_DISPLAY_NAME_LEN: usize = 255;
/// Maximum length for app and platform tags
pub const MAX_TAG_LEN: usize = 64;
/// Maximum number of capability strings per device
pub const MAX_CAPABILITIES: usize = 32;

/// Errors that can occur during device validation
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DeviceValidationError {
    #[error("deviceId cannot be empty")]
    EmptyDeviceId,
    #[error("deviceId exceeds maximum length of {MAX_DEVICE_ID_LEN} (got {0})")]
    DeviceIdTooLong(usize),
    #[error("deviceId contains invalid characters")]
    InvalidDeviceIdChars,
    #[error("displayName exceeds maximum length of {MAX_DISPLAY_NAME_LEN} (got {0})")]
    DisplayNameTooLong(usize),
    #[error("{0} exceeds maximum length of {MAX_TAG_LEN}")]
    TagTooLong(&'static str),
    #[error("too many capabilities (max {MAX_CAPABILITIES}, got {0})")]
    TooManyCapabilities(usize),
}

/// Check a client-supplied device id: 1-128 chars of `[A-Za-z0-9_-]`
pub fn validate_device_id(device_id: &str) -> Result<(), DeviceValidationError> {
    if device_id.is_empty() {
        return Err(DeviceValidationError::EmptyDeviceId);
    }
    if device_id.len() > MAX_DEVICE_ID_LEN {
        return Err(DeviceValidationError::DeviceIdTooLong(device_id.len()));
    }
    if !device_id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Err(DeviceValidationError::InvalidDeviceIdChars);
    }
    Ok(())
}

/// Device record from the devices table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Device {
    pub listener_id: Uuid,
    pub device_id: String,
    pub display_name: String,
    pub app: Option<String>,
    pub platform: Option<String>,
    pub capabilities: Vec<String>,
    pub last_seen_at: DateTime<Utc>,
}

/// Heartbeat payload, also built from a realtime `hello`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceHeartbeat {
    pub device_id: String,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub app: Option<String>,
    #[serde(default)]
    pub platform: Option<String>,
    #[serde(default)]
    pub capabilities: Option<Vec<String>>,
}

impl DeviceHeartbeat {
    pub fn new(device_id: impl Into<String>) -> Self {
        Self {
            device_id: device_id.into(),
            ..Default::default()
        }
    }

    pub fn with_app(mut self, app: Option<String>) -> Self {
        self.app = app;
        self
    }

    /// Name to store when the client sent none
    pub fn display_name_or_default(&self) -> String {
        self.display_name
            .clone()
            .filter(|name| !name.trim().is_empty())
            .unwrap_or_else(|| match self.platform.as_deref() {
                Some("ios") | Some("android") => "Phone".to_string(),
                Some("macos") | Some("windows") | Some("linux") => "Desktop".to_string(),
                Some("web") => "Web Player".to_string(),
                _ => "Unknown Device".to_string(),
            })
    }

    /// Validate the heartbeat before it reaches a store
    pub fn validate(&self) -> Result<(), DeviceValidationError> {
        validate_device_id(&self.device_id)?;

        if let Some(name) = &self.display_name {
            if name.len() > MAX_DISPLAY_NAME_LEN {
                return Err(DeviceValidationError::DisplayNameTooLong(name.len()));
            }
        }
        if self.app.as_ref().is_some_and(|a| a.len() > MAX_TAG_LEN) {
            return Err(DeviceValidationError::TagTooLong("app"));
        }
        if self.platform.as_ref().is_some_and(|p| p.len() > MAX_TAG_LEN) {
            return Err(DeviceValidationError::TagTooLong("platform"));
        }
        if let Some(capabilities) = &self.capabilities {
            if capabilities.len() > MAX_CAPABILITIES {
                return Err(DeviceValidationError::TooManyCapabilities(
                    capabilities.len(),
                ));
            }
        }

        Ok(())
    }
}

/// Device record as shown in the picker, with live connection status
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceView {
    #[serde(flatten)]
    pub device: Device,
    pub online: bool,
    pub active: bool,
}
