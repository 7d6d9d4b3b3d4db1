//! Realtime message types
//!
//! Every frame is a JSON envelope `{"type": "<snake_case>", "payload": {...}}`
//! with camelCase payload fields. A missing `payload` is read as `{}` so that
//! bare `{"type":"ping"}` frames are accepted.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{PlaybackPatch, PlaybackState};

// =============================================================================
// Client -> Server Messages
// =============================================================================

/// Messages sent from client to server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Bind this connection to a listener and device
    Hello(HelloPayload),

    /// Partial playback update from the sending device
    NowPlaying(NowPlayingPayload),

    /// Make a device the active one
    Activate(ActivatePayload),

    /// Remote command for another device
    Control(ControlRequest),

    /// Ask for the canonical playback document
    GetState {},

    Ping {},

    Pong {},
}

impl ClientMessage {
    /// Parse a text frame, treating an absent or null payload as `{}`
    pub fn from_text(text: &str) -> Result<Self, serde_json::Error> {
        let mut value: serde_json::Value = serde_json::from_str(text)?;

        if let Some(obj) = value.as_object_mut() {
            let missing = obj.get("payload").map_or(true, |p| p.is_null());
            if missing {
                obj.insert(
                    "payload".to_string(),
                    serde_json::Value::Object(Default::default()),
                );
            }
        }

        serde_json::from_value(value)
    }

    /// Message type name, for logging
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Hello(_) => "hello",
            Self::NowPlaying(_) => "now_playing",
            Self::Activate(_) => "activate",
            Self::Control(_) => "control",
            Self::GetState {} => "get_state",
            Self::Ping {} => "ping",
            Self::Pong {} => "pong",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HelloPayload {
    #[serde(default)]
    pub access_token: Option<String>,
    pub device_id: String,
    #[serde(default)]
    pub app: Option<String>,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub platform: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NowPlayingPayload {
    #[serde(default)]
    pub track_id: Option<String>,
    #[serde(default)]
    pub position_ms: Option<i64>,
    #[serde(default)]
    pub is_playing: Option<bool>,
    #[serde(default)]
    pub queue: Option<Vec<String>>,
    #[serde(default)]
    pub current_index: Option<i32>,
}

impl NowPlayingPayload {
    /// Turn into a patch authored by `device_id`
    pub fn into_patch(self, device_id: impl Into<String>) -> PlaybackPatch {
        PlaybackPatch {
            updated_by: device_id.into(),
            track_id: self.track_id,
            position_ms: self.position_ms,
            is_playing: self.is_playing,
            queue: self.queue,
            current_index: self.current_index,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivatePayload {
    pub device_id: String,
}

/// A control command as sent by the issuing device
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ControlRequest {
    /// Target device; the active device when absent
    #[serde(default)]
    pub to: Option<String>,
    pub cmd: String,
    #[serde(default)]
    pub args: Option<serde_json::Value>,
}

// =============================================================================
// Server -> Client Messages
// =============================================================================

/// Messages sent from server to client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Sent once when the socket opens
    Welcome(WelcomePayload),

    /// Reply to `hello`
    HelloAck(HelloAckPayload),

    /// Full playback document after a change
    PlayerState(PlaybackState),

    /// Command routed from another device
    Control(ControlCommand),

    Pong(PongPayload),

    Error(ErrorPayload),
}

impl ServerMessage {
    pub fn pong() -> Self {
        Self::Pong(PongPayload {
            server_time: chrono::Utc::now().timestamp_millis(),
        })
    }

    pub fn error(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Error(ErrorPayload::new(code, message))
    }
}

// =============================================================================
// Payload Types
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WelcomePayload {
    pub connection_id: Uuid,
    pub server_time: i64,
    pub heartbeat_interval_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HelloAckPayload {
    pub authenticated: bool,
    pub connection_id: Uuid,
}

/// A control command as delivered to the target device
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ControlCommand {
    pub cmd: String,
    #[serde(default)]
    pub args: Option<serde_json::Value>,
    /// Device id of the issuer
    pub from: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PongPayload {
    pub server_time: i64,
}

/// Payload for Error message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub code: String,
    pub message: String,
}

impl ErrorPayload {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }

    pub fn invalid_message(message: impl Into<String>) -> Self {
        Self::new("INVALID_MESSAGE", message)
    }

    pub fn no_active_device() -> Self {
        Self::new("NO_ACTIVE_DEVICE", "no active device")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_hello_deserialization() {
        let msg = ClientMessage::from_text(
            r#"{"type":"hello","payload":{"accessToken":"abc","deviceId":"phone-1","app":"ios"}}"#,
        )
        .unwrap();

        match msg {
            ClientMessage::Hello(hello) => {
                assert_eq!(hello.access_token.as_deref(), Some("abc"));
                assert_eq!(hello.device_id, "phone-1");
                assert_eq!(hello.app.as_deref(), Some("ios"));
                assert!(hello.display_name.is_none());
            }
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[test]
    fn test_payloadless_messages() {
        assert_eq!(
            ClientMessage::from_text(r#"{"type":"ping"}"#).unwrap(),
            ClientMessage::Ping {}
        );
        assert_eq!(
            ClientMessage::from_text(r#"{"type":"ping","payload":{}}"#).unwrap(),
            ClientMessage::Ping {}
        );
        assert_eq!(
            ClientMessage::from_text(r#"{"type":"get_state","payload":null}"#).unwrap(),
            ClientMessage::GetState {}
        );
    }

    #[test]
    fn test_malformed_messages_rejected() {
        assert!(ClientMessage::from_text("not json").is_err());
        assert!(ClientMessage::from_text(r#"{"type":"unknown"}"#).is_err());
        // hello requires a device id
        assert!(ClientMessage::from_text(r#"{"type":"hello"}"#).is_err());
    }

    #[test]
    fn test_now_playing_into_patch() {
        let msg = ClientMessage::from_text(
            r#"{"type":"now_playing","payload":{"trackId":"T1","positionMs":5000}}"#,
        )
        .unwrap();

        let ClientMessage::NowPlaying(payload) = msg else {
            panic!("expected now_playing");
        };
        let patch = payload.into_patch("phone-1");
        assert_eq!(patch.updated_by, "phone-1");
        assert_eq!(patch.track_id.as_deref(), Some("T1"));
        assert_eq!(patch.position_ms, Some(5000));
        assert!(patch.is_playing.is_none());
    }

    #[test]
    fn test_control_request_target_optional() {
        let msg = ClientMessage::from_text(
            r#"{"type":"control","payload":{"cmd":"pause"}}"#,
        )
        .unwrap();
        assert_eq!(
            msg,
            ClientMessage::Control(ControlRequest {
                to: None,
                cmd: "pause".into(),
                args: None,
            })
        );
    }

    #[test]
    fn test_server_message_envelopes() {
        let value = serde_json::to_value(ServerMessage::Pong(PongPayload { server_time: 42 }))
            .unwrap();
        assert_eq!(value, json!({"type": "pong", "payload": {"serverTime": 42}}));

        let id = Uuid::nil();
        let value = serde_json::to_value(ServerMessage::HelloAck(HelloAckPayload {
            authenticated: true,
            connection_id: id,
        }))
        .unwrap();
        assert_eq!(value["type"], "hello_ack");
        assert_eq!(value["payload"]["connectionId"], id.to_string());

        let value = serde_json::to_value(ServerMessage::Control(ControlCommand {
            cmd: "seek".into(),
            args: Some(json!({"positionMs": 1000})),
            from: "phone".into(),
        }))
        .unwrap();
        assert_eq!(value["payload"]["from"], "phone");
        assert_eq!(value["payload"]["args"]["positionMs"], 1000);
    }

    #[test]
    fn test_player_state_uses_camel_case() {
        let state = PlaybackState::default_for(Uuid::nil());
        let value = serde_json::to_value(ServerMessage::PlayerState(state)).unwrap();
        assert_eq!(value["type"], "player_state");
        assert_eq!(value["payload"]["isPlaying"], false);
        assert_eq!(value["payload"]["positionMs"], 0);
        assert!(value["payload"]["activeDeviceId"].is_null());
    }
}
