//! Per-connection realtime protocol
//!
//! A `SyncHandler` owns one connection's view of the protocol: it turns
//! inbound frames into store writes and routed messages, and queues replies
//! on the connection's own outbound queue. It never touches the socket, so
//! it runs the same under a live socket or a test channel.

use uuid::Uuid;

use super::connection::{ConnectionId, ConnectionInfo, ConnectionRegistry};
use super::messages::{
    ActivatePayload, ClientMessage, ControlRequest, ErrorPayload, HelloAckPayload, HelloPayload,
    NowPlayingPayload, ServerMessage,
};
use crate::error::ApiError;
use crate::models::{validate_device_id, DeviceHeartbeat};
use crate::services::{AuthService, Origin, PlaybackService};

/// Errors that can occur while handling a frame
///
/// Client mistakes are answered with an `error` message and are not errors
/// here; only failures the server should log are returned.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("service error: {0}")]
    Service(#[from] ApiError),
}

/// Handles inbound messages for a single connection
#[derive(Clone)]
pub struct SyncHandler {
    connection_id: ConnectionId,
    registry: ConnectionRegistry,
    auth: AuthService,
    playback: PlaybackService,
}

impl SyncHandler {
    pub fn new(
        connection_id: ConnectionId,
        registry: ConnectionRegistry,
        auth: AuthService,
        playback: PlaybackService,
    ) -> Self {
        Self {
            connection_id,
            registry,
            auth,
            playback,
        }
    }

    /// Parse and handle one text frame
    ///
    /// Malformed frames get an `INVALID_MESSAGE` error, but only on an
    /// authenticated connection.
    pub async fn handle_text(&self, text: &str) -> Result<(), SyncError> {
        match ClientMessage::from_text(text) {
            Ok(msg) => self.handle_message(msg).await,
            Err(e) => {
                tracing::debug!(
                    connection_id = %self.connection_id,
                    error = %e,
                    "Failed to parse client message"
                );
                if self.registry.is_authenticated(self.connection_id) {
                    self.reply(ServerMessage::Error(ErrorPayload::invalid_message(
                        e.to_string(),
                    )));
                }
                Ok(())
            }
        }
    }

    /// Handle an incoming client message
    pub async fn handle_message(&self, message: ClientMessage) -> Result<(), SyncError> {
        if let ClientMessage::Hello(hello) = message {
            return self.handle_hello(hello).await;
        }

        let Some(conn) = self.registry.info(self.connection_id) else {
            tracing::debug!(
                connection_id = %self.connection_id,
                kind = message.kind(),
                "Ignoring message before hello"
            );
            return Ok(());
        };

        let result = match message {
            ClientMessage::Hello(_) => Ok(()),
            ClientMessage::NowPlaying(payload) => self.handle_now_playing(&conn, payload).await,
            ClientMessage::Activate(payload) => self.handle_activate(&conn, payload).await,
            ClientMessage::Control(request) => self.handle_control(&conn, request).await,
            ClientMessage::GetState {} => self.handle_get_state(&conn).await,
            ClientMessage::Ping {} => {
                self.reply(ServerMessage::pong());
                Ok(())
            }
            ClientMessage::Pong {} => Ok(()),
        };

        match result {
            Ok(()) => Ok(()),
            Err(err) => {
                // Tell the sender; only server faults propagate for logging
                self.reply(ServerMessage::error(err.error_code(), err.public_message()));
                if err.status_code().is_server_error() {
                    Err(SyncError::Service(err))
                } else {
                    Ok(())
                }
            }
        }
    }

    async fn handle_hello(&self, hello: HelloPayload) -> Result<(), SyncError> {
        let authenticated = self.authenticate(&hello).await;

        self.reply(ServerMessage::HelloAck(HelloAckPayload {
            authenticated,
            connection_id: self.connection_id,
        }));
        Ok(())
    }

    /// Bind the connection if the hello carries a valid identity
    async fn authenticate(&self, hello: &HelloPayload) -> bool {
        if let Err(e) = validate_device_id(&hello.device_id) {
            tracing::debug!(connection_id = %self.connection_id, error = %e, "Rejected hello");
            return self.registry.is_authenticated(self.connection_id);
        }

        let listener_id: Uuid = match (&hello.access_token, self.registry.info(self.connection_id)) {
            (Some(token), _) => match self.auth.verify_access_token(token) {
                Ok(claims) => claims.sub,
                Err(_) => return self.registry.is_authenticated(self.connection_id),
            },
            // Re-binding an authenticated connection needs no new token
            (None, Some(existing)) => existing.listener_id,
            (None, None) => return false,
        };

        if !self.registry.authenticate(
            self.connection_id,
            listener_id,
            hello.device_id.clone(),
            hello.app.clone(),
        ) {
            return self.registry.is_authenticated(self.connection_id);
        }

        let heartbeat = DeviceHeartbeat {
            device_id: hello.device_id.clone(),
            display_name: hello.display_name.clone(),
            app: hello.app.clone(),
            platform: hello.platform.clone(),
            capabilities: None,
        };
        if let Err(e) = self.playback.heartbeat(listener_id, &heartbeat).await {
            tracing::warn!(listener_id = %listener_id, error = %e, "Failed to record device on hello");
        }

        true
    }

    async fn handle_now_playing(
        &self,
        conn: &ConnectionInfo,
        payload: NowPlayingPayload,
    ) -> Result<(), ApiError> {
        let patch = payload.into_patch(conn.device_id.clone());
        self.playback
            .update_state(conn.listener_id, patch, Origin::Connection(self.connection_id))
            .await?;
        Ok(())
    }

    async fn handle_activate(
        &self,
        conn: &ConnectionInfo,
        payload: ActivatePayload,
    ) -> Result<(), ApiError> {
        self.playback
            .activate(conn.listener_id, &payload.device_id)
            .await?;
        Ok(())
    }

    async fn handle_control(
        &self,
        conn: &ConnectionInfo,
        request: ControlRequest,
    ) -> Result<(), ApiError> {
        self.playback
            .send_control(
                conn.listener_id,
                &conn.device_id,
                request.to.as_deref(),
                &request.cmd,
                request.args,
            )
            .await?;
        Ok(())
    }

    async fn handle_get_state(&self, conn: &ConnectionInfo) -> Result<(), ApiError> {
        let state = self.playback.read_state(conn.listener_id).await?;
        self.reply(ServerMessage::PlayerState(state));
        Ok(())
    }

    fn reply(&self, msg: ServerMessage) {
        if let Err(e) = self.registry.send_to_connection(self.connection_id, msg) {
            tracing::debug!(
                connection_id = %self.connection_id,
                error = %e,
                "Failed to queue reply"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ListenerRole, PlaybackState};
    use crate::repositories::{
        MemoryDeviceStore, MemoryListenerStore, MemoryPlaybackStore, MemorySessionStore,
    };
    use crate::services::AuthConfig;
    use crate::websocket::BroadcastRouter;
    use std::sync::Arc;
    use tokio::sync::mpsc;
    use tracing_test::traced_test;

    struct Harness {
        registry: ConnectionRegistry,
        auth: AuthService,
        playback: PlaybackService,
    }

    impl Harness {
        fn new() -> Self {
            let registry = ConnectionRegistry::new(16);
            let auth = AuthService::new(
                Arc::new(MemoryListenerStore::new()),
                Arc::new(MemorySessionStore::new()),
                AuthConfig::new("sync-test-secret-with-enough-length".into()),
            );
            let playback = PlaybackService::new(
                Arc::new(MemoryPlaybackStore::new()),
                Arc::new(MemoryDeviceStore::new()),
                BroadcastRouter::new(registry.clone()),
            );
            Self {
                registry,
                auth,
                playback,
            }
        }

        fn connect(&self) -> (SyncHandler, mpsc::Receiver<ServerMessage>) {
            let (tx, rx) = self.registry.channel();
            let id = self.registry.register(tx);
            let handler = SyncHandler::new(
                id,
                self.registry.clone(),
                self.auth.clone(),
                self.playback.clone(),
            );
            (handler, rx)
        }

        async fn token(&self, email: &str) -> String {
            let (tokens, _) = self
                .auth
                .register(email, "password123", "Test", ListenerRole::User, None)
                .await
                .unwrap();
            tokens.access_token
        }
    }

    fn hello(token: Option<&str>, device: &str) -> String {
        serde_json::json!({
            "type": "hello",
            "payload": { "accessToken": token, "deviceId": device }
        })
        .to_string()
    }

    fn ack(msg: ServerMessage) -> HelloAckPayload {
        match msg {
            ServerMessage::HelloAck(ack) => ack,
            other => panic!("expected hello_ack, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_hello_with_valid_token() {
        let h = Harness::new();
        let token = h.token("a@example.com").await;
        let (handler, mut rx) = h.connect();

        handler.handle_text(&hello(Some(&token), "phone")).await.unwrap();

        let ack = ack(rx.try_recv().unwrap());
        assert!(ack.authenticated);
        assert_eq!(ack.connection_id, handler.connection_id);
        assert_eq!(
            h.registry.info(handler.connection_id).unwrap().device_id,
            "phone"
        );
    }

    #[tokio::test]
    async fn test_hello_without_token_stays_unauthenticated() {
        let h = Harness::new();
        let (handler, mut rx) = h.connect();

        handler.handle_text(&hello(None, "phone")).await.unwrap();
        assert!(!ack(rx.try_recv().unwrap()).authenticated);

        handler.handle_text(&hello(Some("garbage"), "phone")).await.unwrap();
        assert!(!ack(rx.try_recv().unwrap()).authenticated);

        assert!(!h.registry.is_authenticated(handler.connection_id));
    }

    #[tokio::test]
    async fn test_hello_rejects_bad_device_id() {
        let h = Harness::new();
        let token = h.token("a@example.com").await;
        let (handler, mut rx) = h.connect();

        handler.handle_text(&hello(Some(&token), "bad id!")).await.unwrap();
        assert!(!ack(rx.try_recv().unwrap()).authenticated);
    }

    #[tokio::test]
    #[traced_test]
    async fn test_messages_before_hello_are_ignored() {
        let h = Harness::new();
        let (handler, mut rx) = h.connect();

        handler.handle_text(r#"{"type":"ping"}"#).await.unwrap();
        handler.handle_text(r#"{"type":"get_state"}"#).await.unwrap();
        handler.handle_text("{not json").await.unwrap();

        assert!(rx.try_recv().is_err());
        assert!(logs_contain("Ignoring message before hello"));
    }

    #[tokio::test]
    async fn test_now_playing_reaches_other_device() {
        let h = Harness::new();
        let token = h.token("a@example.com").await;
        let (phone, mut phone_rx) = h.connect();
        let (desk, mut desk_rx) = h.connect();

        phone.handle_text(&hello(Some(&token), "phone")).await.unwrap();
        desk.handle_text(&hello(Some(&token), "desk")).await.unwrap();
        phone_rx.try_recv().unwrap();
        desk_rx.try_recv().unwrap();

        phone
            .handle_text(r#"{"type":"now_playing","payload":{"trackId":"T1","positionMs":5000}}"#)
            .await
            .unwrap();

        match desk_rx.try_recv().unwrap() {
            ServerMessage::PlayerState(state) => {
                assert_eq!(state.track_id.as_deref(), Some("T1"));
                assert_eq!(state.position_ms, 5000);
                assert_eq!(state.updated_by.as_deref(), Some("phone"));
            }
            other => panic!("unexpected message: {other:?}"),
        }
        assert!(phone_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_invalid_now_playing_gets_error() {
        let h = Harness::new();
        let token = h.token("a@example.com").await;
        let (phone, mut rx) = h.connect();
        phone.handle_text(&hello(Some(&token), "phone")).await.unwrap();
        rx.try_recv().unwrap();

        phone
            .handle_text(r#"{"type":"now_playing","payload":{"positionMs":-5}}"#)
            .await
            .unwrap();

        match rx.try_recv().unwrap() {
            ServerMessage::Error(e) => assert_eq!(e.code, "VALIDATION_ERROR"),
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_control_without_target_reports_no_active_device() {
        let h = Harness::new();
        let token = h.token("a@example.com").await;
        let (phone, mut rx) = h.connect();
        phone.handle_text(&hello(Some(&token), "phone")).await.unwrap();
        rx.try_recv().unwrap();

        phone
            .handle_text(r#"{"type":"control","payload":{"to":"speaker","cmd":"play"}}"#)
            .await
            .unwrap();

        match rx.try_recv().unwrap() {
            ServerMessage::Error(e) => assert_eq!(e.code, "NO_ACTIVE_DEVICE"),
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_get_state_and_ping_reply_to_sender() {
        let h = Harness::new();
        let token = h.token("a@example.com").await;
        let (phone, mut rx) = h.connect();
        phone.handle_text(&hello(Some(&token), "phone")).await.unwrap();
        rx.try_recv().unwrap();

        phone.handle_text(r#"{"type":"get_state"}"#).await.unwrap();
        match rx.try_recv().unwrap() {
            ServerMessage::PlayerState(state) => {
                assert_eq!(state, PlaybackState::default_for(state.listener_id))
            }
            other => panic!("unexpected message: {other:?}"),
        }

        phone.handle_text(r#"{"type":"ping","payload":{}}"#).await.unwrap();
        assert!(matches!(rx.try_recv().unwrap(), ServerMessage::Pong(_)));

        phone.handle_text(r#"{"type":"bogus"}"#).await.unwrap();
        assert!(matches!(rx.try_recv().unwrap(), ServerMessage::Error(_)));
    }

    #[tokio::test]
    async fn test_second_hello_cannot_switch_listener() {
        let h = Harness::new();
        let alice = h.token("alice@example.com").await;
        let bob = h.token("bob@example.com").await;
        let (conn, mut rx) = h.connect();

        conn.handle_text(&hello(Some(&alice), "phone")).await.unwrap();
        rx.try_recv().unwrap();
        let alice_id = h.registry.info(conn.connection_id).unwrap().listener_id;

        // Same listener, new device id, no token needed
        conn.handle_text(&hello(None, "phone-2")).await.unwrap();
        assert!(ack(rx.try_recv().unwrap()).authenticated);
        assert_eq!(h.registry.info(conn.connection_id).unwrap().device_id, "phone-2");

        // Another listener's token leaves the binding alone
        conn.handle_text(&hello(Some(&bob), "desk")).await.unwrap();
        rx.try_recv().unwrap();
        let info = h.registry.info(conn.connection_id).unwrap();
        assert_eq!(info.listener_id, alice_id);
        assert_eq!(info.device_id, "phone-2");
    }
}
