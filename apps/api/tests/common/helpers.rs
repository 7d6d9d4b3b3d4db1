//! Test harness around the real application router

#![allow(dead_code)]

use axum::{
    body::Body,
    http::{header, Method, Request, StatusCode},
    response::Response,
    Router,
};
use serde_json::Value;
use std::path::Path;
use tempfile::TempDir;
use tokio::sync::mpsc;
use tower::ServiceExt;
use uuid::Uuid;

use tandem_api::models::TrackFile;
use tandem_api::repositories::{MemoryTrackStore, Stores};
use tandem_api::websocket::{ConnectionId, ServerMessage};
use tandem_api::{app_router, AppSettings, AppState};

use super::fixtures::{register_body, TEST_JWT_SECRET};

/// A registered listener and its tokens
#[derive(Debug, Clone)]
pub struct TestListener {
    pub id: Uuid,
    pub access_token: String,
    pub refresh_secret: String,
}

/// Application wired to in-memory stores and a temporary storage root
pub struct TestApp {
    pub state: AppState,
    pub router: Router,
    pub tracks: MemoryTrackStore,
    pub storage: TempDir,
}

impl TestApp {
    pub fn new() -> Self {
        Self::with_settings(|_| {})
    }

    /// Build an app after adjusting the default settings
    pub fn with_settings(adjust: impl FnOnce(&mut AppSettings)) -> Self {
        let storage = TempDir::new().unwrap();
        let tracks = MemoryTrackStore::new();

        let mut settings = AppSettings::new(TEST_JWT_SECRET, storage.path());
        adjust(&mut settings);

        let state = AppState::new(Stores::in_memory(tracks.clone()), None, settings);
        let router = app_router(state.clone());

        Self {
            state,
            router,
            tracks,
            storage,
        }
    }

    pub async fn send(&self, request: Request<Body>) -> Response {
        self.router.clone().oneshot(request).await.unwrap()
    }

    /// Send a request with an optional JSON body and bearer token
    pub async fn call(
        &self,
        method: Method,
        uri: &str,
        body: Option<Value>,
        token: Option<&str>,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
        }
        let body = match body {
            Some(json) => {
                builder = builder.header(header::CONTENT_TYPE, "application/json");
                Body::from(json.to_string())
            }
            None => Body::empty(),
        };

        let response = self.send(builder.body(body).unwrap()).await;
        let status = response.status();
        (status, body_json(response).await)
    }

    pub async fn post(&self, uri: &str, body: Value, token: Option<&str>) -> (StatusCode, Value) {
        self.call(Method::POST, uri, Some(body), token).await
    }

    pub async fn get(&self, uri: &str, token: Option<&str>) -> (StatusCode, Value) {
        self.call(Method::GET, uri, None, token).await
    }

    /// Register `email` and return its identity and tokens
    pub async fn register(&self, email: &str) -> TestListener {
        let (status, body) = self.post("/auth/register", register_body(email), None).await;
        assert_eq!(status, StatusCode::CREATED, "register failed: {body}");

        TestListener {
            id: body["identity"]["id"].as_str().unwrap().parse().unwrap(),
            access_token: body["accessToken"].as_str().unwrap().to_string(),
            refresh_secret: body["refreshSecret"].as_str().unwrap().to_string(),
        }
    }

    /// Write a file under the storage root and register it as a track
    pub fn add_track(&self, track_id: &str, relative_path: &str, contents: &[u8]) {
        let path = self.storage.path().join(relative_path);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(&path, contents).unwrap();
        self.tracks.insert(TrackFile::new(track_id, relative_path));
    }

    /// Register a track whose path is stored as-is
    pub fn add_track_path(&self, track_id: &str, file_path: impl AsRef<Path>) {
        self.tracks.insert(TrackFile::new(
            track_id,
            file_path.as_ref().to_string_lossy().to_string(),
        ));
    }

    /// Stand-in for a realtime socket that already completed `hello`
    pub fn connect_device(
        &self,
        listener_id: Uuid,
        device_id: &str,
    ) -> (ConnectionId, mpsc::Receiver<ServerMessage>) {
        let registry = &self.state.registry;
        let (tx, rx) = registry.channel();
        let id = registry.register(tx);
        assert!(registry.authenticate(id, listener_id, device_id.to_string(), None));
        (id, rx)
    }
}

/// Read a response body as JSON, `Null` when empty
pub async fn body_json(response: Response) -> Value {
    let bytes = body_bytes(response).await;
    if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    }
}

pub async fn body_bytes(response: Response) -> Vec<u8> {
    axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap()
        .to_vec()
}

/// Wait for a condition with timeout
pub async fn wait_for<F>(condition: F, timeout_ms: u64, poll_interval_ms: u64) -> bool
where
    F: Fn() -> bool,
{
    let start = std::time::Instant::now();
    let timeout = std::time::Duration::from_millis(timeout_ms);
    let interval = std::time::Duration::from_millis(poll_interval_ms);

    loop {
        if condition() {
            return true;
        }
        if start.elapsed() >= timeout {
            return false;
        }
        tokio::time::sleep(interval).await;
    }
}
