//! Integration tests for audio streaming with Range support

mod common;

use axum::{
    body::Body,
    http::{header, HeaderValue, Method, Request, StatusCode},
};
use common::*;
use rstest::rstest;

const FILE_LEN: usize = 1000;

struct StreamFixture {
    app: TestApp,
    token: String,
    contents: Vec<u8>,
}

async fn fixture() -> StreamFixture {
    let app = TestApp::new();
    let listener = app.register("stream@example.com").await;
    let contents = patterned_bytes(FILE_LEN);
    app.add_track("track-1", "albums/one/track.mp3", &contents);

    StreamFixture {
        app,
        token: listener.access_token,
        contents,
    }
}

fn stream_request(method: Method, track_id: &str, token: &str) -> axum::http::request::Builder {
    Request::builder()
        .method(method)
        .uri(format!("/tracks/{}/stream", track_id))
        .header(header::AUTHORIZATION, format!("Bearer {}", token))
}

fn header_str<'a>(response: &'a axum::response::Response, name: header::HeaderName) -> Option<&'a str> {
    response.headers().get(name).and_then(|v| v.to_str().ok())
}

#[tokio::test]
async fn test_full_file_without_range() {
    let f = fixture().await;

    let response = f
        .app
        .send(
            stream_request(Method::GET, "track-1", &f.token)
                .body(Body::empty())
                .unwrap(),
        )
        .await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(header_str(&response, header::CONTENT_TYPE), Some("audio/mpeg"));
    assert_eq!(header_str(&response, header::ACCEPT_RANGES), Some("bytes"));
    assert_eq!(header_str(&response, header::CONTENT_LENGTH), Some("1000"));
    assert!(response.headers().get(header::ETAG).is_some());
    assert!(response.headers().get(header::CONTENT_RANGE).is_none());

    let body = body_bytes(response).await;
    assert_eq!(body, f.contents);
}

#[rstest]
#[case::bounded("bytes=0-499", 0, 499)]
#[case::middle("bytes=100-199", 100, 199)]
#[case::end_clamped("bytes=900-1500", 900, 999)]
#[case::open_ended("bytes=990-", 990, 999)]
#[case::suffix("bytes=-100", 900, 999)]
#[tokio::test]
async fn test_range_requests(#[case] range: &str, #[case] start: usize, #[case] end: usize) {
    let f = fixture().await;

    let response = f
        .app
        .send(
            stream_request(Method::GET, "track-1", &f.token)
                .header(header::RANGE, range)
                .body(Body::empty())
                .unwrap(),
        )
        .await;

    assert_eq!(response.status(), StatusCode::PARTIAL_CONTENT);
    let expected_range = format!("bytes {}-{}/{}", start, end, FILE_LEN);
    assert_eq!(
        header_str(&response, header::CONTENT_RANGE),
        Some(expected_range.as_str())
    );
    let expected_len = (end - start + 1).to_string();
    assert_eq!(
        header_str(&response, header::CONTENT_LENGTH),
        Some(expected_len.as_str())
    );

    let body = body_bytes(response).await;
    assert_eq!(body, &f.contents[start..=end]);
}

#[rstest]
#[case::start_past_end("bytes=2000-")]
#[case::start_at_len("bytes=1000-1200")]
#[case::inverted("bytes=500-100")]
#[case::multi_range("bytes=0-10,20-30")]
#[tokio::test]
async fn test_unsatisfiable_range(#[case] range: &str) {
    let f = fixture().await;

    let response = f
        .app
        .send(
            stream_request(Method::GET, "track-1", &f.token)
                .header(header::RANGE, range)
                .body(Body::empty())
                .unwrap(),
        )
        .await;

    assert_eq!(response.status(), StatusCode::RANGE_NOT_SATISFIABLE);
    assert_eq!(
        header_str(&response, header::CONTENT_RANGE),
        Some("bytes */1000")
    );
}

#[tokio::test]
async fn test_non_ascii_range_is_unsatisfiable() {
    let f = fixture().await;

    let response = f
        .app
        .send(
            stream_request(Method::GET, "track-1", &f.token)
                .header(
                    header::RANGE,
                    HeaderValue::from_bytes(b"bytes=0-\xff9").unwrap(),
                )
                .body(Body::empty())
                .unwrap(),
        )
        .await;

    assert_eq!(response.status(), StatusCode::RANGE_NOT_SATISFIABLE);
    assert_eq!(
        header_str(&response, header::CONTENT_RANGE),
        Some("bytes */1000")
    );
    assert_eq!(f.app.tracks.play_count("track-1"), 0);
}

#[tokio::test]
async fn test_head_returns_headers_only() {
    let f = fixture().await;

    let response = f
        .app
        .send(
            stream_request(Method::HEAD, "track-1", &f.token)
                .body(Body::empty())
                .unwrap(),
        )
        .await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(header_str(&response, header::CONTENT_LENGTH), Some("1000"));
    assert_eq!(header_str(&response, header::ACCEPT_RANGES), Some("bytes"));
    assert!(body_bytes(response).await.is_empty());
    assert_eq!(f.app.tracks.play_count("track-1"), 0);
}

#[tokio::test]
async fn test_matching_etag_returns_not_modified() {
    let f = fixture().await;

    let first = f
        .app
        .send(
            stream_request(Method::GET, "track-1", &f.token)
                .body(Body::empty())
                .unwrap(),
        )
        .await;
    let etag = header_str(&first, header::ETAG).unwrap().to_string();

    let response = f
        .app
        .send(
            stream_request(Method::GET, "track-1", &f.token)
                .header(header::IF_NONE_MATCH, etag)
                .body(Body::empty())
                .unwrap(),
        )
        .await;

    assert_eq!(response.status(), StatusCode::NOT_MODIFIED);
    assert!(body_bytes(response).await.is_empty());
}

#[tokio::test]
async fn test_stream_records_play() {
    let f = fixture().await;

    let response = f
        .app
        .send(
            stream_request(Method::GET, "track-1", &f.token)
                .header(header::RANGE, "bytes=0-9")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
    assert_eq!(response.status(), StatusCode::PARTIAL_CONTENT);

    let tracks = f.app.tracks.clone();
    assert!(wait_for(|| tracks.play_count("track-1") == 1, 1000, 10).await);
    assert!(tracks.last_played_at("track-1").is_some());
}

#[tokio::test]
async fn test_unknown_track_not_found() {
    let f = fixture().await;

    let (status, body) = f
        .app
        .get("/tracks/does-not-exist/stream", Some(&f.token))
        .await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "NOT_FOUND");
}

#[tokio::test]
async fn test_missing_file_not_found() {
    let f = fixture().await;
    f.app.add_track_path("ghost", "albums/ghost.mp3");

    let (status, body) = f.app.get("/tracks/ghost/stream", Some(&f.token)).await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "AUDIO_NOT_FOUND");
}

#[tokio::test]
async fn test_path_outside_storage_root_forbidden() {
    let f = fixture().await;
    f.app.add_track_path("escape", "../../etc/passwd");

    let (status, body) = f.app.get("/tracks/escape/stream", Some(&f.token)).await;

    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["code"], "FORBIDDEN");
    assert_eq!(f.app.tracks.play_count("escape"), 0);
}

#[tokio::test]
async fn test_absolute_path_outside_root_forbidden() {
    let f = fixture().await;
    let outside = tempfile::NamedTempFile::new().unwrap();
    f.app.add_track_path("outside", outside.path());

    let (status, _) = f.app.get("/tracks/outside/stream", Some(&f.token)).await;

    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_scanned_track_streams_by_encoded_path() {
    let app = TestApp::new();
    let listener = app.register("scan@example.com").await;
    let contents = patterned_bytes(300);
    let dir = app.storage.path().join("albums/one");
    std::fs::create_dir_all(&dir).unwrap();
    std::fs::write(dir.join("track.mp3"), &contents).unwrap();
    std::fs::write(app.storage.path().join("cover.jpg"), b"jpg").unwrap();

    assert_eq!(app.tracks.scan_library(app.storage.path()), 1);

    let response = app
        .send(
            stream_request(Method::GET, "albums%2Fone%2Ftrack.mp3", &listener.access_token)
                .body(Body::empty())
                .unwrap(),
        )
        .await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_bytes(response).await, contents);
}

#[tokio::test]
async fn test_stream_requires_token() {
    let f = fixture().await;

    let (status, body) = f.app.get("/tracks/track-1/stream", None).await;

    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["code"], "UNAUTHORIZED");
}
