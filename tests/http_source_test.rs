use std::collections::HashMap;
use std::net::SocketAddr;

use axum::http::{header, HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use tokio::net::TcpListener;

use asset_sync_engine::source::http_source::HttpSource;
use asset_sync_engine::source::router::SourceRouter;
use asset_sync_engine::source::traits::AssetSource;

const TEST_SIZE: usize = 256 * 1024;

fn test_body() -> Vec<u8> {
    (0..TEST_SIZE).map(|i| (i % 256) as u8).collect()
}

async fn serve_file() -> impl IntoResponse {
    let body = test_body();
    (
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, "image/png".to_string()),
            (header::CONTENT_LENGTH, body.len().to_string()),
        ],
        body,
    )
}

async fn serve_private(headers: HeaderMap) -> impl IntoResponse {
    match headers.get(header::AUTHORIZATION).and_then(|v| v.to_str().ok()) {
        Some("Bearer good") => (StatusCode::OK, b"secret".to_vec()).into_response(),
        _ => StatusCode::FORBIDDEN.into_response(),
    }
}

async fn start_server() -> (SocketAddr, tokio::task::JoinHandle<()>) {
    let app = Router::new()
        .route("/file.png", get(serve_file))
        .route("/private", get(serve_private));
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let handle = tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (addr, handle)
}

#[tokio::test]
async fn test_http_source_open_reports_info() {
    let (addr, _handle) = start_server().await;
    let url = format!("http://{}/file.png", addr);
    let source = HttpSource::default();

    assert!(source.handles(&url));
    let reader = source.open(&url).await.unwrap();
    assert_eq!(reader.info().content_length, Some(TEST_SIZE as u64));
    assert_eq!(reader.info().content_type, "image/png");
}

#[tokio::test]
async fn test_http_source_fetch_whole_body() {
    let (addr, _handle) = start_server().await;
    let url = format!("http://{}/file.png", addr);
    let source = HttpSource::default();

    let data = source.fetch(&url).await.unwrap();
    assert_eq!(data.len(), TEST_SIZE);
    assert_eq!(data.as_ref(), test_body().as_slice());
}

#[tokio::test]
async fn test_http_source_error_status() {
    let (addr, _handle) = start_server().await;
    let source = HttpSource::default();

    let missing = source.fetch(&format!("http://{}/nope.png", addr)).await;
    assert!(missing.is_err());

    let rejected = source.fetch(&format!("http://{}/private", addr)).await;
    let err = rejected.unwrap_err().to_string();
    assert!(err.contains("auth_rejected"), "unexpected error: {}", err);
}

#[tokio::test]
async fn test_http_source_custom_headers() {
    let (addr, _handle) = start_server().await;
    let url = format!("http://{}/private", addr);
    let source = HttpSource::new(HashMap::new());
    assert!(source.fetch(&url).await.is_err());

    let mut headers = HashMap::new();
    headers.insert("Authorization".to_string(), "Bearer good".to_string());
    source.update_headers(headers);
    assert_eq!(source.fetch(&url).await.unwrap().as_ref(), b"secret");
}

#[tokio::test]
async fn test_router_dispatches_by_scheme() {
    let (addr, _handle) = start_server().await;
    let assets = tempfile::tempdir().unwrap();
    std::fs::create_dir_all(assets.path().join("assets/img")).unwrap();
    std::fs::write(assets.path().join("assets/img/q1.png"), b"bundled").unwrap();

    let router = SourceRouter::standard(assets.path().to_str().unwrap());

    let remote = router
        .fetch(&format!("http://{}/file.png", addr))
        .await
        .unwrap();
    assert_eq!(remote.len(), TEST_SIZE);

    let bundled = router.fetch("asset:/assets/img/q1.png").await.unwrap();
    assert_eq!(bundled.as_ref(), b"bundled");
    let bundled = router
        .fetch("file:///android_asset/assets/img/q1.png")
        .await
        .unwrap();
    assert_eq!(bundled.as_ref(), b"bundled");

    assert!(router.fetch("asset:/assets/img/missing.png").await.is_err());
    assert!(!router.handles("content://media/1"));
}
