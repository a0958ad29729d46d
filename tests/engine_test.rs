use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use serde_json::json;
use tokio::net::TcpListener;

use asset_sync_engine::engine::index::Tier;
use asset_sync_engine::{AssetEngine, ConsentGate, EngineConfig, Platform, SyncOutcome};

const MODEL: &[u8] = b"fake onnx weights";

#[derive(Clone)]
struct Upstream {
    addr: SocketAddr,
    image_hits: Arc<AtomicUsize>,
}

async fn manifest(State(up): State<Upstream>) -> impl IntoResponse {
    Json(json!({
        "bundles": [{
            "id": "model",
            "kind": "model",
            "url": format!("http://{}/files/model.onnx", up.addr),
            "version": "2024.1",
            "sizeBytes": MODEL.len(),
        }]
    }))
}

async fn model_file() -> impl IntoResponse {
    MODEL.to_vec()
}

async fn image(State(up): State<Upstream>, Path(id): Path<String>) -> impl IntoResponse {
    up.image_hits.fetch_add(1, Ordering::SeqCst);
    if id == "remote.png" {
        (StatusCode::OK, b"remote png".to_vec()).into_response()
    } else {
        StatusCode::NOT_FOUND.into_response()
    }
}

async fn start_upstream() -> Upstream {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let up = Upstream {
        addr: listener.local_addr().unwrap(),
        image_hits: Arc::new(AtomicUsize::new(0)),
    };
    let app = Router::new()
        .route("/manifest.json", get(manifest))
        .route("/files/model.onnx", get(model_file))
        .route("/img/{id}", get(image))
        .with_state(up.clone());
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    up
}

fn consent() -> Arc<dyn ConsentGate> {
    Arc::new(|_id: &str, _size: u64| true)
}

#[tokio::test]
async fn test_engine_end_to_end() {
    let up = start_upstream().await;
    let cache = tempfile::tempdir().unwrap();
    let assets = tempfile::tempdir().unwrap();
    std::fs::create_dir_all(assets.path().join("assets/img")).unwrap();
    std::fs::write(assets.path().join("assets/img/bundled.png"), b"bundled png").unwrap();

    let config = EngineConfig {
        cache_dir: cache.path().to_string_lossy().into_owned(),
        manifest_url: format!("http://{}/manifest.json", up.addr),
        remote_base_url: format!("http://{}/img", up.addr),
        asset_root: assets.path().to_string_lossy().into_owned(),
        ..EngineConfig::default()
    }
    .with_platform(&Platform::Android);
    let engine = AssetEngine::new(config, consent()).unwrap();

    let outcome = engine.synchronize().await.unwrap();
    assert!(matches!(outcome, SyncOutcome::Synced(_)));
    let model = engine.installed_bundle_path("model").unwrap();
    assert_eq!(std::fs::read(&model).unwrap(), MODEL);
    assert_eq!(engine.synchronize().await.unwrap(), SyncOutcome::UpToDate);

    // Bundled through the Android asset scheme, no network involved.
    let bundled = engine.resolve("bundled.png").await.unwrap();
    assert_eq!(bundled.tier, Tier::Bundled);
    assert_eq!(up.image_hits.load(Ordering::SeqCst), 0);

    let remote = engine.resolve("remote.png").await.unwrap();
    assert_eq!(remote.tier, Tier::Remote);
    assert_eq!(std::fs::read(&remote.path).unwrap(), b"remote png");
    assert_eq!(up.image_hits.load(Ordering::SeqCst), 1);

    assert!(engine.resolve("nowhere.png").await.is_err());
    assert_eq!(up.image_hits.load(Ordering::SeqCst), 2);

    assert_eq!(
        engine.cached_resources().unwrap(),
        vec!["bundled.png".to_string(), "remote.png".to_string()]
    );
    let stats = engine.stats();
    assert_eq!(stats.cache_copies, 2);
    assert_eq!(stats.unresolved, 1);
    assert_eq!(stats.downloaded_bytes, MODEL.len() as u64);
}

#[tokio::test]
async fn test_engine_offline_start_uses_cache() {
    let cache = tempfile::tempdir().unwrap();
    let resources = cache.path().join("resources");
    std::fs::create_dir_all(&resources).unwrap();
    std::fs::write(resources.join("q9.png"), b"cached earlier").unwrap();
    // Leftover from a killed download.
    std::fs::write(resources.join(".partial-xyz"), b"trunc").unwrap();

    let config = EngineConfig {
        cache_dir: cache.path().to_string_lossy().into_owned(),
        manifest_url: "http://127.0.0.1:9/manifest.json".to_string(),
        remote_base_url: "http://127.0.0.1:9/img".to_string(),
        remote_probe_timeout_ms: 500,
        ..EngineConfig::default()
    };
    let engine = AssetEngine::new(config, consent()).unwrap();
    assert!(!resources.join(".partial-xyz").exists());

    assert_eq!(engine.synchronize().await.unwrap(), SyncOutcome::Offline);
    let resolved = engine.resolve("img/q9.png").await.unwrap();
    assert_eq!(resolved.tier, Tier::Cache);
    assert_eq!(std::fs::read(&resolved.path).unwrap(), b"cached earlier");
}
