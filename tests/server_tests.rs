//! HTTP 路由测试（不经过 TCP）

use std::sync::Arc;

use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use spectator::{server, Agent, AgentStatus, AppState, Context, ServerConfig};
use tempfile::TempDir;
use tower::ServiceExt;

fn test_state() -> (AppState, TempDir) {
    let static_dir = TempDir::new().unwrap();
    std::fs::write(
        static_dir.path().join("test_agent.html"),
        "<html><body>spectator</body></html>",
    )
    .unwrap();

    let config = ServerConfig {
        static_dir: static_dir.path().to_path_buf(),
        ..Default::default()
    };
    let agent = Agent::start(&Context::new(), config.agent.clone()).unwrap();
    (AppState::new(Arc::new(agent), config), static_dir)
}

async fn get(state: &AppState, uri: &str) -> (StatusCode, Vec<u8>) {
    let response = server::router(state.clone())
        .oneshot(Request::get(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, body.to_vec())
}

#[tokio::test]
async fn test_static_asset_served() {
    let (state, _dir) = test_state();

    let (status, body) = get(&state, "/assets/test_agent.html").await;
    assert_eq!(status, StatusCode::OK);
    assert!(String::from_utf8(body).unwrap().contains("spectator"));

    state.agent.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_missing_asset_not_found() {
    let (state, _dir) = test_state();

    let (status, _) = get(&state, "/assets/missing.js").await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    state.agent.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_status_endpoint() {
    let (state, _dir) = test_state();

    let (status, body) = get(&state, "/status").await;
    assert_eq!(status, StatusCode::OK);
    let snapshot: AgentStatus = serde_json::from_slice(&body).unwrap();
    assert!(snapshot.running);
    assert_eq!(snapshot.agent_version, spectator::VERSION_FULL);

    state.agent.shutdown().await.unwrap();
    let (_, body) = get(&state, "/status").await;
    let snapshot: AgentStatus = serde_json::from_slice(&body).unwrap();
    assert!(!snapshot.running);
}

#[tokio::test]
async fn test_unknown_route() {
    let (state, _dir) = test_state();

    let (status, _) = get(&state, "/nope").await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    state.agent.shutdown().await.unwrap();
}
