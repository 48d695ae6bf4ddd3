//! `/mcp` contract: protocol-version gate, auth, and session admission.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::ConnectInfo;
use axum::http::{Request, StatusCode};
use clap::Parser;
use fetchward_local::{Engine, EngineConfig};
use fetchward_mcp::auth::verifier_from_config;
use fetchward_mcp::config::Config;
use fetchward_mcp::hostgate::HostGate;
use fetchward_mcp::ratelimit::{RateLimitConfig, RateLimiter};
use fetchward_mcp::server::{build_router, now_ms, AppState};
use fetchward_mcp::session::{SessionConfig, SessionStore};
use tower::ServiceExt;

const PEER: &str = "127.0.0.1:9999";
const TOKEN: &str = "test-token";

fn test_state() -> Arc<AppState> {
    let cfg = Config::parse_from(["fetchward", "--static-tokens", TOKEN]);
    let engine = Arc::new(Engine::new(EngineConfig::default()).unwrap());
    Arc::new(AppState {
        engine,
        sessions: Arc::new(SessionStore::new(SessionConfig::default())),
        rate_limiter: Arc::new(RateLimiter::new(RateLimitConfig::default())),
        host_gate: Arc::new(HostGate::new(&cfg.server_host, &cfg.allowed_hosts)),
        verifier: verifier_from_config(&cfg),
        cache_enabled: true,
        started_at: now_ms(),
    })
}

fn mcp_request(body: serde_json::Value, protocol_header: bool, auth: bool, session: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri("/mcp")
        .header("content-type", "application/json")
        .header("host", "localhost");
    if protocol_header {
        builder = builder.header("mcp-protocol-version", "2025-11-25");
    }
    if auth {
        builder = builder.header("authorization", format!("Bearer {TOKEN}"));
    }
    if let Some(sid) = session {
        builder = builder.header("mcp-session-id", sid);
    }
    let mut req = builder.body(Body::from(body.to_string())).unwrap();
    let addr: SocketAddr = PEER.parse().unwrap();
    req.extensions_mut().insert(ConnectInfo(addr));
    req
}

#[tokio::test]
async fn missing_protocol_version_header_is_rejected() {
    let app = build_router(test_state());
    let req = mcp_request(serde_json::json!({"method": "initialize", "id": 1}), false, true, None);
    let resp = app.oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn missing_auth_is_rejected() {
    let app = build_router(test_state());
    let req = mcp_request(serde_json::json!({"method": "initialize", "id": 1}), true, false, None);
    let resp = app.oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn batch_request_is_rejected_with_jsonrpc_invalid_request() {
    let app = build_router(test_state());
    let req = mcp_request(serde_json::json!([{"method": "initialize", "id": 1}]), true, true, None);
    let resp = app.oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    let body = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["error"]["code"], -32600);
}

#[tokio::test]
async fn initialize_without_session_id_issues_a_new_one() {
    let app = build_router(test_state());
    let req = mcp_request(serde_json::json!({"method": "initialize", "id": 1}), true, true, None);
    let resp = app.oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert!(resp.headers().get("mcp-session-id").is_some());
}

#[tokio::test]
async fn non_initialize_request_without_session_id_is_rejected() {
    let app = build_router(test_state());
    let req = mcp_request(serde_json::json!({"method": "ping", "id": 1}), true, true, None);
    let resp = app.oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn unknown_session_id_is_rejected() {
    let app = build_router(test_state());
    let req = mcp_request(serde_json::json!({"method": "ping", "id": 1}), true, true, Some("does-not-exist"));
    let resp = app.oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn established_session_routes_past_admission() {
    let state = test_state();
    let app = build_router(state.clone());

    let init = mcp_request(serde_json::json!({"method": "initialize", "id": 1}), true, true, None);
    let init_resp = app.clone().oneshot(init).await.unwrap();
    let sid = init_resp
        .headers()
        .get("mcp-session-id")
        .unwrap()
        .to_str()
        .unwrap()
        .to_string();

    let follow_up = mcp_request(serde_json::json!({"method": "ping", "id": 2}), true, true, Some(&sid));
    let resp = app.oneshot(follow_up).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
}

#[tokio::test]
async fn fetch_tool_call_with_empty_url_is_rejected() {
    let state = test_state();
    let app = build_router(state.clone());

    let init = mcp_request(serde_json::json!({"method": "initialize", "id": 1}), true, true, None);
    let init_resp = app.clone().oneshot(init).await.unwrap();
    let sid = init_resp
        .headers()
        .get("mcp-session-id")
        .unwrap()
        .to_str()
        .unwrap()
        .to_string();

    let call = mcp_request(
        serde_json::json!({
            "method": "tools/call",
            "params": { "name": "fetch", "arguments": { "url": "" } },
            "id": 2,
        }),
        true,
        true,
        Some(&sid),
    );
    let resp = app.oneshot(call).await.unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    let body = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["error"]["code"], -32602);
}
