//! `GET /mcp/downloads/:namespace/:hash` contract: serves cached markdown by
//! fingerprint, independent of the MCP session/auth machinery.

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use clap::Parser;
use fetchward_core::Artifact;
use fetchward_local::{Engine, EngineConfig};
use fetchward_mcp::auth::verifier_from_config;
use fetchward_mcp::config::Config;
use fetchward_mcp::hostgate::HostGate;
use fetchward_mcp::ratelimit::{RateLimitConfig, RateLimiter};
use fetchward_mcp::server::{build_router, now_ms, AppState};
use fetchward_mcp::session::{SessionConfig, SessionStore};
use tower::ServiceExt;

fn test_state(cache_enabled: bool) -> Arc<AppState> {
    let cfg = Config::parse_from(["fetchward", "--static-tokens", "test-token"]);
    let engine = Arc::new(Engine::new(EngineConfig::default()).unwrap());
    Arc::new(AppState {
        engine,
        sessions: Arc::new(SessionStore::new(SessionConfig::default())),
        rate_limiter: Arc::new(RateLimiter::new(RateLimitConfig::default())),
        host_gate: Arc::new(HostGate::new(&cfg.server_host, &cfg.allowed_hosts)),
        verifier: verifier_from_config(&cfg),
        cache_enabled,
        started_at: now_ms(),
    })
}

#[tokio::test]
async fn known_fingerprint_returns_markdown() {
    let state = test_state(true);
    state.engine.cache.set(
        "markdown:deadbeef01",
        "https://example.com/",
        now_ms(),
        Artifact {
            markdown: "# hello".to_string(),
            title: Some("hello".to_string()),
            metadata: serde_json::json!({}),
            truncated: false,
        },
        false,
    );

    let app = build_router(state);
    let req = Request::builder()
        .uri("/mcp/downloads/markdown/deadbeef01")
        .body(Body::empty())
        .unwrap();
    let resp = app.oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let body = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    assert_eq!(&body[..], b"# hello");
}

#[tokio::test]
async fn unknown_fingerprint_is_404() {
    let app = build_router(test_state(true));
    let req = Request::builder()
        .uri("/mcp/downloads/markdown/0000000000")
        .body(Body::empty())
        .unwrap();
    let resp = app.oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn unknown_namespace_is_bad_request() {
    let app = build_router(test_state(true));
    let req = Request::builder()
        .uri("/mcp/downloads/other/deadbeef01")
        .body(Body::empty())
        .unwrap();
    let resp = app.oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn malformed_hash_is_bad_request() {
    let app = build_router(test_state(true));
    let req = Request::builder()
        .uri("/mcp/downloads/markdown/not-hex!!")
        .body(Body::empty())
        .unwrap();
    let resp = app.oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn disabled_cache_returns_service_unavailable() {
    let state = test_state(false);
    state.engine.cache.set(
        "markdown:deadbeef01",
        "https://example.com/",
        now_ms(),
        Artifact {
            markdown: "# hello".to_string(),
            title: None,
            metadata: serde_json::json!({}),
            truncated: false,
        },
        false,
    );
    let app = build_router(state);
    let req = Request::builder()
        .uri("/mcp/downloads/markdown/deadbeef01")
        .body(Body::empty())
        .unwrap();
    let resp = app.oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
}
