//! `GET /health` contract: always reachable, no auth, no gating.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::body::Body;
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

fn test_state() -> Arc<AppState> {
    let cfg = Config::parse_from(["fetchward", "--static-tokens", "test-token"]);
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

#[tokio::test]
async fn health_reports_ok_without_auth_or_headers() {
    let app = build_router(test_state());
    let req = Request::builder().uri("/health").body(Body::empty()).unwrap();
    let resp = app.oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let body = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["status"], "ok");
    assert_eq!(json["name"], "fetchward");
}
