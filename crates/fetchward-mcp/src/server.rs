//! The HTTP wire surface: `GET /health`, `POST /mcp`, `GET /mcp`,
//! `DELETE /mcp`, `GET /mcp/downloads/:namespace/:hash`.
//!
//! The JSON-RPC framing and tool-registry dispatch themselves are the
//! pluggable collaborator; this module fixes the surrounding contract (auth,
//! session admission, host/origin gating, rate limiting, and the download
//! endpoint) and stubs the protocol body.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use axum::body::Bytes;
use axum::extract::{ConnectInfo, Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};
use std::net::SocketAddr;

use fetchward_core::{FetchCachePolicy, FetchRequest};
use fetchward_local::Engine;

use crate::auth::TokenVerifier;
use crate::config::Config;
use crate::hostgate::HostGate;
use crate::ratelimit::{Admission, RateLimiter};
use crate::session::{new_session_id, SessionEntry, SessionStore};
use crate::telemetry::RequestTelemetry;

const PROTOCOL_VERSION: &str = "2025-11-25";
const SERVER_NAME: &str = "fetchward";
const SERVER_VERSION: &str = env!("CARGO_PKG_VERSION");

pub struct AppState {
    pub engine: Arc<Engine>,
    pub sessions: Arc<SessionStore>,
    pub rate_limiter: Arc<RateLimiter>,
    pub host_gate: Arc<HostGate>,
    pub verifier: Box<dyn TokenVerifier>,
    pub cache_enabled: bool,
    pub started_at: u64,
}

pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/mcp", post(mcp_post).get(mcp_get).delete(mcp_delete))
        .route("/mcp/downloads/:namespace/:hash", get(download))
        .with_state(state)
}

async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let uptime = now_ms().saturating_sub(state.started_at) / 1000;
    Json(json!({
        "status": "ok",
        "name": SERVER_NAME,
        "version": SERVER_VERSION,
        "uptime": uptime,
    }))
}

fn error_body(message: &str, code: &str, status: u16, details: Option<Value>) -> Value {
    json!({
        "error": {
            "message": message,
            "code": code,
            "statusCode": status,
            "details": details,
        }
    })
}

fn json_rpc_error(code: i64, message: &str, id: Option<Value>) -> Value {
    json!({
        "error": { "code": code, "message": message },
        "id": id,
    })
}

fn client_key(headers: &HeaderMap, addr: Option<SocketAddr>) -> String {
    if let Some(fwd) = headers.get("x-forwarded-for").and_then(|v| v.to_str().ok()) {
        if let Some(first) = fwd.split(',').next() {
            return first.trim().to_string();
        }
    }
    addr.map(|a| a.ip().to_string()).unwrap_or_else(|| "unknown".to_string())
}

/// Host/Origin gate then rate limiter, in that order.
async fn gate_and_rate_limit(
    state: &AppState,
    headers: &HeaderMap,
    addr: Option<SocketAddr>,
) -> Result<(), Response> {
    let host = headers
        .get(axum::http::header::HOST)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    if !state.host_gate.check_host(host) {
        return Err((StatusCode::FORBIDDEN, Json(error_body("host not allowed", "FORBIDDEN", 403, None))).into_response());
    }
    let origin = headers.get(axum::http::header::ORIGIN).and_then(|v| v.to_str().ok());
    if !state.host_gate.check_origin(origin) {
        return Err((StatusCode::FORBIDDEN, Json(error_body("origin not allowed", "FORBIDDEN", 403, None))).into_response());
    }

    let key = client_key(headers, addr);
    match state.rate_limiter.check(&key) {
        Admission::Admitted => Ok(()),
        Admission::Rejected { retry_after_s } => {
            let mut resp = (
                StatusCode::TOO_MANY_REQUESTS,
                Json(error_body("rate limit exceeded", "RATE_LIMITED", 429, Some(json!({ "retryAfter": retry_after_s })))),
            )
                .into_response();
            if let Ok(v) = axum::http::HeaderValue::from_str(&retry_after_s.to_string()) {
                resp.headers_mut().insert(axum::http::header::RETRY_AFTER, v);
            }
            Err(resp)
        }
    }
}

fn bearer_token(headers: &HeaderMap) -> Option<String> {
    if let Some(auth) = headers.get(axum::http::header::AUTHORIZATION).and_then(|v| v.to_str().ok()) {
        if let Some(token) = auth.strip_prefix("Bearer ") {
            return Some(token.to_string());
        }
    }
    headers
        .get("x-api-key")
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
}

async fn authenticate(state: &AppState, headers: &HeaderMap) -> Result<(), Response> {
    let Some(token) = bearer_token(headers) else {
        return Err((StatusCode::UNAUTHORIZED, Json(error_body("missing bearer token", "UNAUTHORIZED", 401, None))).into_response());
    };
    if state.verifier.verify(&token).await.is_none() {
        return Err((StatusCode::UNAUTHORIZED, Json(error_body("invalid token", "UNAUTHORIZED", 401, None))).into_response());
    }
    Ok(())
}

async fn mcp_post(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    body: Bytes,
) -> Response {
    if let Err(resp) = gate_and_rate_limit(&state, &headers, Some(addr)).await {
        return resp;
    }

    let proto = headers.get("mcp-protocol-version").and_then(|v| v.to_str().ok());
    if proto != Some(PROTOCOL_VERSION) {
        return (
            StatusCode::BAD_REQUEST,
            Json(error_body(
                &format!("missing or unsupported MCP-Protocol-Version (expected {PROTOCOL_VERSION})"),
                "BAD_REQUEST",
                400,
                None,
            )),
        )
            .into_response();
    }

    if let Err(resp) = authenticate(&state, &headers).await {
        return resp;
    }

    let parsed: Value = match serde_json::from_slice(&body) {
        Ok(v) => v,
        Err(_) => {
            return (StatusCode::BAD_REQUEST, Json(json_rpc_error(-32700, "parse error", None))).into_response();
        }
    };

    if parsed.is_array() {
        return (
            StatusCode::BAD_REQUEST,
            Json(json_rpc_error(-32600, "batch requests are not supported", None)),
        )
            .into_response();
    }

    let id = parsed.get("id").cloned();
    let method = parsed.get("method").and_then(|m| m.as_str()).unwrap_or("");
    let session_id = headers.get("mcp-session-id").and_then(|v| v.to_str().ok());

    match session_id {
        None if method == "initialize" => {
            if let Err(e) = state.sessions.reserve() {
                let _ = e;
                return (StatusCode::SERVICE_UNAVAILABLE, Json(error_body("server busy", "SERVER_BUSY", 503, None))).into_response();
            }
            let new_id = new_session_id();
            state.sessions.complete_init(new_id.clone());

            let mut resp = Json(json!({
                "result": {
                    "protocolVersion": PROTOCOL_VERSION,
                    "serverInfo": { "name": SERVER_NAME, "version": SERVER_VERSION },
                },
                "id": id,
            }))
            .into_response();
            if let Ok(v) = axum::http::HeaderValue::from_str(&new_id) {
                resp.headers_mut().insert("mcp-session-id", v);
            }
            resp
        }
        None => (
            StatusCode::BAD_REQUEST,
            Json(json_rpc_error(-32600, "missing mcp-session-id for non-initialize request", id)),
        )
            .into_response(),
        Some(sid) => {
            if state.sessions.get(sid).is_none() {
                return (StatusCode::NOT_FOUND, Json(error_body("unknown session", "NOT_FOUND", 404, None))).into_response();
            }
            state.sessions.touch(sid);
            if method == "tools/call" && parsed.get("params").and_then(|p| p.get("name")).and_then(|n| n.as_str()) == Some("fetch") {
                return dispatch_fetch(&state, &parsed, id).await;
            }
            // Tool listing and other JSON-RPC methods are the pluggable
            // collaborator; only the `fetch` tool call is wired to the engine.
            Json(json!({ "result": Value::Null, "id": id })).into_response()
        }
    }
}

/// Runs the `fetch` tool call against the engine, wrapped in start/end/error
/// telemetry, and shapes the JSON-RPC result or error response.
async fn dispatch_fetch(state: &AppState, parsed: &Value, id: Option<Value>) -> Response {
    let args = parsed.get("params").and_then(|p| p.get("arguments"));
    let Some(url) = args
        .and_then(|a| a.get("url"))
        .and_then(|u| u.as_str())
        .filter(|u| !u.trim().is_empty())
    else {
        return (
            StatusCode::BAD_REQUEST,
            Json(json_rpc_error(-32602, "params.arguments.url must be non-empty", id)),
        )
            .into_response();
    };

    let req = FetchRequest {
        url: url.to_string(),
        namespace: "markdown".to_string(),
        variation: String::new(),
        timeout_ms: args.and_then(|a| a.get("timeout_ms")).and_then(|v| v.as_u64()),
        max_bytes: args.and_then(|a| a.get("max_bytes")).and_then(|v| v.as_u64()),
        headers: Default::default(),
        cache: FetchCachePolicy {
            force_refresh: args
                .and_then(|a| a.get("force_refresh"))
                .and_then(|v| v.as_bool())
                .unwrap_or(false),
            ..FetchCachePolicy::default()
        },
        inline_limit: None,
    };

    let telemetry = RequestTelemetry::start(uuid::Uuid::new_v4().to_string(), "fetch", url);

    match state.engine.fetch(&req, tokio_util::sync::CancellationToken::new()).await {
        Ok(result) => {
            telemetry.end(200);
            Json(json!({
                "result": {
                    "url": result.url,
                    "original_url": result.original_url,
                    "final_url": result.final_url,
                    "title": result.data.title,
                    "markdown": result.data.markdown,
                    "from_cache": result.from_cache,
                    "fetched_at": result.fetched_at,
                },
                "id": id,
            }))
            .into_response()
        }
        Err(e) => {
            let status = e.status_code().unwrap_or(500);
            telemetry.error(&e.to_string(), Some(e.code()), Some(status));
            let code = StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
            (code, Json(json_rpc_error(-32000, &e.to_string(), id))).into_response()
        }
    }
}

async fn mcp_get(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Response {
    let accept = headers.get(axum::http::header::ACCEPT).and_then(|v| v.to_str().ok()).unwrap_or("");
    if !accept.contains("text/event-stream") {
        return (StatusCode::BAD_REQUEST, Json(error_body("Accept must include text/event-stream", "BAD_REQUEST", 400, None)))
            .into_response();
    }
    let Some(sid) = headers.get("mcp-session-id").and_then(|v| v.to_str().ok()) else {
        return (StatusCode::BAD_REQUEST, Json(error_body("missing mcp-session-id", "BAD_REQUEST", 400, None))).into_response();
    };
    if state.sessions.get(sid).is_none() {
        return (StatusCode::NOT_FOUND, Json(error_body("unknown session", "NOT_FOUND", 404, None))).into_response();
    }
    state.sessions.touch(sid);
    (
        StatusCode::OK,
        [(axum::http::header::CONTENT_TYPE, "text/event-stream")],
        String::new(),
    )
        .into_response()
}

async fn mcp_delete(State(state): State<Arc<AppState>>, headers: HeaderMap) -> Response {
    let Some(sid) = headers.get("mcp-session-id").and_then(|v| v.to_str().ok()) else {
        return (StatusCode::BAD_REQUEST, Json(error_body("missing mcp-session-id", "BAD_REQUEST", 400, None))).into_response();
    };
    if state.sessions.remove(sid).is_none() {
        return (StatusCode::NOT_FOUND, Json(error_body("unknown session", "NOT_FOUND", 404, None))).into_response();
    }
    StatusCode::NO_CONTENT.into_response()
}

fn valid_hash(hash: &str) -> bool {
    (8..=64).contains(&hash.len()) && hash.chars().all(|c| c.is_ascii_hexdigit() || c == '.')
}

async fn download(State(state): State<Arc<AppState>>, Path((namespace, hash)): Path<(String, String)>) -> Response {
    if namespace != "markdown" {
        return (StatusCode::BAD_REQUEST, Json(error_body("unknown namespace", "BAD_REQUEST", 400, None))).into_response();
    }
    if !valid_hash(&hash) {
        return (StatusCode::BAD_REQUEST, Json(error_body("malformed hash", "BAD_REQUEST", 400, None))).into_response();
    }
    if !state.cache_enabled {
        return (StatusCode::SERVICE_UNAVAILABLE, Json(error_body("cache disabled", "CACHE_DISABLED", 503, None))).into_response();
    }
    let fingerprint = format!("{namespace}:{hash}");
    match state.engine.cache.get(&fingerprint) {
        Some(artifact) => (
            StatusCode::OK,
            [(axum::http::header::CONTENT_TYPE, "text/markdown; charset=utf-8")],
            artifact.markdown,
        )
            .into_response(),
        None => (StatusCode::NOT_FOUND, Json(error_body("not found", "NOT_FOUND", 404, None))).into_response(),
    }
}

pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

pub fn bind_socket_addr(cfg: &Config) -> anyhow::Result<SocketAddr> {
    let ip: std::net::IpAddr = if cfg.server_host == "localhost" {
        std::net::IpAddr::V4(std::net::Ipv4Addr::LOCALHOST)
    } else {
        cfg.server_host.parse()?
    };
    Ok(SocketAddr::new(ip, cfg.server_port))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_hash_accepts_hex_and_dots() {
        assert!(valid_hash("abcdef01"));
        assert!(valid_hash("abc.def.01234567"));
    }

    #[test]
    fn valid_hash_rejects_bad_length_and_chars() {
        assert!(!valid_hash("short"));
        assert!(!valid_hash("zzzzzzzz"));
        assert!(!valid_hash(&"a".repeat(65)));
    }

    #[test]
    fn client_key_prefers_forwarded_for() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", "203.0.113.5, 10.0.0.1".parse().unwrap());
        assert_eq!(client_key(&headers, None), "203.0.113.5");
    }

    #[test]
    fn client_key_falls_back_to_socket_addr() {
        let headers = HeaderMap::new();
        let addr: SocketAddr = "127.0.0.1:1234".parse().unwrap();
        assert_eq!(client_key(&headers, Some(addr)), "127.0.0.1");
    }

    #[test]
    fn bearer_token_parses_authorization_header() {
        let mut headers = HeaderMap::new();
        headers.insert(axum::http::header::AUTHORIZATION, "Bearer abc123".parse().unwrap());
        assert_eq!(bearer_token(&headers), Some("abc123".to_string()));
    }

    #[test]
    fn bearer_token_falls_back_to_api_key_header() {
        let mut headers = HeaderMap::new();
        headers.insert("x-api-key", "abc123".parse().unwrap());
        assert_eq!(bearer_token(&headers), Some("abc123".to_string()));
    }
}
