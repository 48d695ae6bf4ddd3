//! Direct stdio transport (`--stdio`): exposes the same fetch pipeline as a
//! single MCP tool over `rmcp`'s stdio transport, without starting the HTTP
//! server, its session store, rate limiter, or gates (a stdio client is a
//! single trusted local peer).

#![cfg(feature = "stdio")]

use std::sync::Arc;

use rmcp::handler::server::router::tool::ToolRouter as RmcpToolRouter;
use rmcp::handler::server::wrapper::Parameters;
use rmcp::model::{CallToolResult, Content, ServerCapabilities, ServerInfo};
use rmcp::transport::stdio;
use rmcp::{tool, tool_handler, tool_router, ErrorData as McpError, ServiceExt};
use schemars::JsonSchema;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;

use fetchward_core::{FetchCachePolicy, FetchRequest};
use fetchward_local::Engine;

#[derive(Debug, Deserialize, JsonSchema, Default)]
struct FetchArgs {
    url: Option<String>,
    #[serde(default)]
    force_refresh: Option<bool>,
    #[serde(default)]
    timeout_ms: Option<u64>,
    #[serde(default)]
    max_bytes: Option<u64>,
}

fn tool_result(payload: serde_json::Value) -> CallToolResult {
    let mut r = CallToolResult::structured(payload.clone());
    r.content = vec![Content::text(payload.to_string())];
    r
}

#[derive(Clone)]
pub struct FetchwardMcp {
    tool_router: RmcpToolRouter<Self>,
    engine: Arc<Engine>,
}

#[tool_router]
impl FetchwardMcp {
    pub fn new(engine: Arc<Engine>) -> Self {
        Self {
            tool_router: Self::tool_router(),
            engine,
        }
    }

    #[tool(description = "Fetch a URL, convert it to Markdown, and cache the result")]
    async fn fetch(&self, params: Parameters<Option<FetchArgs>>) -> Result<CallToolResult, McpError> {
        let args = params.0.unwrap_or_default();
        let Some(url) = args.url.filter(|u| !u.trim().is_empty()) else {
            return Ok(tool_result(serde_json::json!({
                "is_error": true,
                "error": { "message": "url must be non-empty" },
            })));
        };

        let req = FetchRequest {
            url,
            namespace: "markdown".to_string(),
            variation: String::new(),
            timeout_ms: args.timeout_ms,
            max_bytes: args.max_bytes,
            headers: Default::default(),
            cache: FetchCachePolicy {
                force_refresh: args.force_refresh.unwrap_or(false),
                ..FetchCachePolicy::default()
            },
            inline_limit: None,
        };

        match self.engine.fetch(&req, CancellationToken::new()).await {
            Ok(result) => Ok(tool_result(serde_json::json!({
                "url": result.url,
                "original_url": result.original_url,
                "final_url": result.final_url,
                "title": result.data.title,
                "markdown": result.data.markdown,
                "from_cache": result.from_cache,
                "fetched_at": result.fetched_at,
            }))),
            Err(e) => Ok(tool_result(serde_json::json!({
                "is_error": true,
                "error": {
                    "message": e.to_string(),
                    "code": e.code(),
                    "statusCode": e.status_code(),
                },
            }))),
        }
    }
}

#[tool_handler]
impl rmcp::ServerHandler for FetchwardMcp {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            instructions: Some(
                "Safety-hardened HTTP fetch engine. Exposes a single `fetch` tool.".to_string(),
            ),
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            ..Default::default()
        }
    }
}

pub async fn serve_stdio(engine: Arc<Engine>) -> anyhow::Result<()> {
    let svc = FetchwardMcp::new(engine);
    let running = svc
        .serve(stdio())
        .await
        .map_err(|e| anyhow::anyhow!(e.to_string()))?;
    running
        .waiting()
        .await
        .map_err(|e| anyhow::anyhow!(e.to_string()))?;
    Ok(())
}
