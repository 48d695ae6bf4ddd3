//! Process configuration: one struct, populated from environment variables
//! (§6), with `clap` deriving both the CLI surface and the env bindings so
//! `fetchward serve --server-port 9000` and `SERVER_PORT=9000 fetchward`
//! agree on the same keys.

use clap::{ArgAction, Parser, ValueEnum};
use std::net::IpAddr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum AuthMode {
    Static,
    Oauth,
}

#[derive(Debug, Clone, Parser)]
pub struct Config {
    /// Bind address for the HTTP server.
    #[arg(long, env = "SERVER_HOST", default_value = "127.0.0.1")]
    pub server_host: String,

    #[arg(long, env = "SERVER_PORT", default_value_t = 8080)]
    pub server_port: u16,

    /// Permit binding to a non-loopback host.
    #[arg(long, env = "ALLOW_REMOTE", action = ArgAction::Set, default_value_t = false)]
    pub allow_remote: bool,

    /// Comma-separated hostnames added to the Host/Origin allow-list.
    #[arg(long, env = "ALLOWED_HOSTS", value_delimiter = ',', default_value = "")]
    pub allowed_hosts: Vec<String>,

    #[arg(long, env = "AUTH_MODE", value_enum, default_value_t = AuthMode::Static)]
    pub auth_mode: AuthMode,

    #[arg(long, env = "STATIC_TOKENS", value_delimiter = ',', default_value = "")]
    pub static_tokens: Vec<String>,

    #[arg(long, env = "OAUTH_ISSUER_URL")]
    pub oauth_issuer_url: Option<String>,
    #[arg(long, env = "OAUTH_AUTHORIZATION_URL")]
    pub oauth_authorization_url: Option<String>,
    #[arg(long, env = "OAUTH_TOKEN_URL")]
    pub oauth_token_url: Option<String>,
    #[arg(long, env = "OAUTH_INTROSPECTION_URL")]
    pub oauth_introspection_url: Option<String>,
    #[arg(long, env = "OAUTH_CLIENT_ID")]
    pub oauth_client_id: Option<String>,
    #[arg(long, env = "OAUTH_CLIENT_SECRET")]
    pub oauth_client_secret: Option<String>,
    #[arg(long, env = "OAUTH_REQUIRED_SCOPES", value_delimiter = ',', default_value = "")]
    pub oauth_required_scopes: Vec<String>,
    #[arg(long, env = "OAUTH_RESOURCE_URL")]
    pub oauth_resource_url: Option<String>,
    #[arg(long, env = "OAUTH_INTROSPECTION_TIMEOUT_MS", default_value_t = 5_000)]
    pub oauth_introspection_timeout_ms: u64,

    #[arg(long, env = "FETCHER_TIMEOUT_MS", default_value_t = 30_000)]
    pub fetcher_timeout_ms: u64,
    #[arg(long, env = "FETCHER_MAX_REDIRECTS", default_value_t = 10)]
    pub fetcher_max_redirects: u32,
    #[arg(long, env = "FETCHER_MAX_CONTENT_BYTES", default_value_t = 10 * 1024 * 1024)]
    pub fetcher_max_content_bytes: u64,
    #[arg(long, env = "FETCHER_USER_AGENT", default_value = "fetchward/0.1 (+https://github.com/fetchward/fetchward)")]
    pub fetcher_user_agent: String,

    #[arg(long, env = "MAX_URL_LENGTH", default_value_t = 8192)]
    pub max_url_length: usize,
    #[arg(long, env = "MAX_HTML_SIZE", default_value_t = 10 * 1024 * 1024)]
    pub max_html_size: u64,
    /// `0` = unlimited.
    #[arg(long, env = "MAX_INLINE_CONTENT_CHARS", default_value_t = 50_000)]
    pub max_inline_content_chars: usize,

    #[arg(long, env = "CACHE_ENABLED", action = ArgAction::Set, default_value_t = true)]
    pub cache_enabled: bool,
    #[arg(long, env = "CACHE_MAX_ENTRIES", default_value_t = 1_000)]
    pub cache_max_entries: usize,
    #[arg(long, env = "CACHE_TTL_SECONDS", default_value_t = 0)]
    pub cache_ttl_seconds: u64,

    #[arg(long, env = "SESSION_TTL_MS", default_value_t = 30 * 60 * 1000)]
    pub session_ttl_ms: u64,
    #[arg(long, env = "SESSION_INIT_TIMEOUT_MS", default_value_t = 10_000)]
    pub session_init_timeout_ms: u64,
    #[arg(long, env = "MAX_SESSIONS", default_value_t = 1_000)]
    pub max_sessions: usize,

    #[arg(long, env = "RATE_LIMIT_ENABLED", action = ArgAction::Set, default_value_t = true)]
    pub rate_limit_enabled: bool,
    #[arg(long, env = "RATE_LIMIT_MAX_REQUESTS", default_value_t = 60)]
    pub rate_limit_max_requests: u64,
    #[arg(long, env = "RATE_LIMIT_WINDOW_MS", default_value_t = 60_000)]
    pub rate_limit_window_ms: u64,
    #[arg(long, env = "RATE_LIMIT_CLEANUP_INTERVAL_MS", default_value_t = 60_000)]
    pub rate_limit_cleanup_interval_ms: u64,

    #[arg(long, env = "NOISE_EXTRA_TOKENS", value_delimiter = ',', default_value = "")]
    pub noise_extra_tokens: Vec<String>,
    #[arg(long, env = "NOISE_EXTRA_SELECTORS", value_delimiter = ',', default_value = "")]
    pub noise_extra_selectors: Vec<String>,

    #[arg(long, env = "HTTP_HEADERS_TIMEOUT_MS", default_value_t = 10_000)]
    pub http_headers_timeout_ms: u64,
    #[arg(long, env = "HTTP_REQUEST_TIMEOUT_MS", default_value_t = 30_000)]
    pub http_request_timeout_ms: u64,
    #[arg(long, env = "HTTP_KEEPALIVE_TIMEOUT_MS", default_value_t = 60_000)]
    pub http_keepalive_timeout_ms: u64,

    /// Use stdio transport directly; no HTTP server is started.
    #[arg(long, default_value_t = false)]
    pub stdio: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot bind to non-loopback host {0} without ALLOW_REMOTE=true")]
    RemoteBindNotAllowed(String),
    #[error("AUTH_MODE=static requires at least one entry in STATIC_TOKENS")]
    EmptyStaticTokens,
    #[error("AUTH_MODE=oauth requires OAUTH_ISSUER_URL and OAUTH_INTROSPECTION_URL")]
    MissingOAuthConfig,
}

impl Config {
    /// Build configuration purely from the environment (and defaults),
    /// ignoring `argv`. Used by the server entrypoint and by `doctor`.
    pub fn from_env() -> Self {
        Config::parse_from(std::iter::once("fetchward".to_string()))
    }

    pub fn bind_host_is_loopback(&self) -> bool {
        match self.server_host.parse::<IpAddr>() {
            Ok(ip) => ip.is_loopback(),
            Err(_) => self.server_host == "localhost",
        }
    }

    /// Validates startup-fatal configuration: a non-loopback bind without
    /// `ALLOW_REMOTE`, an empty static-token list in static mode, or missing
    /// OAuth URLs in oauth mode.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.allow_remote && !self.bind_host_is_loopback() {
            return Err(ConfigError::RemoteBindNotAllowed(self.server_host.clone()));
        }
        match self.auth_mode {
            AuthMode::Static => {
                if self.static_tokens.iter().all(|t| t.trim().is_empty()) {
                    return Err(ConfigError::EmptyStaticTokens);
                }
            }
            AuthMode::Oauth => {
                if self.oauth_issuer_url.is_none() || self.oauth_introspection_url.is_none() {
                    return Err(ConfigError::MissingOAuthConfig);
                }
            }
        }
        Ok(())
    }
}
