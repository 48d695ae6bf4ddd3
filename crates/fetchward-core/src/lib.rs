//! Shared vocabulary for the fetchward fetch engine: error kinds, request/response
//! types, and the small capability traits that let the rest of the workspace stay
//! decoupled from any one HTTP client, DNS resolver, or cache implementation.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

pub mod fingerprint;

pub use fingerprint::Fingerprint;

/// The error kinds enumerated by the fetch pipeline's error handling design.
///
/// Every kind carries a stable machine-readable `code`, maps to an HTTP status
/// (or none, for errors with no sensible status), and knows whether a caller
/// should retry.
#[derive(thiserror::Error, Debug, Clone)]
pub enum Error {
    #[error("validation error: {0}")]
    Validation(String),
    #[error("blocked: {0}")]
    Blocked(String),
    #[error("dns error ({kind}): {1}", kind = .0.as_str())]
    Dns(DnsErrorKind, String),
    #[error("redirect error: {0}")]
    Redirect(String),
    #[error("timeout after {1}ms: {0}")]
    Timeout(String, u64),
    #[error("aborted: {0}")]
    Aborted(String),
    #[error("rate limited, retry after {retry_after_s}s")]
    RateLimited { retry_after_s: u64 },
    #[error("upstream http error {1}: {0}")]
    Http(String, u16),
    #[error("unsupported media: {0}")]
    UnsupportedMedia(String),
    #[error("size limit exceeded: {0}")]
    SizeLimit(String),
    #[error("network error: could not reach {0}")]
    Network(String),
    #[error("cache error: {0}")]
    Cache(String),
    #[error("not configured: {0}")]
    NotConfigured(String),
    #[error("not supported: {0}")]
    NotSupported(String),
    #[error("unknown error: {0}")]
    Unknown(String),
}

/// Sub-kind for [`Error::Dns`]: `EINVAL`/`ETIMEOUT`/`ENODATA`/`EBLOCKED`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DnsErrorKind {
    Einval,
    Etimeout,
    Enodata,
    Eblocked,
}

impl DnsErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Einval => "EINVAL",
            Self::Etimeout => "ETIMEOUT",
            Self::Enodata => "ENODATA",
            Self::Eblocked => "EBLOCKED",
        }
    }
}

impl Error {
    /// Stable machine-readable code, as surfaced in the JSON error envelope.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::Blocked(_) => "EBLOCKED",
            Self::Dns(kind, _) => kind.as_str(),
            Self::Redirect(_) => "EBADREDIRECT",
            Self::Timeout(..) => "TIMEOUT",
            Self::Aborted(_) => "ABORTED",
            Self::RateLimited { .. } => "RATE_LIMITED",
            Self::Http(..) => "HTTP_ERROR",
            Self::UnsupportedMedia(_) => "UNSUPPORTED_MEDIA",
            Self::SizeLimit(_) => "SIZE_LIMIT",
            Self::Network(_) => "NETWORK_ERROR",
            Self::Cache(_) => "CACHE_ERROR",
            Self::NotConfigured(_) => "NOT_CONFIGURED",
            Self::NotSupported(_) => "NOT_SUPPORTED",
            Self::Unknown(_) => "UNKNOWN",
        }
    }

    /// HTTP status this error surfaces as. `None` means "no status" (the
    /// `network` kind, whose message is the status-less "Network error: …").
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::Validation(_) => Some(400),
            Self::Blocked(_) => Some(400),
            Self::Dns(kind, _) => Some(if *kind == DnsErrorKind::Etimeout { 504 } else { 400 }),
            Self::Redirect(_) => Some(400),
            Self::Timeout(..) => Some(504),
            Self::Aborted(_) => Some(499),
            Self::RateLimited { .. } => Some(429),
            Self::Http(_, status) => Some(*status),
            Self::UnsupportedMedia(_) => Some(415),
            Self::SizeLimit(_) => Some(400),
            Self::Network(_) => None,
            Self::Cache(_) => Some(500),
            Self::NotConfigured(_) => Some(500),
            Self::NotSupported(_) => Some(500),
            Self::Unknown(_) => Some(500),
        }
    }

    pub fn retryable(&self) -> bool {
        matches!(
            self,
            Self::Timeout(..) | Self::Network(_) | Self::Cache(_) | Self::Http(_, 429)
        )
    }

    pub fn retry_after_s(&self) -> Option<u64> {
        match self {
            Self::RateLimited { retry_after_s } => Some(*retry_after_s),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// A normalized, admission-checked URL. Only a `UrlNormalizer` impl constructs
/// these; holding one is a guarantee the host-admission predicate held at creation time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NormalizedUrl {
    pub url: String,
    pub hostname: String,
}

/// A request variation key: a stable serialization of request variants that should
/// fork the cache (e.g. "skip noise removal"). Two requests that agree on namespace,
/// normalized URL, and variation always resolve to the same fingerprint.
pub type VariationKey = String;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchCachePolicy {
    pub read: bool,
    pub write: bool,
    pub ttl_s: Option<u64>,
    pub force_refresh: bool,
}

impl Default for FetchCachePolicy {
    fn default() -> Self {
        Self {
            read: true,
            write: true,
            ttl_s: None,
            force_refresh: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchRequest {
    pub url: String,
    pub namespace: String,
    pub variation: VariationKey,
    pub timeout_ms: Option<u64>,
    pub max_bytes: Option<u64>,
    pub headers: BTreeMap<String, String>,
    pub cache: FetchCachePolicy,
    pub inline_limit: Option<usize>,
}

impl FetchRequest {
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_ms.map(Duration::from_millis)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum FetchSource {
    Cache,
    Network,
}

/// The raw (pre-transform) HTTP response, after redirect-following and decoding.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawResponse {
    pub url: String,
    pub final_url: String,
    pub status: u16,
    pub content_type: Option<String>,
    pub headers: BTreeMap<String, String>,
    pub bytes: Vec<u8>,
    pub encoding: String,
    pub truncated: bool,
    pub timings_ms: BTreeMap<String, u128>,
}

/// The artifact produced by the external `transform` function: markdown + metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Artifact {
    pub markdown: String,
    pub title: Option<String>,
    pub metadata: serde_json::Value,
    pub truncated: bool,
}

/// A cache entry as specified in §3: content + provenance + insertion order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    pub content: Artifact,
    pub url: String,
    pub fetched_at: u64,
    pub insertion_order: u64,
}

/// The full pipeline result returned by `fetch()` (§4.8).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchResult {
    pub data: Artifact,
    pub from_cache: bool,
    pub url: String,
    pub original_url: String,
    pub final_url: Option<String>,
    pub fetched_at: u64,
    pub fingerprint: String,
}

/// Immutable per-request telemetry context (§4.14).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryContext {
    pub request_id: String,
    pub start_time_ms: u64,
    pub redacted_url: String,
    pub method: String,
    pub context_request_id: Option<String>,
    pub operation_id: Option<String>,
}

// ---- Capability traits (Design Notes §9: interfaces over class hierarchies) ----

/// Issues one HTTP GET and returns a raw (not-yet-transformed) response.
/// Implementations own the connection pool, safe DNS resolver, and redirect
/// follower; see `fetchward-local` for the production implementation.
#[async_trait::async_trait]
pub trait FetchBackend: Send + Sync {
    async fn fetch(&self, req: &FetchRequest) -> Result<RawResponse>;
}

/// The external, pure `transform(bytes, encoding, url, options) -> artifact` function.
/// HTML→Markdown conversion proper is explicitly out of scope for this crate's
/// core; this trait is the seam a caller plugs a converter into.
pub trait Transform: Send + Sync {
    fn transform(
        &self,
        bytes: &[u8],
        encoding: &str,
        url: &str,
        options: &serde_json::Value,
    ) -> Result<Artifact>;
}

/// Minimal structured-logging capability set (Design Notes §9): a polymorphic
/// contract rather than a concrete logger type, so callers can bind whatever
/// `tracing`-backed implementation they like exactly once at process start.
pub trait Logger: Send + Sync {
    fn debug(&self, msg: &str);
    fn warn(&self, msg: &str);
    fn error(&self, msg: &str);
}

/// Strips userinfo and secret-named query parameters from a URL before it is
/// logged or emitted in telemetry (§4.14).
pub trait UrlRedactor: Send + Sync {
    fn redact(&self, url: &str) -> String;
}
