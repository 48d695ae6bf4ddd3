//! Connection-pool fetcher: a single pool of keep-alive connections that
//! only ever dials addresses the safe resolver has already validated.

use fetchward_core::{Error, Result};
use futures_util::StreamExt;
use reqwest::dns::{Addrs, Name, Resolve, Resolving};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use crate::dns::SafeResolver;

const DEFAULT_USER_AGENT: &str = "fetchward/0.1 (+https://github.com/fetchward/fetchward)";

#[derive(Debug, Clone)]
pub struct FetcherConfig {
    pub user_agent: String,
    pub timeout_ms: u64,
    pub connect_timeout_ms: u64,
    pub parallelism: usize,
}

impl Default for FetcherConfig {
    fn default() -> Self {
        Self {
            user_agent: DEFAULT_USER_AGENT.to_string(),
            timeout_ms: 30_000,
            connect_timeout_ms: 10_000,
            parallelism: 16,
        }
    }
}

/// Adapts [`SafeResolver`] to `reqwest`'s DNS hook, so every connection the
/// pool opens goes through `assert_safe` rather than the system resolver.
struct SafeDnsResolve {
    resolver: Arc<SafeResolver>,
}

impl Resolve for SafeDnsResolve {
    fn resolve(&self, name: Name) -> Resolving {
        let resolver = self.resolver.clone();
        Box::pin(async move {
            let host = name.as_str().to_string();
            let ips = resolver
                .assert_safe(&host)
                .await
                .map_err(|e| Box::new(e) as Box<dyn std::error::Error + Send + Sync>)?;
            let addrs: Addrs = Box::new(ips.into_iter().map(|ip| SocketAddr::new(ip, 0)));
            Ok(addrs)
        })
    }
}

pub struct ConnectionPoolFetcher {
    client: reqwest::Client,
}

impl ConnectionPoolFetcher {
    pub fn new(cfg: FetcherConfig, resolver: Arc<SafeResolver>) -> Result<Self> {
        let pool_size = (cfg.parallelism * 2).max(25);
        let client = reqwest::Client::builder()
            .user_agent(cfg.user_agent.clone())
            .timeout(Duration::from_millis(cfg.timeout_ms))
            .connect_timeout(Duration::from_millis(cfg.connect_timeout_ms))
            .pool_max_idle_per_host(pool_size)
            .redirect(reqwest::redirect::Policy::none())
            .http1_title_case_headers()
            .no_gzip()
            .no_brotli()
            .no_deflate()
            .dns_resolver(Arc::new(SafeDnsResolve { resolver }))
            .build()
            .map_err(|e| Error::Unknown(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { client })
    }

    /// Issue a single `GET`, honoring the per-call timeout. Redirect status
    /// codes are returned to the caller, which drives the hop loop; this
    /// method never follows a redirect itself, matching `redirect: manual`.
    ///
    /// The body is never buffered in one shot: a declared `Content-Length`
    /// over `max_bytes` fails before a single byte is read, and the stream
    /// itself is cut off the moment the accumulated total crosses `max_bytes`,
    /// so a chunked or length-less body can't grow the read unbounded either.
    pub async fn get(
        &self,
        url: &str,
        headers: &BTreeMap<String, String>,
        timeout: Option<Duration>,
        max_bytes: usize,
    ) -> Result<RawGetResponse> {
        let mut req = self.client.get(url).headers(default_headers());
        for (k, v) in headers {
            if let (Ok(name), Ok(value)) = (
                HeaderName::try_from(k.as_str()),
                HeaderValue::from_str(v),
            ) {
                req = req.header(name, value);
            }
        }
        if let Some(t) = timeout {
            req = req.timeout(t);
        }

        let resp = req.send().await.map_err(map_transport_error)?;

        let status = resp.status().as_u16();
        let response_headers: BTreeMap<String, String> = resp
            .headers()
            .iter()
            .filter_map(|(k, v)| v.to_str().ok().map(|v| (k.as_str().to_string(), v.to_string())))
            .collect();
        let final_url = resp.url().to_string();

        if max_bytes > 0 {
            if let Some(len) = resp.content_length() {
                if len as usize > max_bytes {
                    return Err(Error::SizeLimit(format!(
                        "Content-Length {len} exceeds limit of {max_bytes} bytes"
                    )));
                }
            }
        }

        let bytes = read_bounded(resp, max_bytes).await?;

        Ok(RawGetResponse {
            status,
            headers: response_headers,
            final_url,
            bytes,
        })
    }
}

/// Accumulates `resp`'s body stream, aborting as soon as the running total
/// would exceed `max_bytes` rather than waiting for the stream to finish.
/// `max_bytes == 0` means unbounded.
async fn read_bounded(resp: reqwest::Response, max_bytes: usize) -> Result<Vec<u8>> {
    let mut stream = resp.bytes_stream();
    let mut buf = Vec::new();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(map_transport_error)?;
        if max_bytes > 0 && buf.len() + chunk.len() > max_bytes {
            return Err(Error::SizeLimit(format!(
                "response body exceeds limit of {max_bytes} bytes"
            )));
        }
        buf.extend_from_slice(&chunk);
    }
    Ok(buf)
}

pub struct RawGetResponse {
    pub status: u16,
    pub headers: BTreeMap<String, String>,
    pub final_url: String,
    pub bytes: Vec<u8>,
}

fn default_headers() -> HeaderMap {
    let mut h = HeaderMap::new();
    h.insert(
        reqwest::header::ACCEPT,
        HeaderValue::from_static(
            "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8",
        ),
    );
    h.insert(
        reqwest::header::ACCEPT_LANGUAGE,
        HeaderValue::from_static("en-US,en;q=0.5"),
    );
    h.insert(
        reqwest::header::ACCEPT_ENCODING,
        HeaderValue::from_static("gzip, deflate, br"),
    );
    h.insert(
        reqwest::header::CONNECTION,
        HeaderValue::from_static("keep-alive"),
    );
    h
}

fn map_transport_error(e: reqwest::Error) -> Error {
    if e.is_timeout() {
        Error::Timeout(e.to_string(), 0)
    } else if e.is_connect() || e.is_request() {
        Error::Network(e.url().map(|u| u.to_string()).unwrap_or_default())
    } else if let Some(status) = e.status() {
        Error::Http(e.to_string(), status.as_u16())
    } else {
        Error::Network(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_headers_include_fixed_accept_language() {
        let h = default_headers();
        assert_eq!(
            h.get(reqwest::header::ACCEPT_LANGUAGE).unwrap(),
            "en-US,en;q=0.5"
        );
    }

    #[tokio::test]
    async fn client_builds_with_safe_resolver() {
        let resolver = Arc::new(SafeResolver::new(
            crate::dns::DnsConfig::default(),
            crate::normalize::NormalizeConfig::default(),
        ));
        let fetcher = ConnectionPoolFetcher::new(FetcherConfig::default(), resolver);
        assert!(fetcher.is_ok());
    }

    // These exercise `get` directly against a real loopback listener (the
    // fetcher's own DNS hook never fires for a literal-IP URL; the SSRF
    // preflight that does apply to loopback lives one layer up, in
    // `RedirectFollower::follow`).
    async fn fetcher_for_test() -> ConnectionPoolFetcher {
        let resolver = Arc::new(SafeResolver::new(
            crate::dns::DnsConfig::default(),
            crate::normalize::NormalizeConfig::default(),
        ));
        ConnectionPoolFetcher::new(FetcherConfig::default(), resolver).unwrap()
    }

    #[tokio::test]
    async fn declared_content_length_over_limit_is_rejected_before_reading_body() {
        use axum::{routing::get, Router};

        let app = Router::new().route("/", get(|| async { "a".repeat(10_000) }));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let fetcher = fetcher_for_test().await;
        let err = fetcher
            .get(&format!("http://{addr}/"), &BTreeMap::new(), None, 100)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "SIZE_LIMIT");
    }

    #[tokio::test]
    async fn streamed_body_without_content_length_is_aborted_once_over_limit() {
        use axum::body::Body;
        use axum::response::Response;
        use axum::{routing::get, Router};
        use futures_util::stream;

        async fn big_stream() -> Response {
            let chunks: Vec<std::result::Result<Vec<u8>, std::io::Error>> =
                (0..20).map(|_| Ok(vec![b'x'; 1024])).collect();
            Response::builder()
                .status(200)
                .body(Body::from_stream(stream::iter(chunks)))
                .unwrap()
        }

        let app = Router::new().route("/", get(big_stream));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let fetcher = fetcher_for_test().await;
        let err = fetcher
            .get(&format!("http://{addr}/"), &BTreeMap::new(), None, 2_000)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "SIZE_LIMIT");
    }

    #[tokio::test]
    async fn response_within_limit_is_read_in_full() {
        use axum::{routing::get, Router};

        let app = Router::new().route("/", get(|| async { "hello world" }));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let fetcher = fetcher_for_test().await;
        let resp = fetcher
            .get(&format!("http://{addr}/"), &BTreeMap::new(), None, 1_000)
            .await
            .unwrap();
        assert_eq!(resp.bytes, b"hello world");
    }
}
