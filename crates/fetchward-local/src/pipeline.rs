//! Fetch pipeline: normalize + rewrite → cache lookup → fetch →
//! transform → cache-store → return pipeline result.
//!
//! Concurrent callers for the same fingerprint coalesce onto a single build
//! (single-flight); the in-flight slot is released before the cache is
//! written, so a failed build never poisons a later attempt.

use fetchward_core::{Artifact, Error, FetchRequest, FetchResult, Fingerprint, Result, Transform};
use parking_lot::Mutex;
use rand::Rng;
use std::collections::BTreeMap;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use crate::cache::Cache;
use crate::decode;
use crate::normalize::{self, NormalizeConfig};
use crate::redirect::RedirectFollower;
use crate::rewrite;

#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub min_attempts: u32,
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub max_retry_after_s: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            min_attempts: 1,
            max_attempts: 10,
            base_delay_ms: 1_000,
            max_delay_ms: 10_000,
            max_retry_after_s: 30,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub max_content_bytes: usize,
    pub timeout_ms: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_content_bytes: 10 * 1024 * 1024,
            timeout_ms: 30_000,
        }
    }
}

pub struct FetchPipeline {
    cache: Arc<Cache>,
    redirect: Arc<RedirectFollower>,
    transform: Arc<dyn Transform>,
    host_cfg: NormalizeConfig,
    retry_cfg: RetryConfig,
    pipeline_cfg: PipelineConfig,
    in_flight: Mutex<HashMap<String, broadcast::Sender<FlightOutcome>>>,
}

/// `Error` isn't `Clone`-friendly across a broadcast channel in every case a
/// caller might want to branch on, so the single-flight channel carries the
/// plain `Result` directly; `fetchward_core::Error` derives `Clone`.
type FlightOutcome = Result<FetchResult>;

impl FetchPipeline {
    pub fn new(
        cache: Arc<Cache>,
        redirect: Arc<RedirectFollower>,
        transform: Arc<dyn Transform>,
        host_cfg: NormalizeConfig,
        retry_cfg: RetryConfig,
        pipeline_cfg: PipelineConfig,
    ) -> Self {
        Self {
            cache,
            redirect,
            transform,
            host_cfg,
            retry_cfg,
            pipeline_cfg,
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    pub async fn fetch(&self, req: &FetchRequest, cancel: CancellationToken) -> Result<FetchResult> {
        let normalized = normalize::normalize(&req.url, &self.host_cfg)?;
        let rewritten = rewrite::rewrite(&normalized.url);
        let normalized_url = rewritten.url;

        let fingerprint = Fingerprint::new(&req.namespace, &normalized_url, &req.variation);
        let fp_key = fingerprint.key();

        if req.cache.read && !req.cache.force_refresh {
            if let Some(artifact) = self.cache.get(&fp_key) {
                return Ok(FetchResult {
                    data: artifact,
                    from_cache: true,
                    url: normalized_url.clone(),
                    original_url: req.url.clone(),
                    final_url: None,
                    fetched_at: now_ms(),
                    fingerprint: fp_key,
                });
            }
        }

        let (is_owner, mut rx) = {
            let mut map = self.in_flight.lock();
            if let Some(tx) = map.get(&fp_key) {
                (false, tx.subscribe())
            } else {
                let (tx, rx) = broadcast::channel(1);
                map.insert(fp_key.clone(), tx);
                (true, rx)
            }
        };

        if !is_owner {
            return rx
                .recv()
                .await
                .map_err(|_| Error::Unknown("single-flight build was dropped".to_string()))?;
        }

        let built = self
            .build(req, &normalized_url, &fingerprint, cancel)
            .await;

        let tx = self.in_flight.lock().remove(&fp_key);
        if let Some(tx) = tx {
            let _ = tx.send(built.clone());
        }

        if let Ok(ref result) = built {
            if req.cache.write {
                self.store(&fingerprint, result);
                if let Some(final_url) = &result.final_url {
                    if final_url != &normalized_url {
                        let final_fp = Fingerprint::new(&req.namespace, final_url, &req.variation);
                        if final_fp.key() != fp_key {
                            self.store(&final_fp, result);
                        }
                    }
                }
            }
        }

        built
    }

    async fn build(
        &self,
        req: &FetchRequest,
        normalized_url: &str,
        fingerprint: &Fingerprint,
        cancel: CancellationToken,
    ) -> Result<FetchResult> {
        let timeout = req
            .timeout()
            .unwrap_or_else(|| Duration::from_millis(self.pipeline_cfg.timeout_ms));
        let max_bytes = req
            .max_bytes
            .map(|b| b as usize)
            .unwrap_or(self.pipeline_cfg.max_content_bytes);

        let (resp, final_url) = self
            .fetch_with_retry(normalized_url, &req.headers, timeout, max_bytes, &cancel)
            .await?;

        if resp.status == 429 {
            return Err(Error::RateLimited {
                retry_after_s: retry_after_from_headers(&resp.headers, self.retry_cfg.max_retry_after_s),
            });
        }
        if resp.status >= 400 {
            return Err(Error::Http(
                format!("upstream returned status {}", resp.status),
                resp.status,
            ));
        }

        let content_type = resp
            .headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case("content-type"))
            .map(|(_, v)| v.clone());
        let content_encoding = resp
            .headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case("content-encoding"))
            .map(|(_, v)| v.clone());

        let decoded = decode::read_buffer(
            &resp.bytes,
            content_encoding.as_deref(),
            content_type.as_deref(),
            max_bytes,
            None,
            decode::SizeMode::Strict,
        )?;

        let artifact = self.transform.transform(
            &decoded.buffer,
            &decoded.encoding,
            &final_url,
            &serde_json::json!({}),
        )?;

        Ok(FetchResult {
            data: artifact,
            from_cache: false,
            url: normalized_url.to_string(),
            original_url: req.url.clone(),
            final_url: Some(final_url),
            fetched_at: now_ms(),
            fingerprint: fingerprint.key(),
        })
    }

    async fn fetch_with_retry(
        &self,
        url: &str,
        headers: &BTreeMap<String, String>,
        timeout: Duration,
        max_bytes: usize,
        cancel: &CancellationToken,
    ) -> Result<(crate::fetcher::RawGetResponse, String)> {
        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            if cancel.is_cancelled() {
                return Err(Error::Aborted(format!("fetch of {url} was cancelled")));
            }

            let outcome = tokio::select! {
                res = self.redirect.follow(url, headers, Some(timeout), max_bytes) => res,
                _ = cancel.cancelled() => return Err(Error::Aborted(format!("fetch of {url} was cancelled"))),
            };

            match outcome {
                Ok(ok) => return Ok(ok),
                Err(err) => {
                    if !should_retry(&err, attempt, &self.retry_cfg) {
                        return Err(err);
                    }
                    let delay = retry_delay(&err, attempt, &self.retry_cfg);
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = cancel.cancelled() => {
                            return Err(Error::Aborted(format!("fetch of {url} was cancelled")));
                        }
                    }
                }
            }
        }
    }

    fn store(&self, fingerprint: &Fingerprint, result: &FetchResult) {
        self.cache.set(
            &fingerprint.key(),
            &result.url,
            result.fetched_at,
            result.data.clone(),
            false,
        );
    }
}

fn should_retry(err: &Error, attempt: u32, cfg: &RetryConfig) -> bool {
    if attempt >= cfg.max_attempts {
        return false;
    }
    match err {
        Error::Validation(_) | Error::Aborted(_) | Error::Blocked(_) => false,
        Error::Http(_, status) => *status == 429,
        Error::Timeout(..) | Error::Network(_) => true,
        _ => false,
    }
}

/// Exponential backoff with full jitter, honoring `Retry-After` on 429.
fn retry_delay(err: &Error, attempt: u32, cfg: &RetryConfig) -> Duration {
    if let Error::Http(_, 429) = err {
        let capped = cfg.max_retry_after_s;
        return Duration::from_secs(capped.min(cfg.max_retry_after_s));
    }
    let exp_ms = cfg.base_delay_ms.saturating_mul(1u64 << attempt.min(10));
    let capped_ms = exp_ms.min(cfg.max_delay_ms);
    let jittered = rand::thread_rng().gen_range(0..=capped_ms.max(1));
    Duration::from_millis(jittered)
}

/// Parse an upstream `Retry-After` header (seconds or HTTP-date), falling
/// back to 60s when absent or unparseable, capped at `cap_s`.
fn retry_after_from_headers(headers: &BTreeMap<String, String>, cap_s: u64) -> u64 {
    const FALLBACK_S: u64 = 60;
    let raw = headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case("retry-after"))
        .map(|(_, v)| v.trim());

    let seconds = match raw {
        None => FALLBACK_S,
        Some(v) => v
            .parse::<u64>()
            .ok()
            .or_else(|| httpdate::parse_http_date(v).ok().and_then(|when| {
                when.duration_since(SystemTime::now())
                    .ok()
                    .map(|d| d.as_secs())
            }))
            .unwrap_or(FALLBACK_S),
    };

    seconds.min(cap_s)
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_errors_are_never_retried() {
        let cfg = RetryConfig::default();
        assert!(!should_retry(&Error::Validation("bad".into()), 1, &cfg));
    }

    #[test]
    fn client_errors_other_than_429_are_never_retried() {
        let cfg = RetryConfig::default();
        assert!(!should_retry(&Error::Http("nope".into(), 404), 1, &cfg));
    }

    #[test]
    fn rate_limited_is_retried_within_budget() {
        let cfg = RetryConfig::default();
        assert!(should_retry(&Error::Http("limited".into(), 429), 1, &cfg));
        assert!(!should_retry(&Error::Http("limited".into(), 429), 10, &cfg));
    }

    #[test]
    fn timeouts_and_network_errors_are_retried() {
        let cfg = RetryConfig::default();
        assert!(should_retry(&Error::Timeout("t".into(), 1000), 1, &cfg));
        assert!(should_retry(&Error::Network("n".into()), 1, &cfg));
    }

    #[test]
    fn retry_after_429_is_capped() {
        let cfg = RetryConfig::default();
        let d = retry_delay(&Error::Http("x".into(), 429), 1, &cfg);
        assert!(d.as_secs() <= cfg.max_retry_after_s);
    }

    #[test]
    fn backoff_never_exceeds_max_delay() {
        let cfg = RetryConfig::default();
        let d = retry_delay(&Error::Timeout("t".into(), 0), 9, &cfg);
        assert!(d.as_millis() as u64 <= cfg.max_delay_ms);
    }

    #[test]
    fn retry_after_header_numeric_seconds_is_used() {
        let mut headers = BTreeMap::new();
        headers.insert("Retry-After".to_string(), "15".to_string());
        assert_eq!(retry_after_from_headers(&headers, 30), 15);
    }

    #[test]
    fn retry_after_header_is_capped() {
        let mut headers = BTreeMap::new();
        headers.insert("retry-after".to_string(), "120".to_string());
        assert_eq!(retry_after_from_headers(&headers, 30), 30);
    }

    #[test]
    fn retry_after_header_missing_falls_back_to_60_capped() {
        let headers = BTreeMap::new();
        assert_eq!(retry_after_from_headers(&headers, 30), 30);
    }

    #[test]
    fn retry_after_header_unparseable_falls_back_to_60_capped() {
        let mut headers = BTreeMap::new();
        headers.insert("Retry-After".to_string(), "not-a-date".to_string());
        assert_eq!(retry_after_from_headers(&headers, 30), 30);
    }
}
