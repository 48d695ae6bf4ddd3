//! `fetchward-local`: the in-process fetch engine.
//!
//! [`Engine`] wires the safety layers together in the order the pipeline
//! actually runs them: normalize + rewrite happen inline in
//! [`pipeline::FetchPipeline`]; DNS resolution, the connection pool, and
//! redirect following are constructed here and handed to the pipeline;
//! decoding and the response shaper are stateless and called directly by
//! their callers.

pub mod cache;
pub mod decode;
pub mod dns;
pub mod fetcher;
pub mod ip_classify;
pub mod normalize;
pub mod pipeline;
pub mod redirect;
pub mod rewrite;
pub mod shaper;
pub mod transform;

use std::sync::Arc;

use fetchward_core::{Error, FetchRequest, FetchResult, Result, Transform};
use tokio_util::sync::CancellationToken;

use cache::Cache;
use dns::{DnsConfig, SafeResolver};
use fetcher::{ConnectionPoolFetcher, FetcherConfig};
use normalize::NormalizeConfig;
use pipeline::{FetchPipeline, PipelineConfig, RetryConfig};
use redirect::{RedirectConfig, RedirectFollower};
use transform::DefaultTransform;

#[derive(Debug, Clone, Default)]
pub struct EngineConfig {
    pub host: NormalizeConfig,
    pub dns: DnsConfig,
    pub fetcher: FetcherConfig,
    pub redirect: RedirectConfig,
    pub retry: RetryConfig,
    pub pipeline: PipelineConfig,
    pub cache_max_entries: usize,
}

/// Default cache capacity when a caller builds `EngineConfig` without
/// overriding `cache_max_entries` (its `Default` derive would otherwise
/// leave this at `0`, which [`Cache`] treats as "never evict").
pub const DEFAULT_CACHE_MAX_ENTRIES: usize = 1_000;

/// Wires together the safe resolver, connection pool, redirect follower,
/// cache, and fetch pipeline into one fetch entry point.
pub struct Engine {
    pub cache: Arc<Cache>,
    pipeline: FetchPipeline,
}

impl Engine {
    pub fn new(mut cfg: EngineConfig) -> Result<Self> {
        if cfg.cache_max_entries == 0 {
            cfg.cache_max_entries = DEFAULT_CACHE_MAX_ENTRIES;
        }

        let resolver = Arc::new(SafeResolver::new(cfg.dns.clone(), cfg.host.clone()));
        let fetcher = ConnectionPoolFetcher::new(cfg.fetcher.clone(), resolver.clone())?;
        let redirect = Arc::new(RedirectFollower::new(
            fetcher,
            resolver,
            cfg.host.clone(),
            cfg.redirect.clone(),
        ));
        let cache = Arc::new(Cache::new(cfg.cache_max_entries));
        let transform: Arc<dyn Transform> = Arc::new(DefaultTransform);

        let pipeline = FetchPipeline::new(
            cache.clone(),
            redirect,
            transform,
            cfg.host,
            cfg.retry,
            cfg.pipeline,
        );

        Ok(Self { cache, pipeline })
    }

    /// Replace the transform used for newly-built (non-cached) fetches.
    pub fn with_transform(
        cache: Arc<Cache>,
        redirect: Arc<RedirectFollower>,
        transform: Arc<dyn Transform>,
        host_cfg: NormalizeConfig,
        retry_cfg: RetryConfig,
        pipeline_cfg: PipelineConfig,
    ) -> Self {
        let pipeline = FetchPipeline::new(cache.clone(), redirect, transform, host_cfg, retry_cfg, pipeline_cfg);
        Self { cache, pipeline }
    }

    pub async fn fetch(&self, req: &FetchRequest, cancel: CancellationToken) -> Result<FetchResult> {
        self.pipeline.fetch(req, cancel).await
    }
}

pub fn unsupported(op: &str) -> Error {
    Error::NotSupported(op.to_string())
}
