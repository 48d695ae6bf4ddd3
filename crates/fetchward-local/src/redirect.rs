//! Redirect follower: a manual state machine over `(current_url, hop_count)`.
//!
//! Each hop is fetched with `redirect: manual` (the fetcher never follows
//! redirects itself); this module decides whether to re-normalize, preflight,
//! and continue, or to surface the response as terminal.

use fetchward_core::{Error, Result};
use reqwest::Url;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use crate::dns::SafeResolver;
use crate::fetcher::{ConnectionPoolFetcher, RawGetResponse};
use crate::normalize::{self, NormalizeConfig};

const REDIRECT_STATUSES: [u16; 5] = [301, 302, 303, 307, 308];

#[derive(Debug, Clone)]
pub struct RedirectConfig {
    pub max_redirects: u32,
}

impl Default for RedirectConfig {
    fn default() -> Self {
        Self { max_redirects: 10 }
    }
}

pub struct RedirectFollower {
    fetcher: ConnectionPoolFetcher,
    resolver: Arc<SafeResolver>,
    host_cfg: NormalizeConfig,
    cfg: RedirectConfig,
}

impl RedirectFollower {
    pub fn new(
        fetcher: ConnectionPoolFetcher,
        resolver: Arc<SafeResolver>,
        host_cfg: NormalizeConfig,
        cfg: RedirectConfig,
    ) -> Self {
        Self {
            fetcher,
            resolver,
            host_cfg,
            cfg,
        }
    }

    /// Drives hops until a non-redirect status is reached or the hop budget
    /// is exhausted. Returns the terminal response plus the URL it came from.
    pub async fn follow(
        &self,
        input_url: &str,
        headers: &BTreeMap<String, String>,
        timeout: Option<Duration>,
        max_bytes: usize,
    ) -> Result<(RawGetResponse, String)> {
        let mut current_url = input_url.to_string();
        let mut hop: u32 = 0;

        loop {
            self.resolver
                .assert_safe(&hostname_of(&current_url)?)
                .await?;

            let resp = self
                .fetcher
                .get(&current_url, headers, timeout, max_bytes)
                .await
                .map_err(|e| annotate(e, &current_url))?;

            if !REDIRECT_STATUSES.contains(&resp.status) {
                return Ok((resp, current_url));
            }

            if hop >= self.cfg.max_redirects {
                return Err(Error::Redirect(format!(
                    "Too many redirects (> {})",
                    self.cfg.max_redirects
                )));
            }

            let location = resp
                .headers
                .iter()
                .find(|(k, _)| k.eq_ignore_ascii_case("location"))
                .map(|(_, v)| v.clone())
                .ok_or_else(|| {
                    Error::Redirect(format!(
                        "redirect status {} with no Location header",
                        resp.status
                    ))
                })?;

            let base = Url::parse(&current_url)
                .map_err(|e| Error::Redirect(format!("current URL unparseable: {e}")))?;
            let target = base
                .join(&location)
                .map_err(|e| Error::Redirect(format!("unparseable redirect target: {e}")))?;

            if !target.username().is_empty() || target.password().is_some() {
                return Err(Error::Redirect(
                    "redirect target contains userinfo".to_string(),
                ));
            }

            let normalized = normalize::normalize(target.as_str(), &self.host_cfg)?;

            current_url = normalized.url;
            hop += 1;
        }
    }
}

fn hostname_of(url: &str) -> Result<String> {
    Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(|h| h.to_string()))
        .ok_or_else(|| Error::Validation(format!("URL has no hostname: {url}")))
}

fn annotate(err: Error, request_url: &str) -> Error {
    match err {
        Error::Network(_) => Error::Network(request_url.to_string()),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn redirect_statuses_are_exactly_spec_set() {
        assert_eq!(REDIRECT_STATUSES, [301, 302, 303, 307, 308]);
    }

    #[test]
    fn hostname_of_extracts_host() {
        assert_eq!(
            hostname_of("https://example.com/a").unwrap(),
            "example.com"
        );
    }

    #[test]
    fn hostname_of_rejects_unparseable() {
        assert!(hostname_of("not a url").is_err());
    }
}
