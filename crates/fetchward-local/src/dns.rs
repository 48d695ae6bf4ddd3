//! Safe DNS resolver: resolve-then-validate, with bounded CNAME following
//! and cycle detection, so the connection pool only ever dials an address that
//! has already passed the host-admission predicate.

use fetchward_core::{DnsErrorKind, Error, Result};
use hickory_resolver::config::{ResolverConfig, ResolverOpts};
use hickory_resolver::proto::rr::RecordType;
use hickory_resolver::TokioAsyncResolver;
use std::collections::HashSet;
use std::net::IpAddr;
use std::time::Duration;

use crate::ip_classify::is_blocked_ip;
use crate::normalize::NormalizeConfig;

const MAX_CNAME_DEPTH: usize = 5;

#[derive(Debug, Clone)]
pub struct DnsConfig {
    pub timeout_ms: u64,
}

impl Default for DnsConfig {
    fn default() -> Self {
        Self { timeout_ms: 5_000 }
    }
}

pub struct SafeResolver {
    inner: TokioAsyncResolver,
    dns_cfg: DnsConfig,
    host_cfg: NormalizeConfig,
}

impl SafeResolver {
    pub fn new(dns_cfg: DnsConfig, host_cfg: NormalizeConfig) -> Self {
        let mut opts = ResolverOpts::default();
        opts.timeout = Duration::from_millis(dns_cfg.timeout_ms);
        let inner = TokioAsyncResolver::tokio(ResolverConfig::default(), opts);
        Self {
            inner,
            dns_cfg,
            host_cfg,
        }
    }

    /// `assert_safe(hostname)`: follow CNAMEs (bounded, cycle-detected),
    /// re-validate the host predicate at each hop, resolve A/AAAA, and reject
    /// any address that classifies as blocked.
    ///
    /// The returned addresses are the ones the fetcher should connect to
    /// directly (DNS-rebinding pinning): re-resolving at connect time would
    /// reopen the TOCTOU gap this function exists to close.
    pub async fn assert_safe(&self, hostname: &str) -> Result<Vec<IpAddr>> {
        if hostname.is_empty() {
            return Err(dns_err(DnsErrorKind::Einval, "empty hostname"));
        }
        if let Ok(ip) = hostname.parse::<IpAddr>() {
            if is_blocked_ip(&ip) {
                return Err(dns_err(
                    DnsErrorKind::Eblocked,
                    format!("blocked IP literal: {hostname}"),
                ));
            }
            return Ok(vec![ip]);
        }

        let terminal = self.follow_cnames(hostname).await?;

        let deadline = Duration::from_millis(self.dns_cfg.timeout_ms);
        let lookup = tokio::time::timeout(deadline, self.inner.lookup_ip(terminal.as_str()))
            .await
            .map_err(|_| dns_err(DnsErrorKind::Etimeout, format!("DNS timeout for {terminal}")))?
            .map_err(|e| classify_lookup_error(&terminal, e))?;

        let addrs: Vec<IpAddr> = lookup.iter().collect();
        if addrs.is_empty() {
            return Err(dns_err(
                DnsErrorKind::Enodata,
                format!("no A/AAAA records for {terminal}"),
            ));
        }

        for addr in &addrs {
            if is_blocked_ip(addr) {
                return Err(dns_err(
                    DnsErrorKind::Eblocked,
                    format!("{terminal} resolved to blocked address {addr}"),
                ));
            }
        }

        Ok(addrs)
    }

    /// Follows CNAME records up to [`MAX_CNAME_DEPTH`] with cycle detection,
    /// applying the host predicate to every intermediate name, and returns the
    /// terminal (non-CNAME) name to resolve A/AAAA for.
    async fn follow_cnames(&self, hostname: &str) -> Result<String> {
        let mut current = hostname.to_ascii_lowercase();
        let mut seen = HashSet::new();
        seen.insert(current.clone());

        for _ in 0..MAX_CNAME_DEPTH {
            self.check_host_predicate(&current)?;

            let deadline = Duration::from_millis(self.dns_cfg.timeout_ms);
            let lookup = match tokio::time::timeout(
                deadline,
                self.inner.lookup(current.as_str(), RecordType::CNAME),
            )
            .await
            {
                Ok(Ok(l)) => l,
                // No CNAME record (NXDOMAIN-for-type or NODATA) means `current`
                // is already the terminal name.
                Ok(Err(_)) => return Ok(current),
                Err(_) => {
                    return Err(dns_err(
                        DnsErrorKind::Etimeout,
                        format!("DNS timeout resolving CNAME for {current}"),
                    ))
                }
            };

            let mut next = None;
            for record in lookup.record_iter() {
                if let Some(cname) = record.data().and_then(|d| d.as_cname()) {
                    next = Some(cname.0.to_ascii().trim_end_matches('.').to_ascii_lowercase());
                    break;
                }
            }

            match next {
                Some(target) => {
                    if !seen.insert(target.clone()) {
                        return Err(dns_err(
                            DnsErrorKind::Eblocked,
                            format!("CNAME cycle detected at {target}"),
                        ));
                    }
                    current = target;
                }
                None => return Ok(current),
            }
        }

        Err(dns_err(
            DnsErrorKind::Eblocked,
            format!("CNAME chain for {hostname} exceeds depth {MAX_CNAME_DEPTH}"),
        ))
    }

    fn check_host_predicate(&self, host: &str) -> Result<()> {
        if self
            .host_cfg
            .blocked_hosts
            .iter()
            .any(|b| b.eq_ignore_ascii_case(host))
        {
            return Err(dns_err(
                DnsErrorKind::Eblocked,
                format!("blocked host: {host}"),
            ));
        }
        if self
            .host_cfg
            .blocked_host_suffixes
            .iter()
            .any(|suf| host.ends_with(suf.as_str()))
        {
            return Err(dns_err(
                DnsErrorKind::Eblocked,
                format!("blocked host suffix: {host}"),
            ));
        }
        Ok(())
    }
}

fn dns_err(kind: DnsErrorKind, message: impl Into<String>) -> Error {
    Error::Dns(kind, message.into())
}

fn classify_lookup_error(host: &str, e: hickory_resolver::error::ResolveError) -> Error {
    use hickory_resolver::error::ResolveErrorKind;
    match e.kind() {
        ResolveErrorKind::NoRecordsFound { .. } => dns_err(
            DnsErrorKind::Enodata,
            format!("no A/AAAA records for {host}"),
        ),
        ResolveErrorKind::Timeout => {
            dns_err(DnsErrorKind::Etimeout, format!("DNS timeout for {host}"))
        }
        _ => dns_err(DnsErrorKind::Einval, format!("DNS error for {host}: {e}")),
    }
}
