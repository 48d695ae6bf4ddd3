//! Host/Origin gate: an allow-list built once at startup, consulted on every
//! request to reject spoofed `Host`/`Origin` headers.

use std::collections::HashSet;

pub struct HostGate {
    allowed: HashSet<String>,
}

impl HostGate {
    /// Builds the allow-list from loopback aliases, the configured bind
    /// host (if not a wildcard), and explicit entries.
    pub fn new(bind_host: &str, explicit: &[String]) -> Self {
        let mut allowed: HashSet<String> = ["localhost", "127.0.0.1", "::1"]
            .into_iter()
            .map(String::from)
            .collect();

        if bind_host != "0.0.0.0" && bind_host != "::" && !bind_host.is_empty() {
            allowed.insert(bind_host.to_ascii_lowercase());
        }

        for entry in explicit {
            let trimmed = entry.trim();
            if !trimmed.is_empty() {
                allowed.insert(trimmed.to_ascii_lowercase());
            }
        }

        Self { allowed }
    }

    /// Strips brackets from an IPv6 literal and the port from any
    /// non-IPv6-literal host, then lower-cases it.
    fn normalize_host(raw: &str) -> String {
        let trimmed = raw.trim();
        if let Some(inner) = trimmed.strip_prefix('[') {
            if let Some(end) = inner.find(']') {
                return inner[..end].to_ascii_lowercase();
            }
        }
        let host = trimmed.rsplit_once(':').map(|(h, _)| h).unwrap_or(trimmed);
        host.to_ascii_lowercase()
    }

    pub fn check_host(&self, host_header: &str) -> bool {
        self.allowed.contains(&Self::normalize_host(host_header))
    }

    /// An absent `Origin` header admits; a present one must parse and match
    /// the allow-list.
    pub fn check_origin(&self, origin_header: Option<&str>) -> bool {
        let Some(origin) = origin_header else {
            return true;
        };
        match url::Url::parse(origin) {
            Ok(u) => match u.host_str() {
                Some(h) => self.allowed.contains(&h.to_ascii_lowercase()),
                None => false,
            },
            Err(_) => false,
        }
    }
}
