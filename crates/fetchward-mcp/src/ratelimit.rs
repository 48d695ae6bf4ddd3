//! Rate limiter: a fixed-window counter keyed by client identifier, with a
//! periodic evictor for stale entries.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;

#[derive(Debug, Clone)]
struct Entry {
    count: u64,
    reset_at: u64,
    last_accessed: u64,
}

#[derive(Debug, Clone, Copy)]
pub struct RateLimitConfig {
    pub enabled: bool,
    pub max_requests: u64,
    pub window_ms: u64,
    pub cleanup_interval_ms: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_requests: 60,
            window_ms: 60_000,
            cleanup_interval_ms: 60_000,
        }
    }
}

pub enum Admission {
    Admitted,
    /// `Retry-After`, in whole seconds, rounded up.
    Rejected { retry_after_s: u64 },
}

pub struct RateLimiter {
    entries: Mutex<HashMap<String, Entry>>,
    cfg: RateLimitConfig,
}

impl RateLimiter {
    pub fn new(cfg: RateLimitConfig) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            cfg,
        }
    }

    pub fn check(&self, client: &str) -> Admission {
        if !self.cfg.enabled {
            return Admission::Admitted;
        }
        let now = now_ms();
        let mut entries = self.entries.lock();
        let entry = entries.entry(client.to_string()).or_insert(Entry {
            count: 0,
            reset_at: 0,
            last_accessed: now,
        });

        if entry.count == 0 || now > entry.reset_at {
            entry.count = 1;
            entry.reset_at = now + self.cfg.window_ms;
            entry.last_accessed = now;
            return Admission::Admitted;
        }

        entry.count += 1;
        entry.last_accessed = now;

        if entry.count > self.cfg.max_requests {
            let retry_after_s = entry.reset_at.saturating_sub(now).div_ceil(1000);
            Admission::Rejected { retry_after_s }
        } else {
            Admission::Admitted
        }
    }

    pub fn evict_stale(&self) -> usize {
        let now = now_ms();
        let threshold = 2 * self.cfg.window_ms;
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|_, e| now.saturating_sub(e.last_accessed) <= threshold);
        before - entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

pub fn spawn_evictor(limiter: Arc<RateLimiter>, interval: Duration) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            let evicted = limiter.evict_stale();
            if evicted > 0 {
                tracing::debug!(count = evicted, "evicted stale rate-limit entries");
            }
        }
    })
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

    fn cfg(max: u64, window_ms: u64) -> RateLimitConfig {
        RateLimitConfig {
            enabled: true,
            max_requests: max,
            window_ms,
            cleanup_interval_ms: window_ms,
        }
    }

    #[test]
    fn admits_under_limit() {
        let limiter = RateLimiter::new(cfg(3, 60_000));
        for _ in 0..3 {
            assert!(matches!(limiter.check("a"), Admission::Admitted));
        }
    }

    #[test]
    fn rejects_over_limit_with_retry_after() {
        let limiter = RateLimiter::new(cfg(1, 60_000));
        assert!(matches!(limiter.check("a"), Admission::Admitted));
        match limiter.check("a") {
            Admission::Rejected { retry_after_s } => assert!(retry_after_s > 0 && retry_after_s <= 60),
            Admission::Admitted => panic!("expected rejection"),
        }
    }

    #[test]
    fn different_clients_have_independent_windows() {
        let limiter = RateLimiter::new(cfg(1, 60_000));
        assert!(matches!(limiter.check("a"), Admission::Admitted));
        assert!(matches!(limiter.check("b"), Admission::Admitted));
    }

    #[test]
    fn disabled_limiter_always_admits() {
        let limiter = RateLimiter::new(RateLimitConfig {
            enabled: false,
            ..cfg(1, 60_000)
        });
        for _ in 0..10 {
            assert!(matches!(limiter.check("a"), Admission::Admitted));
        }
    }

    #[test]
    fn evict_stale_removes_old_entries_only() {
        let limiter = RateLimiter::new(cfg(5, 100));
        limiter.check("a");
        {
            let mut entries = limiter.entries.lock();
            let e = entries.get_mut("a").unwrap();
            e.last_accessed = 0;
        }
        limiter.check("b");
        let evicted = limiter.evict_stale();
        assert_eq!(evicted, 1);
        assert_eq!(limiter.len(), 1);
    }
}
