//! Session store & admission controller: a capacity- and TTL-bounded map from
//! session id to session entry, plus an `in_flight` counter for sessions that
//! are still completing the initialize handshake.
//!
//! The map is mutated only under a short critical section (mirrors the
//! cache's [`parking_lot::Mutex`] discipline in `fetchward-local`); the
//! `in_flight` counter is a standalone atomic.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;

#[derive(Debug, Clone)]
pub struct SessionEntry {
    pub created_at: u64,
    pub last_seen: u64,
    pub protocol_initialized: bool,
}

#[derive(Debug, Clone, Copy)]
pub struct SessionConfig {
    pub max_sessions: usize,
    pub ttl_ms: u64,
    pub init_timeout_ms: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_sessions: 1_000,
            ttl_ms: 30 * 60 * 1000,
            init_timeout_ms: 10_000,
        }
    }
}

pub struct SessionStore {
    sessions: Mutex<HashMap<String, SessionEntry>>,
    in_flight: AtomicUsize,
    cfg: SessionConfig,
}

#[derive(Debug, thiserror::Error)]
pub enum AdmissionError {
    #[error("server busy")]
    ServerBusy,
}

impl SessionStore {
    pub fn new(cfg: SessionConfig) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            in_flight: AtomicUsize::new(0),
            cfg,
        }
    }

    pub fn get(&self, id: &str) -> Option<SessionEntry> {
        self.sessions.lock().get(id).cloned()
    }

    pub fn touch(&self, id: &str) {
        let mut sessions = self.sessions.lock();
        if let Some(entry) = sessions.get_mut(id) {
            entry.last_seen = now_ms();
        }
    }

    pub fn set(&self, id: String, entry: SessionEntry) {
        self.sessions.lock().insert(id, entry);
    }

    pub fn remove(&self, id: &str) -> Option<SessionEntry> {
        self.sessions.lock().remove(id)
    }

    pub fn size(&self) -> usize {
        self.sessions.lock().len()
    }

    pub fn clear(&self) {
        self.sessions.lock().clear();
    }

    pub fn evict_expired(&self) -> Vec<(String, SessionEntry)> {
        let cutoff = now_ms().saturating_sub(self.cfg.ttl_ms);
        let mut sessions = self.sessions.lock();
        let expired: Vec<String> = sessions
            .iter()
            .filter(|(_, e)| e.last_seen < cutoff)
            .map(|(k, _)| k.clone())
            .collect();
        expired
            .into_iter()
            .filter_map(|k| sessions.remove(&k).map(|e| (k, e)))
            .collect()
    }

    pub fn evict_oldest(&self) -> Option<(String, SessionEntry)> {
        let mut sessions = self.sessions.lock();
        let oldest = sessions
            .iter()
            .min_by_key(|(_, e)| e.last_seen)
            .map(|(k, _)| k.clone())?;
        sessions.remove(&oldest).map(|e| (oldest, e))
    }

    /// Reserves an in-flight slot for a new, not-yet-initialized session.
    /// Attempts one `evict_oldest` if at capacity before giving up.
    pub fn reserve(&self) -> Result<(), AdmissionError> {
        let in_flight = self.in_flight.load(Ordering::SeqCst);
        if self.size() + in_flight >= self.cfg.max_sessions {
            self.evict_oldest();
            if self.size() + self.in_flight.load(Ordering::SeqCst) >= self.cfg.max_sessions {
                return Err(AdmissionError::ServerBusy);
            }
        }
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    /// Completes a reservation: releases the in-flight slot and registers the
    /// session as initialized.
    pub fn complete_init(&self, id: String) {
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        let now = now_ms();
        self.set(
            id,
            SessionEntry {
                created_at: now,
                last_seen: now,
                protocol_initialized: true,
            },
        );
    }

    /// Releases a reservation without registering a session: the
    /// initialize handshake timed out or the transport closed first.
    pub fn abandon_init(&self) {
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    pub fn init_timeout(&self) -> Duration {
        Duration::from_millis(self.cfg.init_timeout_ms)
    }

    /// Background evictor period: `clamp(ttl/2, 10s, 60s)`.
    pub fn evictor_interval(&self) -> Duration {
        let half_ttl_ms = self.cfg.ttl_ms / 2;
        Duration::from_millis(half_ttl_ms.clamp(10_000, 60_000))
    }
}

pub fn new_session_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Spawns the background evictor loop. Returns a handle the caller can abort
/// on shutdown.
pub fn spawn_evictor(store: Arc<SessionStore>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(store.evictor_interval());
        loop {
            ticker.tick().await;
            let expired = store.evict_expired();
            if !expired.is_empty() {
                tracing::debug!(count = expired.len(), "evicted expired sessions");
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
