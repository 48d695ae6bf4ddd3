//! In-memory cache: fingerprint → cache entry, insertion-order eviction,
//! synchronous update listeners.
//!
//! The cache map is mutated only inside a short critical section; listeners
//! are invoked after the lock is released so a re-entrant listener can't
//! deadlock on the same map.

use fetchward_core::{Artifact, CacheEntry};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Parsed key a listener is notified with: `{namespace, url_hash, fingerprint}`.
#[derive(Debug, Clone)]
pub struct CacheUpdate {
    pub namespace: String,
    pub url_hash: String,
    pub fingerprint: String,
}

/// A cache-update listener, held without extending the listener's lifetime:
/// callers register an `Arc` and the cache only ever holds a `Weak` to it.
pub type Listener = std::sync::Weak<dyn Fn(&CacheUpdate) + Send + Sync>;

struct Slot {
    entry: CacheEntry,
    insertion_order: u64,
}

pub struct Cache {
    max_entries: usize,
    entries: Mutex<BTreeMap<String, Slot>>,
    next_order: AtomicU64,
    listeners: Mutex<Vec<Listener>>,
}

impl Cache {
    pub fn new(max_entries: usize) -> Self {
        Self {
            max_entries,
            entries: Mutex::new(BTreeMap::new()),
            next_order: AtomicU64::new(0),
            listeners: Mutex::new(Vec::new()),
        }
    }

    /// Does not update insertion order.
    pub fn get(&self, fingerprint: &str) -> Option<Artifact> {
        self.entries
            .lock()
            .get(fingerprint)
            .map(|s| s.entry.content.clone())
    }

    pub fn set(&self, fingerprint: &str, url: &str, fetched_at: u64, content: Artifact, force: bool) {
        let order = self.next_order.fetch_add(1, Ordering::SeqCst);
        let evicted = {
            let mut entries = self.entries.lock();
            if force {
                entries.remove(fingerprint);
            }
            entries.insert(
                fingerprint.to_string(),
                Slot {
                    entry: CacheEntry {
                        content,
                        url: url.to_string(),
                        fetched_at,
                        insertion_order: order,
                    },
                    insertion_order: order,
                },
            );
            evict_if_over_capacity(&mut entries, self.max_entries)
        };
        let _ = evicted;
        self.notify(fingerprint);
    }

    pub fn delete(&self, fingerprint: &str) {
        self.entries.lock().remove(fingerprint);
        self.notify(fingerprint);
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn register_listener(&self, listener: Listener) {
        self.listeners.lock().push(listener);
    }

    fn notify(&self, fingerprint: &str) {
        let (namespace, url_hash) = split_fingerprint(fingerprint);
        let update = CacheUpdate {
            namespace,
            url_hash,
            fingerprint: fingerprint.to_string(),
        };
        // Snapshot live listeners outside the entries lock; dead weak refs
        // are pruned lazily on each notify.
        let mut listeners = self.listeners.lock();
        listeners.retain(|weak| {
            if let Some(f) = weak.upgrade() {
                f(&update);
                true
            } else {
                false
            }
        });
    }
}

fn evict_if_over_capacity(entries: &mut BTreeMap<String, Slot>, max_entries: usize) -> Vec<String> {
    if max_entries == 0 || entries.len() <= max_entries {
        return Vec::new();
    }
    let mut evicted = Vec::new();
    while entries.len() > max_entries {
        if let Some(key) = entries
            .iter()
            .min_by_key(|(_, slot)| slot.insertion_order)
            .map(|(k, _)| k.clone())
        {
            entries.remove(&key);
            evicted.push(key);
        } else {
            break;
        }
    }
    evicted
}

fn split_fingerprint(fingerprint: &str) -> (String, String) {
    match fingerprint.split_once(':') {
        Some((ns, hash)) => (ns.to_string(), hash.to_string()),
        None => (String::new(), fingerprint.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn artifact(markdown: &str) -> Artifact {
        Artifact {
            markdown: markdown.to_string(),
            title: None,
            metadata: json!({}),
            truncated: false,
        }
    }

    #[test]
    fn get_miss_returns_none() {
        let cache = Cache::new(10);
        assert!(cache.get("web:abc").is_none());
    }

    #[test]
    fn set_then_get_round_trips() {
        let cache = Cache::new(10);
        cache.set("web:abc", "https://example.com/", 1, artifact("hi"), false);
        assert_eq!(cache.get("web:abc").unwrap().markdown, "hi");
    }

    #[test]
    fn eviction_keeps_most_recently_inserted() {
        let cache = Cache::new(2);
        cache.set("web:a", "https://a.example/", 1, artifact("a"), false);
        cache.set("web:b", "https://b.example/", 2, artifact("b"), false);
        cache.set("web:c", "https://c.example/", 3, artifact("c"), false);
        assert_eq!(cache.len(), 2);
        assert!(cache.get("web:a").is_none());
        assert!(cache.get("web:b").is_some());
        assert!(cache.get("web:c").is_some());
    }

    #[test]
    fn get_does_not_disturb_insertion_order() {
        let cache = Cache::new(2);
        cache.set("web:a", "https://a.example/", 1, artifact("a"), false);
        cache.set("web:b", "https://b.example/", 2, artifact("b"), false);
        // Accessing "a" must not save it from the next eviction.
        let _ = cache.get("web:a");
        cache.set("web:c", "https://c.example/", 3, artifact("c"), false);
        assert!(cache.get("web:a").is_none());
    }

    #[test]
    fn listeners_are_notified_on_set_and_pruned_when_dropped() {
        let cache = Cache::new(10);
        let seen: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = seen.clone();
        let listener: Arc<dyn Fn(&CacheUpdate) + Send + Sync> =
            Arc::new(move |u: &CacheUpdate| seen_clone.lock().push(u.fingerprint.clone()));
        cache.register_listener(Arc::downgrade(&listener));

        cache.set("web:a", "https://a.example/", 1, artifact("a"), false);
        assert_eq!(seen.lock().as_slice(), ["web:a"]);

        drop(listener);
        cache.set("web:b", "https://b.example/", 2, artifact("b"), false);
        assert_eq!(seen.lock().as_slice(), ["web:a"]);
    }
}
