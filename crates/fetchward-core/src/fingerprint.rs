//! Cache fingerprints: `(namespace, hash(normalized_url || variation_key))`.
//!
//! A fingerprint is the single key every cache lookup, single-flight coalescing
//! slot, and download-by-hash wire route (`/mcp/downloads/:namespace/:hash`) is
//! keyed on. It is deliberately opaque outside this module; callers build one
//! via [`Fingerprint::new`] and treat the result as a string.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// `namespace` plus the hex-encoded sha256 of `normalized_url || '\0' || variation`.
///
/// The `\0` separator prevents `("a", "bc")` and `("ab", "c")` from colliding
/// once concatenated, which a plain `+` join would allow.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Fingerprint {
    pub namespace: String,
    pub hash: String,
}

impl Fingerprint {
    pub fn new(namespace: &str, normalized_url: &str, variation: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(normalized_url.as_bytes());
        hasher.update([0u8]);
        hasher.update(variation.as_bytes());
        let hash = hex::encode(hasher.finalize());
        Self {
            namespace: namespace.to_string(),
            hash,
        }
    }

    /// The string used as the cache map key and as the `:hash` path segment.
    pub fn key(&self) -> String {
        format!("{}:{}", self.namespace, self.hash)
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.key())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_inputs_produce_same_fingerprint() {
        let a = Fingerprint::new("web", "https://example.com/", "default");
        let b = Fingerprint::new("web", "https://example.com/", "default");
        assert_eq!(a, b);
    }

    #[test]
    fn differing_variation_changes_hash() {
        let a = Fingerprint::new("web", "https://example.com/", "default");
        let b = Fingerprint::new("web", "https://example.com/", "no_noise_removal");
        assert_ne!(a.hash, b.hash);
    }

    #[test]
    fn concatenation_boundary_does_not_collide() {
        let a = Fingerprint::new("web", "a", "bc");
        let b = Fingerprint::new("web", "ab", "c");
        assert_ne!(a.hash, b.hash);
    }

    #[test]
    fn hash_is_lowercase_hex() {
        let fp = Fingerprint::new("web", "https://example.com/", "default");
        assert_eq!(fp.hash.len(), 64);
        assert!(fp.hash.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }
}
