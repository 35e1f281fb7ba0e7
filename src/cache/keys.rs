//! Cache and rate-limit key derivation.

use std::fmt;

use sha2::{Digest, Sha256};

/// Fixed-length index for a rendered resource, derived from its canonical
/// request path (query string excluded).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn for_path(path: &str) -> Self {
        Self(hex::encode(Sha256::digest(path.as_bytes())))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Per-visitor partition: client address plus a digest of the user agent.
pub fn visitor_fingerprint(ip: &str, user_agent: &str) -> String {
    format!("{ip}:{}", hex::encode(Sha256::digest(user_agent.as_bytes())))
}

pub fn rate_limit_key(fingerprint: &str) -> String {
    format!("rate-limit:{fingerprint}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cache_key_is_deterministic_hex() {
        let key = CacheKey::for_path("/url/example.com/README.md");
        assert_eq!(key, CacheKey::for_path("/url/example.com/README.md"));
        assert_eq!(key.as_str().len(), 64);
        assert!(key.as_str().chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn different_paths_get_different_keys() {
        assert_ne!(CacheKey::for_path("/a"), CacheKey::for_path("/b"));
    }

    #[test]
    fn rate_limit_keys_partition_by_agent() {
        let firefox = rate_limit_key(&visitor_fingerprint("10.0.0.1", "Firefox"));
        let curl = rate_limit_key(&visitor_fingerprint("10.0.0.1", "curl"));
        assert!(firefox.starts_with("rate-limit:10.0.0.1:"));
        assert_ne!(firefox, curl);
    }
}
