use bincode::{Decode, Encode};
use bytes::Bytes;

use super::error::CacheError;

/// Upper bound on a decoded entry, so a corrupt length prefix cannot trigger
/// a huge allocation.
const MAX_ENTRY_BYTES: usize = 64 * 1024 * 1024;

fn config() -> impl bincode::config::Config {
    bincode::config::standard().with_limit::<MAX_ENTRY_BYTES>()
}

/// A rendered response as stored in the cache.
///
/// The encoding is private to this crate version. Entries written by an
/// incompatible build fail to decode, are treated as misses and expire.
#[derive(Debug, Clone, PartialEq, Eq, Encode, Decode)]
pub struct CachedEntry {
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl CachedEntry {
    pub fn new(headers: Vec<(String, String)>, body: impl Into<Vec<u8>>) -> Self {
        Self {
            headers,
            body: body.into(),
        }
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    pub fn encode(&self) -> Result<Bytes, CacheError> {
        bincode::encode_to_vec(self, config())
            .map(Bytes::from)
            .map_err(|err| CacheError::Encode(err.to_string()))
    }

    pub fn decode(bytes: &[u8]) -> Option<Self> {
        bincode::decode_from_slice(bytes, config())
            .ok()
            .map(|(entry, _)| entry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_what_it_encodes() {
        let entry = CachedEntry::new(
            vec![("Content-Type".into(), "text/html; charset=utf-8".into())],
            "<html>X</html>",
        );
        let bytes = entry.encode().expect("encode");
        assert_eq!(CachedEntry::decode(&bytes), Some(entry));
    }

    #[test]
    fn truncated_bytes_do_not_decode() {
        let entry = CachedEntry::new(vec![("Content-Type".into(), "text/html".into())], "body");
        let bytes = entry.encode().expect("encode");
        assert_eq!(CachedEntry::decode(&bytes[..bytes.len() - 2]), None);
        assert_eq!(CachedEntry::decode(&[]), None);
    }

    #[test]
    fn header_lookup_ignores_case() {
        let entry = CachedEntry::new(vec![("Content-Type".into(), "text/plain".into())], "");
        assert_eq!(entry.header("content-type"), Some("text/plain"));
        assert_eq!(entry.header("etag"), None);
    }
}
