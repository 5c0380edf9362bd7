//! URL → cache key hashing.

use md5::{Digest, Md5};

/// Length of a cache key in hex characters.
pub const KEY_LEN: usize = 32;

/// Derive the cache key for a canonical URL.
///
/// MD5 over the raw URL bytes, lowercase hex. The hosted persistence API
/// indexes pages by this exact digest, so the algorithm must not change.
pub fn url_to_key(url: &str) -> String {
    let mut hasher = Md5::new();
    hasher.update(url.as_bytes());
    hex::encode(hasher.finalize())
}

/// Whether `key` has the shape produced by [`url_to_key`].
pub fn is_valid_key(key: &str) -> bool {
    key.len() == KEY_LEN && key.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stable_for_same_url() {
        let a = url_to_key("https://example.com/page");
        let b = url_to_key("https://example.com/page");
        assert_eq!(a, b);
    }

    #[test]
    fn known_digest() {
        // md5("") is a well-known constant
        assert_eq!(url_to_key(""), "d41d8cd98f00b204e9800998ecf8427e");
    }

    #[test]
    fn distinct_urls_distinct_keys() {
        let urls = [
            "https://example.com/page",
            "https://example.com/page?x=1",
            "http://example.com/page",
            "https://example.com/page/",
            "https://www.example.com/page",
        ];
        let mut keys: Vec<String> = urls.iter().map(|u| url_to_key(u)).collect();
        keys.sort();
        keys.dedup();
        assert_eq!(keys.len(), urls.len());
    }

    #[test]
    fn key_format() {
        let key = url_to_key("https://example.com/page");
        assert_eq!(key.len(), KEY_LEN);
        assert!(is_valid_key(&key));
    }

    #[test]
    fn rejects_malformed_keys() {
        assert!(!is_valid_key("abc"));
        assert!(!is_valid_key(&"G".repeat(KEY_LEN)));
        assert!(!is_valid_key(&"A".repeat(KEY_LEN)));
        assert!(!is_valid_key(&"../".repeat(11)[..KEY_LEN]));
    }
}
