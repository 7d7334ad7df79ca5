//! URL hashing into cache buckets (spec §4.1).
//!
//! The hash function is part of the on-disk compatibility contract (spec
//! §6.3): entries reloaded from the index must land in the same bucket as
//! when they were written, by this or any other conforming implementation.
//! It's a simple polynomial hash, reproduced from the reference
//! implementation rather than invented.

/// Number of buckets in the cache table.
pub const BUCKETS: usize = 997;

/// Hash a URL into `[0, BUCKETS)`.
pub fn hash_url(url: &str) -> usize {
    let mut hash: usize = 0;
    for byte in url.bytes() {
        hash = (hash.wrapping_mul(3).wrapping_add(byte as usize)) % BUCKETS;
    }
    hash
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_in_range() {
        for url in ["http://a/b", "https://example.com/resource?x=1", ""] {
            assert!(hash_url(url) < BUCKETS);
        }
    }

    #[test]
    fn test_hash_is_deterministic() {
        let url = "http://example.com/data.dods";
        assert_eq!(hash_url(url), hash_url(url));
    }

    #[test]
    fn test_hash_differs_for_different_urls() {
        assert_ne!(
            hash_url("http://example.com/a"),
            hash_url("http://example.com/b")
        );
    }

    #[test]
    fn test_empty_url_hashes_to_zero() {
        assert_eq!(hash_url(""), 0);
    }
}
