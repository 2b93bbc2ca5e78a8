//! Content hashing and cache-key derivation
//!
//! Keys identify (transform, file-content, file-path) triples for cache
//! lookup. They are not security-sensitive; a truncated SHA-256 digest
//! gives a stable 128-bit hex fingerprint.

use sha2::{Digest, Sha256};

/// Hash a byte slice into a 128-bit hex fingerprint
pub fn hash_bytes(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    let digest = hasher.finalize();
    hex::encode(&digest[..16])
}

/// Compose several key parts into a single fingerprint
///
/// Parts are NUL-separated before hashing so that `["ab", "c"]` and
/// `["a", "bc"]` produce distinct keys.
pub fn compose_key(parts: &[&str]) -> String {
    let mut hasher = Sha256::new();
    for (i, part) in parts.iter().enumerate() {
        if i > 0 {
            hasher.update([0u8]);
        }
        hasher.update(part.as_bytes());
    }
    let digest = hasher.finalize();
    hex::encode(&digest[..16])
}

/// The default per-file cache key: `hash(contents ‖ NUL ‖ relative_path)`
pub fn file_cache_key(contents: &str, relative_path: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(contents.as_bytes());
    hasher.update([0u8]);
    hasher.update(relative_path.as_bytes());
    let digest = hasher.finalize();
    hex::encode(&digest[..16])
}
