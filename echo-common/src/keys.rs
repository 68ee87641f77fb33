//! Versioned cache key derivation
//!
//! Cache keys are SHA-256 digests over a version tag, a namespace and an
//! ordered list of parts, each separated by a NUL byte. Argument formatting
//! never leaks into the key, and bumping [`KEY_VERSION`] invalidates every
//! previously derived key at once.

use sha2::{Digest, Sha256};

/// Version tag mixed into every derived key
pub const KEY_VERSION: &str = "v1";

/// Minimum length of a content hash accepted as a file name
pub const MIN_HASH_LEN: usize = 32;

/// Derive a lowercase-hex SHA-256 key for `namespace` and `parts`
pub fn derive_key(namespace: &str, parts: &[&str]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(KEY_VERSION.as_bytes());
    hasher.update([0u8]);
    hasher.update(namespace.as_bytes());
    for part in parts {
        hasher.update([0u8]);
        hasher.update(part.as_bytes());
    }

    hasher
        .finalize()
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect()
}

/// Check that `hash` is lowercase hex of at least [`MIN_HASH_LEN`] characters
///
/// Hashes are used directly as file names, so this is the only thing standing
/// between a caller-supplied key and the filesystem.
pub fn is_valid_hash(hash: &str) -> bool {
    hash.len() >= MIN_HASH_LEN
        && hash
            .bytes()
            .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_derive_key_is_64_lowercase_hex() {
        let key = derive_key("mp3", &["12345", "320"]);
        assert_eq!(key.len(), 64);
        assert!(is_valid_hash(&key));
    }

    #[test]
    fn test_derive_key_is_deterministic() {
        assert_eq!(
            derive_key("mp3", &["12345", "320"]),
            derive_key("mp3", &["12345", "320"])
        );
    }

    #[test]
    fn test_derive_key_separates_parts() {
        // "ab" + "c" must not collide with "a" + "bc"
        assert_ne!(derive_key("ns", &["ab", "c"]), derive_key("ns", &["a", "bc"]));
        assert_ne!(derive_key("mp3", &["1"]), derive_key("upload", &["1"]));
    }

    #[test]
    fn test_is_valid_hash_rejects_short() {
        assert!(!is_valid_hash("abc123"));
        assert!(!is_valid_hash(&"a".repeat(31)));
        assert!(is_valid_hash(&"a".repeat(32)));
    }

    #[test]
    fn test_is_valid_hash_rejects_non_hex() {
        let traversal = format!("../{}", "a".repeat(40));
        assert!(!is_valid_hash(&traversal));
        assert!(!is_valid_hash(&"A".repeat(40)));
        assert!(!is_valid_hash(&"g".repeat(40)));
    }
}
