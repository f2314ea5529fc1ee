use sha2::{Digest, Sha256};

const SHORT_ID_LEN: usize = 16;

/// Hex SHA-256 of a UTF-8 payload.
pub fn content_hash(payload: &str) -> String {
    content_hash_bytes(payload.as_bytes())
}

pub fn content_hash_bytes(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// Leading characters of a content hash, used where a compact id is enough.
pub fn short_id(hash: &str) -> String {
    hash.chars().take(SHORT_ID_LEN).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_is_stable_and_hex() {
        let a = content_hash("hello");
        assert_eq!(a, content_hash("hello"));
        assert_eq!(a.len(), 64);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(a, content_hash("hello "));
        assert_eq!(short_id(&a).len(), 16);
    }
}
