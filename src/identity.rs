//! Client identity derivation. The hash is the stable key for rate
//! limiting, quota, and metrics partitioning — the raw credential is never
//! stored or logged.

use sha2::{Digest, Sha256};

pub const HASH_PREFIX_LEN: usize = 12;

/// `sha256(key)[:12]` hex, matching the external auth contract.
pub fn hash_client_key(raw_key: &str) -> String {
    let digest = Sha256::digest(raw_key.as_bytes());
    let hex = hex_encode(&digest);
    hex[..HASH_PREFIX_LEN].to_string()
}

fn hex_encode(bytes: &[u8]) -> String {
    use std::fmt::Write;
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        write!(out, "{:02x}", b).unwrap();
    }
    out
}

/// Resolves a bearer credential against an allow-list, returning the
/// client's identity hash. Unknown or missing credentials are rejected by
/// the caller with `GatewayError::AuthenticationError`.
pub struct ClientRegistry {
    allowed_keys: std::collections::HashSet<String>,
}

impl ClientRegistry {
    pub fn new(allowed_keys: impl IntoIterator<Item = String>) -> Self {
        Self { allowed_keys: allowed_keys.into_iter().collect() }
    }

    pub fn resolve(&self, bearer: Option<&str>) -> Option<String> {
        let key = bearer?;
        if self.allowed_keys.contains(key) {
            Some(hash_client_key(key))
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_is_twelve_hex_chars() {
        let h = hash_client_key("sk-test-key");
        assert_eq!(h.len(), 12);
        assert!(h.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn hash_is_stable_and_distinguishes_keys() {
        assert_eq!(hash_client_key("a"), hash_client_key("a"));
        assert_ne!(hash_client_key("a"), hash_client_key("b"));
    }

    #[test]
    fn registry_rejects_unknown_and_missing_credentials() {
        let registry = ClientRegistry::new(["sk-good".to_string()]);
        assert!(registry.resolve(Some("sk-good")).is_some());
        assert!(registry.resolve(Some("sk-bad")).is_none());
        assert!(registry.resolve(None).is_none());
    }
}
