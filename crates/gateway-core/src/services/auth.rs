//! API key authentication.
//!
//! Keys are never stored in plaintext: the store only ever holds a salted
//! SHA-256 digest plus a short prefix for indexable lookup. Verification
//! hashes the presented key with the stored salt and compares digests in
//! constant time, since API keys are opaque bearer tokens rather than
//! signed credentials.

use crate::models::api_key::ApiKey;
use crate::models::error::GatewayError;
use crate::store::Store;
use sha2::{Digest, Sha256};
use std::sync::Arc;

/// Length of the indexable prefix stored alongside the hash.
pub const KEY_PREFIX_LEN: usize = 8;

pub struct AuthService {
    store: Arc<dyn Store>,
}

impl AuthService {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Hashes `key` with `salt` and hex-encodes the digest. Exposed so
    /// config-loading tooling can precompute `key_hash`/`key_prefix` for
    /// keys written into the gateway's settings file.
    pub fn hash_key(key: &str, salt: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(salt.as_bytes());
        hasher.update(key.as_bytes());
        hex::encode(hasher.finalize())
    }

    /// Authenticates a presented bearer token against the store.
    ///
    /// Looks candidates up by prefix (an indexable operation even on a real
    /// database-backed store) then compares hashes in constant time, so a
    /// mismatch on key N doesn't leak timing information past key N's
    /// length versus the presented key's.
    pub async fn authenticate(&self, presented_key: &str, now: chrono::DateTime<chrono::Utc>) -> Result<ApiKey, GatewayError> {
        if presented_key.len() < KEY_PREFIX_LEN {
            return Err(GatewayError::InvalidApiKey);
        }
        let prefix = &presented_key[..KEY_PREFIX_LEN];
        let candidates = self
            .store
            .find_api_key_by_prefix(prefix)
            .await
            .map_err(|_| GatewayError::ServiceUnavailable)?;

        let mut matched: Option<ApiKey> = None;
        for candidate in candidates {
            let expected = Self::hash_key(presented_key, &candidate.salt);
            if constant_time_eq(expected.as_bytes(), candidate.key_hash.as_bytes()) {
                matched = Some(candidate);
                break;
            }
        }

        let key = matched.ok_or(GatewayError::InvalidApiKey)?;
        if !key.is_active {
            return Err(GatewayError::InvalidApiKey);
        }
        if key.is_expired(now) {
            return Err(GatewayError::ExpiredApiKey);
        }
        Ok(key)
    }
}

/// Compares two byte slices without short-circuiting on the first
/// mismatch. Differing lengths still short-circuit, since length is not
/// secret (the stored digest length is fixed and public).
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::InMemoryStore;
    use std::collections::HashSet;

    fn key_for(secret: &str, salt: &str) -> ApiKey {
        ApiKey {
            id: "key1".into(),
            key_prefix: secret[..KEY_PREFIX_LEN].to_string(),
            key_hash: AuthService::hash_key(secret, salt),
            salt: salt.to_string(),
            expires_at: None,
            is_active: true,
            allowed_upstream_ids: HashSet::new(),
        }
    }

    #[tokio::test]
    async fn accepts_matching_key() {
        let secret = "sk-gw-abcdef123456";
        let store = Arc::new(InMemoryStore::new(vec![], vec![key_for(secret, "pepper")]));
        let auth = AuthService::new(store);
        let result = auth.authenticate(secret, chrono::Utc::now()).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn rejects_wrong_key_with_same_prefix() {
        let secret = "sk-gw-abcdef123456";
        let store = Arc::new(InMemoryStore::new(vec![], vec![key_for(secret, "pepper")]));
        let auth = AuthService::new(store);
        let wrong = "sk-gw-abcdefWRONGKEY";
        let result = auth.authenticate(wrong, chrono::Utc::now()).await;
        assert!(matches!(result, Err(GatewayError::InvalidApiKey)));
    }

    #[tokio::test]
    async fn rejects_expired_key() {
        let secret = "sk-gw-abcdef123456";
        let mut key = key_for(secret, "pepper");
        key.expires_at = Some(chrono::Utc::now() - chrono::Duration::hours(1));
        let store = Arc::new(InMemoryStore::new(vec![], vec![key]));
        let auth = AuthService::new(store);
        let result = auth.authenticate(secret, chrono::Utc::now()).await;
        assert!(matches!(result, Err(GatewayError::ExpiredApiKey)));
    }
}
