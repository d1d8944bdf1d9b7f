//! API key records consumed by the auth service.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// A downstream client credential.
///
/// `key_hash` is a salted SHA-256 digest of the literal key (hex-encoded);
/// the literal key itself is never persisted. `key_prefix` is the first
/// [`crate::services::auth::KEY_PREFIX_LEN`] characters of the literal key
/// and is what makes prefix lookup an indexable operation in a real store.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ApiKey {
    pub id: String,
    pub key_prefix: String,
    pub key_hash: String,
    pub salt: String,
    #[serde(default)]
    pub expires_at: Option<chrono::DateTime<chrono::Utc>>,
    #[serde(default = "default_true")]
    pub is_active: bool,
    pub allowed_upstream_ids: HashSet<String>,
}

fn default_true() -> bool {
    true
}

impl ApiKey {
    pub fn is_expired(&self, now: chrono::DateTime<chrono::Utc>) -> bool {
        matches!(self.expires_at, Some(exp) if exp <= now)
    }
}
