//! Normalized LLM token usage accounting.
//!
//! [`Usage`] is the common shape every provider's usage payload is folded
//! into by [`crate::services::forwarder::extract_usage`]. Missing fields
//! default to zero.

use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize, Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Usage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
    pub cached_tokens: u64,
    pub reasoning_tokens: u64,
    pub cache_creation_tokens: u64,
    pub cache_read_tokens: u64,
}

impl Usage {
    /// Merges a later usage observation over an earlier one. Used by the SSE
    /// transformer, where the *last* observed usage event in a stream wins.
    pub fn merge_latest(_previous: Usage, latest: Usage) -> Usage {
        latest
    }
}
