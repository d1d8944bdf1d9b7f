//! Advisory health record tracked per upstream.
//!
//! Updated on every request success/failure for observability, and by the
//! optional background probe. Unlike the circuit breaker, this record does
//! not gate routing.

use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct HealthRecord {
    pub upstream_id: String,
    pub is_healthy: bool,
    pub last_check_at: Option<chrono::DateTime<chrono::Utc>>,
    pub last_success_at: Option<chrono::DateTime<chrono::Utc>>,
    pub failure_count: u64,
    pub latency_ms: Option<u64>,
    pub error_message: Option<String>,
}

impl HealthRecord {
    pub fn new(upstream_id: impl Into<String>) -> Self {
        Self {
            upstream_id: upstream_id.into(),
            is_healthy: true,
            last_check_at: None,
            last_success_at: None,
            failure_count: 0,
            latency_ms: None,
            error_message: None,
        }
    }
}
