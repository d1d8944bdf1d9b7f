//! Persistence port.
//!
//! The gateway core is deliberately store-agnostic: every service takes a
//! `Arc<dyn Store>` and never a concrete backend. Swapping the in-memory
//! reference implementation for a database-backed one is the integration
//! point a host binary owns; the core only depends on this trait.

pub mod memory;

use crate::models::api_key::ApiKey;
use crate::models::circuit::CircuitBreakerState;
use crate::models::health::HealthRecord;
use crate::models::routing::{FailoverAttempt, RoutingDecision};
use crate::models::upstream::Upstream;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("store backend error: {0}")]
    Backend(String),
}

/// One row of the request log. Stored for debugging, not billing: the
/// in-memory reference store keeps a bounded ring buffer.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct RequestLogEntry {
    pub request_id: String,
    pub timestamp: DateTime<Utc>,
    pub method: String,
    pub path: String,
    pub api_key_id: Option<String>,
    pub routing: Option<RoutingDecision>,
    pub failover_attempts: Vec<FailoverAttempt>,
    pub final_upstream_id: Option<String>,
    pub status_code: Option<u16>,
    pub duration_ms: u64,
    pub error: Option<String>,
}

/// Persistence and state-tracking port used by every `gateway-core` service.
///
/// Implementors must be `Send + Sync` since the gateway is multi-threaded:
/// concurrent requests read and mutate breaker/health/usage state for the
/// same upstream without external synchronization.
#[async_trait]
pub trait Store: Send + Sync {
    async fn list_upstreams(&self) -> Result<Vec<Upstream>, StoreError>;
    async fn get_upstream(&self, id: &str) -> Result<Upstream, StoreError>;

    async fn find_api_key_by_prefix(&self, prefix: &str) -> Result<Vec<ApiKey>, StoreError>;

    async fn get_circuit_state(&self, upstream_id: &str) -> Result<CircuitBreakerState, StoreError>;
    async fn put_circuit_state(&self, state: CircuitBreakerState) -> Result<(), StoreError>;

    async fn get_health(&self, upstream_id: &str) -> Result<HealthRecord, StoreError>;
    async fn put_health(&self, record: HealthRecord) -> Result<(), StoreError>;

    async fn append_request_log(&self, entry: RequestLogEntry) -> Result<(), StoreError>;
    async fn recent_request_logs(&self, limit: usize) -> Result<Vec<RequestLogEntry>, StoreError>;
}
