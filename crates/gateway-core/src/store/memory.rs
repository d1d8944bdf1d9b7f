//! In-memory reference implementation of [`crate::store::Store`].
//!
//! Used by the test suite and by the standalone binary when no external
//! backend is configured. Upstreams and API keys are seeded once at
//! startup from [`crate::models::settings::Settings`] and treated as
//! read-mostly; circuit/health state and the request log are the only
//! things that mutate per-request, so those use [`DashMap`] for per-key
//! locking instead of one coarse `Mutex`.

use super::{RequestLogEntry, Store, StoreError};
use crate::models::api_key::ApiKey;
use crate::models::circuit::CircuitBreakerState;
use crate::models::health::HealthRecord;
use crate::models::upstream::Upstream;
use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::VecDeque;
use std::sync::RwLock;

const DEFAULT_LOG_CAPACITY: usize = 1000;

pub struct InMemoryStore {
    upstreams: DashMap<String, Upstream>,
    api_keys: Vec<ApiKey>,
    circuit_states: DashMap<String, CircuitBreakerState>,
    health_records: DashMap<String, HealthRecord>,
    request_log: RwLock<VecDeque<RequestLogEntry>>,
    log_capacity: usize,
}

impl InMemoryStore {
    pub fn new(upstreams: Vec<Upstream>, api_keys: Vec<ApiKey>) -> Self {
        Self::with_log_capacity(upstreams, api_keys, DEFAULT_LOG_CAPACITY)
    }

    pub fn with_log_capacity(
        upstreams: Vec<Upstream>,
        api_keys: Vec<ApiKey>,
        log_capacity: usize,
    ) -> Self {
        let circuit_states = DashMap::new();
        let health_records = DashMap::new();
        let upstream_map = DashMap::new();
        for upstream in upstreams {
            circuit_states.insert(
                upstream.id.clone(),
                CircuitBreakerState::closed(upstream.id.clone()),
            );
            health_records.insert(upstream.id.clone(), HealthRecord::new(upstream.id.clone()));
            upstream_map.insert(upstream.id.clone(), upstream);
        }
        Self {
            upstreams: upstream_map,
            api_keys,
            circuit_states,
            health_records,
            request_log: RwLock::new(VecDeque::with_capacity(log_capacity)),
            log_capacity,
        }
    }
}

#[async_trait]
impl Store for InMemoryStore {
    async fn list_upstreams(&self) -> Result<Vec<Upstream>, StoreError> {
        Ok(self.upstreams.iter().map(|e| e.value().clone()).collect())
    }

    async fn get_upstream(&self, id: &str) -> Result<Upstream, StoreError> {
        self.upstreams
            .get(id)
            .map(|e| e.value().clone())
            .ok_or_else(|| StoreError::NotFound(format!("upstream '{id}'")))
    }

    async fn find_api_key_by_prefix(&self, prefix: &str) -> Result<Vec<ApiKey>, StoreError> {
        Ok(self
            .api_keys
            .iter()
            .filter(|k| k.key_prefix == prefix)
            .cloned()
            .collect())
    }

    async fn get_circuit_state(&self, upstream_id: &str) -> Result<CircuitBreakerState, StoreError> {
        self.circuit_states
            .get(upstream_id)
            .map(|e| e.value().clone())
            .ok_or_else(|| StoreError::NotFound(format!("circuit state '{upstream_id}'")))
    }

    async fn put_circuit_state(&self, state: CircuitBreakerState) -> Result<(), StoreError> {
        self.circuit_states.insert(state.upstream_id.clone(), state);
        Ok(())
    }

    async fn get_health(&self, upstream_id: &str) -> Result<HealthRecord, StoreError> {
        self.health_records
            .get(upstream_id)
            .map(|e| e.value().clone())
            .ok_or_else(|| StoreError::NotFound(format!("health record '{upstream_id}'")))
    }

    async fn put_health(&self, record: HealthRecord) -> Result<(), StoreError> {
        self.health_records.insert(record.upstream_id.clone(), record);
        Ok(())
    }

    async fn append_request_log(&self, entry: RequestLogEntry) -> Result<(), StoreError> {
        let mut log = self
            .request_log
            .write()
            .map_err(|_| StoreError::Backend("request log lock poisoned".to_string()))?;
        if log.len() >= self.log_capacity {
            log.pop_front();
        }
        log.push_back(entry);
        Ok(())
    }

    async fn recent_request_logs(&self, limit: usize) -> Result<Vec<RequestLogEntry>, StoreError> {
        let log = self
            .request_log
            .read()
            .map_err(|_| StoreError::Backend("request log lock poisoned".to_string()))?;
        Ok(log.iter().rev().take(limit).cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::upstream::ProviderType;
    use std::collections::{HashMap, HashSet};

    fn upstream(id: &str) -> Upstream {
        Upstream {
            id: id.to_string(),
            name: id.to_string(),
            provider_type: ProviderType::Openai,
            base_url: "https://x.example".into(),
            api_key: "k".into(),
            timeout_seconds: 30,
            is_active: true,
            weight: 1,
            allowed_models: HashSet::new(),
            model_redirects: HashMap::new(),
        }
    }

    #[tokio::test]
    async fn seeds_closed_circuit_state_per_upstream() {
        let store = InMemoryStore::new(vec![upstream("u1")], vec![]);
        let state = store.get_circuit_state("u1").await.unwrap();
        assert_eq!(state.state, crate::models::circuit::BreakerState::Closed);
    }

    #[tokio::test]
    async fn request_log_is_bounded_ring_buffer() {
        let store = InMemoryStore::with_log_capacity(vec![], vec![], 2);
        for i in 0..5 {
            store
                .append_request_log(RequestLogEntry {
                    request_id: i.to_string(),
                    timestamp: chrono::Utc::now(),
                    method: "POST".into(),
                    path: "/v1/chat/completions".into(),
                    api_key_id: None,
                    routing: None,
                    failover_attempts: vec![],
                    final_upstream_id: None,
                    status_code: Some(200),
                    duration_ms: 1,
                    error: None,
                })
                .await
                .unwrap();
        }
        let recent = store.recent_request_logs(10).await.unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].request_id, "4");
        assert_eq!(recent[1].request_id, "3");
    }
}
