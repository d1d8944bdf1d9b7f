//! Per-upstream circuit breaker state machine.
//!
//! Three states — CLOSED, OPEN, HALF_OPEN — one row per upstream id, read
//! and written through the [`crate::store::Store`] port so the gateway
//! never takes a single global lock across unrelated upstreams.

use crate::models::circuit::{BreakerState, CircuitBreakerConfig, CircuitBreakerState};
use crate::store::{Store, StoreError};
use chrono::Utc;
use log::{debug, info, warn};
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CircuitBreakerError {
    #[error("circuit open for upstream {0}")]
    Open(String),
    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

pub struct CircuitBreaker {
    store: Arc<dyn Store>,
    default_config: CircuitBreakerConfig,
}

impl CircuitBreaker {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self {
            store,
            default_config: CircuitBreakerConfig::default(),
        }
    }

    fn config_for(&self, state: &CircuitBreakerState) -> CircuitBreakerConfig {
        state.config.unwrap_or(self.default_config)
    }

    /// Whether a request is currently allowed to pass for `upstream_id`.
    /// An OPEN breaker whose `open_duration` has elapsed is transitioned to
    /// HALF_OPEN as a side effect, checked lazily on read rather than by a
    /// background timer.
    pub async fn can_request_pass(&self, upstream_id: &str) -> Result<bool, CircuitBreakerError> {
        let mut state = self.store.get_circuit_state(upstream_id).await?;
        let config = self.config_for(&state);

        match state.state {
            BreakerState::Closed => Ok(true),
            BreakerState::HalfOpen => Ok(true),
            BreakerState::Open => {
                let elapsed = state
                    .opened_at
                    .map(|opened| Utc::now().signed_duration_since(opened))
                    .and_then(|d| d.to_std().ok());
                if elapsed.map(|e| e >= config.open_duration).unwrap_or(false) {
                    self.transition_to_half_open(&mut state).await?;
                    Ok(true)
                } else {
                    Ok(false)
                }
            }
        }
    }

    /// Like [`Self::can_request_pass`], but also stamps `last_probe_at`
    /// whenever the breaker is already HALF_OPEN, not only on the OPEN ->
    /// HALF_OPEN transition. The failover loop calls this instead of
    /// `can_request_pass` so every attempt against a half-open upstream is
    /// recorded as a probe.
    pub async fn acquire_permit(&self, upstream_id: &str) -> Result<bool, CircuitBreakerError> {
        let mut state = self.store.get_circuit_state(upstream_id).await?;
        let config = self.config_for(&state);

        match state.state {
            BreakerState::Closed => Ok(true),
            BreakerState::HalfOpen => {
                state.last_probe_at = Some(Utc::now());
                self.store.put_circuit_state(state).await?;
                Ok(true)
            }
            BreakerState::Open => {
                let elapsed = state
                    .opened_at
                    .map(|opened| Utc::now().signed_duration_since(opened))
                    .and_then(|d| d.to_std().ok());
                if elapsed.map(|e| e >= config.open_duration).unwrap_or(false) {
                    self.transition_to_half_open(&mut state).await?;
                    Ok(true)
                } else {
                    Ok(false)
                }
            }
        }
    }

    pub async fn record_success(&self, upstream_id: &str) -> Result<(), CircuitBreakerError> {
        let mut state = self.store.get_circuit_state(upstream_id).await?;
        let config = self.config_for(&state);

        match state.state {
            BreakerState::Closed => {
                state.failure_count = 0;
            }
            BreakerState::HalfOpen => {
                state.success_count += 1;
                if state.success_count >= config.success_threshold {
                    self.transition_to_closed(&mut state);
                } else {
                    self.store.put_circuit_state(state).await?;
                    return Ok(());
                }
            }
            BreakerState::Open => {
                debug!("unexpected success recorded while circuit {upstream_id} is open");
            }
        }
        self.store.put_circuit_state(state).await?;
        Ok(())
    }

    pub async fn record_failure(&self, upstream_id: &str) -> Result<(), CircuitBreakerError> {
        let mut state = self.store.get_circuit_state(upstream_id).await?;
        let config = self.config_for(&state);
        state.last_failure_at = Some(Utc::now());

        match state.state {
            BreakerState::Closed => {
                state.failure_count += 1;
                if state.failure_count >= config.failure_threshold {
                    self.transition_to_open(&mut state);
                }
            }
            BreakerState::HalfOpen => {
                self.transition_to_open(&mut state);
            }
            BreakerState::Open => {}
        }
        self.store.put_circuit_state(state).await?;
        Ok(())
    }

    /// Administrative override: forces `upstream_id` open regardless of its
    /// current counters. Used by operator tooling, not by request handling.
    pub async fn force_open(&self, upstream_id: &str) -> Result<(), CircuitBreakerError> {
        let mut state = self.store.get_circuit_state(upstream_id).await?;
        self.transition_to_open(&mut state);
        self.store.put_circuit_state(state).await?;
        Ok(())
    }

    pub async fn force_close(&self, upstream_id: &str) -> Result<(), CircuitBreakerError> {
        let mut state = self.store.get_circuit_state(upstream_id).await?;
        self.transition_to_closed(&mut state);
        self.store.put_circuit_state(state).await?;
        Ok(())
    }

    fn transition_to_open(&self, state: &mut CircuitBreakerState) {
        state.state = BreakerState::Open;
        state.opened_at = Some(Utc::now());
        state.success_count = 0;
        warn!("circuit breaker {} opened", state.upstream_id);
    }

    async fn transition_to_half_open(&self, state: &mut CircuitBreakerState) -> Result<(), CircuitBreakerError> {
        state.state = BreakerState::HalfOpen;
        state.success_count = 0;
        state.last_probe_at = Some(Utc::now());
        info!("circuit breaker {} half-open, probing", state.upstream_id);
        self.store.put_circuit_state(state.clone()).await?;
        Ok(())
    }

    fn transition_to_closed(&self, state: &mut CircuitBreakerState) {
        state.state = BreakerState::Closed;
        state.failure_count = 0;
        state.success_count = 0;
        state.opened_at = None;
        info!("circuit breaker {} closed, upstream recovered", state.upstream_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::InMemoryStore;
    use std::collections::{HashMap, HashSet};
    use std::time::Duration;

    fn store_with_upstream(id: &str) -> Arc<InMemoryStore> {
        let upstream = crate::models::upstream::Upstream {
            id: id.to_string(),
            name: id.to_string(),
            provider_type: crate::models::upstream::ProviderType::Openai,
            base_url: "https://x.example".into(),
            api_key: "k".into(),
            timeout_seconds: 30,
            is_active: true,
            weight: 1,
            allowed_models: HashSet::new(),
            model_redirects: HashMap::new(),
        };
        Arc::new(InMemoryStore::new(vec![upstream], vec![]))
    }

    #[tokio::test]
    async fn opens_after_threshold_failures() {
        let store = store_with_upstream("u1");
        let breaker = CircuitBreaker::new(store.clone());
        for _ in 0..5 {
            breaker.record_failure("u1").await.unwrap();
        }
        assert!(!breaker.can_request_pass("u1").await.unwrap());
    }

    #[tokio::test]
    async fn half_open_closes_after_success_threshold() {
        let store = store_with_upstream("u1");
        let breaker = CircuitBreaker::new(store.clone());
        for _ in 0..5 {
            breaker.record_failure("u1").await.unwrap();
        }
        // Force the open_duration to have elapsed by rewriting opened_at.
        let mut state = store.get_circuit_state("u1").await.unwrap();
        state.opened_at = Some(Utc::now() - chrono::Duration::seconds(301));
        store.put_circuit_state(state).await.unwrap();

        assert!(breaker.can_request_pass("u1").await.unwrap());
        let state = store.get_circuit_state("u1").await.unwrap();
        assert_eq!(state.state, BreakerState::HalfOpen);

        breaker.record_success("u1").await.unwrap();
        breaker.record_success("u1").await.unwrap();
        let state = store.get_circuit_state("u1").await.unwrap();
        assert_eq!(state.state, BreakerState::Closed);
    }

    #[tokio::test]
    async fn half_open_failure_reopens_circuit() {
        let store = store_with_upstream("u1");
        let breaker = CircuitBreaker::new(store.clone());
        let mut state = store.get_circuit_state("u1").await.unwrap();
        state.state = BreakerState::HalfOpen;
        store.put_circuit_state(state).await.unwrap();

        breaker.record_failure("u1").await.unwrap();
        let state = store.get_circuit_state("u1").await.unwrap();
        assert_eq!(state.state, BreakerState::Open);
    }

    #[test]
    fn default_config_uses_expected_thresholds() {
        let config = CircuitBreakerConfig::default();
        assert_eq!(config.failure_threshold, 5);
        assert_eq!(config.success_threshold, 2);
        assert_eq!(config.open_duration, Duration::from_secs(300));
    }
}
