//! Durable circuit breaker state, persisted once per upstream.
//!
//! This is the data record; the state machine that mutates it lives in
//! [`crate::services::circuit_breaker`].

use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

/// Per-upstream override of the default breaker thresholds.
#[derive(Serialize, Deserialize, Debug, Clone, Copy)]
pub struct CircuitBreakerConfig {
    pub failure_threshold: u32,
    pub success_threshold: u32,
    pub open_duration: Duration,
    pub probe_interval: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 2,
            open_duration: Duration::from_secs(300),
            probe_interval: Duration::from_secs(30),
        }
    }
}

/// Durable row for one upstream's breaker.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct CircuitBreakerState {
    pub upstream_id: String,
    pub state: BreakerState,
    pub failure_count: u32,
    pub success_count: u32,
    pub opened_at: Option<chrono::DateTime<chrono::Utc>>,
    pub last_failure_at: Option<chrono::DateTime<chrono::Utc>>,
    pub last_probe_at: Option<chrono::DateTime<chrono::Utc>>,
    #[serde(default)]
    pub config: Option<CircuitBreakerConfig>,
}

impl CircuitBreakerState {
    pub fn closed(upstream_id: impl Into<String>) -> Self {
        Self {
            upstream_id: upstream_id.into(),
            state: BreakerState::Closed,
            failure_count: 0,
            success_count: 0,
            opened_at: None,
            last_failure_at: None,
            last_probe_at: None,
            config: None,
        }
    }

    /// Invariant: CLOSED implies no success counter or opened_at timestamp.
    pub fn invariants_hold(&self) -> bool {
        match self.state {
            BreakerState::Closed => self.success_count == 0 && self.opened_at.is_none(),
            BreakerState::HalfOpen => self.opened_at.is_some(),
            BreakerState::Open => true,
        }
    }
}
