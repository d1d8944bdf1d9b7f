//! Routing decision trace and failover attempt history.
//!
//! These structures are produced per request and persisted alongside the
//! request log; they carry no behavior of their own.

use super::upstream::ProviderType;
use serde::{Deserialize, Serialize};

/// Why a candidate upstream was excluded from the final candidate set.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ExclusionReason {
    ModelNotAllowed,
    CircuitOpen,
    DisallowedForApiKey,
    Inactive,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct CandidateInfo {
    pub id: String,
    pub name: String,
    pub weight: u32,
    pub circuit_state: crate::models::circuit::BreakerState,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ExcludedInfo {
    pub id: String,
    pub name: String,
    pub reason: ExclusionReason,
}

/// Full trace of one routing decision, persisted on the request log.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct RoutingDecision {
    pub original_model: String,
    pub resolved_model: String,
    pub model_redirect_applied: bool,
    pub provider_type: Option<ProviderType>,
    pub routing_type: &'static str,
    pub candidates: Vec<CandidateInfo>,
    pub excluded: Vec<ExcludedInfo>,
    pub candidate_count: usize,
    pub final_candidate_count: usize,
    pub selected_upstream_id: Option<String>,
    pub selection_strategy: String,
}

/// Error classification used to pick a `FailoverAttempt.error_type` and to
/// decide whether an error is failoverable.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FailoverErrorType {
    CircuitOpen,
    Http429,
    Http4xx,
    Http5xx,
    Timeout,
    ConnectionError,
    StreamError,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct FailoverAttempt {
    pub upstream_id: String,
    pub upstream_name: String,
    pub attempted_at: chrono::DateTime<chrono::Utc>,
    pub error_type: FailoverErrorType,
    pub error_message: String,
    pub status_code: Option<u16>,
}
