//! Model-based routing: resolves a request's target model to a set of
//! eligible upstream candidates and records the full decision trace.
//!
//! Candidates are filtered by matching on the model name rather than a
//! URL path, since this gateway has exactly one entry point rather than
//! a configurable route table.

use crate::models::api_key::ApiKey;
use crate::models::circuit::BreakerState;
use crate::models::error::GatewayError;
use crate::models::routing::{CandidateInfo, ExcludedInfo, ExclusionReason, RoutingDecision};
use crate::models::upstream::{ProviderType, Upstream};
use crate::store::Store;
use std::collections::HashMap;
use std::sync::Arc;

/// Output of a routing pass: the full decision trace for the request log,
/// the ordered list of upstreams still eligible to serve it, and each
/// eligible upstream's per-upstream resolved model name (redirects are
/// configured per upstream, so two candidates may resolve the same
/// original model differently).
pub struct RoutingResult {
    pub decision: RoutingDecision,
    pub eligible: Vec<Upstream>,
    pub resolved_models: HashMap<String, String>,
}

pub struct ModelRouter {
    store: Arc<dyn Store>,
}

impl ModelRouter {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Builds the candidate set for `original_model` requested under
    /// `api_key`. Steps:
    /// 1. Resolve the request's provider type from the model name prefix table.
    /// 2. Gather upstreams of that provider type (or all upstreams, if the
    ///    model name matched no known prefix — `routing_type = "fallback"`).
    /// 3. Per candidate: resolve model redirects, drop candidates whose
    ///    redirect graph cycles or whose resolved model isn't on their
    ///    allow-list.
    /// 4. Drop inactive upstreams.
    /// 5. Drop upstreams not permitted for this API key.
    /// 6. Drop upstreams whose circuit breaker is OPEN.
    /// 7. Return the survivors plus the full exclusion trace.
    pub async fn route(
        &self,
        original_model: &str,
        api_key: &ApiKey,
    ) -> Result<RoutingResult, GatewayError> {
        let provider_type = ProviderType::from_model_name(original_model);
        let routing_type = if provider_type.is_some() { "auto" } else { "fallback" };

        let all_upstreams = self
            .store
            .list_upstreams()
            .await
            .map_err(|_| GatewayError::ServiceUnavailable)?;

        let by_provider: Vec<&Upstream> = match provider_type {
            Some(pt) => all_upstreams.iter().filter(|u| u.provider_type == pt).collect(),
            None => all_upstreams.iter().collect(),
        };

        if by_provider.is_empty() {
            return Err(GatewayError::NoUpstreamsConfigured {
                model: original_model.to_string(),
            });
        }

        let mut candidates = Vec::new();
        let mut excluded = Vec::new();
        let mut eligible = Vec::new();
        let mut resolved_models = HashMap::new();

        for upstream in by_provider {
            if !upstream.is_active {
                excluded.push(ExcludedInfo {
                    id: upstream.id.clone(),
                    name: upstream.name.clone(),
                    reason: ExclusionReason::Inactive,
                });
                continue;
            }

            if !api_key.allowed_upstream_ids.is_empty()
                && !api_key.allowed_upstream_ids.contains(&upstream.id)
            {
                excluded.push(ExcludedInfo {
                    id: upstream.id.clone(),
                    name: upstream.name.clone(),
                    reason: ExclusionReason::DisallowedForApiKey,
                });
                continue;
            }

            let resolved = match upstream.resolve_redirect(original_model) {
                Ok(resolved) if upstream.allows_model(&resolved) => resolved,
                _ => {
                    excluded.push(ExcludedInfo {
                        id: upstream.id.clone(),
                        name: upstream.name.clone(),
                        reason: ExclusionReason::ModelNotAllowed,
                    });
                    continue;
                }
            };

            let circuit_state = self
                .store
                .get_circuit_state(&upstream.id)
                .await
                .map(|s| s.state)
                .unwrap_or(BreakerState::Closed);

            if circuit_state == BreakerState::Open {
                excluded.push(ExcludedInfo {
                    id: upstream.id.clone(),
                    name: upstream.name.clone(),
                    reason: ExclusionReason::CircuitOpen,
                });
                continue;
            }

            candidates.push(CandidateInfo {
                id: upstream.id.clone(),
                name: upstream.name.clone(),
                weight: upstream.weight,
                circuit_state,
            });
            resolved_models.insert(upstream.id.clone(), resolved);
            eligible.push(upstream.clone());
        }

        let candidate_count = candidates.len() + excluded.len();
        let final_candidate_count = eligible.len();

        let decision = RoutingDecision {
            original_model: original_model.to_string(),
            resolved_model: original_model.to_string(),
            model_redirect_applied: false,
            provider_type,
            routing_type,
            candidates,
            excluded,
            candidate_count,
            final_candidate_count,
            selected_upstream_id: None,
            selection_strategy: String::new(),
        };

        if eligible.is_empty() {
            return Ok(RoutingResult {
                decision,
                eligible,
                resolved_models,
            });
        }

        Ok(RoutingResult {
            decision,
            eligible,
            resolved_models,
        })
    }
}
