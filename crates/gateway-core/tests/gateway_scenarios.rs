//! End-to-end scenarios exercising routing, load balancing, circuit
//! breaking, and failover together through [`gateway_core::AppState`]
//! rather than through each service in isolation.

use gateway_core::models::api_key::ApiKey;
use gateway_core::models::upstream::{ProviderType, Upstream};
use gateway_core::services::circuit_breaker::CircuitBreaker;
use gateway_core::services::router::ModelRouter;
use gateway_core::store::memory::InMemoryStore;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

fn upstream(id: &str, provider: ProviderType, weight: u32) -> Upstream {
    Upstream {
        id: id.to_string(),
        name: id.to_string(),
        provider_type: provider,
        base_url: format!("https://{id}.example"),
        api_key: "sk-test".to_string(),
        timeout_seconds: 30,
        is_active: true,
        weight,
        allowed_models: HashSet::new(),
        model_redirects: HashMap::new(),
    }
}

fn unrestricted_key() -> ApiKey {
    ApiKey {
        id: "key-1".to_string(),
        key_prefix: "sk-testa".to_string(),
        key_hash: "unused-in-these-tests".to_string(),
        salt: "unused".to_string(),
        expires_at: None,
        is_active: true,
        allowed_upstream_ids: HashSet::new(),
    }
}

/// S1: a request for a model matching a known provider prefix is routed
/// only to upstreams of that provider type.
#[tokio::test]
async fn s1_routes_by_model_provider_prefix() {
    let store = Arc::new(InMemoryStore::new(
        vec![
            upstream("anthropic-1", ProviderType::Anthropic, 1),
            upstream("openai-1", ProviderType::Openai, 1),
        ],
        vec![],
    ));
    let router = ModelRouter::new(store);
    let result = router.route("claude-3-5-sonnet", &unrestricted_key()).await.unwrap();

    assert_eq!(result.eligible.len(), 1);
    assert_eq!(result.eligible[0].id, "anthropic-1");
    assert_eq!(result.decision.provider_type, Some(ProviderType::Anthropic));
}

/// S2: an API key scoped to specific upstreams never sees candidates
/// outside that allow-list, even when they match the provider type.
#[tokio::test]
async fn s2_api_key_scoping_narrows_candidates() {
    let store = Arc::new(InMemoryStore::new(
        vec![
            upstream("openai-1", ProviderType::Openai, 1),
            upstream("openai-2", ProviderType::Openai, 1),
        ],
        vec![],
    ));
    let router = ModelRouter::new(store);
    let mut key = unrestricted_key();
    key.allowed_upstream_ids.insert("openai-2".to_string());

    let result = router.route("gpt-4o", &key).await.unwrap();
    assert_eq!(result.eligible.len(), 1);
    assert_eq!(result.eligible[0].id, "openai-2");
    assert!(result
        .decision
        .excluded
        .iter()
        .any(|e| e.id == "openai-1" && matches!(
            e.reason,
            gateway_core::models::routing::ExclusionReason::DisallowedForApiKey
        )));
}

/// S3: an upstream whose redirect graph doesn't resolve to an allowed
/// model is excluded with reason `model_not_allowed`, not routed to.
#[tokio::test]
async fn s3_model_not_on_allow_list_is_excluded() {
    let mut restricted = upstream("openai-1", ProviderType::Openai, 1);
    restricted.allowed_models.insert("gpt-4o-mini".to_string());

    let store = Arc::new(InMemoryStore::new(vec![restricted], vec![]));
    let router = ModelRouter::new(store);
    let result = router.route("gpt-4o", &unrestricted_key()).await.unwrap();

    assert!(result.eligible.is_empty());
    assert_eq!(result.decision.excluded.len(), 1);
    assert_eq!(
        result.decision.excluded[0].reason,
        gateway_core::models::routing::ExclusionReason::ModelNotAllowed
    );
}

/// S4: five consecutive failures open the breaker; the router then
/// excludes that upstream with reason `circuit_open`.
#[tokio::test]
async fn s4_open_circuit_removes_upstream_from_candidates() {
    let store = Arc::new(InMemoryStore::new(
        vec![upstream("openai-1", ProviderType::Openai, 1)],
        vec![],
    ));
    let breaker = CircuitBreaker::new(store.clone());
    for _ in 0..5 {
        breaker.record_failure("openai-1").await.unwrap();
    }

    let router = ModelRouter::new(store);
    let result = router.route("gpt-4o", &unrestricted_key()).await.unwrap();

    assert!(result.eligible.is_empty());
    assert_eq!(
        result.decision.excluded[0].reason,
        gateway_core::models::routing::ExclusionReason::CircuitOpen
    );
}

/// S5: an upstream redirect chain resolves through multiple hops and the
/// resolved model (not the originally requested one) is what gets checked
/// against the allow-list.
#[tokio::test]
async fn s5_chained_model_redirect_resolves_before_allow_check() {
    let mut redirecting = upstream("openai-1", ProviderType::Openai, 1);
    redirecting
        .model_redirects
        .insert("gpt-4-turbo-preview".to_string(), "gpt-4-turbo".to_string());
    redirecting
        .model_redirects
        .insert("gpt-4-turbo".to_string(), "gpt-4".to_string());
    redirecting.allowed_models.insert("gpt-4".to_string());

    let store = Arc::new(InMemoryStore::new(vec![redirecting], vec![]));
    let router = ModelRouter::new(store);
    let result = router.route("gpt-4-turbo-preview", &unrestricted_key()).await.unwrap();

    assert_eq!(result.eligible.len(), 1);
    assert_eq!(result.resolved_models.get("openai-1"), Some(&"gpt-4".to_string()));
}

/// S6: once a breaker transitions to half-open and accumulates enough
/// successes, it closes and the upstream becomes eligible again.
#[tokio::test]
async fn s6_half_open_recovery_restores_eligibility() {
    let store = Arc::new(InMemoryStore::new(
        vec![upstream("openai-1", ProviderType::Openai, 1)],
        vec![],
    ));
    let breaker = CircuitBreaker::new(store.clone());
    for _ in 0..5 {
        breaker.record_failure("openai-1").await.unwrap();
    }

    let mut state = store.get_circuit_state("openai-1").await.unwrap();
    state.opened_at = Some(chrono::Utc::now() - chrono::Duration::seconds(301));
    store.put_circuit_state(state).await.unwrap();

    assert!(breaker.can_request_pass("openai-1").await.unwrap());
    breaker.record_success("openai-1").await.unwrap();
    breaker.record_success("openai-1").await.unwrap();

    let router = ModelRouter::new(store);
    let result = router.route("gpt-4o", &unrestricted_key()).await.unwrap();
    assert_eq!(result.eligible.len(), 1);
}
