//! Core library for a multi-tenant LLM proxy gateway: request routing by
//! model name, weighted/round-robin/least-connections/random/IP-hash load
//! balancing, per-upstream circuit breaking, failover with exponential
//! backoff, and SSE-aware usage-extracting forwarding.
//!
//! The host binary (`gateway-server`) owns process startup; everything
//! else — models, persistence port, services, and route handlers — lives
//! here so it can be exercised directly by integration tests without an
//! HTTP server in the loop.

pub mod config;
pub mod logs;
pub mod models;
pub mod routes;
pub mod services;
pub mod store;

use models::settings::Settings;
use services::auth::AuthService;
use services::circuit_breaker::CircuitBreaker;
use services::failover::FailoverExecutor;
use services::forwarder::ProxyForwarder;
use services::health::HealthTracker;
use services::load_balancer::{LoadBalancer, LoadBalancerFactory};
use services::router::ModelRouter;
use std::sync::Arc;
use store::memory::InMemoryStore;
use store::Store;

/// Shared application state handed to every route handler via
/// `web::Data<AppState>`.
pub struct AppState {
    pub store: Arc<dyn Store>,
    pub router: ModelRouter,
    pub auth: AuthService,
    pub health: Arc<HealthTracker>,
    pub failover: FailoverExecutor,
    pub settings: Settings,
}

impl AppState {
    /// Wires every service against a fresh [`InMemoryStore`] seeded from
    /// `settings`. A host binary that wants a different backend builds its
    /// own `Arc<dyn Store>` and calls [`AppState::with_store`] instead.
    pub fn new(settings: Settings) -> Self {
        let store: Arc<dyn Store> = Arc::new(InMemoryStore::new(
            settings.upstreams.clone(),
            settings.api_keys.clone(),
        ));
        Self::with_store(settings, store)
    }

    pub fn with_store(settings: Settings, store: Arc<dyn Store>) -> Self {
        let circuit_breaker = Arc::new(CircuitBreaker::new(store.clone()));
        let load_balancer: Arc<dyn LoadBalancer> =
            LoadBalancerFactory::create(settings.load_balancing);
        let forwarder = Arc::new(ProxyForwarder::new());
        let health = Arc::new(HealthTracker::new(store.clone()));
        let router = ModelRouter::new(store.clone());
        let auth = AuthService::new(store.clone());
        let failover = FailoverExecutor::new(
            circuit_breaker,
            load_balancer,
            forwarder,
            health.clone(),
            settings.failover.clone(),
        );

        Self {
            store,
            router,
            auth,
            health,
            failover,
            settings,
        }
    }
}
