//! Orchestrates routing, load balancing, the circuit breaker, and the
//! forwarder into one retrying dispatch loop.
//!
//! Each attempt selects a candidate, forwards the request, and on a
//! failover-eligible outcome excludes that candidate and retries the next
//! one with exponential backoff, until the candidate set is exhausted or
//! the attempt budget runs out.

use crate::models::error::GatewayError;
use crate::models::routing::{FailoverAttempt, FailoverErrorType, RoutingDecision};
use crate::models::settings::FailoverPolicy;
use crate::models::upstream::Upstream;
use crate::services::circuit_breaker::CircuitBreaker;
use crate::services::forwarder::{ForwardOutcome, ProxyForwarder, StreamCompletion};
use crate::services::health::HealthTracker;
use crate::services::load_balancer::LoadBalancer;
use crate::services::router::RoutingResult;
use actix_web::http::header::HeaderMap;
use actix_web::http::Method;
use actix_web::HttpResponse;
use bytes::Bytes;
use chrono::Utc;
use log::warn;
use std::sync::Arc;
use std::time::Duration;

pub struct FailoverOutcome {
    pub response: HttpResponse,
    pub decision: RoutingDecision,
    pub attempts: Vec<FailoverAttempt>,
    pub final_upstream_id: Option<String>,
    pub final_status: Option<u16>,
}

pub struct FailoverExecutor {
    circuit_breaker: Arc<CircuitBreaker>,
    load_balancer: Arc<dyn LoadBalancer>,
    forwarder: Arc<ProxyForwarder>,
    health: Arc<HealthTracker>,
    policy: FailoverPolicy,
}

impl FailoverExecutor {
    pub fn new(
        circuit_breaker: Arc<CircuitBreaker>,
        load_balancer: Arc<dyn LoadBalancer>,
        forwarder: Arc<ProxyForwarder>,
        health: Arc<HealthTracker>,
        policy: FailoverPolicy,
    ) -> Self {
        Self {
            circuit_breaker,
            load_balancer,
            forwarder,
            health,
            policy,
        }
    }

    /// Exhausts `routing.eligible` one upstream at a time until a response
    /// is accepted, the candidate set is emptied, or `max_attempts` is hit.
    /// Backoff between attempts follows an exponential curve, see
    /// [`backoff_for`].
    #[allow(clippy::too_many_arguments)]
    pub async fn forward_with_failover(
        &self,
        routing: RoutingResult,
        method: &Method,
        path_and_query: &str,
        headers: &HeaderMap,
        body: Bytes,
        client_ip: Option<&str>,
    ) -> Result<FailoverOutcome, GatewayError> {
        let RoutingResult {
            decision,
            eligible,
            resolved_models,
        } = routing;

        let mut remaining: Vec<Upstream> = eligible;
        let mut attempts = Vec::new();

        for attempt_number in 0..self.policy.max_attempts {
            if remaining.is_empty() {
                break;
            }

            let selected = match self.load_balancer.select(&remaining, client_ip) {
                Some(u) => u.clone(),
                None => break,
            };

            let passes = self
                .circuit_breaker
                .acquire_permit(&selected.id)
                .await
                .unwrap_or(true);

            if !passes {
                attempts.push(FailoverAttempt {
                    upstream_id: selected.id.clone(),
                    upstream_name: selected.name.clone(),
                    attempted_at: Utc::now(),
                    error_type: FailoverErrorType::CircuitOpen,
                    error_message: "circuit open".to_string(),
                    status_code: None,
                });
                remaining.retain(|u| u.id != selected.id);
                continue;
            }

            if attempt_number > 0 {
                tokio::time::sleep(backoff_for(attempt_number)).await;
            }

            self.load_balancer.record_connection(&selected.id);
            let result = self
                .forwarder
                .forward(&selected, method, path_and_query, headers, body.clone())
                .await;

            match result {
                Ok(outcome) => {
                    // For a streamed response the connection slot and the
                    // success/failure verdict aren't settled yet — both are
                    // deferred to the stream's actual close, handled inside
                    // `handle_outcome`. Everything else finished reading its
                    // body before returning here, so release right away.
                    let is_streaming = outcome.is_streaming;
                    let handled = self.handle_outcome(&selected, outcome, &self.policy, &mut attempts).await?;
                    if !is_streaming {
                        self.load_balancer.release_connection(&selected.id);
                    }
                    if let Some(resolved) = handled {
                        let final_decision =
                            finalize_decision(decision, resolved_models, &selected, self.load_balancer.name());
                        return Ok(FailoverOutcome {
                            response: resolved.response,
                            decision: final_decision,
                            attempts,
                            final_upstream_id: Some(selected.id.clone()),
                            final_status: Some(resolved.status),
                        });
                    }
                    remaining.retain(|u| u.id != selected.id);
                }
                Err(err) => {
                    self.load_balancer.release_connection(&selected.id);
                    let error_type = classify_error(&err);
                    self.circuit_breaker.record_failure(&selected.id).await.ok();
                    self.health.record_failure(&selected.id, &err.to_string()).await;
                    attempts.push(FailoverAttempt {
                        upstream_id: selected.id.clone(),
                        upstream_name: selected.name.clone(),
                        attempted_at: Utc::now(),
                        error_type,
                        error_message: err.to_string(),
                        status_code: None,
                    });
                    remaining.retain(|u| u.id != selected.id);
                }
            }
        }

        let final_decision = decision;
        warn!(
            "all upstream candidates exhausted for model '{}' after {} attempt(s)",
            final_decision.original_model,
            attempts.len()
        );
        Err(GatewayError::AllUpstreamsUnavailable {
            attempts: attempts.len(),
        })
    }

    /// Applies a forwarded response's status against the failover policy.
    /// Returns `Some` (with the accepted outcome) when the response should
    /// be handed to the caller as-is, `None` when the candidate failed and
    /// the caller should move on to the next one.
    ///
    /// A streamed response is always accepted here — failover can't change
    /// a status/headers already committed to the client — but its
    /// success/failure verdict isn't known yet, so it's spawned off to
    /// settle once the stream itself closes.
    async fn handle_outcome(
        &self,
        upstream: &Upstream,
        outcome: ForwardOutcome,
        policy: &FailoverPolicy,
        attempts: &mut Vec<FailoverAttempt>,
    ) -> Result<Option<AcceptedOutcome>, GatewayError> {
        let status = outcome.completion.status;
        let latency_ms = outcome.completion.latency_ms;

        if outcome.is_streaming {
            if let Some(stream_completion) = outcome.stream_completion {
                self.spawn_stream_finalizer(upstream.id.clone(), latency_ms, stream_completion);
            }
            return Ok(Some(AcceptedOutcome {
                response: outcome.response,
                status,
            }));
        }

        if !policy.is_failover_status(status) {
            self.circuit_breaker.record_success(&upstream.id).await.ok();
            self.health.record_success(&upstream.id, latency_ms).await;
            return Ok(Some(AcceptedOutcome {
                response: outcome.response,
                status,
            }));
        }

        self.circuit_breaker.record_failure(&upstream.id).await.ok();
        self.health
            .record_failure(&upstream.id, &format!("upstream returned status {status}"))
            .await;
        attempts.push(FailoverAttempt {
            upstream_id: upstream.id.clone(),
            upstream_name: upstream.name.clone(),
            attempted_at: Utc::now(),
            error_type: failover_error_type_for_status(status),
            error_message: format!("upstream returned status {status}"),
            status_code: Some(status),
        });
        Ok(None)
    }

    /// Awaits a streamed response's close in the background and only then
    /// records its success/failure and releases the connection slot, so
    /// neither happens while frames are still in flight to the client.
    fn spawn_stream_finalizer(
        &self,
        upstream_id: String,
        latency_ms: u64,
        stream_completion: tokio::sync::oneshot::Receiver<StreamCompletion>,
    ) {
        let circuit_breaker = self.circuit_breaker.clone();
        let health = self.health.clone();
        let load_balancer = self.load_balancer.clone();
        tokio::spawn(async move {
            match stream_completion.await {
                Ok(StreamCompletion::Closed(_usage)) => {
                    circuit_breaker.record_success(&upstream_id).await.ok();
                    health.record_success(&upstream_id, latency_ms).await;
                }
                Ok(StreamCompletion::Error) | Err(_) => {
                    circuit_breaker.record_failure(&upstream_id).await.ok();
                    health.mark_unhealthy(&upstream_id, "stream_error").await;
                }
            }
            load_balancer.release_connection(&upstream_id);
        });
    }
}

struct AcceptedOutcome {
    response: HttpResponse,
    status: u16,
}

fn finalize_decision(
    decision: RoutingDecision,
    mut resolved_models: std::collections::HashMap<String, String>,
    selected: &Upstream,
    strategy: &str,
) -> RoutingDecision {
    let resolved = resolved_models
        .remove(&selected.id)
        .unwrap_or_else(|| decision.original_model.clone());
    let mut decision = decision;
    decision.model_redirect_applied = resolved != decision.original_model;
    decision.resolved_model = resolved;
    decision.selected_upstream_id = Some(selected.id.clone());
    decision.selection_strategy = strategy.to_string();
    decision
}

fn failover_error_type_for_status(status: u16) -> FailoverErrorType {
    match status {
        429 => FailoverErrorType::Http429,
        500..=599 => FailoverErrorType::Http5xx,
        _ => FailoverErrorType::Http4xx,
    }
}

fn classify_error(err: &GatewayError) -> FailoverErrorType {
    match err {
        GatewayError::RequestTimeout { .. } => FailoverErrorType::Timeout,
        GatewayError::StreamError => FailoverErrorType::StreamError,
        _ => FailoverErrorType::ConnectionError,
    }
}

/// Exponential backoff: 100ms initial, doubling, capped at 5s.
fn backoff_for(attempt: usize) -> Duration {
    const INITIAL_MS: f64 = 100.0;
    const MAX_MS: f64 = 5000.0;
    const MULTIPLIER: f64 = 2.0;
    let backoff_ms = INITIAL_MS * MULTIPLIER.powi(attempt as i32);
    Duration::from_millis(backoff_ms.min(MAX_MS) as u64)
}
