//! `/internal` debug endpoints: a circuit-breaker-state snapshot and the
//! recent request log. Not a metrics dashboard or time-series exporter —
//! both Non-goals of this gateway — just the immediate-state read a
//! developer reaches for while debugging a live incident.

use crate::AppState;
use actix_web::{web, HttpResponse, Result};
use serde_json::json;

pub async fn circuit_snapshot(state: web::Data<AppState>) -> Result<HttpResponse> {
    let upstreams = state.store.list_upstreams().await.unwrap_or_default();
    let mut snapshot = Vec::with_capacity(upstreams.len());
    for upstream in upstreams {
        if let Ok(circuit) = state.store.get_circuit_state(&upstream.id).await {
            snapshot.push(json!({
                "upstream_id": upstream.id,
                "upstream_name": upstream.name,
                "state": circuit.state,
                "failure_count": circuit.failure_count,
                "success_count": circuit.success_count,
            }));
        }
    }
    Ok(HttpResponse::Ok().json(json!({ "upstreams": snapshot })))
}

#[derive(serde::Deserialize)]
pub struct RecentQuery {
    #[serde(default = "default_limit")]
    limit: usize,
}

fn default_limit() -> usize {
    50
}

pub async fn recent_requests(
    state: web::Data<AppState>,
    query: web::Query<RecentQuery>,
) -> Result<HttpResponse> {
    let entries = state
        .store
        .recent_request_logs(query.limit)
        .await
        .unwrap_or_default();
    Ok(HttpResponse::Ok().json(json!({ "requests": entries })))
}

pub fn configure_metrics(cfg: &mut web::ServiceConfig) {
    cfg.route("/internal/circuits", web::get().to(circuit_snapshot))
        .route("/internal/requests/recent", web::get().to(recent_requests));
}
