//! Liveness/readiness/health endpoints. `/health` additionally reports
//! each upstream's advisory health record; `/ready` fails once no
//! upstream is active.

use crate::AppState;
use actix_web::{web, HttpResponse, Result};
use serde_json::json;

pub async fn health_check(state: web::Data<AppState>) -> Result<HttpResponse> {
    let upstreams = state.health.snapshot().await;
    Ok(HttpResponse::Ok().json(json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "upstreams": upstreams,
    })))
}

pub async fn readiness_check(state: web::Data<AppState>) -> Result<HttpResponse> {
    let upstreams = state.store.list_upstreams().await.unwrap_or_default();
    if upstreams.iter().any(|u| u.is_active) {
        Ok(HttpResponse::Ok().json(json!({
            "status": "ready",
            "timestamp": chrono::Utc::now().to_rfc3339(),
        })))
    } else {
        Ok(HttpResponse::ServiceUnavailable().json(json!({
            "status": "not_ready",
            "timestamp": chrono::Utc::now().to_rfc3339(),
            "reason": "no active upstreams configured",
        })))
    }
}

pub async fn liveness_check() -> Result<HttpResponse> {
    Ok(HttpResponse::Ok().json(json!({
        "status": "alive",
        "timestamp": chrono::Utc::now().to_rfc3339(),
    })))
}

pub fn configure_health(cfg: &mut web::ServiceConfig) {
    cfg.route("/health", web::get().to(health_check))
        .route("/ready", web::get().to(readiness_check))
        .route("/live", web::get().to(liveness_check));
}
