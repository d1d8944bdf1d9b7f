//! The gateway's single entry point: every proxied call arrives at
//! `/v1/{tail:.*}`, is authenticated, routed by the `model` field in its
//! JSON body, and forwarded with failover.

use crate::models::error::GatewayError;
use crate::store::RequestLogEntry;
use crate::AppState;
use actix_web::{web, HttpRequest, HttpResponse};
use bytes::Bytes;
use chrono::Utc;
use log::info;
use std::time::Instant;
use uuid::Uuid;

fn extract_model(body: &[u8]) -> Result<String, GatewayError> {
    let value: serde_json::Value = serde_json::from_slice(body)
        .map_err(|_| GatewayError::InvalidRequest("request body is not valid JSON".to_string()))?;
    value
        .get("model")
        .and_then(|m| m.as_str())
        .map(|m| m.to_string())
        .ok_or_else(|| GatewayError::InvalidRequest("request body is missing a 'model' field".to_string()))
}

fn bearer_token(req: &HttpRequest) -> Option<String> {
    let header = req.headers().get(actix_web::http::header::AUTHORIZATION)?;
    let value = header.to_str().ok()?;
    value.strip_prefix("Bearer ").map(|s| s.trim().to_string())
}

pub async fn proxy_request(
    req: HttpRequest,
    path: web::Path<String>,
    body: Bytes,
    state: web::Data<AppState>,
) -> Result<HttpResponse, GatewayError> {
    let request_id = Uuid::new_v4().to_string();
    let started = Instant::now();

    let token = bearer_token(&req).ok_or(GatewayError::MissingApiKey)?;
    let api_key = state.auth.authenticate(&token, Utc::now()).await?;

    let model = extract_model(&body)?;
    let routing = state.router.route(&model, &api_key).await?;
    let decision_preview = routing.decision.clone();

    let client_ip = req.peer_addr().map(|a| a.ip().to_string());
    let tail = path.into_inner();
    let path_and_query = match req.query_string() {
        "" => tail,
        qs => format!("{tail}?{qs}"),
    };

    let result = state
        .failover
        .forward_with_failover(
            routing,
            req.method(),
            &path_and_query,
            req.headers(),
            body,
            client_ip.as_deref(),
        )
        .await;

    let duration_ms = started.elapsed().as_millis() as u64;

    match result {
        Ok(outcome) => {
            info!(
                "request {} -> model '{}' -> status {:?} in {}ms",
                request_id, model, outcome.final_status, duration_ms
            );
            let log_entry = RequestLogEntry {
                request_id,
                timestamp: Utc::now(),
                method: req.method().to_string(),
                path: req.path().to_string(),
                api_key_id: Some(api_key.id.clone()),
                routing: Some(outcome.decision),
                failover_attempts: outcome.attempts,
                final_upstream_id: outcome.final_upstream_id,
                status_code: outcome.final_status,
                duration_ms,
                error: None,
            };
            let _ = state.store.append_request_log(log_entry).await;
            Ok(outcome.response)
        }
        Err(err) => {
            info!(
                "request {} -> model '{}' -> failed: {} in {}ms",
                request_id, model, err, duration_ms
            );
            let log_entry = RequestLogEntry {
                request_id,
                timestamp: Utc::now(),
                method: req.method().to_string(),
                path: req.path().to_string(),
                api_key_id: Some(api_key.id.clone()),
                routing: Some(decision_preview),
                failover_attempts: Vec::new(),
                final_upstream_id: None,
                status_code: None,
                duration_ms,
                error: Some(err.to_string()),
            };
            let _ = state.store.append_request_log(log_entry).await;
            Err(err)
        }
    }
}

pub fn configure_proxy(cfg: &mut web::ServiceConfig) {
    cfg.route("/v1/{tail:.*}", web::route().to(proxy_request));
}
