//! Advisory per-upstream health tracking.
//!
//! Unlike the circuit breaker, `HealthRecord`s never gate routing — they
//! exist purely for the `/health` response and the request log, updated on
//! every forwarded request's outcome.

use crate::models::health::HealthRecord;
use crate::store::Store;
use chrono::Utc;
use std::sync::Arc;

pub struct HealthTracker {
    store: Arc<dyn Store>,
}

impl HealthTracker {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    pub async fn record_success(&self, upstream_id: &str, latency_ms: u64) {
        let mut record = self
            .store
            .get_health(upstream_id)
            .await
            .unwrap_or_else(|_| HealthRecord::new(upstream_id));
        record.is_healthy = true;
        record.last_check_at = Some(Utc::now());
        record.last_success_at = Some(Utc::now());
        record.failure_count = 0;
        record.latency_ms = Some(latency_ms);
        record.error_message = None;
        let _ = self.store.put_health(record).await;
    }

    pub async fn record_failure(&self, upstream_id: &str, error_message: &str) {
        let mut record = self
            .store
            .get_health(upstream_id)
            .await
            .unwrap_or_else(|_| HealthRecord::new(upstream_id));
        record.failure_count += 1;
        record.last_check_at = Some(Utc::now());
        record.error_message = Some(error_message.to_string());
        if record.failure_count >= 3 {
            record.is_healthy = false;
        }
        let _ = self.store.put_health(record).await;
    }

    /// Forces `is_healthy = false` regardless of the failure-count
    /// threshold `record_failure` applies. Used for signals that are
    /// conclusive on their own, such as a stream dying mid-response.
    pub async fn mark_unhealthy(&self, upstream_id: &str, error_message: &str) {
        let mut record = self
            .store
            .get_health(upstream_id)
            .await
            .unwrap_or_else(|_| HealthRecord::new(upstream_id));
        record.failure_count += 1;
        record.last_check_at = Some(Utc::now());
        record.error_message = Some(error_message.to_string());
        record.is_healthy = false;
        let _ = self.store.put_health(record).await;
    }

    pub async fn snapshot(&self) -> Vec<HealthRecord> {
        match self.store.list_upstreams().await {
            Ok(upstreams) => {
                let mut records = Vec::with_capacity(upstreams.len());
                for upstream in upstreams {
                    if let Ok(record) = self.store.get_health(&upstream.id).await {
                        records.push(record);
                    }
                }
                records
            }
            Err(_) => Vec::new(),
        }
    }
}
