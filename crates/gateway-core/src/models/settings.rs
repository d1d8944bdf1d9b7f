//! Application configuration for the gateway process.
//!
//! A single struct loaded from JSON at startup, with a `validate()` pass
//! that the binary refuses to start without passing.

use super::api_key::ApiKey;
use super::upstream::Upstream;
use crate::services::load_balancer::LoadBalancingStrategy;
use serde::{Deserialize, Serialize};

/// HTTP bind address/port, overridable by `GATEWAY_HOST`/`GATEWAY_PORT`.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ServerSettings {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

/// Which statuses trigger failover to the next candidate. Defaults to
/// 429 + 5xx: other 4xx statuses almost always indicate a problem with
/// the request itself, which retrying against a different upstream
/// would not fix.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct FailoverPolicy {
    #[serde(default = "default_failover_statuses")]
    pub failover_statuses: Vec<u16>,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: usize,
}

fn default_failover_statuses() -> Vec<u16> {
    (500..=599).chain(std::iter::once(429)).collect()
}

fn default_max_attempts() -> usize {
    10
}

impl Default for FailoverPolicy {
    fn default() -> Self {
        Self {
            failover_statuses: default_failover_statuses(),
            max_attempts: default_max_attempts(),
        }
    }
}

impl FailoverPolicy {
    pub fn is_failover_status(&self, status: u16) -> bool {
        self.failover_statuses.contains(&status)
    }
}

/// Top-level gateway configuration, loaded from JSON by
/// [`crate::config::settings::load_settings`].
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Settings {
    pub version: u8,
    #[serde(default)]
    pub upstreams: Vec<Upstream>,
    #[serde(default)]
    pub api_keys: Vec<ApiKey>,
    #[serde(default)]
    pub failover: FailoverPolicy,
    #[serde(default)]
    pub load_balancing: LoadBalancingStrategy,
    #[serde(default)]
    pub server: ServerSettings,
}

impl Settings {
    /// Validates every upstream's invariants and checks that upstream names
    /// are unique across the configuration.
    pub fn validate(&self) -> Result<(), String> {
        let mut seen = std::collections::HashSet::new();
        for upstream in &self.upstreams {
            if !seen.insert(&upstream.name) {
                return Err(format!("duplicate upstream name: {}", upstream.name));
            }
            upstream
                .validate()
                .map_err(|e| format!("upstream '{}': {}", upstream.name, e))?;
        }
        Ok(())
    }
}
