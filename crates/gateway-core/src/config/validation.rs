//! Configuration validation with detailed, categorized feedback.
//!
//! Three-tier result: errors block startup, warnings and recommendations
//! don't. Checks cover upstream/API-key configuration rather than a
//! route table.

use crate::models::settings::Settings;
use log::{info, warn};
use std::collections::HashSet;

#[derive(Debug, Clone, Default)]
pub struct ValidationResult {
    pub is_valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    pub recommendations: Vec<String>,
}

impl ValidationResult {
    pub fn new() -> Self {
        Self {
            is_valid: true,
            ..Default::default()
        }
    }

    pub fn add_error(&mut self, error: String) {
        self.is_valid = false;
        self.errors.push(error);
    }

    pub fn add_warning(&mut self, warning: String) {
        self.warnings.push(warning);
    }

    pub fn add_recommendation(&mut self, recommendation: String) {
        self.recommendations.push(recommendation);
    }

    /// Logs the result at the appropriate level for each category.
    pub fn log_summary(&self) {
        for error in &self.errors {
            log::error!("config: {error}");
        }
        for warning in &self.warnings {
            warn!("config: {warning}");
        }
        for recommendation in &self.recommendations {
            info!("config: {recommendation}");
        }
    }
}

pub struct ConfigValidator;

impl ConfigValidator {
    /// Runs every check against `settings` and returns the aggregated
    /// result. Callers should refuse to start the server when
    /// `!result.is_valid`.
    pub fn validate(settings: &Settings) -> ValidationResult {
        let mut result = ValidationResult::new();

        if settings.upstreams.is_empty() {
            result.add_error("no upstreams configured".to_string());
        }

        let mut seen_names = HashSet::new();
        for upstream in &settings.upstreams {
            if !seen_names.insert(upstream.name.clone()) {
                result.add_error(format!("duplicate upstream name '{}'", upstream.name));
            }
            if let Err(e) = upstream.validate() {
                result.add_error(format!("upstream '{}': {e}", upstream.name));
            }
            if upstream.api_key.trim().is_empty() {
                result.add_error(format!("upstream '{}' has an empty api_key", upstream.name));
            }
            if !upstream.base_url.starts_with("https://") {
                result.add_warning(format!(
                    "upstream '{}' base_url does not use https",
                    upstream.name
                ));
            }
        }

        if settings.api_keys.is_empty() {
            result.add_warning("no API keys configured; no caller will be able to authenticate".to_string());
        }
        for key in &settings.api_keys {
            if key.key_hash.trim().is_empty() || key.salt.trim().is_empty() {
                result.add_error(format!("api key '{}' is missing a hash or salt", key.id));
            }
        }

        if settings.server.port < 1024 {
            result.add_recommendation(
                "binding below port 1024 typically requires elevated privileges".to_string(),
            );
        }

        if settings.failover.max_attempts > settings.upstreams.len().max(1) {
            result.add_recommendation(
                "failover.max_attempts exceeds the number of configured upstreams".to_string(),
            );
        }

        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::api_key::ApiKey;
    use crate::models::settings::ServerSettings;
    use crate::models::upstream::{ProviderType, Upstream};
    use std::collections::{HashMap, HashSet as StdHashSet};

    fn settings_with_upstream() -> Settings {
        Settings {
            version: 1,
            upstreams: vec![Upstream {
                id: "u1".into(),
                name: "primary".into(),
                provider_type: ProviderType::Openai,
                base_url: "https://api.openai.com".into(),
                api_key: "sk-live".into(),
                timeout_seconds: 30,
                is_active: true,
                weight: 1,
                allowed_models: StdHashSet::new(),
                model_redirects: HashMap::new(),
            }],
            api_keys: vec![ApiKey {
                id: "k1".into(),
                key_prefix: "abcdefgh".into(),
                key_hash: "hash".into(),
                salt: "salt".into(),
                expires_at: None,
                is_active: true,
                allowed_upstream_ids: StdHashSet::new(),
            }],
            failover: Default::default(),
            load_balancing: Default::default(),
            server: ServerSettings::default(),
        }
    }

    #[test]
    fn empty_upstreams_is_an_error() {
        let mut settings = settings_with_upstream();
        settings.upstreams.clear();
        let result = ConfigValidator::validate(&settings);
        assert!(!result.is_valid);
    }

    #[test]
    fn valid_settings_pass() {
        let result = ConfigValidator::validate(&settings_with_upstream());
        assert!(result.is_valid);
    }

    #[test]
    fn non_https_base_url_is_a_warning_not_an_error() {
        let mut settings = settings_with_upstream();
        settings.upstreams[0].base_url = "http://api.example.com".into();
        let result = ConfigValidator::validate(&settings);
        assert!(result.is_valid);
        assert_eq!(result.warnings.len(), 1);
    }
}
