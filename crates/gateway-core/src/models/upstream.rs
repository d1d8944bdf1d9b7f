//! Upstream provider configuration.
//!
//! An [`Upstream`] is a single endpoint of a single LLM provider: a base URL,
//! an encrypted credential, and the routing rules (allow-list and model
//! redirects) that decide which requests it is eligible to serve.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

/// Wire protocol dialect spoken by an upstream.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ProviderType {
    Openai,
    Anthropic,
    Google,
    Custom,
}

impl ProviderType {
    /// Longest case-insensitive prefix match from the fixed model-name table.
    ///
    /// Returns `None` when no known prefix matches; callers fall back to
    /// treating the request as unscoped rather than rejecting it.
    pub fn from_model_name(model: &str) -> Option<Self> {
        let lower = model.to_lowercase();
        // Ordered by prefix length descending isn't required here since the
        // prefixes are disjoint.
        const TABLE: &[(&str, ProviderType)] = &[
            ("claude-", ProviderType::Anthropic),
            ("gpt-", ProviderType::Openai),
            ("gemini-", ProviderType::Google),
        ];
        TABLE
            .iter()
            .find(|(prefix, _)| lower.starts_with(prefix))
            .map(|(_, provider)| *provider)
    }
}

/// A single endpoint of a single LLM provider.
///
/// Treated as read-mostly configuration by the core: it is re-read per
/// request through the [`crate::store::Store`] port (the store may cache
/// with a TTL; that is an implementation detail of the chosen `Store`).
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Upstream {
    pub id: String,
    pub name: String,
    pub provider_type: ProviderType,
    pub base_url: String,
    /// Encrypted at rest; only decrypted inside the proxy forwarder.
    pub api_key: String,
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,
    #[serde(default = "default_true")]
    pub is_active: bool,
    #[serde(default = "default_weight")]
    pub weight: u32,
    #[serde(default)]
    pub allowed_models: HashSet<String>,
    #[serde(default)]
    pub model_redirects: HashMap<String, String>,
}

fn default_timeout_seconds() -> u64 {
    60
}

fn default_true() -> bool {
    true
}

fn default_weight() -> u32 {
    1
}

/// Upper bound on redirect-chain traversal depth.
pub const MAX_REDIRECT_DEPTH: usize = 10;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum UpstreamValidationError {
    #[error("upstream weight must be >= 1")]
    ZeroWeight,
    #[error("model_redirects contains a cycle starting at '{0}'")]
    RedirectCycle(String),
}

impl Upstream {
    /// Validates that weight >= 1 and that the redirect graph is acyclic.
    /// `allowed_models`/`model_redirects` being sets/maps
    /// already rules out duplicate entries at the type level.
    pub fn validate(&self) -> Result<(), UpstreamValidationError> {
        if self.weight == 0 {
            return Err(UpstreamValidationError::ZeroWeight);
        }
        for start in self.model_redirects.keys() {
            self.resolve_redirect(start)
                .map_err(|_| UpstreamValidationError::RedirectCycle(start.clone()))?;
        }
        Ok(())
    }

    /// Follows `model_redirects` from `model` up to [`MAX_REDIRECT_DEPTH`]
    /// hops, returning the final resolved model name. A cycle (detected via
    /// a visited set) is reported as `Err(())`; callers treat that as a
    /// configuration error and exclude the upstream with reason
    /// `model_not_allowed` rather than panicking mid-request.
    pub fn resolve_redirect(&self, model: &str) -> Result<String, ()> {
        let mut current = model.to_string();
        let mut visited = HashSet::new();
        visited.insert(current.clone());
        for _ in 0..MAX_REDIRECT_DEPTH {
            match self.model_redirects.get(&current) {
                Some(next) => {
                    if !visited.insert(next.clone()) {
                        return Err(());
                    }
                    current = next.clone();
                }
                None => return Ok(current),
            }
        }
        Err(())
    }

    /// Whether `resolved_model` is permitted on this upstream. An empty
    /// allow-list accepts any model of the upstream's provider type.
    pub fn allows_model(&self, resolved_model: &str) -> bool {
        self.allowed_models.is_empty() || self.allowed_models.contains(resolved_model)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn upstream(redirects: &[(&str, &str)]) -> Upstream {
        Upstream {
            id: "u1".into(),
            name: "u1".into(),
            provider_type: ProviderType::Openai,
            base_url: "https://x.example".into(),
            api_key: "secret".into(),
            timeout_seconds: 30,
            is_active: true,
            weight: 1,
            allowed_models: HashSet::new(),
            model_redirects: redirects
                .iter()
                .map(|(a, b)| (a.to_string(), b.to_string()))
                .collect(),
        }
    }

    #[test]
    fn provider_type_matches_longest_prefix() {
        assert_eq!(
            ProviderType::from_model_name("claude-3-opus"),
            Some(ProviderType::Anthropic)
        );
        assert_eq!(
            ProviderType::from_model_name("gpt-4-turbo"),
            Some(ProviderType::Openai)
        );
        assert_eq!(ProviderType::from_model_name("llama-3"), None);
    }

    #[test]
    fn resolves_single_hop_redirect() {
        let u = upstream(&[("gpt-4-turbo", "gpt-4")]);
        assert_eq!(u.resolve_redirect("gpt-4-turbo"), Ok("gpt-4".to_string()));
    }

    #[test]
    fn resolves_chained_redirect() {
        let u = upstream(&[("a", "b"), ("b", "c")]);
        assert_eq!(u.resolve_redirect("a"), Ok("c".to_string()));
    }

    #[test]
    fn detects_redirect_cycle() {
        let u = upstream(&[("a", "b"), ("b", "a")]);
        assert_eq!(u.resolve_redirect("a"), Err(()));
        assert_eq!(
            u.validate(),
            Err(UpstreamValidationError::RedirectCycle("a".into()))
                .or(Err(UpstreamValidationError::RedirectCycle("b".into())))
        );
    }

    #[test]
    fn zero_weight_is_invalid() {
        let mut u = upstream(&[]);
        u.weight = 0;
        assert_eq!(u.validate(), Err(UpstreamValidationError::ZeroWeight));
    }

    #[test]
    fn empty_allow_list_accepts_any_model() {
        let u = upstream(&[]);
        assert!(u.allows_model("anything"));
    }
}
