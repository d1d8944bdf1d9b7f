//! Load balancing strategies for selecting among eligible upstream candidates.
//!
//! The router produces a filtered candidate list per request (model allow,
//! circuit state, active flag already applied); these balancers only decide
//! which of those survivors gets the request.

use crate::models::upstream::Upstream;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use std::sync::Arc;

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum LoadBalancingStrategy {
    #[default]
    Weighted,
    RoundRobin,
    LeastConnections,
    Random,
    IpHash,
}

/// Selects among eligible upstream candidates and tracks in-flight
/// connection counts for the strategies that need them.
pub trait LoadBalancer: Send + Sync {
    fn select<'a>(&self, candidates: &'a [Upstream], client_ip: Option<&str>) -> Option<&'a Upstream>;

    /// Called when a request is dispatched to `upstream_id`, before the
    /// response is known. No-op for strategies that don't track connections.
    fn record_connection(&self, _upstream_id: &str) {}

    /// Called when a dispatched request finishes, success or failure.
    fn release_connection(&self, _upstream_id: &str) {}

    /// Strategy name recorded on the routing decision trace.
    fn name(&self) -> &'static str;
}

#[derive(Debug, Default)]
pub struct RoundRobinBalancer {
    counter: AtomicUsize,
}

impl LoadBalancer for RoundRobinBalancer {
    fn select<'a>(&self, candidates: &'a [Upstream], _client_ip: Option<&str>) -> Option<&'a Upstream> {
        if candidates.is_empty() {
            return None;
        }
        let index = self.counter.fetch_add(1, Ordering::Relaxed) % candidates.len();
        Some(&candidates[index])
    }


    fn name(&self) -> &'static str {
        "round_robin"
    }
}

/// Tracks active connection counts per upstream id in a [`DashMap`], so
/// concurrent requests to different upstreams never contend on the same
/// lock.
#[derive(Debug, Default)]
pub struct LeastConnectionsBalancer {
    connections: DashMap<String, AtomicI64>,
}

impl LoadBalancer for LeastConnectionsBalancer {
    fn select<'a>(&self, candidates: &'a [Upstream], _client_ip: Option<&str>) -> Option<&'a Upstream> {
        candidates.iter().min_by_key(|u| {
            self.connections
                .get(&u.id)
                .map(|c| c.load(Ordering::Relaxed))
                .unwrap_or(0)
        })
    }

    fn record_connection(&self, upstream_id: &str) {
        self.connections
            .entry(upstream_id.to_string())
            .or_insert_with(|| AtomicI64::new(0))
            .fetch_add(1, Ordering::Relaxed);
    }

    fn release_connection(&self, upstream_id: &str) {
        if let Some(count) = self.connections.get(upstream_id) {
            count.fetch_sub(1, Ordering::Relaxed);
        }
    }


    fn name(&self) -> &'static str {
        "least_connections"
    }
}

#[derive(Debug, Default)]
pub struct RandomBalancer;

impl LoadBalancer for RandomBalancer {
    fn select<'a>(&self, candidates: &'a [Upstream], _client_ip: Option<&str>) -> Option<&'a Upstream> {
        if candidates.is_empty() {
            return None;
        }
        use rand::Rng;
        let index = rand::thread_rng().gen_range(0..candidates.len());
        Some(&candidates[index])
    }


    fn name(&self) -> &'static str {
        "random"
    }
}

/// Expands candidates into a weighted list (each appearing `weight` times)
/// and round-robins over that list, so higher-weight upstreams receive
/// proportionally more traffic without needing per-request randomness.
#[derive(Debug, Default)]
pub struct WeightedBalancer {
    cursor: AtomicUsize,
}

impl LoadBalancer for WeightedBalancer {
    fn select<'a>(&self, candidates: &'a [Upstream], _client_ip: Option<&str>) -> Option<&'a Upstream> {
        let total_weight: u32 = candidates.iter().map(|u| u.weight).sum();
        if total_weight == 0 {
            return None;
        }
        let mut target = (self.cursor.fetch_add(1, Ordering::Relaxed) as u32) % total_weight;
        for candidate in candidates {
            if target < candidate.weight {
                return Some(candidate);
            }
            target -= candidate.weight;
        }
        candidates.last()
    }


    fn name(&self) -> &'static str {
        "weighted"
    }
}

#[derive(Debug, Default)]
pub struct IpHashBalancer;

impl IpHashBalancer {
    fn hash_ip(ip: &str) -> u64 {
        let mut hasher = DefaultHasher::new();
        ip.hash(&mut hasher);
        hasher.finish()
    }
}

impl LoadBalancer for IpHashBalancer {
    fn select<'a>(&self, candidates: &'a [Upstream], client_ip: Option<&str>) -> Option<&'a Upstream> {
        if candidates.is_empty() {
            return None;
        }
        match client_ip {
            Some(ip) => {
                let index = (Self::hash_ip(ip) as usize) % candidates.len();
                Some(&candidates[index])
            }
            None => candidates.first(),
        }
    }


    fn name(&self) -> &'static str {
        "ip_hash"
    }
}

pub struct LoadBalancerFactory;

impl LoadBalancerFactory {
    pub fn create(strategy: LoadBalancingStrategy) -> Arc<dyn LoadBalancer> {
        match strategy {
            LoadBalancingStrategy::RoundRobin => Arc::new(RoundRobinBalancer::default()),
            LoadBalancingStrategy::LeastConnections => Arc::new(LeastConnectionsBalancer::default()),
            LoadBalancingStrategy::Random => Arc::new(RandomBalancer::default()),
            LoadBalancingStrategy::Weighted => Arc::new(WeightedBalancer::default()),
            LoadBalancingStrategy::IpHash => Arc::new(IpHashBalancer::default()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::upstream::ProviderType;
    use std::collections::{HashMap, HashSet};

    fn upstream(id: &str, weight: u32) -> Upstream {
        Upstream {
            id: id.to_string(),
            name: id.to_string(),
            provider_type: ProviderType::Openai,
            base_url: "https://x.example".into(),
            api_key: "k".into(),
            timeout_seconds: 30,
            is_active: true,
            weight,
            allowed_models: HashSet::new(),
            model_redirects: HashMap::new(),
        }
    }

    #[test]
    fn round_robin_cycles_through_all_candidates() {
        let lb = RoundRobinBalancer::default();
        let candidates = vec![upstream("a", 1), upstream("b", 1), upstream("c", 1)];
        let picks: Vec<_> = (0..3).map(|_| lb.select(&candidates, None).unwrap().id.clone()).collect();
        assert_eq!(picks, vec!["a", "b", "c"]);
    }

    #[test]
    fn least_connections_prefers_idle_upstream() {
        let lb = LeastConnectionsBalancer::default();
        let candidates = vec![upstream("a", 1), upstream("b", 1)];
        lb.record_connection("a");
        lb.record_connection("a");
        lb.record_connection("b");
        assert_eq!(lb.select(&candidates, None).unwrap().id, "b");
        lb.release_connection("a");
        lb.release_connection("a");
        assert_eq!(lb.select(&candidates, None).unwrap().id, "a");
    }

    #[test]
    fn weighted_distributes_proportionally_to_weight() {
        let lb = WeightedBalancer::default();
        let candidates = vec![upstream("a", 3), upstream("b", 1)];
        let mut counts = std::collections::HashMap::new();
        for _ in 0..4 {
            let id = lb.select(&candidates, None).unwrap().id.clone();
            *counts.entry(id).or_insert(0) += 1;
        }
        assert_eq!(counts.get("a"), Some(&3));
        assert_eq!(counts.get("b"), Some(&1));
    }

    #[test]
    fn ip_hash_is_stable_for_same_ip() {
        let lb = IpHashBalancer::default();
        let candidates = vec![upstream("a", 1), upstream("b", 1), upstream("c", 1)];
        let first = lb.select(&candidates, Some("10.0.0.5")).unwrap().id.clone();
        let second = lb.select(&candidates, Some("10.0.0.5")).unwrap().id.clone();
        assert_eq!(first, second);
    }

    #[test]
    fn empty_candidates_select_none() {
        let lb = RoundRobinBalancer::default();
        assert!(lb.select(&[], None).is_none());
    }
}
