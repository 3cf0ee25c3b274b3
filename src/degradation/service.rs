//! Graceful degradation service.
//!
//! # Responsibilities
//! - Match a failed call to the most specific fallback policy
//! - Serve a bounded-staleness cached response, a static default, or an
//!   explicit unavailable sentinel
//! - Remember successful responses for the cache strategy

use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use crate::client::ServiceRequest;
use crate::config::{FallbackConfig, FallbackStrategy};
use crate::degradation::{cache::ResponseCache, Fallback};
use crate::observability::metrics;

#[derive(Debug, Clone)]
struct Policy {
    service: String,
    path_prefix: String,
    capability: String,
    strategy: FallbackStrategy,
    max_staleness: Duration,
    payload: Option<Value>,
}

impl Policy {
    fn from_config(config: &FallbackConfig) -> Self {
        let path_prefix = config.path_prefix.clone().unwrap_or_default();
        let capability = config.capability.clone().unwrap_or_else(|| {
            if path_prefix.is_empty() {
                config.service.clone()
            } else {
                format!("{}{}", config.service, path_prefix)
            }
        });
        Self {
            service: config.service.clone(),
            path_prefix,
            capability,
            strategy: config.strategy,
            max_staleness: Duration::from_secs(config.max_staleness_secs),
            payload: config.payload.clone(),
        }
    }

    fn matches(&self, service: &str, path: &str) -> bool {
        self.service == service && path.starts_with(&self.path_prefix)
    }
}

/// Produces stand-in results when a capability is unavailable.
#[derive(Debug, Default)]
pub struct GracefulDegradationService {
    policies: Vec<Policy>,
    cache: ResponseCache,
    invocations: AtomicU64,
}

impl GracefulDegradationService {
    pub fn new(cache: ResponseCache) -> Self {
        Self {
            policies: Vec::new(),
            cache,
            invocations: AtomicU64::new(0),
        }
    }

    pub fn from_config(fallbacks: &[FallbackConfig]) -> Self {
        let mut service = Self::new(ResponseCache::default());
        for config in fallbacks {
            service = service.with_policy(config);
        }
        service
    }

    pub fn with_policy(mut self, config: &FallbackConfig) -> Self {
        self.policies.push(Policy::from_config(config));
        self
    }

    /// Longest matching prefix wins.
    fn policy_for(&self, service: &str, path: &str) -> Option<&Policy> {
        self.policies
            .iter()
            .filter(|p| p.matches(service, path))
            .max_by_key(|p| p.path_prefix.len())
    }

    /// Store a successful response if a cache policy covers it.
    pub fn remember(&self, service: &str, request: &ServiceRequest, data: &Value) {
        let cacheable = self
            .policy_for(service, &request.path)
            .map(|p| p.strategy == FallbackStrategy::Cache)
            .unwrap_or(false);
        if cacheable {
            self.cache.store(request.cache_key(service), data.clone());
        }
    }

    /// Stand-in result for a call that could not be served.
    pub fn fallback(&self, service: &str, request: &ServiceRequest) -> Fallback {
        self.invocations.fetch_add(1, Ordering::Relaxed);

        let fallback = match self.policy_for(service, &request.path) {
            None => Fallback::Unavailable {
                capability: service.to_string(),
            },
            Some(policy) => self.apply(policy, service, request),
        };

        tracing::warn!(
            service = %service,
            path = %request.path,
            capability = %fallback.capability(),
            kind = fallback.label(),
            "Serving degraded result"
        );
        metrics::record_fallback(service, fallback.label());
        fallback
    }

    fn apply(&self, policy: &Policy, service: &str, request: &ServiceRequest) -> Fallback {
        let capability = policy.capability.clone();
        match policy.strategy {
            FallbackStrategy::Cache => {
                if let Some((data, age)) = self
                    .cache
                    .get_fresh(&request.cache_key(service), policy.max_staleness)
                {
                    return Fallback::Cached {
                        capability,
                        data,
                        age_ms: age.as_millis() as u64,
                    };
                }
                match &policy.payload {
                    Some(data) => Fallback::Default {
                        capability,
                        data: data.clone(),
                    },
                    None => Fallback::Unavailable { capability },
                }
            }
            FallbackStrategy::Default => match &policy.payload {
                Some(data) => Fallback::Default {
                    capability,
                    data: data.clone(),
                },
                None => Fallback::Unavailable { capability },
            },
            FallbackStrategy::Unavailable => Fallback::Unavailable { capability },
        }
    }

    /// Number of times a fallback was produced.
    pub fn invocations(&self) -> u64 {
        self.invocations.load(Ordering::Relaxed)
    }

    pub fn cache(&self) -> &ResponseCache {
        &self.cache
    }
}
