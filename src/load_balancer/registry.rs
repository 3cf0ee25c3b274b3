//! Endpoint registry.
//!
//! # Responsibilities
//! - Hold the endpoints of every configured service, grouped by name
//! - Apply the service's load balancing strategy to pick an endpoint
//! - Fail open when no endpoint is healthy

use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use url::Url;

use crate::config::{LinkConfig, LoadBalanceStrategy, ServiceConfig};
use crate::error::ServiceError;
use crate::load_balancer::{build_strategy, endpoint::{Endpoint, EndpointSnapshot}, LoadBalancer};

/// Static description of one service plus its live endpoints.
#[derive(Debug)]
pub struct ServiceDescriptor {
    pub name: String,
    pub endpoints: Vec<Arc<Endpoint>>,
    pub strategy: LoadBalanceStrategy,
    pub health_check_interval: Duration,
    pub health_path: String,
    balancer: Box<dyn LoadBalancer>,
}

impl ServiceDescriptor {
    pub fn new(
        name: impl Into<String>,
        endpoints: Vec<Arc<Endpoint>>,
        strategy: LoadBalanceStrategy,
        seed: Option<u64>,
        health_check_interval: Duration,
        health_path: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            endpoints,
            strategy,
            health_check_interval,
            health_path: health_path.into(),
            balancer: build_strategy(strategy, seed),
        }
    }

    fn from_config(config: &ServiceConfig, default_health_path: &str) -> Result<Self, ServiceError> {
        let mut endpoints = Vec::new();
        for endpoint in config.endpoint_configs() {
            let url = Url::parse(&endpoint.url).map_err(|e| {
                ServiceError::config(format!(
                    "service '{}' has invalid endpoint URL '{}'",
                    config.name, endpoint.url
                ))
                .with_source(e)
            })?;
            endpoints.push(Arc::new(Endpoint::new(url, endpoint.weight)));
        }
        if endpoints.is_empty() {
            return Err(ServiceError::config(format!(
                "service '{}' has no endpoints",
                config.name
            )));
        }

        Ok(Self::new(
            config.name.clone(),
            endpoints,
            config.strategy,
            config.seed,
            Duration::from_secs(config.health_check_interval_secs),
            config
                .health_path
                .clone()
                .unwrap_or_else(|| default_health_path.to_string()),
        ))
    }

    /// Select an endpoint, preferring healthy ones.
    pub fn pick(&self) -> Option<Pick> {
        let healthy: Vec<Arc<Endpoint>> = self
            .endpoints
            .iter()
            .filter(|e| e.is_healthy())
            .cloned()
            .collect();

        if !healthy.is_empty() {
            return self.balancer.next_endpoint(&healthy).map(|endpoint| Pick {
                endpoint,
                degraded: false,
            });
        }

        // No healthy endpoint: try the full set rather than refusing traffic
        tracing::warn!(
            service = %self.name,
            endpoint_count = self.endpoints.len(),
            "No healthy endpoints, failing open"
        );
        self.balancer.next_endpoint(&self.endpoints).map(|endpoint| Pick {
            endpoint,
            degraded: true,
        })
    }

    pub fn snapshot(&self) -> ServiceSnapshot {
        ServiceSnapshot {
            name: self.name.clone(),
            strategy: self.strategy,
            endpoints: self.endpoints.iter().map(|e| e.snapshot()).collect(),
        }
    }
}

/// Result of an endpoint selection.
#[derive(Debug, Clone)]
pub struct Pick {
    pub endpoint: Arc<Endpoint>,
    /// True when no endpoint was healthy and the pick came from the full set.
    pub degraded: bool,
}

/// Point-in-time view of a service.
#[derive(Debug, Clone, Serialize)]
pub struct ServiceSnapshot {
    pub name: String,
    pub strategy: LoadBalanceStrategy,
    pub endpoints: Vec<EndpointSnapshot>,
}

/// Registry of all services and their endpoints.
#[derive(Debug, Default)]
pub struct EndpointRegistry {
    services: HashMap<String, Arc<ServiceDescriptor>>,
}

impl EndpointRegistry {
    /// Build the registry from configuration.
    pub fn from_config(config: &LinkConfig) -> Result<Self, ServiceError> {
        let mut registry = Self::default();
        for service in &config.services {
            let descriptor = ServiceDescriptor::from_config(service, &config.health_check.path)?;
            registry.register(descriptor);
        }
        Ok(registry)
    }

    /// Add a service. A later registration under the same name replaces the earlier one.
    pub fn register(&mut self, descriptor: ServiceDescriptor) {
        tracing::debug!(
            service = %descriptor.name,
            endpoints = descriptor.endpoints.len(),
            strategy = ?descriptor.strategy,
            "Registered service"
        );
        self.services.insert(descriptor.name.clone(), Arc::new(descriptor));
    }

    pub fn service(&self, name: &str) -> Option<Arc<ServiceDescriptor>> {
        self.services.get(name).cloned()
    }

    /// Select an endpoint for the given service.
    pub fn pick(&self, service: &str) -> Result<Pick, ServiceError> {
        let descriptor = self
            .services
            .get(service)
            .ok_or_else(|| ServiceError::config(format!("unknown service '{}'", service)))?;
        descriptor
            .pick()
            .ok_or_else(|| ServiceError::config(format!("service '{}' has no endpoints", service)))
    }

    /// All registered services (for health checking).
    pub fn services(&self) -> Vec<Arc<ServiceDescriptor>> {
        self.services.values().cloned().collect()
    }

    pub fn snapshot(&self) -> Vec<ServiceSnapshot> {
        let mut snapshots: Vec<_> = self.services.values().map(|s| s.snapshot()).collect();
        snapshots.sort_by(|a, b| a.name.cmp(&b.name));
        snapshots
    }
}
