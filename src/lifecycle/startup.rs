//! Startup orchestration.
//!
//! # Responsibilities
//! - Validate configuration
//! - Build the component graph in dependency order
//! - Start and stop background tasks (health checks)
//!
//! # Design Decisions
//! - Fail fast: invalid config is a ConfigError, never a half-built graph
//! - One reqwest client shared by calls, probes and credential refreshes

use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::auth::CredentialProvider;
use crate::client::{HttpTransport, ServiceClient, Transport};
use crate::config::{validate_config, LinkConfig};
use crate::degradation::GracefulDegradationService;
use crate::error::{ServiceError, ServiceResult};
use crate::health::HealthMonitor;
use crate::load_balancer::EndpointRegistry;
use crate::resilience::CircuitBreakerManager;

/// Every component, wired from one validated config.
pub struct ServiceLink {
    config: LinkConfig,
    registry: Arc<EndpointRegistry>,
    breakers: Arc<CircuitBreakerManager>,
    credentials: Arc<CredentialProvider>,
    degradation: Arc<GracefulDegradationService>,
    client: Arc<ServiceClient>,
    monitor: HealthMonitor,
    started_at: Instant,
}

impl ServiceLink {
    /// Build with the reqwest transport.
    pub fn build(config: LinkConfig) -> ServiceResult<Self> {
        let http = reqwest::Client::builder()
            .pool_idle_timeout(Duration::from_secs(90))
            .build()
            .map_err(|e| ServiceError::config("failed to build HTTP client").with_source(e))?;
        Self::with_http_client(config, http)
    }

    /// Build with the reqwest transport over `http`.
    pub fn with_http_client(config: LinkConfig, http: reqwest::Client) -> ServiceResult<Self> {
        let transport = Arc::new(HttpTransport::new(http.clone()));
        Self::assemble(config, http, transport)
    }

    /// Build with a caller-provided transport for outbound calls.
    pub fn with_transport(config: LinkConfig, transport: Arc<dyn Transport>) -> ServiceResult<Self> {
        Self::assemble(config, reqwest::Client::new(), transport)
    }

    fn assemble(config: LinkConfig, http: reqwest::Client, transport: Arc<dyn Transport>) -> ServiceResult<Self> {
        if let Err(errors) = validate_config(&config) {
            let message = errors
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(", ");
            return Err(ServiceError::config(format!("invalid configuration: {}", message)));
        }

        let registry = Arc::new(EndpointRegistry::from_config(&config)?);
        let breakers = Arc::new(CircuitBreakerManager::from_config(&config)?);
        let credentials = Arc::new(CredentialProvider::from_config(&config, http.clone())?);
        let degradation = Arc::new(GracefulDegradationService::from_config(&config.fallbacks));

        let client = Arc::new(
            ServiceClient::new(registry.clone(), breakers.clone(), credentials.clone(), transport)
                .with_degradation(degradation.clone())
                .with_config_options(&config),
        );
        let monitor = HealthMonitor::new(registry.clone(), config.health_check.clone(), http);

        tracing::info!(
            services = config.services.len(),
            fallbacks = config.fallbacks.len(),
            "Service graph built"
        );

        Ok(Self {
            config,
            registry,
            breakers,
            credentials,
            degradation,
            client,
            monitor,
            started_at: Instant::now(),
        })
    }

    /// Start background health probing.
    pub fn start(&self) {
        self.monitor.start();
    }

    /// Stop background tasks.
    pub async fn shutdown(&self) {
        self.monitor.stop().await;
    }

    pub fn config(&self) -> &LinkConfig {
        &self.config
    }

    pub fn client(&self) -> &Arc<ServiceClient> {
        &self.client
    }

    pub fn registry(&self) -> &Arc<EndpointRegistry> {
        &self.registry
    }

    pub fn breakers(&self) -> &Arc<CircuitBreakerManager> {
        &self.breakers
    }

    pub fn credentials(&self) -> &Arc<CredentialProvider> {
        &self.credentials
    }

    pub fn degradation(&self) -> &Arc<GracefulDegradationService> {
        &self.degradation
    }

    pub fn monitor(&self) -> &HealthMonitor {
        &self.monitor
    }

    pub fn uptime(&self) -> Duration {
        self.started_at.elapsed()
    }
}
