//! Active health checking.
//!
//! # Responsibilities
//! - Periodically probe every endpoint of every service
//! - Flip endpoint health flags from probe results
//!
//! # Design Decisions
//! - One task per service, ticking at that service's interval
//! - Probe timeout is the smaller of the configured timeout and half the interval
//! - Probe failures are logged; they never stop the loop

use futures_util::{stream, StreamExt};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};

use crate::config::HealthCheckConfig;
use crate::lifecycle::shutdown::Shutdown;
use crate::load_balancer::{Endpoint, EndpointRegistry, ServiceDescriptor};
use crate::observability::metrics;

pub struct HealthMonitor {
    registry: Arc<EndpointRegistry>,
    config: HealthCheckConfig,
    client: reqwest::Client,
    shutdown: Shutdown,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl HealthMonitor {
    pub fn new(registry: Arc<EndpointRegistry>, config: HealthCheckConfig, client: reqwest::Client) -> Self {
        Self {
            registry,
            config,
            client,
            shutdown: Shutdown::new(),
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Spawn one probe loop per registered service.
    pub fn start(&self) {
        if !self.config.enabled {
            tracing::info!("Active health checks disabled");
            return;
        }

        let mut tasks = self.tasks.lock().unwrap_or_else(|e| e.into_inner());
        if !tasks.is_empty() {
            tracing::warn!("Health monitor already running");
            return;
        }

        for service in self.registry.services() {
            tracing::info!(
                service = %service.name,
                interval_secs = service.health_check_interval.as_secs(),
                path = %service.health_path,
                "Health monitor starting"
            );
            let shutdown = self.shutdown.subscribe();
            let client = self.client.clone();
            let config = self.config.clone();
            tasks.push(tokio::spawn(run_service(service, client, config, shutdown)));
        }
    }

    /// Stop every probe loop and wait for them to exit.
    pub async fn stop(&self) {
        self.shutdown.trigger();
        let tasks: Vec<_> = self
            .tasks
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .drain(..)
            .collect();
        for task in tasks {
            if let Err(e) = task.await {
                tracing::error!(error = %e, "Health probe task ended abnormally");
            }
        }
        tracing::info!("Health monitor stopped");
    }

    /// Probe every endpoint of `service` once.
    pub async fn check_service(&self, service: &ServiceDescriptor) {
        check_service(&self.client, &self.config, service).await;
    }
}

async fn run_service(
    service: Arc<ServiceDescriptor>,
    client: reqwest::Client,
    config: HealthCheckConfig,
    mut shutdown: broadcast::Receiver<()>,
) {
    let mut ticker = time::interval(service.health_check_interval.max(Duration::from_millis(1)));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                check_service(&client, &config, &service).await;
            }
            _ = shutdown.recv() => {
                tracing::debug!(service = %service.name, "Health monitor received shutdown signal, exiting loop");
                break;
            }
        }
    }
}

fn probe_timeout(config: &HealthCheckConfig, interval: Duration) -> Duration {
    Duration::from_millis(config.timeout_ms)
        .min(interval / 2)
        .max(Duration::from_millis(1))
}

async fn check_service(client: &reqwest::Client, config: &HealthCheckConfig, service: &ServiceDescriptor) {
    let timeout = probe_timeout(config, service.health_check_interval);
    let limit = config.max_concurrent_probes.max(1);

    stream::iter(service.endpoints.iter().cloned())
        .for_each_concurrent(limit, |endpoint| async move {
            let healthy = probe(client, &endpoint, &service.health_path, timeout).await;
            let endpoint_url = endpoint.url.to_string();

            if endpoint.set_health(healthy, SystemTime::now()) {
                if healthy {
                    tracing::info!(service = %service.name, endpoint = %endpoint_url, "Endpoint recovered");
                } else {
                    tracing::warn!(service = %service.name, endpoint = %endpoint_url, "Endpoint marked unhealthy");
                }
            }
            metrics::record_endpoint_health(&service.name, &endpoint_url, healthy);
        })
        .await;
}

async fn probe(client: &reqwest::Client, endpoint: &Endpoint, path: &str, timeout: Duration) -> bool {
    let url = match endpoint.resolve(path) {
        Ok(url) => url,
        Err(e) => {
            tracing::error!(endpoint = %endpoint.url, error = %e, "Failed to build health check URL");
            return false;
        }
    };

    let request = client
        .get(url)
        .header("user-agent", "service-link-health-check")
        .send();

    match time::timeout(timeout, request).await {
        Ok(Ok(response)) => {
            let success = response.status().is_success();
            if !success {
                tracing::warn!(endpoint = %endpoint.url, status = %response.status(), "Health check failed: non-success status");
            }
            success
        }
        Ok(Err(e)) => {
            tracing::warn!(endpoint = %endpoint.url, error = %e, "Health check failed: connection error");
            false
        }
        Err(_) => {
            tracing::warn!(endpoint = %endpoint.url, "Health check failed: timeout");
            false
        }
    }
}
