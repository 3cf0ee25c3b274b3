//! Resilient service client.
//!
//! # Call Flow
//! ```text
//! call(service, request)
//!     → RequestContext (correlation ID, trace headers, deadline)
//!     → per attempt:
//!         breaker gate → endpoint pick (connection counted) → credential
//!         → transport (timeout)
//!         → classify outcome → record on breaker
//!     → transient failure with budget left: backoff (bounded by deadline), retry
//!     → success: remember for degradation, return
//!     → failure: degrade if the failure is degradable, return ServiceError
//! ```

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::Instrument;

use crate::auth::CredentialProvider;
use crate::client::context::RequestContext;
use crate::client::request::{CallOptions, ServiceRequest, ServiceResponse};
use crate::client::transport::{OutboundRequest, Transport, TransportError, TransportResponse};
use crate::config::LinkConfig;
use crate::degradation::GracefulDegradationService;
use crate::error::{ErrorKind, ServiceError, ServiceResult};
use crate::load_balancer::EndpointRegistry;
use crate::observability::metrics;
use crate::resilience::{CircuitBreakerManager, FailureClass, Permit};

/// Entry point for calls to downstream services.
pub struct ServiceClient {
    registry: Arc<EndpointRegistry>,
    breakers: Arc<CircuitBreakerManager>,
    credentials: Arc<CredentialProvider>,
    transport: Arc<dyn Transport>,
    degradation: Option<Arc<GracefulDegradationService>>,
    default_options: CallOptions,
    service_options: HashMap<String, CallOptions>,
}

impl ServiceClient {
    pub fn new(
        registry: Arc<EndpointRegistry>,
        breakers: Arc<CircuitBreakerManager>,
        credentials: Arc<CredentialProvider>,
        transport: Arc<dyn Transport>,
    ) -> Self {
        Self {
            registry,
            breakers,
            credentials,
            transport,
            degradation: None,
            default_options: CallOptions::default(),
            service_options: HashMap::new(),
        }
    }

    pub fn with_degradation(mut self, degradation: Arc<GracefulDegradationService>) -> Self {
        self.degradation = Some(degradation);
        self
    }

    pub fn with_default_options(mut self, options: CallOptions) -> ServiceResult<Self> {
        options.validate()?;
        self.default_options = options;
        Ok(self)
    }

    pub fn with_service_options(mut self, service: &str, options: CallOptions) -> ServiceResult<Self> {
        options.validate()?;
        self.service_options.insert(service.to_string(), options);
        Ok(self)
    }

    /// Per-service options derived from the config.
    pub fn with_config_options(mut self, config: &LinkConfig) -> Self {
        self.default_options = CallOptions::from_config(&config.defaults, None);
        for service in &config.services {
            self.service_options.insert(
                service.name.clone(),
                CallOptions::from_config(&config.defaults, Some(service)),
            );
        }
        self
    }

    /// Options used by [`ServiceClient::call`] for `service`.
    pub fn options_for(&self, service: &str) -> CallOptions {
        self.service_options
            .get(service)
            .cloned()
            .unwrap_or_else(|| self.default_options.clone())
    }

    pub fn registry(&self) -> &Arc<EndpointRegistry> {
        &self.registry
    }

    pub fn breakers(&self) -> &Arc<CircuitBreakerManager> {
        &self.breakers
    }

    /// Call `service` with its configured options.
    pub async fn call(&self, service: &str, request: ServiceRequest) -> ServiceResult<ServiceResponse> {
        let options = self.options_for(service);
        self.call_with(service, request, &options).await
    }

    /// Call `service` with explicit options.
    pub async fn call_with(
        &self,
        service: &str,
        request: ServiceRequest,
        options: &CallOptions,
    ) -> ServiceResult<ServiceResponse> {
        let ctx = RequestContext::new(options.deadline, options.skip_circuit_breaker);
        let span = tracing::info_span!(
            "service_call",
            service = %service,
            method = %request.method,
            path = %request.path,
            correlation_id = %ctx.correlation_id,
        );
        self.run(service, &request, options, ctx).instrument(span).await
    }

    async fn run(
        &self,
        service: &str,
        request: &ServiceRequest,
        options: &CallOptions,
        mut ctx: RequestContext,
    ) -> ServiceResult<ServiceResponse> {
        let started = Instant::now();
        let group = options
            .group
            .clone()
            .unwrap_or_else(|| self.breakers.default_group(service).to_string());

        loop {
            match self.attempt(service, &group, request, options, &ctx).await {
                Ok((response, endpoint)) => {
                    let elapsed = started.elapsed();
                    if let Some(degradation) = &self.degradation {
                        degradation.remember(service, request, &response.body);
                    }
                    metrics::record_call(service, "success", elapsed);
                    tracing::debug!(
                        status = response.status,
                        retries = ctx.retry_count,
                        elapsed_ms = elapsed.as_millis() as u64,
                        "Call succeeded"
                    );
                    return Ok(ServiceResponse {
                        status: response.status,
                        data: response.body,
                        correlation_id: ctx.correlation_id,
                        elapsed,
                        retry_count: ctx.retry_count,
                        endpoint,
                    });
                }
                Err(err) => {
                    let kind = err.kind();
                    if options.retry.should_retry(kind, ctx.retry_count) {
                        let delay = options.retry.backoff(ctx.retry_count);
                        if ctx.deadline.allows(delay) {
                            tracing::warn!(
                                error = %kind,
                                attempt = ctx.retry_count + 1,
                                delay_ms = delay.as_millis() as u64,
                                "Attempt failed, retrying"
                            );
                            metrics::record_retry(service);
                            tokio::time::sleep(delay).await;
                            ctx.retry_count += 1;
                            continue;
                        }
                        tracing::warn!(error = %kind, "Deadline leaves no room for another attempt");
                    }
                    return Err(self.fail(service, request, options, &ctx, err, started));
                }
            }
        }
    }

    fn fail(
        &self,
        service: &str,
        request: &ServiceRequest,
        options: &CallOptions,
        ctx: &RequestContext,
        err: ServiceError,
        started: Instant,
    ) -> ServiceError {
        let kind = err.kind();
        let mut err = err.with_context(&ctx.correlation_id, ctx.retry_count);
        metrics::record_call(service, kind.label(), started.elapsed());

        if options.retry.classify(kind).is_degradable() {
            if let Some(degradation) = &self.degradation {
                err = err.with_fallback(degradation.fallback(service, request));
            }
        }

        tracing::error!(
            error = %err,
            retries = ctx.retry_count,
            degraded = err.fallback().is_some(),
            "Call failed"
        );
        err
    }

    /// One attempt. Returns the response and the endpoint that served it.
    async fn attempt(
        &self,
        service: &str,
        group: &str,
        request: &ServiceRequest,
        options: &CallOptions,
        ctx: &RequestContext,
    ) -> ServiceResult<(TransportResponse, String)> {
        if ctx.deadline.is_expired() {
            return Err(ServiceError::new(ErrorKind::Timeout, "deadline exceeded"));
        }

        let permit = if ctx.skip_circuit_breaker {
            None
        } else {
            match self.breakers.allow(service, group) {
                Some(permit) => Some(permit),
                None => {
                    return Err(ServiceError::new(
                        ErrorKind::CircuitOpen,
                        format!("circuit open for {}/{}", service, group),
                    ))
                }
            }
        };

        let pick = self.registry.pick(service)?;
        let endpoint = pick.endpoint.url.to_string();
        let guard = pick.endpoint.acquire();

        let credential = if self.credentials.has_source(service) {
            Some(self.credentials.get(service).await?)
        } else {
            None
        };

        let url = pick.endpoint.resolve(&request.path).map_err(|e| {
            ServiceError::config(format!("cannot resolve '{}' against {}", request.path, pick.endpoint.url))
                .with_source(e)
        })?;
        let mut url = url;
        if !request.query.is_empty() {
            url.query_pairs_mut().extend_pairs(request.query.iter());
        }

        let mut headers = ctx.propagation_headers();
        let reserved: Vec<String> = headers.iter().map(|(name, _)| name.to_ascii_lowercase()).collect();
        headers.extend(
            request
                .headers
                .iter()
                .filter(|(name, _)| !reserved.contains(&name.to_ascii_lowercase()))
                .cloned(),
        );
        if let Some(credential) = &credential {
            headers.push(credential.header());
        }

        let breaker_options = self.breakers.options_for(service);
        let timeout = ctx.deadline.clamp(options.attempt_timeout(breaker_options));
        let outbound = OutboundRequest {
            method: request.method.clone(),
            url,
            headers,
            body: request.body.clone(),
            timeout,
        };

        let result = tokio::time::timeout(timeout, self.transport.send(outbound)).await;
        drop(guard);

        let outcome = match result {
            Err(_) => Err(ServiceError::new(
                ErrorKind::Timeout,
                format!("no response from {} within {:?}", endpoint, timeout),
            )),
            Ok(Err(e)) => Err(transport_error(e, &endpoint)),
            Ok(Ok(response)) if (200..300).contains(&response.status) => Ok(response),
            Ok(Ok(response)) if response.status == 401 => {
                self.credentials.invalidate(service);
                Err(ServiceError::auth(format!("{} rejected credentials", endpoint)))
            }
            Ok(Ok(response)) => Err(ServiceError::new(
                ErrorKind::HttpStatus(response.status),
                format!("{} answered {}", endpoint, response.status),
            )),
        };

        if let Some(permit) = permit {
            settle(permit, &outcome, options);
        }
        outcome.map(|response| (response, endpoint))
    }
}

/// Record the attempt's outcome on its breaker permit.
fn settle(permit: Permit, outcome: &ServiceResult<TransportResponse>, options: &CallOptions) {
    match outcome {
        Ok(_) => permit.record_success(),
        Err(e) => match options.retry.classify(e.kind()) {
            FailureClass::Transient | FailureClass::Outage => permit.record_failure(),
            // The service is up; it judged the request.
            FailureClass::Rejected => permit.record_success(),
            // Dropping an unsettled permit releases a trial slot.
            FailureClass::Permanent => drop(permit),
        },
    }
}

fn transport_error(e: TransportError, endpoint: &str) -> ServiceError {
    let kind = match &e {
        TransportError::Timeout => ErrorKind::Timeout,
        TransportError::Network(_) => ErrorKind::NetworkFailure,
        TransportError::Invalid(_) => ErrorKind::ConfigError,
    };
    ServiceError::new(kind, format!("request to {} failed", endpoint)).with_source(e)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CircuitBreakerConfig, FallbackConfig, FallbackStrategy, LoadBalanceStrategy};
    use crate::degradation::Fallback;
    use crate::error::{Served, ServiceResultExt};
    use crate::load_balancer::{endpoint::Endpoint, ServiceDescriptor};
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;
    use url::Url;

    /// Replays scripted outcomes and records every request it sees.
    struct ScriptedTransport {
        script: Mutex<Vec<Result<u16, ()>>>,
        calls: AtomicUsize,
        seen: Mutex<Vec<OutboundRequest>>,
    }

    impl ScriptedTransport {
        /// Outcomes are consumed front to back; the last one repeats.
        fn new(script: Vec<Result<u16, ()>>) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(script),
                calls: AtomicUsize::new(0),
                seen: Mutex::new(Vec::new()),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Transport for ScriptedTransport {
        async fn send(&self, request: OutboundRequest) -> Result<TransportResponse, TransportError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.seen.lock().unwrap().push(request);
            let next = {
                let mut script = self.script.lock().unwrap();
                if script.len() > 1 {
                    script.remove(0)
                } else {
                    script[0]
                }
            };
            match next {
                Ok(status) => Ok(TransportResponse {
                    status,
                    body: json!({"status": status}),
                }),
                Err(()) => Err(TransportError::Network("connection refused".into())),
            }
        }
    }

    fn registry() -> Arc<EndpointRegistry> {
        let mut registry = EndpointRegistry::default();
        registry.register(ServiceDescriptor::new(
            "ai",
            vec![Arc::new(Endpoint::new(Url::parse("http://10.0.0.1:8000").unwrap(), 1))],
            LoadBalanceStrategy::RoundRobin,
            None,
            Duration::from_secs(10),
            "/health",
        ));
        Arc::new(registry)
    }

    fn client(transport: Arc<ScriptedTransport>, breaker: CircuitBreakerConfig) -> ServiceClient {
        let degradation = GracefulDegradationService::from_config(&[FallbackConfig {
            service: "ai".into(),
            path_prefix: None,
            capability: Some("generation".into()),
            strategy: FallbackStrategy::Unavailable,
            max_staleness_secs: 300,
            payload: None,
        }]);
        ServiceClient::new(
            registry(),
            Arc::new(CircuitBreakerManager::new(breaker).unwrap()),
            Arc::new(CredentialProvider::default()),
            transport,
        )
        .with_degradation(Arc::new(degradation))
    }

    fn fast_options(retries: u32) -> CallOptions {
        CallOptions::default()
            .with_retries(retries)
            .with_retry_delay(Duration::from_millis(1), Duration::from_millis(5))
    }

    #[tokio::test]
    async fn test_retries_until_success() {
        let transport = ScriptedTransport::new(vec![Ok(503), Ok(503), Ok(200)]);
        let client = client(transport.clone(), CircuitBreakerConfig::default());

        let response = client
            .call_with("ai", ServiceRequest::get("/generate"), &fast_options(3))
            .await
            .unwrap();

        assert_eq!(response.status, 200);
        assert_eq!(response.retry_count, 2);
        assert_eq!(transport.calls(), 3);
    }

    #[tokio::test]
    async fn test_exhausted_retries_make_n_plus_one_attempts() {
        let transport = ScriptedTransport::new(vec![Err(())]);
        let client = client(transport.clone(), CircuitBreakerConfig::default());

        let err = client
            .call_with("ai", ServiceRequest::get("/generate"), &fast_options(2))
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::NetworkFailure);
        assert_eq!(err.retry_count(), 2);
        assert_eq!(transport.calls(), 3);
        assert!(err.fallback().is_some());
    }

    #[tokio::test]
    async fn test_permanent_failure_is_not_retried_or_degraded() {
        let transport = ScriptedTransport::new(vec![Ok(404)]);
        let client = client(transport.clone(), CircuitBreakerConfig::default());

        let err = client
            .call_with("ai", ServiceRequest::get("/missing"), &fast_options(3))
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::HttpStatus(404));
        assert_eq!(transport.calls(), 1);
        assert!(err.fallback().is_none());
    }

    #[tokio::test]
    async fn test_open_circuit_short_circuits_and_degrades() {
        let transport = ScriptedTransport::new(vec![Ok(503)]);
        let breaker = CircuitBreakerConfig {
            volume_threshold: 2,
            error_threshold_percentage: 50.0,
            reset_timeout_ms: 60_000,
            ..Default::default()
        };
        let client = client(transport.clone(), breaker);
        let options = fast_options(0);

        for _ in 0..2 {
            let _ = client.call_with("ai", ServiceRequest::get("/generate"), &options).await;
        }
        assert_eq!(transport.calls(), 2);

        let result = client
            .call_with("ai", ServiceRequest::get("/generate"), &options)
            .await;
        let err = result.as_ref().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::CircuitOpen);
        assert_eq!(
            err.fallback(),
            Some(&Fallback::Unavailable {
                capability: "generation".into()
            })
        );
        // No network I/O while open
        assert_eq!(transport.calls(), 2);
        assert_eq!(client.degradation.as_ref().unwrap().invocations(), 3);

        assert!(matches!(result.recover(), Ok(Served::Degraded(_))));
    }

    #[tokio::test]
    async fn test_skip_circuit_breaker() {
        let transport = ScriptedTransport::new(vec![Ok(503), Ok(200)]);
        let breaker = CircuitBreakerConfig {
            volume_threshold: 1,
            reset_timeout_ms: 60_000,
            ..Default::default()
        };
        let client = client(transport.clone(), breaker);

        let _ = client
            .call_with("ai", ServiceRequest::get("/a"), &fast_options(0))
            .await;
        let response = client
            .call_with("ai", ServiceRequest::get("/a"), &fast_options(0).skip_circuit_breaker())
            .await
            .unwrap();
        assert_eq!(response.status, 200);
    }

    #[tokio::test]
    async fn test_headers_and_url() {
        let transport = ScriptedTransport::new(vec![Ok(200)]);
        let client = client(transport.clone(), CircuitBreakerConfig::default());

        let response = client
            .call_with(
                "ai",
                ServiceRequest::get("/v1/items").with_query("page", "2").with_header("x-tenant", "t1"),
                &fast_options(0),
            )
            .await
            .unwrap();

        let seen = transport.seen.lock().unwrap();
        assert_eq!(seen[0].url.as_str(), "http://10.0.0.1:8000/v1/items?page=2");
        assert!(seen[0]
            .headers
            .contains(&("x-correlation-id".to_string(), response.correlation_id.clone())));
        assert!(seen[0].headers.contains(&("x-tenant".to_string(), "t1".to_string())));
    }

    #[tokio::test]
    async fn test_unknown_service_is_config_error() {
        let transport = ScriptedTransport::new(vec![Ok(200)]);
        let client = client(transport.clone(), CircuitBreakerConfig::default());

        let err = client
            .call("nope", ServiceRequest::get("/"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ConfigError);
        assert_eq!(transport.calls(), 0);
        assert!(err.fallback().is_none());
    }

    #[tokio::test]
    async fn test_deadline_stops_retries() {
        let transport = ScriptedTransport::new(vec![Ok(503)]);
        let client = client(transport.clone(), CircuitBreakerConfig::default());
        let options = CallOptions::default()
            .with_retries(5)
            .with_retry_delay(Duration::from_millis(200), Duration::from_millis(200))
            .with_deadline(Duration::from_millis(40));

        let err = client
            .call_with("ai", ServiceRequest::get("/slow"), &options)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::HttpStatus(503));
        assert_eq!(transport.calls(), 1);
    }

    /// Never answers; every attempt runs into its timeout.
    struct HangingTransport {
        calls: AtomicUsize,
        endpoint: Arc<Endpoint>,
        in_flight_connections: Mutex<Vec<usize>>,
    }

    #[async_trait]
    impl Transport for HangingTransport {
        async fn send(&self, _request: OutboundRequest) -> Result<TransportResponse, TransportError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.in_flight_connections
                .lock()
                .unwrap()
                .push(self.endpoint.active_connections());
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(TransportResponse {
                status: 200,
                body: json!(null),
            })
        }
    }

    fn registry_with(endpoint: Arc<Endpoint>) -> Arc<EndpointRegistry> {
        let mut registry = EndpointRegistry::default();
        registry.register(ServiceDescriptor::new(
            "ai",
            vec![endpoint],
            LoadBalanceStrategy::RoundRobin,
            None,
            Duration::from_secs(10),
            "/health",
        ));
        Arc::new(registry)
    }

    #[tokio::test]
    async fn test_attempt_timeout_cancels_and_releases_connection() {
        let endpoint = Arc::new(Endpoint::new(Url::parse("http://10.0.0.1:8000").unwrap(), 1));
        let transport = Arc::new(HangingTransport {
            calls: AtomicUsize::new(0),
            endpoint: endpoint.clone(),
            in_flight_connections: Mutex::new(Vec::new()),
        });
        let breakers = Arc::new(CircuitBreakerManager::new(CircuitBreakerConfig::default()).unwrap());
        let client = ServiceClient::new(
            registry_with(endpoint.clone()),
            breakers.clone(),
            Arc::new(CredentialProvider::default()),
            transport.clone(),
        );
        let options = fast_options(1).with_timeout(Duration::from_millis(50));

        let started = Instant::now();
        let err = client
            .call_with("ai", ServiceRequest::get("/generate"), &options)
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Timeout);
        assert_eq!(err.retry_count(), 1);
        assert_eq!(transport.calls.load(Ordering::SeqCst), 2);
        assert!(started.elapsed() < Duration::from_secs(5));

        // Counted while in flight, released once the attempt was dropped
        assert_eq!(*transport.in_flight_connections.lock().unwrap(), vec![1, 1]);
        assert_eq!(endpoint.active_connections(), 0);

        let snapshot = breakers.snapshot();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].window.failures, 2);
        assert_eq!(snapshot[0].window.successes, 0);
    }

    #[derive(Debug)]
    struct ObservingSource {
        endpoint: Arc<Endpoint>,
        seen_connections: AtomicUsize,
    }

    #[async_trait]
    impl crate::auth::CredentialSource for ObservingSource {
        async fn fetch(&self, _service: &str) -> Result<crate::auth::Credential, crate::auth::CredentialError> {
            self.seen_connections
                .store(self.endpoint.active_connections(), Ordering::SeqCst);
            Ok(crate::auth::Credential::bearer("tok", None))
        }
    }

    #[tokio::test]
    async fn test_connection_counted_before_credential_fetch() {
        let endpoint = Arc::new(Endpoint::new(Url::parse("http://10.0.0.1:8000").unwrap(), 1));
        let source = Arc::new(ObservingSource {
            endpoint: endpoint.clone(),
            seen_connections: AtomicUsize::new(0),
        });
        let mut credentials = CredentialProvider::default();
        credentials.register("ai", source.clone());
        let transport = ScriptedTransport::new(vec![Ok(200)]);
        let client = ServiceClient::new(
            registry_with(endpoint.clone()),
            Arc::new(CircuitBreakerManager::default()),
            Arc::new(credentials),
            transport.clone(),
        );

        client
            .call_with("ai", ServiceRequest::get("/generate"), &fast_options(0))
            .await
            .unwrap();

        assert_eq!(source.seen_connections.load(Ordering::SeqCst), 1);
        assert_eq!(endpoint.active_connections(), 0);
        let seen = transport.seen.lock().unwrap();
        assert!(seen[0]
            .headers
            .contains(&("authorization".to_string(), "Bearer tok".to_string())));
    }

    #[tokio::test]
    async fn test_caller_cannot_override_correlation_header() {
        let transport = ScriptedTransport::new(vec![Ok(200)]);
        let client = client(transport.clone(), CircuitBreakerConfig::default());

        let response = client
            .call_with(
                "ai",
                ServiceRequest::get("/v1/items").with_header("X-Correlation-Id", "spoofed"),
                &fast_options(0),
            )
            .await
            .unwrap();

        let seen = transport.seen.lock().unwrap();
        let ids: Vec<_> = seen[0]
            .headers
            .iter()
            .filter(|(name, _)| name.eq_ignore_ascii_case("x-correlation-id"))
            .map(|(_, value)| value.clone())
            .collect();
        assert_eq!(ids, vec![response.correlation_id.clone()]);
    }

    #[test]
    fn test_invalid_call_options_rejected() {
        let transport = ScriptedTransport::new(vec![Ok(200)]);
        let err = client(transport.clone(), CircuitBreakerConfig::default())
            .with_default_options(CallOptions::default().with_timeout(Duration::ZERO))
            .err()
            .unwrap();
        assert_eq!(err.kind(), ErrorKind::ConfigError);

        let backwards = CallOptions::default()
            .with_retry_delay(Duration::from_secs(2), Duration::from_millis(100));
        assert!(client(transport, CircuitBreakerConfig::default())
            .with_service_options("ai", backwards)
            .is_err());
    }
}
