//! Outbound request and response types, and per-call options.

use reqwest::Method;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::time::Duration;

use crate::config::{CallDefaults, CircuitBreakerConfig, ServiceConfig};
use crate::error::{ServiceError, ServiceResult};
use crate::resilience::RetryPolicy;

/// A call against a logical service; the endpoint is chosen per attempt.
#[derive(Debug, Clone)]
pub struct ServiceRequest {
    pub method: Method,
    /// Path appended to the endpoint's base URL.
    pub path: String,
    pub query: Vec<(String, String)>,
    pub headers: Vec<(String, String)>,
    pub body: Option<Value>,
}

impl ServiceRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: Vec::new(),
            headers: Vec::new(),
            body: None,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post(path: impl Into<String>, body: Value) -> Self {
        Self::new(Method::POST, path).with_body(body)
    }

    pub fn with_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    pub fn with_query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Identity used to cache responses for degradation.
    pub fn cache_key(&self, service: &str) -> String {
        let mut key = format!("{}|{}|{}", service, self.method, self.path);
        for (k, v) in &self.query {
            key.push_str(&format!("|{}={}", k, v));
        }
        if let Some(body) = &self.body {
            key.push('|');
            key.push_str(&body.to_string());
        }
        key
    }
}

/// Successful response.
#[derive(Debug, Clone, Serialize)]
pub struct ServiceResponse {
    pub status: u16,
    /// Parsed JSON body; `Null` for an empty body, a string for non-JSON.
    pub data: Value,
    pub correlation_id: String,
    /// Wall time across all attempts and backoff.
    pub elapsed: Duration,
    pub retry_count: u32,
    /// Endpoint that produced the response.
    pub endpoint: String,
}

impl ServiceResponse {
    /// Deserialize the body into `T`.
    pub fn json<T: DeserializeOwned>(&self) -> ServiceResult<T> {
        serde_json::from_value(self.data.clone()).map_err(|e| {
            ServiceError::config(format!("unexpected response body: {}", e))
                .with_source(e)
                .with_context(&self.correlation_id, self.retry_count)
        })
    }
}

/// Knobs for one call.
#[derive(Debug, Clone, PartialEq)]
pub struct CallOptions {
    /// Per-attempt timeout.
    pub timeout: Duration,
    pub retry: RetryPolicy,
    /// Overall bound across attempts and backoff.
    pub deadline: Option<Duration>,
    pub skip_circuit_breaker: bool,
    /// Breaker group; the service's configured group when unset.
    pub group: Option<String>,
}

impl Default for CallOptions {
    fn default() -> Self {
        Self::from_config(&CallDefaults::default(), None)
    }
}

impl CallOptions {
    /// Defaults with the service's overrides applied.
    pub fn from_config(defaults: &CallDefaults, service: Option<&ServiceConfig>) -> Self {
        let timeout_ms = service.and_then(|s| s.timeout_ms).unwrap_or(defaults.timeout_ms);
        let retries = service.and_then(|s| s.retries).unwrap_or(defaults.retries);
        let retry_delay_ms = service
            .and_then(|s| s.retry_delay_ms)
            .unwrap_or(defaults.retry_delay_ms);
        let retryable_status_codes = service
            .and_then(|s| s.retryable_status_codes.clone())
            .unwrap_or_else(|| defaults.retryable_status_codes.clone());

        Self {
            timeout: Duration::from_millis(timeout_ms),
            retry: RetryPolicy {
                retries,
                base_delay: Duration::from_millis(retry_delay_ms),
                max_delay: Duration::from_millis(defaults.max_retry_delay_ms),
                retryable_status_codes,
            },
            deadline: defaults.deadline_ms.map(Duration::from_millis),
            skip_circuit_breaker: false,
            group: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retry.retries = retries;
        self
    }

    pub fn with_retry_delay(mut self, base: Duration, max: Duration) -> Self {
        self.retry.base_delay = base;
        self.retry.max_delay = max;
        self
    }

    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn with_group(mut self, group: impl Into<String>) -> Self {
        self.group = Some(group.into());
        self
    }

    pub fn skip_circuit_breaker(mut self) -> Self {
        self.skip_circuit_breaker = true;
        self
    }

    /// Reject options no call could run under.
    pub fn validate(&self) -> ServiceResult<()> {
        if self.timeout.is_zero() {
            return Err(ServiceError::config("call timeout must be greater than 0"));
        }
        if self.retry.base_delay > self.retry.max_delay {
            return Err(ServiceError::config(format!(
                "retry delay {:?} exceeds max retry delay {:?}",
                self.retry.base_delay, self.retry.max_delay
            )));
        }
        Ok(())
    }

    /// Attempt timeout, also bounded by the breaker's call timeout.
    pub(crate) fn attempt_timeout(&self, breaker: &CircuitBreakerConfig) -> Duration {
        self.timeout.min(Duration::from_millis(breaker.timeout_ms))
    }
}
