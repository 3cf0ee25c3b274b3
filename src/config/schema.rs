//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the
//! service-communication core. All types derive Serde traits for
//! deserialization from config files.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Root configuration.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct LinkConfig {
    /// Logging and metrics settings.
    pub observability: ObservabilityConfig,

    /// Admin API settings.
    pub admin: AdminConfig,

    /// Active health probing settings shared by all services.
    pub health_check: HealthCheckConfig,

    /// Credential cache settings.
    pub credentials: CredentialsConfig,

    /// Call defaults applied to every service unless overridden.
    pub defaults: CallDefaults,

    /// Downstream service definitions.
    pub services: Vec<ServiceConfig>,

    /// Degradation policies.
    pub fallbacks: Vec<FallbackConfig>,
}

impl LinkConfig {
    /// Find a service definition by name.
    pub fn service(&self, name: &str) -> Option<&ServiceConfig> {
        self.services.iter().find(|s| s.name == name)
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Human-readable or JSON log lines.
    pub log_format: LogFormat,

    /// Enable the Prometheus metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}

/// Admin API configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AdminConfig {
    /// Enable the admin API.
    pub enabled: bool,

    /// API key for authentication (Bearer token).
    pub api_key: String,

    /// Admin API bind address.
    pub bind_address: String,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            // WARNING: This is a placeholder! Change this in production.
            api_key: "CHANGE_ME_IN_PRODUCTION".to_string(),
            bind_address: "127.0.0.1:8081".to_string(),
        }
    }
}

/// Health probe configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct HealthCheckConfig {
    /// Enable active health checks.
    pub enabled: bool,

    /// Default path to probe when a service does not set its own.
    pub path: String,

    /// Upper bound for a single probe in milliseconds.
    pub timeout_ms: u64,

    /// Maximum probes in flight per service tick.
    pub max_concurrent_probes: usize,
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            path: "/health".to_string(),
            timeout_ms: 2_000,
            max_concurrent_probes: 8,
        }
    }
}

/// Credential cache configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CredentialsConfig {
    /// Refresh this many seconds before a token's hard expiry.
    pub safety_margin_secs: u64,

    /// Upper bound for a single refresh call in milliseconds.
    pub refresh_timeout_ms: u64,
}

impl Default for CredentialsConfig {
    fn default() -> Self {
        Self {
            safety_margin_secs: 30,
            refresh_timeout_ms: 5_000,
        }
    }
}

/// Defaults for every outbound call.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CallDefaults {
    /// Per-attempt timeout in milliseconds.
    pub timeout_ms: u64,

    /// Retry attempts after the first one.
    pub retries: u32,

    /// Base delay for exponential backoff in milliseconds.
    pub retry_delay_ms: u64,

    /// Maximum delay for exponential backoff in milliseconds.
    pub max_retry_delay_ms: u64,

    /// Status codes treated as transient.
    pub retryable_status_codes: Vec<u16>,

    /// Overall deadline across attempts and backoff, in milliseconds.
    pub deadline_ms: Option<u64>,

    /// Circuit breaker defaults.
    pub circuit_breaker: CircuitBreakerConfig,
}

impl Default for CallDefaults {
    fn default() -> Self {
        Self {
            timeout_ms: 10_000,
            retries: 2,
            retry_delay_ms: 100,
            max_retry_delay_ms: 5_000,
            retryable_status_codes: vec![429, 502, 503, 504],
            deadline_ms: None,
            circuit_breaker: CircuitBreakerConfig::default(),
        }
    }
}

/// Circuit breaker options.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Calls slower than this count as failures, in milliseconds.
    pub timeout_ms: u64,

    /// Failure rate (percent) at which the breaker opens.
    pub error_threshold_percentage: f64,

    /// Time spent open before a trial call is admitted, in milliseconds.
    pub reset_timeout_ms: u64,

    /// Total span of the rolling window in milliseconds.
    pub rolling_count_timeout_ms: u64,

    /// Number of buckets in the rolling window.
    pub rolling_count_buckets: u32,

    /// Minimum samples in the window before the rate is evaluated.
    pub volume_threshold: u64,

    /// Breaker name for logs; defaults to the service name.
    pub name: Option<String>,

    /// Breaker group; defaults to "default".
    pub group: Option<String>,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 10_000,
            error_threshold_percentage: 50.0,
            reset_timeout_ms: 30_000,
            rolling_count_timeout_ms: 10_000,
            rolling_count_buckets: 10,
            volume_threshold: 5,
            name: None,
            group: None,
        }
    }
}

impl CircuitBreakerConfig {
    pub fn reset_timeout(&self) -> Duration {
        Duration::from_millis(self.reset_timeout_ms)
    }

    pub fn rolling_window(&self) -> Duration {
        Duration::from_millis(self.rolling_count_timeout_ms)
    }

    pub fn group_key(&self) -> &str {
        self.group.as_deref().unwrap_or(DEFAULT_GROUP)
    }
}

/// Breaker group used when none is configured.
pub const DEFAULT_GROUP: &str = "default";

/// Endpoint selection strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum LoadBalanceStrategy {
    #[default]
    RoundRobin,
    LeastConnections,
    Random,
    Weighted,
}

/// Downstream service definition.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServiceConfig {
    /// Logical service name used by callers.
    pub name: String,

    /// Shorthand for a single endpoint.
    #[serde(default)]
    pub base_url: Option<String>,

    /// Endpoint list; takes precedence over `base_url`.
    #[serde(default)]
    pub endpoints: Vec<EndpointConfig>,

    /// Load balancing strategy.
    #[serde(default)]
    pub strategy: LoadBalanceStrategy,

    /// Seed for the random and weighted strategies.
    #[serde(default)]
    pub seed: Option<u64>,

    /// Probe interval in seconds.
    #[serde(default = "default_health_interval")]
    pub health_check_interval_secs: u64,

    /// Probe path override.
    #[serde(default)]
    pub health_path: Option<String>,

    #[serde(default)]
    pub timeout_ms: Option<u64>,

    #[serde(default)]
    pub retries: Option<u32>,

    #[serde(default)]
    pub retry_delay_ms: Option<u64>,

    #[serde(default)]
    pub retryable_status_codes: Option<Vec<u16>>,

    /// Breaker options replacing the defaults for this service.
    #[serde(default)]
    pub circuit_breaker: Option<CircuitBreakerConfig>,

    /// Credentials attached to every call.
    #[serde(default)]
    pub authentication: Option<AuthenticationConfig>,
}

fn default_health_interval() -> u64 {
    10
}

impl ServiceConfig {
    /// Endpoint list with `base_url` folded in.
    pub fn endpoint_configs(&self) -> Vec<EndpointConfig> {
        if !self.endpoints.is_empty() {
            return self.endpoints.clone();
        }
        self.base_url
            .iter()
            .map(|url| EndpointConfig {
                url: url.clone(),
                weight: default_weight(),
            })
            .collect()
    }
}

/// One network endpoint of a service.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EndpointConfig {
    /// Base URL (e.g., "http://10.0.0.5:8000").
    pub url: String,

    /// Weight for weighted load balancing (default: 1).
    #[serde(default = "default_weight")]
    pub weight: u32,
}

fn default_weight() -> u32 {
    1
}

/// Credential kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum AuthKind {
    Jwt,
    ApiKey,
}

/// Authentication settings for a service.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AuthenticationConfig {
    #[serde(rename = "type")]
    pub kind: AuthKind,

    #[serde(default)]
    pub token: Option<String>,

    #[serde(default)]
    pub api_key: Option<String>,

    /// Endpoint issuing fresh bearer tokens.
    #[serde(default)]
    pub refresh_url: Option<String>,

    #[serde(default)]
    pub refresh_token: Option<String>,

    /// Header carrying the API key (default: "x-api-key").
    #[serde(default)]
    pub header: Option<String>,
}

/// What to serve when a capability is unavailable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FallbackStrategy {
    /// Last successful response, then `payload`, then unavailable.
    Cache,
    /// Static `payload`.
    Default,
    /// Explicit unavailable sentinel.
    Unavailable,
}

/// Degradation policy for one capability.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FallbackConfig {
    pub service: String,

    /// Restrict the policy to request paths with this prefix.
    #[serde(default)]
    pub path_prefix: Option<String>,

    /// Capability name reported with the fallback.
    #[serde(default)]
    pub capability: Option<String>,

    pub strategy: FallbackStrategy,

    /// Oldest cached response still served, in seconds.
    #[serde(default = "default_max_staleness")]
    pub max_staleness_secs: u64,

    #[serde(default)]
    pub payload: Option<serde_json::Value>,
}

fn default_max_staleness() -> u64 {
    300
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_toml() {
        let config: LinkConfig = toml::from_str(
            r#"
            [[services]]
            name = "ai"
            base_url = "http://localhost:8000"
            "#,
        )
        .unwrap();

        let ai = config.service("ai").unwrap();
        assert_eq!(ai.strategy, LoadBalanceStrategy::RoundRobin);
        assert_eq!(ai.health_check_interval_secs, 10);
        assert_eq!(ai.endpoint_configs().len(), 1);
        assert_eq!(config.defaults.retryable_status_codes, vec![429, 502, 503, 504]);
    }

    #[test]
    fn test_full_service_toml() {
        let config: LinkConfig = toml::from_str(
            r#"
            [[services]]
            name = "jobs"
            strategy = "least-connections"
            endpoints = [
                { url = "http://a:1", weight = 3 },
                { url = "http://b:1" },
            ]
            authentication = { type = "api-key", api_key = "k" }

            [[fallbacks]]
            service = "jobs"
            strategy = "default"
            payload = { items = [] }
            "#,
        )
        .unwrap();

        let jobs = config.service("jobs").unwrap();
        assert_eq!(jobs.strategy, LoadBalanceStrategy::LeastConnections);
        assert_eq!(jobs.endpoints[0].weight, 3);
        assert_eq!(jobs.endpoints[1].weight, 1);
        assert_eq!(jobs.authentication.as_ref().unwrap().kind, AuthKind::ApiKey);
        assert_eq!(config.fallbacks[0].strategy, FallbackStrategy::Default);
        assert!(config.fallbacks[0].payload.is_some());
    }

    #[test]
    fn test_breaker_group_default() {
        let cb = CircuitBreakerConfig::default();
        assert_eq!(cb.group_key(), DEFAULT_GROUP);
        assert_eq!(cb.reset_timeout(), Duration::from_secs(30));
    }
}
