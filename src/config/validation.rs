//! Configuration validation.
//!
//! Serde handles the syntax; this pass checks value ranges and references
//! between sections. Every problem is reported, not just the first.

use std::collections::HashSet;
use thiserror::Error;
use url::Url;

use crate::config::schema::{
    AuthKind, CircuitBreakerConfig, FallbackStrategy, LinkConfig, LoadBalanceStrategy,
};

/// A single semantic problem in the configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{field}: {message}")]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

impl ValidationError {
    fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// Validate a parsed configuration.
pub fn validate_config(config: &LinkConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.defaults.timeout_ms == 0 {
        errors.push(ValidationError::new("defaults.timeout_ms", "must be greater than 0"));
    }
    if config.health_check.timeout_ms == 0 {
        errors.push(ValidationError::new("health_check.timeout_ms", "must be greater than 0"));
    }
    if config.health_check.max_concurrent_probes == 0 {
        errors.push(ValidationError::new(
            "health_check.max_concurrent_probes",
            "must be greater than 0",
        ));
    }
    validate_breaker("defaults.circuit_breaker", &config.defaults.circuit_breaker, &mut errors);

    let mut names = HashSet::new();
    for (i, service) in config.services.iter().enumerate() {
        let prefix = format!("services[{}]", i);

        if service.name.is_empty() {
            errors.push(ValidationError::new(format!("{}.name", prefix), "must not be empty"));
        } else if !names.insert(service.name.as_str()) {
            errors.push(ValidationError::new(
                format!("{}.name", prefix),
                format!("duplicate service '{}'", service.name),
            ));
        }

        let endpoints = service.endpoint_configs();
        if endpoints.is_empty() {
            errors.push(ValidationError::new(
                format!("{}.endpoints", prefix),
                "at least one endpoint or base_url is required",
            ));
        }
        for (j, endpoint) in endpoints.iter().enumerate() {
            if let Err(e) = Url::parse(&endpoint.url) {
                errors.push(ValidationError::new(
                    format!("{}.endpoints[{}].url", prefix, j),
                    format!("invalid URL '{}': {}", endpoint.url, e),
                ));
            }
            if service.strategy == LoadBalanceStrategy::Weighted && endpoint.weight == 0 {
                errors.push(ValidationError::new(
                    format!("{}.endpoints[{}].weight", prefix, j),
                    "must be greater than 0 for the weighted strategy",
                ));
            }
        }

        if service.health_check_interval_secs == 0 {
            errors.push(ValidationError::new(
                format!("{}.health_check_interval_secs", prefix),
                "must be greater than 0",
            ));
        }
        if service.timeout_ms == Some(0) {
            errors.push(ValidationError::new(format!("{}.timeout_ms", prefix), "must be greater than 0"));
        }
        if let Some(cb) = &service.circuit_breaker {
            validate_breaker(&format!("{}.circuit_breaker", prefix), cb, &mut errors);
        }

        if let Some(auth) = &service.authentication {
            let field = format!("{}.authentication", prefix);
            match auth.kind {
                AuthKind::ApiKey if auth.api_key.is_none() => {
                    errors.push(ValidationError::new(field, "api-key authentication requires api_key"));
                }
                AuthKind::Jwt => {
                    let refreshing = auth.refresh_url.is_some() || auth.refresh_token.is_some();
                    if refreshing && (auth.refresh_url.is_none() || auth.refresh_token.is_none()) {
                        errors.push(ValidationError::new(
                            field,
                            "refresh_url and refresh_token must be set together",
                        ));
                    } else if !refreshing && auth.token.is_none() {
                        errors.push(ValidationError::new(
                            field,
                            "jwt authentication requires token or refresh_url/refresh_token",
                        ));
                    }
                }
                AuthKind::ApiKey => {}
            }
        }
    }

    for (i, fallback) in config.fallbacks.iter().enumerate() {
        let prefix = format!("fallbacks[{}]", i);
        if config.service(&fallback.service).is_none() {
            errors.push(ValidationError::new(
                format!("{}.service", prefix),
                format!("unknown service '{}'", fallback.service),
            ));
        }
        if fallback.strategy == FallbackStrategy::Default && fallback.payload.is_none() {
            errors.push(ValidationError::new(
                format!("{}.payload", prefix),
                "default strategy requires a payload",
            ));
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

/// Range checks for breaker options.
pub fn validate_breaker(prefix: &str, cb: &CircuitBreakerConfig, errors: &mut Vec<ValidationError>) {
    if !(0.0..=100.0).contains(&cb.error_threshold_percentage) {
        errors.push(ValidationError::new(
            format!("{}.error_threshold_percentage", prefix),
            format!("{} is outside [0, 100]", cb.error_threshold_percentage),
        ));
    }
    if cb.rolling_count_buckets == 0 {
        errors.push(ValidationError::new(
            format!("{}.rolling_count_buckets", prefix),
            "must be at least 1",
        ));
    } else if cb.rolling_count_timeout_ms < u64::from(cb.rolling_count_buckets) {
        errors.push(ValidationError::new(
            format!("{}.rolling_count_timeout_ms", prefix),
            "must be at least one millisecond per bucket",
        ));
    }
    if cb.reset_timeout_ms == 0 {
        errors.push(ValidationError::new(format!("{}.reset_timeout_ms", prefix), "must be greater than 0"));
    }
    if cb.timeout_ms == 0 {
        errors.push(ValidationError::new(format!("{}.timeout_ms", prefix), "must be greater than 0"));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::{AuthenticationConfig, FallbackConfig, ServiceConfig};

    fn service(name: &str) -> ServiceConfig {
        toml::from_str(&format!("name = \"{}\"\nbase_url = \"http://localhost:9000\"", name)).unwrap()
    }

    #[test]
    fn test_default_config_is_valid() {
        assert!(validate_config(&LinkConfig::default()).is_ok());
    }

    #[test]
    fn test_threshold_out_of_range() {
        let mut config = LinkConfig::default();
        config.defaults.circuit_breaker.error_threshold_percentage = 120.0;
        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].field, "defaults.circuit_breaker.error_threshold_percentage");
    }

    #[test]
    fn test_collects_all_errors() {
        let mut config = LinkConfig::default();
        let mut a = service("a");
        a.base_url = Some("not a url".into());
        a.authentication = Some(AuthenticationConfig {
            kind: AuthKind::ApiKey,
            token: None,
            api_key: None,
            refresh_url: None,
            refresh_token: None,
            header: None,
        });
        config.services = vec![a, service("b"), service("b")];
        config.fallbacks.push(FallbackConfig {
            service: "missing".into(),
            path_prefix: None,
            capability: None,
            strategy: FallbackStrategy::Default,
            max_staleness_secs: 60,
            payload: None,
        });

        let errors = validate_config(&config).unwrap_err();
        let fields: Vec<_> = errors.iter().map(|e| e.field.as_str()).collect();
        assert!(fields.contains(&"services[0].endpoints[0].url"));
        assert!(fields.contains(&"services[0].authentication"));
        assert!(fields.contains(&"services[2].name"));
        assert!(fields.contains(&"fallbacks[0].service"));
        assert!(fields.contains(&"fallbacks[0].payload"));
    }

    #[test]
    fn test_jwt_refresh_pair() {
        let mut config = LinkConfig::default();
        let mut a = service("a");
        a.authentication = Some(AuthenticationConfig {
            kind: AuthKind::Jwt,
            token: None,
            api_key: None,
            refresh_url: Some("http://auth/refresh".into()),
            refresh_token: None,
            header: None,
        });
        config.services.push(a);
        let errors = validate_config(&config).unwrap_err();
        assert!(errors[0].message.contains("together"));
    }
}
