//! Metrics collection and exposition.
//!
//! # Metrics
//! - `service_link_calls_total` (counter): finished calls by service, outcome
//! - `service_link_call_duration_seconds` (histogram): end-to-end call latency
//! - `service_link_retries_total` (counter): retry attempts by service
//! - `service_link_breaker_state` (gauge): 0=closed, 1=open, 2=half-open
//! - `service_link_endpoint_health` (gauge): 1=healthy, 0=unhealthy
//! - `service_link_fallbacks_total` (counter): degraded results by kind
//! - `service_link_credential_refreshes_total` (counter): refreshes by outcome
//!
//! Every recorder is a no-op until [`init_metrics`] installs the exporter.

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder};
use std::net::SocketAddr;
use std::time::Duration;

const CALL_DURATION: &str = "service_link_call_duration_seconds";

/// Install the Prometheus recorder and its scrape listener.
///
/// Must be called from inside a Tokio runtime.
pub fn init_metrics(addr: SocketAddr) {
    let builder = match PrometheusBuilder::new()
        .with_http_listener(addr)
        .set_buckets_for_metric(
            Matcher::Full(CALL_DURATION.to_string()),
            &[0.005, 0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0],
        ) {
        Ok(builder) => builder,
        Err(e) => {
            tracing::error!(error = %e, "Invalid histogram buckets");
            return;
        }
    };

    match builder.install() {
        Ok(()) => {
            describe_metrics();
            tracing::info!(address = %addr, "Metrics endpoint listening");
        }
        Err(e) => tracing::error!(error = %e, "Failed to install metrics recorder"),
    }
}

fn describe_metrics() {
    describe_counter!("service_link_calls_total", "Finished downstream calls");
    describe_histogram!(CALL_DURATION, "Downstream call duration in seconds");
    describe_counter!("service_link_retries_total", "Retry attempts");
    describe_gauge!(
        "service_link_breaker_state",
        "Circuit breaker state (0=closed, 1=open, 2=half-open)"
    );
    describe_gauge!("service_link_endpoint_health", "Endpoint health (1=healthy)");
    describe_counter!("service_link_fallbacks_total", "Degraded results served");
    describe_counter!(
        "service_link_credential_refreshes_total",
        "Credential refresh attempts"
    );
}

/// Record a finished call. `outcome` is "success" or an error kind label.
pub fn record_call(service: &str, outcome: &str, elapsed: Duration) {
    counter!(
        "service_link_calls_total",
        "service" => service.to_string(),
        "outcome" => outcome.to_string()
    )
    .increment(1);
    histogram!(CALL_DURATION, "service" => service.to_string()).record(elapsed.as_secs_f64());
}

pub fn record_retry(service: &str) {
    counter!("service_link_retries_total", "service" => service.to_string()).increment(1);
}

pub fn record_breaker_state(service: &str, group: &str, value: f64) {
    gauge!(
        "service_link_breaker_state",
        "service" => service.to_string(),
        "group" => group.to_string()
    )
    .set(value);
}

pub fn record_endpoint_health(service: &str, endpoint: &str, healthy: bool) {
    gauge!(
        "service_link_endpoint_health",
        "service" => service.to_string(),
        "endpoint" => endpoint.to_string()
    )
    .set(if healthy { 1.0 } else { 0.0 });
}

pub fn record_fallback(service: &str, kind: &str) {
    counter!(
        "service_link_fallbacks_total",
        "service" => service.to_string(),
        "kind" => kind.to_string()
    )
    .increment(1);
}

pub fn record_credential_refresh(service: &str, outcome: &str) {
    counter!(
        "service_link_credential_refreshes_total",
        "service" => service.to_string(),
        "outcome" => outcome.to_string()
    )
    .increment(1);
}
