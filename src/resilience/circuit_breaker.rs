//! Circuit breaker for downstream service protection.
//!
//! # States
//! - Closed: normal operation, outcomes recorded into the rolling window
//! - Open: service assumed down, calls fail fast
//! - Half-Open: a single trial call tests whether the service recovered
//!
//! # State Transitions
//! ```text
//! Closed → Open: failure rate >= threshold and samples >= volume floor
//! Open → Half-Open: first admission after reset timeout
//! Half-Open → Closed: trial call succeeds (window reset)
//! Half-Open → Open: trial call fails
//! ```
//!
//! # Design Decisions
//! - One breaker per (service, group), created lazily on first use
//! - State lives behind a short-lived mutex; never held across I/O
//! - Admission hands out a [`Permit`]; an abandoned trial permit frees the slot

use dashmap::DashMap;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;

use crate::config::{validate_breaker, CircuitBreakerConfig, LinkConfig};
use crate::error::{ServiceError, ServiceResult};
use crate::observability::metrics;
use crate::resilience::window::{RollingWindow, WindowTotals};

/// Breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    fn gauge(self) -> f64 {
        match self {
            CircuitState::Closed => 0.0,
            CircuitState::Open => 1.0,
            CircuitState::HalfOpen => 2.0,
        }
    }
}

#[derive(Debug)]
struct BreakerInner {
    state: CircuitState,
    window: RollingWindow,
    last_transition: Instant,
    half_open_trial_in_flight: bool,
}

/// Failure-rate breaker for one (service, group).
#[derive(Debug)]
pub struct CircuitBreaker {
    service: String,
    group: String,
    name: String,
    config: CircuitBreakerConfig,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    pub fn new(service: &str, group: &str, config: CircuitBreakerConfig, now: Instant) -> Self {
        let window = RollingWindow::new(config.rolling_window(), config.rolling_count_buckets, now);
        Self {
            service: service.to_string(),
            group: group.to_string(),
            name: config.name.clone().unwrap_or_else(|| service.to_string()),
            config,
            inner: Mutex::new(BreakerInner {
                state: CircuitState::Closed,
                window,
                last_transition: now,
                half_open_trial_in_flight: false,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, BreakerInner> {
        // State updates are single assignments; a poisoned lock is still consistent
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn state(&self) -> CircuitState {
        self.lock().state
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Ask for admission at `now`. `Some(true)` marks the half-open trial.
    fn admit(&self, now: Instant) -> Option<bool> {
        let mut inner = self.lock();
        match inner.state {
            CircuitState::Closed => Some(false),
            CircuitState::Open => {
                if now.saturating_duration_since(inner.last_transition) >= self.config.reset_timeout() {
                    self.transition(&mut inner, CircuitState::HalfOpen, now, "reset_timeout_elapsed");
                    inner.half_open_trial_in_flight = true;
                    Some(true)
                } else {
                    None
                }
            }
            CircuitState::HalfOpen => {
                if inner.half_open_trial_in_flight {
                    None
                } else {
                    inner.half_open_trial_in_flight = true;
                    Some(true)
                }
            }
        }
    }

    fn on_outcome(&self, now: Instant, trial: bool, success: bool) {
        let mut inner = self.lock();
        match inner.state {
            CircuitState::Closed => {
                inner.window.record(now, success);
                let totals = inner.window.totals(now);
                if totals.total() >= self.config.volume_threshold
                    && totals.failure_percentage() >= self.config.error_threshold_percentage
                {
                    self.transition(&mut inner, CircuitState::Open, now, "failure_threshold_exceeded");
                }
            }
            // Late outcomes of calls admitted before the breaker opened
            CircuitState::Open => {}
            CircuitState::HalfOpen => {
                if !trial {
                    return;
                }
                inner.half_open_trial_in_flight = false;
                if success {
                    inner.window.reset();
                    self.transition(&mut inner, CircuitState::Closed, now, "trial_succeeded");
                } else {
                    self.transition(&mut inner, CircuitState::Open, now, "trial_failed");
                }
            }
        }
    }

    fn release_trial(&self) {
        let mut inner = self.lock();
        if inner.state == CircuitState::HalfOpen {
            inner.half_open_trial_in_flight = false;
        }
    }

    fn transition(&self, inner: &mut BreakerInner, to: CircuitState, now: Instant, reason: &'static str) {
        let from = inner.state;
        let totals = inner.window.totals(now);
        inner.state = to;
        inner.last_transition = now;
        if to != CircuitState::HalfOpen {
            inner.half_open_trial_in_flight = false;
        }

        tracing::info!(
            event = "circuit_transition",
            breaker = %self.name,
            service = %self.service,
            group = %self.group,
            from = ?from,
            to = ?to,
            reason = reason,
            failures = totals.failures,
            successes = totals.successes,
        );
        metrics::record_breaker_state(&self.service, &self.group, to.gauge());
    }

    /// Force the breaker closed and clear its window.
    pub fn reset(&self, now: Instant) {
        let mut inner = self.lock();
        inner.window.reset();
        self.transition(&mut inner, CircuitState::Closed, now, "manual_reset");
    }

    pub fn snapshot(&self, now: Instant) -> BreakerSnapshot {
        let inner = self.lock();
        BreakerSnapshot {
            service: self.service.clone(),
            group: self.group.clone(),
            name: self.name.clone(),
            state: inner.state,
            window: inner.window.totals(now),
            since_transition_ms: now.saturating_duration_since(inner.last_transition).as_millis() as u64,
            trial_in_flight: inner.half_open_trial_in_flight,
        }
    }
}

/// Point-in-time view of a breaker.
#[derive(Debug, Clone, Serialize)]
pub struct BreakerSnapshot {
    pub service: String,
    pub group: String,
    pub name: String,
    pub state: CircuitState,
    pub window: WindowTotals,
    pub since_transition_ms: u64,
    pub trial_in_flight: bool,
}

/// Admission ticket for one call.
///
/// Settle it with [`Permit::record_success`] or [`Permit::record_failure`].
/// Dropping an unsettled trial permit frees the half-open slot without
/// counting an outcome.
#[derive(Debug)]
pub struct Permit {
    breaker: Arc<CircuitBreaker>,
    trial: bool,
    settled: bool,
}

impl Permit {
    pub fn is_trial(&self) -> bool {
        self.trial
    }

    pub fn record_success(self) {
        self.record_at(Instant::now(), true);
    }

    pub fn record_failure(self) {
        self.record_at(Instant::now(), false);
    }

    pub fn record_at(mut self, now: Instant, success: bool) {
        self.settled = true;
        self.breaker.on_outcome(now, self.trial, success);
    }
}

impl Drop for Permit {
    fn drop(&mut self) {
        if self.trial && !self.settled {
            self.breaker.release_trial();
        }
    }
}

/// Owns every breaker in the process.
#[derive(Debug, Default)]
pub struct CircuitBreakerManager {
    defaults: CircuitBreakerConfig,
    overrides: HashMap<String, CircuitBreakerConfig>,
    breakers: DashMap<(String, String), Arc<CircuitBreaker>>,
}

impl CircuitBreakerManager {
    /// Fails on options that could never trip or recover.
    pub fn new(defaults: CircuitBreakerConfig) -> ServiceResult<Self> {
        check_options("circuit_breaker", &defaults)?;
        Ok(Self {
            defaults,
            overrides: HashMap::new(),
            breakers: DashMap::new(),
        })
    }

    /// Defaults plus per-service overrides from configuration.
    pub fn from_config(config: &LinkConfig) -> ServiceResult<Self> {
        let mut manager = Self::new(config.defaults.circuit_breaker.clone())?;
        for service in &config.services {
            if let Some(cb) = &service.circuit_breaker {
                manager = manager.with_service_options(&service.name, cb.clone())?;
            }
        }
        Ok(manager)
    }

    pub fn with_service_options(mut self, service: &str, options: CircuitBreakerConfig) -> ServiceResult<Self> {
        check_options(&format!("{}.circuit_breaker", service), &options)?;
        self.overrides.insert(service.to_string(), options);
        Ok(self)
    }

    /// Options governing breakers of `service`.
    pub fn options_for(&self, service: &str) -> &CircuitBreakerConfig {
        self.overrides.get(service).unwrap_or(&self.defaults)
    }

    /// Group a service's calls fall into unless the caller names one.
    pub fn default_group(&self, service: &str) -> &str {
        self.options_for(service).group_key()
    }

    /// Breaker for (service, group), created on first use.
    pub fn breaker(&self, service: &str, group: &str) -> Arc<CircuitBreaker> {
        let key = (service.to_string(), group.to_string());
        if let Some(existing) = self.breakers.get(&key) {
            return existing.value().clone();
        }
        self.breakers
            .entry(key)
            .or_insert_with(|| {
                Arc::new(CircuitBreaker::new(
                    service,
                    group,
                    self.options_for(service).clone(),
                    Instant::now(),
                ))
            })
            .value()
            .clone()
    }

    /// Gate a call. `None` means the breaker rejects it.
    pub fn allow(&self, service: &str, group: &str) -> Option<Permit> {
        self.allow_at(service, group, Instant::now())
    }

    pub fn allow_at(&self, service: &str, group: &str, now: Instant) -> Option<Permit> {
        let breaker = self.breaker(service, group);
        let trial = breaker.admit(now)?;
        Some(Permit {
            breaker,
            trial,
            settled: false,
        })
    }

    pub fn state(&self, service: &str, group: &str) -> Option<CircuitState> {
        self.breakers
            .get(&(service.to_string(), group.to_string()))
            .map(|b| b.state())
    }

    /// Force-close a breaker. Returns false if it does not exist yet.
    pub fn reset(&self, service: &str, group: &str) -> bool {
        match self.breakers.get(&(service.to_string(), group.to_string())) {
            Some(breaker) => {
                breaker.reset(Instant::now());
                true
            }
            None => false,
        }
    }

    pub fn snapshot(&self) -> Vec<BreakerSnapshot> {
        let now = Instant::now();
        let mut snapshots: Vec<_> = self.breakers.iter().map(|b| b.snapshot(now)).collect();
        snapshots.sort_by(|a, b| (&a.service, &a.group).cmp(&(&b.service, &b.group)));
        snapshots
    }
}

fn check_options(scope: &str, options: &CircuitBreakerConfig) -> ServiceResult<()> {
    let mut errors = Vec::new();
    validate_breaker(scope, options, &mut errors);
    if errors.is_empty() {
        return Ok(());
    }
    let message = errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ");
    Err(ServiceError::config(format!("invalid circuit breaker options: {}", message)))
}
