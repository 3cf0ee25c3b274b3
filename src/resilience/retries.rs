//! Retry logic.
//!
//! # Responsibilities
//! - Classify a failed attempt (transient, outage, permanent)
//! - Decide whether another attempt is allowed
//! - Compute the backoff before it
//!
//! # Design Decisions
//! - Timeouts, network errors and listed status codes are transient
//! - 4xx other than 429 never retried; the request itself is wrong
//! - Auth and config failures are permanent and surface unchanged

use std::time::Duration;

use crate::error::ErrorKind;
use crate::resilience::backoff::calculate_backoff;

/// What a failed attempt means for the rest of the call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    /// Worth retrying; counts against the breaker.
    Transient,
    /// Server-side failure not listed as retryable; counts against the breaker.
    Outage,
    /// The service answered but rejected the request (4xx).
    Rejected,
    /// Misconfiguration on our side; nothing downstream was judged.
    Permanent,
}

impl FailureClass {
    /// Whether the outcome is recorded as a breaker failure.
    pub fn counts_against_breaker(&self) -> bool {
        matches!(self, FailureClass::Transient | FailureClass::Outage)
    }

    /// Whether exhausting the call may be answered by degradation.
    pub fn is_degradable(&self) -> bool {
        matches!(self, FailureClass::Transient | FailureClass::Outage)
    }
}

/// Classify a failure given the status codes configured as retryable.
pub fn classify(kind: ErrorKind, retryable_status_codes: &[u16]) -> FailureClass {
    match kind {
        ErrorKind::Timeout | ErrorKind::NetworkFailure => FailureClass::Transient,
        ErrorKind::HttpStatus(429) => FailureClass::Transient,
        ErrorKind::HttpStatus(code) if retryable_status_codes.contains(&code) => FailureClass::Transient,
        ErrorKind::HttpStatus(code) if code >= 500 => FailureClass::Outage,
        ErrorKind::HttpStatus(_) => FailureClass::Rejected,
        // Never retried; the breaker already encodes "don't bother"
        ErrorKind::CircuitOpen => FailureClass::Outage,
        ErrorKind::AuthFailure | ErrorKind::ConfigError => FailureClass::Permanent,
    }
}

/// Retry budget and backoff shape for one call.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Attempts after the first one.
    pub retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub retryable_status_codes: Vec<u16>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            retries: 2,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(5),
            retryable_status_codes: vec![429, 502, 503, 504],
        }
    }
}

impl RetryPolicy {
    pub fn classify(&self, kind: ErrorKind) -> FailureClass {
        classify(kind, &self.retryable_status_codes)
    }

    /// Whether a failure after `retry_count` retries earns another attempt.
    pub fn should_retry(&self, kind: ErrorKind, retry_count: u32) -> bool {
        kind != ErrorKind::CircuitOpen
            && self.classify(kind) == FailureClass::Transient
            && retry_count < self.retries
    }

    pub fn backoff(&self, retry_count: u32) -> Duration {
        calculate_backoff(retry_count, self.base_delay, self.max_delay)
    }
}
