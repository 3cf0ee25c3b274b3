//! Timeout enforcement.
//!
//! # Responsibilities
//! - Track the overall deadline of a call across attempts and backoff
//! - Bound each attempt by the smaller of its timeout and the time left
//!
//! # Design Decisions
//! - Uses Tokio's clock so the deadline follows a paused test runtime
//! - Dropping the timed-out future cancels the in-flight request

use std::time::Duration;
use tokio::time::Instant;

/// Optional absolute deadline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Deadline {
    at: Option<Instant>,
}

impl Deadline {
    /// No overall bound; attempts are still bounded individually.
    pub fn none() -> Self {
        Self { at: None }
    }

    pub fn after(limit: Duration) -> Self {
        Self {
            at: Some(Instant::now() + limit),
        }
    }

    pub fn from_option(limit: Option<Duration>) -> Self {
        limit.map(Self::after).unwrap_or_else(Self::none)
    }

    /// Time left, `None` when unbounded.
    pub fn remaining(&self) -> Option<Duration> {
        self.at.map(|at| at.saturating_duration_since(Instant::now()))
    }

    pub fn is_expired(&self) -> bool {
        self.remaining() == Some(Duration::ZERO)
    }

    /// Smaller of `timeout` and the time left.
    pub fn clamp(&self, timeout: Duration) -> Duration {
        match self.remaining() {
            Some(left) => timeout.min(left),
            None => timeout,
        }
    }

    /// Whether sleeping `delay` still leaves time for another attempt.
    pub fn allows(&self, delay: Duration) -> bool {
        match self.remaining() {
            Some(left) => delay < left,
            None => true,
        }
    }
}
