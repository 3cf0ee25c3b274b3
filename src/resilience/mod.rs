//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Call to a downstream service:
//!     → circuit_breaker.rs (admit or reject before any I/O)
//!     → timeouts.rs (bound the attempt by timeout and overall deadline)
//!     → On failure: retries.rs (classify, decide on another attempt)
//!     → backoff.rs (exponential delay with jitter)
//!     → circuit_breaker.rs (record outcome into the rolling window)
//! ```
//!
//! # Design Decisions
//! - Timeouts are non-negotiable; every external call has a deadline
//! - Circuit breaker prevents cascading failures
//! - Rejected calls never reach the network

pub mod backoff;
pub mod circuit_breaker;
pub mod retries;
pub mod timeouts;
pub mod window;

pub use circuit_breaker::{BreakerSnapshot, CircuitBreaker, CircuitBreakerManager, CircuitState, Permit};
pub use retries::{classify, FailureClass, RetryPolicy};
pub use timeouts::Deadline;
