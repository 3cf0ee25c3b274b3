//! Resilient service-communication core.
//!
//! Every call an application makes to a downstream service goes through
//! [`client::ServiceClient`]: endpoint selection with health awareness,
//! a per-service circuit breaker, credentials with single-flight refresh,
//! bounded retries with jittered backoff, correlation/trace propagation and
//! graceful degradation when a capability is unavailable.
//!
//! ```text
//!   application
//!       │ call(service, request)
//!       ▼
//!   ServiceClient ──▶ CircuitBreakerManager (allow / record)
//!       │        ──▶ EndpointRegistry + LoadBalancer (pick, connection count)
//!       │        ──▶ CredentialProvider (cached or refreshed credential)
//!       │        ──▶ Transport (one attempt, bounded by timeout and deadline)
//!       ▼
//!   Ok(ServiceResponse) | Err(ServiceError [+ Fallback from GracefulDegradationService])
//!
//!   HealthMonitor (background) ──▶ Endpoint health flags
//! ```

// Core subsystems
pub mod client;
pub mod config;
pub mod error;

// Traffic management
pub mod health;
pub mod load_balancer;

// Cross-cutting concerns
pub mod auth;
pub mod degradation;
pub mod lifecycle;
pub mod observability;
pub mod resilience;

// Operations
pub mod admin;

pub use client::{CallOptions, ServiceClient, ServiceRequest, ServiceResponse};
pub use config::LinkConfig;
pub use degradation::Fallback;
pub use error::{ErrorKind, Served, ServiceError, ServiceResult, ServiceResultExt};
pub use lifecycle::{ServiceLink, Shutdown};
