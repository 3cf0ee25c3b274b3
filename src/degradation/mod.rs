//! Graceful degradation subsystem.
//!
//! # Data Flow
//! ```text
//! Successful call
//!     → cache.rs (remember the response if a cache policy covers it)
//!
//! Call exhausted retries, found the breaker open, or hit an outage
//!     → service.rs (find the policy for service + path)
//!     → cached response | static default | unavailable sentinel
//!     → attached to the ServiceError handed back to the caller
//! ```
//!
//! # Design Decisions
//! - Permanent errors (4xx, auth, config) are never degraded
//! - Unavailable is an explicit value the caller must match on

pub mod cache;
pub mod service;

use serde::Serialize;
use serde_json::Value;

pub use cache::ResponseCache;
pub use service::GracefulDegradationService;

/// Stand-in result for an unavailable capability.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Fallback {
    /// Last successful response, at most `max_staleness` old.
    Cached {
        capability: String,
        data: Value,
        age_ms: u64,
    },
    /// Statically configured payload.
    Default { capability: String, data: Value },
    /// Nothing to serve; the feature is unavailable.
    Unavailable { capability: String },
}

impl Fallback {
    pub fn capability(&self) -> &str {
        match self {
            Fallback::Cached { capability, .. }
            | Fallback::Default { capability, .. }
            | Fallback::Unavailable { capability } => capability,
        }
    }

    /// Payload to serve, if any.
    pub fn data(&self) -> Option<&Value> {
        match self {
            Fallback::Cached { data, .. } | Fallback::Default { data, .. } => Some(data),
            Fallback::Unavailable { .. } => None,
        }
    }

    pub fn is_unavailable(&self) -> bool {
        matches!(self, Fallback::Unavailable { .. })
    }

    pub(crate) fn label(&self) -> &'static str {
        match self {
            Fallback::Cached { .. } => "cached",
            Fallback::Default { .. } => "default",
            Fallback::Unavailable { .. } => "unavailable",
        }
    }
}
