//! Endpoint abstraction.
//!
//! # Responsibilities
//! - Represent a single network endpoint of a downstream service
//! - Track active connections (for Least Connections LB)
//! - Track health flag and last probe time (written by the health monitor)

use serde::Serialize;
use std::ops::Deref;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use url::Url;

/// A single endpoint of a service.
///
/// Endpoints live as long as the registry. They are only ever flagged
/// healthy or unhealthy, never removed.
#[derive(Debug)]
pub struct Endpoint {
    /// Base URL requests are resolved against.
    pub url: Url,
    /// Weight for weighted load balancing.
    pub weight: u32,
    /// Set by the health monitor.
    healthy: AtomicBool,
    /// Calls currently in flight.
    active_connections: AtomicUsize,
    /// Milliseconds since the Unix epoch of the last probe (0 = never).
    last_health_check_ms: AtomicU64,
}

impl Endpoint {
    /// Create a new endpoint. Endpoints start healthy until probed.
    pub fn new(url: Url, weight: u32) -> Self {
        Self {
            url,
            weight,
            healthy: AtomicBool::new(true),
            active_connections: AtomicUsize::new(0),
            last_health_check_ms: AtomicU64::new(0),
        }
    }

    pub fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::Acquire)
    }

    /// Get the current number of active connections.
    pub fn active_connections(&self) -> usize {
        self.active_connections.load(Ordering::Acquire)
    }

    /// Record a probe result. Returns true when the flag flipped.
    pub fn set_health(&self, healthy: bool, checked_at: SystemTime) -> bool {
        let millis = checked_at
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64;
        self.last_health_check_ms.store(millis, Ordering::Release);
        self.healthy.swap(healthy, Ordering::AcqRel) != healthy
    }

    pub fn last_health_check(&self) -> Option<SystemTime> {
        match self.last_health_check_ms.load(Ordering::Acquire) {
            0 => None,
            ms => Some(UNIX_EPOCH + Duration::from_millis(ms)),
        }
    }

    /// Count a call as in flight until the returned guard drops.
    pub fn acquire(self: &Arc<Self>) -> ConnectionGuard {
        self.active_connections.fetch_add(1, Ordering::AcqRel);
        ConnectionGuard {
            endpoint: self.clone(),
        }
    }

    fn release(&self) {
        // Saturating: the count never goes below zero.
        let _ = self
            .active_connections
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));
    }

    /// Append `path` to the endpoint's base URL, keeping any base path.
    pub fn resolve(&self, path: &str) -> Result<Url, url::ParseError> {
        let base = self.url.as_str().trim_end_matches('/');
        let path = path.trim_start_matches('/');
        if path.is_empty() {
            return Url::parse(base);
        }
        Url::parse(&format!("{}/{}", base, path))
    }

    pub fn snapshot(&self) -> EndpointSnapshot {
        EndpointSnapshot {
            url: self.url.to_string(),
            weight: self.weight,
            healthy: self.is_healthy(),
            active_connections: self.active_connections(),
            last_health_check_ms: self.last_health_check_ms.load(Ordering::Acquire),
        }
    }
}

/// Point-in-time view of an endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct EndpointSnapshot {
    pub url: String,
    pub weight: u32,
    pub healthy: bool,
    pub active_connections: usize,
    pub last_health_check_ms: u64,
}

/// A RAII guard that manages the active connection count.
#[derive(Debug)]
pub struct ConnectionGuard {
    endpoint: Arc<Endpoint>,
}

impl Deref for ConnectionGuard {
    type Target = Endpoint;
    fn deref(&self) -> &Self::Target {
        &self.endpoint
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.endpoint.release();
    }
}

#[cfg(test)]
pub(crate) fn test_endpoint(url: &str, weight: u32) -> Arc<Endpoint> {
    Arc::new(Endpoint::new(Url::parse(url).unwrap(), weight))
}
