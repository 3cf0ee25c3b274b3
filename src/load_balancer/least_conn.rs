//! Least Connections load balancing strategy.

use std::sync::Arc;
use crate::load_balancer::{LoadBalancer, endpoint::Endpoint};

/// Least connections selector.
/// Selects the endpoint with the minimum number of active connections.
#[derive(Debug, Default)]
pub struct LeastConnections;

impl LeastConnections {
    pub fn new() -> Self {
        Self
    }
}

impl LoadBalancer for LeastConnections {
    fn next_endpoint(&self, endpoints: &[Arc<Endpoint>]) -> Option<Arc<Endpoint>> {
        // In case of tie, the first one in registry order is selected
        endpoints
            .iter()
            .min_by_key(|e| e.active_connections())
            .cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::load_balancer::endpoint::test_endpoint;

    #[test]
    fn test_least_conn() {
        let lb = LeastConnections::new();
        let e1 = test_endpoint("http://127.0.0.1:8080", 1);
        let e2 = test_endpoint("http://127.0.0.1:8081", 1);

        let _g1 = e1.acquire();
        let endpoints = vec![e1.clone(), e2.clone()];

        // Should pick e2 (0 connections)
        let s1 = lb.next_endpoint(&endpoints).unwrap();
        assert_eq!(s1.url, e2.url);

        let _g2 = e2.acquire();
        let _g3 = e2.acquire();

        // Should pick e1 (1 connection vs 2)
        let s2 = lb.next_endpoint(&endpoints).unwrap();
        assert_eq!(s2.url, e1.url);
    }

    #[test]
    fn test_tie_uses_registry_order() {
        let lb = LeastConnections::new();
        let e1 = test_endpoint("http://127.0.0.1:8080", 1);
        let e2 = test_endpoint("http://127.0.0.1:8081", 1);
        let endpoints = vec![e1.clone(), e2];
        for _ in 0..3 {
            assert_eq!(lb.next_endpoint(&endpoints).unwrap().url, e1.url);
        }
    }
}
