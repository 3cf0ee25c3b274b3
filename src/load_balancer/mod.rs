//! Load balancing subsystem.
//!
//! # Data Flow
//! ```text
//! ServiceClient names a service
//!     → registry.rs (look up the service descriptor)
//!     → filter to healthy endpoints (all of them if none is healthy)
//!     → Apply load balancing algorithm:
//!         - round_robin.rs (rotate through endpoints)
//!         - least_conn.rs (pick endpoint with fewest connections)
//!         - random.rs (uniform pick)
//!         - weighted.rs (pick proportionally to weight)
//!     → endpoint.rs (connection guard counts the call as in flight)
//! ```
//!
//! # Design Decisions
//! - Strategies are pure selectors; endpoints track their own connections
//! - Algorithm selection per service
//! - Seeded randomness so picks are reproducible in tests

pub mod endpoint;
pub mod least_conn;
pub mod random;
pub mod registry;
pub mod round_robin;
pub mod weighted;

use rand::rngs::StdRng;
use rand::SeedableRng;
use std::sync::Arc;

use crate::config::LoadBalanceStrategy;

pub use endpoint::{ConnectionGuard, Endpoint, EndpointSnapshot};
pub use registry::{EndpointRegistry, Pick, ServiceDescriptor, ServiceSnapshot};

/// Endpoint selection algorithm.
pub trait LoadBalancer: Send + Sync + std::fmt::Debug {
    /// Choose one of `endpoints`, or `None` if the slice is empty.
    fn next_endpoint(&self, endpoints: &[Arc<Endpoint>]) -> Option<Arc<Endpoint>>;
}

/// Instantiate the selector for a configured strategy.
pub fn build_strategy(strategy: LoadBalanceStrategy, seed: Option<u64>) -> Box<dyn LoadBalancer> {
    match strategy {
        LoadBalanceStrategy::RoundRobin => Box::new(round_robin::RoundRobin::new()),
        LoadBalanceStrategy::LeastConnections => Box::new(least_conn::LeastConnections::new()),
        LoadBalanceStrategy::Random => Box::new(random::RandomPick::new(seed)),
        LoadBalanceStrategy::Weighted => Box::new(weighted::Weighted::new(seed)),
    }
}

pub(crate) fn seeded_rng(seed: Option<u64>) -> StdRng {
    match seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    }
}
