//! Uniform random load balancing strategy.

use rand::rngs::StdRng;
use rand::Rng;
use std::sync::{Arc, Mutex};
use crate::load_balancer::{LoadBalancer, endpoint::Endpoint, seeded_rng};

/// Picks uniformly among the candidates.
#[derive(Debug)]
pub struct RandomPick {
    rng: Mutex<StdRng>,
}

impl RandomPick {
    /// Same seed, same sequence of picks.
    pub fn new(seed: Option<u64>) -> Self {
        Self {
            rng: Mutex::new(seeded_rng(seed)),
        }
    }
}

impl LoadBalancer for RandomPick {
    fn next_endpoint(&self, endpoints: &[Arc<Endpoint>]) -> Option<Arc<Endpoint>> {
        if endpoints.is_empty() {
            return None;
        }
        let index = match self.rng.lock() {
            Ok(mut rng) => rng.gen_range(0..endpoints.len()),
            Err(poisoned) => poisoned.into_inner().gen_range(0..endpoints.len()),
        };
        Some(endpoints[index].clone())
    }
}
