//! Weighted load balancing strategy (cumulative-weight sampling).

use rand::rngs::StdRng;
use rand::Rng;
use std::sync::{Arc, Mutex};
use crate::load_balancer::{LoadBalancer, endpoint::Endpoint, seeded_rng};

/// Picks endpoints proportionally to their weight.
#[derive(Debug)]
pub struct Weighted {
    rng: Mutex<StdRng>,
}

impl Weighted {
    pub fn new(seed: Option<u64>) -> Self {
        Self {
            rng: Mutex::new(seeded_rng(seed)),
        }
    }

    fn sample(&self, total: u64) -> u64 {
        match self.rng.lock() {
            Ok(mut rng) => rng.gen_range(0..total),
            Err(poisoned) => poisoned.into_inner().gen_range(0..total),
        }
    }
}

impl LoadBalancer for Weighted {
    fn next_endpoint(&self, endpoints: &[Arc<Endpoint>]) -> Option<Arc<Endpoint>> {
        let total: u64 = endpoints.iter().map(|e| u64::from(e.weight)).sum();
        if total == 0 {
            // All weights zero: degrade to the first candidate
            return endpoints.first().cloned();
        }

        let mut target = self.sample(total);
        for endpoint in endpoints {
            let weight = u64::from(endpoint.weight);
            if target < weight {
                return Some(endpoint.clone());
            }
            target -= weight;
        }
        endpoints.last().cloned()
    }
}
