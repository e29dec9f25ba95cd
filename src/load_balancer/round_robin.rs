// src/load_balancer/round_robin.rs
use crate::load_balancer::LoadBalancer;
use crate::proxy::Backend;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Round robin that skips dead backends.
///
/// Every call takes a distinct ticket from the shared counter and scans forward
/// from `ticket % n` for the first alive backend, looking at each backend at most
/// once. The counter wraps on overflow; only its value modulo `n` matters.
pub struct RoundRobinBalancer {
    counter: AtomicUsize,
}

impl RoundRobinBalancer {
    pub fn new() -> Self {
        Self::starting_at(0)
    }

    pub fn starting_at(counter: usize) -> Self {
        Self {
            counter: AtomicUsize::new(counter),
        }
    }

    /// Number of tickets handed out so far (plus the starting value).
    pub fn counter(&self) -> usize {
        self.counter.load(Ordering::SeqCst)
    }
}

impl Default for RoundRobinBalancer {
    fn default() -> Self {
        Self::new()
    }
}

impl LoadBalancer for RoundRobinBalancer {
    fn select_backend(&self, backends: &[Arc<Backend>]) -> Option<Arc<Backend>> {
        if backends.is_empty() {
            return None;
        }

        let len = backends.len();
        let start = self.counter.fetch_add(1, Ordering::SeqCst) % len;

        (0..len)
            .map(|offset| &backends[(start + offset) % len])
            .find(|backend| backend.is_alive())
            .cloned()
    }

    fn name(&self) -> &'static str {
        "round_robin"
    }
}
