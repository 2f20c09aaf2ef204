//! Round-robin load balancing strategy.

use std::sync::atomic::{AtomicUsize, Ordering};

use crate::load_balancer::{backend::BackendSnapshot, LoadBalancer};

/// Round-robin selector.
/// Stores an internal counter to rotate through the healthy backends.
#[derive(Debug, Default)]
pub struct RoundRobin {
    counter: AtomicUsize,
}

impl RoundRobin {
    pub fn new() -> Self {
        Self::default()
    }
}

impl LoadBalancer for RoundRobin {
    fn next_server<'a>(&self, candidates: &'a [BackendSnapshot]) -> Option<&'a BackendSnapshot> {
        if candidates.is_empty() {
            return None;
        }
        let n = self.counter.fetch_add(1, Ordering::Relaxed);
        candidates.get(n % candidates.len())
    }
}
