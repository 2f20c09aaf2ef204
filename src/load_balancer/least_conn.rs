//! Least Connections load balancing strategy.

use crate::load_balancer::{backend::BackendSnapshot, LoadBalancer};

/// Least connections selector.
/// Selects the backend with the minimum number of active connections.
#[derive(Debug, Default)]
pub struct LeastConnections;

impl LeastConnections {
    pub fn new() -> Self {
        Self
    }
}

impl LoadBalancer for LeastConnections {
    fn next_server<'a>(&self, candidates: &'a [BackendSnapshot]) -> Option<&'a BackendSnapshot> {
        // min_by_key returns the first minimum; candidates arrive in
        // registration order, so ties go to the lowest index.
        candidates.iter().min_by_key(|b| b.active_connections)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::load_balancer::backend::{BackendId, HealthState};

    fn snap(index: usize, active_connections: usize) -> BackendSnapshot {
        BackendSnapshot {
            id: BackendId(index),
            host: "127.0.0.1".into(),
            port: 8080 + index as u16,
            active_connections,
            health: HealthState::Healthy,
            consecutive_failures: 0,
            last_probe: None,
        }
    }

    #[test]
    fn test_least_conn() {
        let lb = LeastConnections::new();
        let backends = vec![snap(0, 1), snap(1, 0)];
        assert_eq!(lb.next_server(&backends).unwrap().id, BackendId(1));

        let backends = vec![snap(0, 1), snap(1, 2)];
        assert_eq!(lb.next_server(&backends).unwrap().id, BackendId(0));
    }

    #[test]
    fn ties_go_to_lowest_index() {
        let lb = LeastConnections::new();
        let backends = vec![snap(0, 3), snap(1, 1), snap(2, 1), snap(3, 1)];
        assert_eq!(lb.next_server(&backends).unwrap().id, BackendId(1));
    }

    #[test]
    fn empty() {
        assert!(LeastConnections::new().next_server(&[]).is_none());
    }
}
