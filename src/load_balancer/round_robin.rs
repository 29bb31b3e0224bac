//! Round-robin load balancing strategy.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::load_balancer::{first_eligible, Backend, ClusterSnapshot, LoadBalancer, SelectionContext};

/// Round-robin selector.
/// Stores an internal cursor to rotate through the live view.
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
    fn select(&self, snapshot: &ClusterSnapshot, ctx: &SelectionContext<'_>) -> Option<Arc<Backend>> {
        let live = &snapshot.live;
        if live.is_empty() {
            return None;
        }
        let start = self.counter.fetch_add(1, Ordering::Relaxed) % live.len();
        first_eligible(live, start, ctx)
    }

    fn name(&self) -> &'static str {
        "round_robin"
    }
}
