//! Least Connections load balancing strategy.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::load_balancer::{Backend, ClusterSnapshot, LoadBalancer, SelectionContext};

/// Least connections selector.
/// Selects the eligible backend with the fewest in-flight requests. The scan
/// starts at a rotating offset so that ties do not all land on the first
/// backend.
#[derive(Debug, Default)]
pub struct LeastConnections {
    offset: AtomicUsize,
}

impl LeastConnections {
    pub fn new() -> Self {
        Self::default()
    }
}

impl LoadBalancer for LeastConnections {
    fn select(&self, snapshot: &ClusterSnapshot, ctx: &SelectionContext<'_>) -> Option<Arc<Backend>> {
        let live = &snapshot.live;
        if live.is_empty() {
            return None;
        }
        let len = live.len();
        let start = self.offset.fetch_add(1, Ordering::Relaxed) % len;

        (0..len)
            .map(|i| &live[(start + i) % len])
            .filter(|b| ctx.eligible(b))
            // min_by_key keeps the first minimum, i.e. the one closest to `start`.
            .min_by_key(|b| b.in_flight())
            .cloned()
    }

    fn name(&self) -> &'static str {
        "least_connections"
    }
}
