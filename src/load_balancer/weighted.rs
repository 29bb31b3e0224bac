//! Weighted round robin.
//!
//! The smooth weighted sequence (each step: add every weight to its running
//! score, pick the highest score, subtract the total from it) is expanded
//! once when the cluster snapshot is published. Selection is then a single
//! atomic cursor increment into that sequence.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::load_balancer::{first_eligible, Backend, ClusterSnapshot, LoadBalancer, SelectionContext};

fn gcd(a: u32, b: u32) -> u32 {
    if b == 0 {
        a
    } else {
        gcd(b, a % b)
    }
}

/// Expand weights into a smooth sequence of indices. Weights are reduced by
/// their common divisor first, so the sequence length is the reduced sum.
pub fn smooth_sequence(weights: &[u32]) -> Vec<usize> {
    let divisor = weights.iter().copied().fold(0, gcd).max(1);
    let reduced: Vec<i64> = weights
        .iter()
        .map(|w| i64::from((*w).max(1) / divisor).max(1))
        .collect();
    let total: i64 = reduced.iter().sum();

    let mut current = vec![0i64; reduced.len()];
    let mut sequence = Vec::with_capacity(total as usize);
    for _ in 0..total {
        let mut best = 0;
        for (i, w) in reduced.iter().enumerate() {
            current[i] += w;
            if current[i] > current[best] {
                best = i;
            }
        }
        current[best] -= total;
        sequence.push(best);
    }
    sequence
}

/// Weighted round-robin selector.
#[derive(Debug, Default)]
pub struct WeightedRoundRobin {
    cursor: AtomicUsize,
}

impl WeightedRoundRobin {
    pub fn new() -> Self {
        Self::default()
    }
}

impl LoadBalancer for WeightedRoundRobin {
    fn select(&self, snapshot: &ClusterSnapshot, ctx: &SelectionContext<'_>) -> Option<Arc<Backend>> {
        let sequence = &snapshot.weighted;
        let start = self.cursor.fetch_add(1, Ordering::Relaxed);
        if sequence.is_empty() {
            // Snapshot published under another policy; rotate until the
            // weighted one lands.
            if snapshot.live.is_empty() {
                return None;
            }
            return first_eligible(&snapshot.live, start % snapshot.live.len(), ctx);
        }
        let len = sequence.len();
        let start = start % len;

        // Fast path: the slot is eligible. Otherwise walk the sequence so the
        // remaining backends keep their relative weights.
        (0..len)
            .map(|i| &snapshot.live[sequence[(start + i) % len]])
            .find(|b| ctx.eligible(b))
            .cloned()
    }

    fn name(&self) -> &'static str {
        "weighted_round_robin"
    }
}
