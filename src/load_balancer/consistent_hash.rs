//! Consistent hashing.
//!
//! Each live backend owns [`VIRTUAL_NODES`] points on a 64-bit ring. A key
//! maps to the first point at or after its hash (binary search), so removing
//! one of K backends only moves the keys that backend owned, about 1/K.
//!
//! Points and keys are hashed with SHA-256 truncated to 64 bits, so
//! assignments survive restarts, upgrades and other gateway instances.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use sha2::{Digest, Sha256};

use crate::load_balancer::{first_eligible, Backend, ClusterSnapshot, LoadBalancer, SelectionContext};

/// Ring points per backend.
pub const VIRTUAL_NODES: usize = 160;

fn digest64(parts: &[&[u8]]) -> u64 {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part);
    }
    let digest = hasher.finalize();
    let mut head = [0u8; 8];
    head.copy_from_slice(&digest[..8]);
    u64::from_be_bytes(head)
}

/// Stable hash of an affinity key.
pub fn hash_key(key: &[u8]) -> u64 {
    digest64(&[key])
}

/// Sorted ring of (point, index into the live view).
#[derive(Debug, Default, Clone)]
pub struct HashRing {
    points: Vec<(u64, usize)>,
}

impl HashRing {
    pub fn build(live: &[Arc<Backend>]) -> Self {
        let mut points = Vec::with_capacity(live.len() * VIRTUAL_NODES);
        for (idx, backend) in live.iter().enumerate() {
            let addr = backend.addr.to_string();
            for vnode in 0..VIRTUAL_NODES {
                let vnode = (vnode as u32).to_be_bytes();
                points.push((digest64(&[addr.as_bytes(), b"#".as_slice(), vnode.as_slice()]), idx));
            }
        }
        points.sort_unstable();
        Self { points }
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Live-view indices in ring order starting at the owner of `hash`.
    pub fn walk(&self, hash: u64) -> impl Iterator<Item = usize> + '_ {
        let start = self.points.partition_point(|(point, _)| *point < hash);
        let len = self.points.len();
        (0..len).map(move |i| self.points[(start + i) % len].1)
    }
}

/// Consistent hash selector. Requests without a key fall back to round robin.
#[derive(Debug, Default)]
pub struct ConsistentHash {
    fallback: AtomicUsize,
}

impl ConsistentHash {
    pub fn new() -> Self {
        Self::default()
    }
}

impl LoadBalancer for ConsistentHash {
    fn select(&self, snapshot: &ClusterSnapshot, ctx: &SelectionContext<'_>) -> Option<Arc<Backend>> {
        let live = &snapshot.live;
        if live.is_empty() {
            return None;
        }
        match ctx.hash {
            Some(hash) if !snapshot.ring.is_empty() => snapshot
                .ring
                .walk(hash)
                .map(|idx| &live[idx])
                .find(|b| ctx.eligible(b))
                .cloned(),
            _ => {
                let start = self.fallback.fetch_add(1, Ordering::Relaxed) % live.len();
                first_eligible(live, start, ctx)
            }
        }
    }

    fn name(&self) -> &'static str {
        "consistent_hash"
    }
}
