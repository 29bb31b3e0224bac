//! Load balancing subsystem.
//!
//! # Data Flow
//! ```text
//! Route matched → cluster identified
//!     → pool.rs (cluster snapshot: live view, weighted sequence, hash ring)
//!     → Apply load balancing policy:
//!         - round_robin.rs (rotate through live backends)
//!         - least_conn.rs (pick backend with fewest in-flight requests)
//!         - weighted.rs (smooth weighted sequence)
//!         - consistent_hash.rs (ring of virtual nodes)
//!     → backend.rs (acquire connection guard)
//!     → Return guard or selection error
//! ```
//!
//! # Design Decisions
//! - Balancers only read snapshots; liveness is written by health checks
//! - Policy is a strategy object, replaced only when the configured policy changes
//! - Retries pass the backends already tried as an exclusion set
//! - Circuit state is consulted through an admission predicate

use std::fmt::Debug;
use std::net::SocketAddr;
use std::sync::Arc;

use crate::config::PolicyConfig;

pub mod backend;
pub mod consistent_hash;
pub mod least_conn;
pub mod pool;
pub mod round_robin;
pub mod weighted;

pub use backend::{Backend, ConnectionGuard, Liveness, Origin};
pub use pool::{BackendRegistry, Cluster, ClusterSnapshot, RegistryError, SelectError};

/// Per-selection inputs.
pub struct SelectionContext<'a> {
    /// Hash of the request's affinity key (consistent hash policy only).
    pub hash: Option<u64>,
    /// Backends that must not be chosen (already tried, or saturated).
    pub exclude: &'a [SocketAddr],
    /// Extra admission check, e.g. circuit state.
    pub admit: &'a dyn Fn(&Backend) -> bool,
}

impl SelectionContext<'_> {
    pub fn eligible(&self, backend: &Backend) -> bool {
        !self.exclude.contains(&backend.addr) && (self.admit)(backend)
    }
}

/// Load balancing strategy.
pub trait LoadBalancer: Send + Sync + Debug {
    /// Pick a backend from `snapshot.live`, or `None` if nothing is eligible.
    fn select(&self, snapshot: &ClusterSnapshot, ctx: &SelectionContext<'_>) -> Option<Arc<Backend>>;

    fn name(&self) -> &'static str;
}

/// Build the strategy for a policy.
pub fn for_policy(policy: PolicyConfig) -> Box<dyn LoadBalancer> {
    match policy {
        PolicyConfig::RoundRobin => Box::new(round_robin::RoundRobin::new()),
        PolicyConfig::LeastConnections => Box::new(least_conn::LeastConnections::new()),
        PolicyConfig::WeightedRoundRobin => Box::new(weighted::WeightedRoundRobin::new()),
        PolicyConfig::ConsistentHash => Box::new(consistent_hash::ConsistentHash::new()),
    }
}

/// Scan `live` starting at `start`, wrapping once, for the first eligible backend.
pub(crate) fn first_eligible(
    live: &[Arc<Backend>],
    start: usize,
    ctx: &SelectionContext<'_>,
) -> Option<Arc<Backend>> {
    let len = live.len();
    (0..len)
        .map(|i| &live[(start + i) % len])
        .find(|b| ctx.eligible(b))
        .cloned()
}
