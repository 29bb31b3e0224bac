//! Backend registry and cluster snapshots.
//!
//! # Responsibilities
//! - Hold the backends of every named cluster
//! - Publish an immutable snapshot on each membership or liveness change
//! - Apply the cluster's balancing policy and hand out connection guards
//! - Drain removed backends and drop them once idle or timed out
//!
//! A cluster object lives as long as its name is configured. Reloads update
//! its settings and membership in place, so discovery updates racing a
//! reload land on the same snapshot.

use std::borrow::Cow;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use dashmap::DashMap;
use thiserror::Error;

use crate::clock::SharedClock;
use crate::config::validation::check_backend_limits;
use crate::config::{BackendConfig, ClusterConfig, HashKeyConfig, HealthCheckConfig, PolicyConfig};
use crate::load_balancer::{
    backend::{Backend, ConnectionGuard, Origin},
    consistent_hash::HashRing,
    for_policy,
    weighted::smooth_sequence,
    LoadBalancer, SelectionContext,
};

/// Registry mutation errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("unknown cluster '{0}'")]
    UnknownCluster(String),

    #[error("invalid backend address '{address}': {reason}")]
    InvalidAddress { address: String, reason: String },

    #[error("invalid backend '{address}': {reason}")]
    InvalidBackend { address: String, reason: String },
}

/// Why no backend could be handed out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectError {
    /// The live view is empty, or every live backend was already tried.
    NoLiveBackends,
    /// Every remaining live backend has an open circuit.
    CircuitOpen,
    /// Every remaining backend is at its connection limit.
    Saturated,
}

/// Immutable view of a cluster's membership.
#[derive(Debug, Default)]
pub struct ClusterSnapshot {
    /// All members in registration order, including draining ones.
    pub backends: Vec<Arc<Backend>>,
    /// Healthy members in registration order.
    pub live: Vec<Arc<Backend>>,
    /// Smooth weighted sequence of indices into `live`.
    pub weighted: Vec<usize>,
    /// Hash ring over `live`.
    pub ring: HashRing,
}

impl ClusterSnapshot {
    /// Derive the live view and the policy's precomputed structures.
    pub fn build(backends: Vec<Arc<Backend>>, policy: PolicyConfig) -> Self {
        let live: Vec<Arc<Backend>> = backends
            .iter()
            .filter(|b| b.is_available())
            .cloned()
            .collect();
        let weighted = match policy {
            PolicyConfig::WeightedRoundRobin => {
                let weights: Vec<u32> = live.iter().map(|b| b.weight()).collect();
                smooth_sequence(&weights)
            }
            _ => Vec::new(),
        };
        let ring = match policy {
            PolicyConfig::ConsistentHash => HashRing::build(&live),
            _ => HashRing::default(),
        };
        Self {
            backends,
            live,
            weighted,
            ring,
        }
    }
}

/// Per-cluster settings a reload may replace.
#[derive(Debug)]
struct ClusterSettings {
    policy: PolicyConfig,
    hash_key: HashKeyConfig,
    health_check: Option<HealthCheckConfig>,
    balancer: Arc<dyn LoadBalancer>,
}

/// A named pool of backends with its balancing policy.
#[derive(Debug)]
pub struct Cluster {
    name: String,
    settings: ArcSwap<ClusterSettings>,
    snapshot: ArcSwap<ClusterSnapshot>,
}

impl Cluster {
    pub fn new(config: &ClusterConfig, backends: Vec<Arc<Backend>>) -> Self {
        Self {
            name: config.name.clone(),
            settings: ArcSwap::from_pointee(ClusterSettings {
                policy: config.policy,
                hash_key: config.hash_key.clone(),
                health_check: config.health_check.clone(),
                balancer: Arc::from(for_policy(config.policy)),
            }),
            snapshot: ArcSwap::from_pointee(ClusterSnapshot::build(backends, config.policy)),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn policy(&self) -> PolicyConfig {
        self.settings.load().policy
    }

    pub fn hash_key(&self) -> HashKeyConfig {
        self.settings.load().hash_key.clone()
    }

    /// Per-cluster health check override.
    pub fn health_check(&self) -> Option<HealthCheckConfig> {
        self.settings.load().health_check.clone()
    }

    pub fn balancer_name(&self) -> &'static str {
        self.settings.load().balancer.name()
    }

    pub fn snapshot(&self) -> Arc<ClusterSnapshot> {
        self.snapshot.load_full()
    }

    /// All members in registration order.
    pub fn backends(&self) -> Vec<Arc<Backend>> {
        self.snapshot.load().backends.clone()
    }

    pub fn backend(&self, addr: SocketAddr) -> Option<Arc<Backend>> {
        self.snapshot
            .load()
            .backends
            .iter()
            .find(|b| b.addr == addr)
            .cloned()
    }

    /// Republish after a liveness or weight change.
    pub fn refresh(&self) {
        self.snapshot
            .rcu(|current| ClusterSnapshot::build(current.backends.clone(), self.policy()));
    }

    /// Swap in new settings. The balancer, and with it its cursor, is only
    /// replaced when the policy changes.
    fn reconfigure(&self, config: &ClusterConfig) {
        let current = self.settings.load_full();
        let balancer = if current.policy == config.policy {
            current.balancer.clone()
        } else {
            Arc::from(for_policy(config.policy))
        };
        self.settings.store(Arc::new(ClusterSettings {
            policy: config.policy,
            hash_key: config.hash_key.clone(),
            health_check: config.health_check.clone(),
            balancer,
        }));
    }

    /// Append backends for addresses not yet present, keeping existing ones.
    fn add_missing(&self, candidates: &[Arc<Backend>]) {
        self.snapshot.rcu(|current| {
            let mut backends = current.backends.clone();
            for candidate in candidates {
                if !backends.iter().any(|b| b.addr == candidate.addr) {
                    backends.push(candidate.clone());
                }
            }
            ClusterSnapshot::build(backends, self.policy())
        });
    }

    fn retain(&self, keep: impl Fn(&Arc<Backend>) -> bool) -> Vec<Arc<Backend>> {
        let before = self.snapshot.load_full();
        self.snapshot.rcu(|current| {
            let backends = current.backends.iter().filter(|b| keep(b)).cloned().collect();
            ClusterSnapshot::build(backends, self.policy())
        });
        let after = self.snapshot.load();
        before
            .backends
            .iter()
            .filter(|b| !after.backends.iter().any(|a| Arc::ptr_eq(a, b)))
            .cloned()
            .collect()
    }

    /// Select a backend and claim a connection slot on it.
    ///
    /// Backends in `exclude` and those rejected by `admit` are skipped. A
    /// backend at its connection limit is skipped and the next candidate tried.
    pub fn select(
        &self,
        hash: Option<u64>,
        exclude: &[SocketAddr],
        admit: &dyn Fn(&Backend) -> bool,
    ) -> Result<ConnectionGuard, SelectError> {
        let snapshot = self.snapshot.load_full();
        let settings = self.settings.load_full();

        let mut skipped = Cow::Borrowed(exclude);
        for _ in 0..snapshot.live.len() {
            let ctx = SelectionContext {
                hash,
                exclude: &skipped,
                admit,
            };
            let Some(backend) = settings.balancer.select(&snapshot, &ctx) else {
                break;
            };
            match backend.try_acquire() {
                Some(guard) => return Ok(guard),
                None => skipped.to_mut().push(backend.addr),
            }
        }

        Err(failure_reason(&snapshot, exclude, admit))
    }
}

fn failure_reason(
    snapshot: &ClusterSnapshot,
    exclude: &[SocketAddr],
    admit: &dyn Fn(&Backend) -> bool,
) -> SelectError {
    let mut remaining = snapshot
        .live
        .iter()
        .filter(|b| !exclude.contains(&b.addr))
        .peekable();
    if remaining.peek().is_none() {
        SelectError::NoLiveBackends
    } else if remaining.all(|b| !admit(b)) {
        SelectError::CircuitOpen
    } else {
        SelectError::Saturated
    }
}

/// Every cluster known to the gateway.
#[derive(Debug)]
pub struct BackendRegistry {
    clusters: DashMap<String, Arc<Cluster>>,
    clock: SharedClock,
    drain_timeout_ms: AtomicU64,
    passive_window: AtomicUsize,
}

fn parse_addr(address: &str) -> Result<SocketAddr, RegistryError> {
    address.parse().map_err(|e: std::net::AddrParseError| RegistryError::InvalidAddress {
        address: address.to_string(),
        reason: e.to_string(),
    })
}

/// Parse and limit-check a backend definition.
fn checked_addr(config: &BackendConfig) -> Result<SocketAddr, RegistryError> {
    let addr = parse_addr(&config.address)?;
    check_backend_limits(config).map_err(|reason| RegistryError::InvalidBackend {
        address: config.address.clone(),
        reason: reason.to_string(),
    })?;
    Ok(addr)
}

impl BackendRegistry {
    pub fn new(clock: SharedClock, drain_timeout: Duration, passive_window: usize) -> Self {
        Self {
            clusters: DashMap::new(),
            clock,
            drain_timeout_ms: AtomicU64::new(drain_timeout.as_millis() as u64),
            passive_window: AtomicUsize::new(passive_window),
        }
    }

    pub fn set_drain_timeout(&self, timeout: Duration) {
        self.drain_timeout_ms
            .store(timeout.as_millis() as u64, Ordering::Relaxed);
    }

    pub fn set_passive_window(&self, size: usize) {
        self.passive_window.store(size, Ordering::Relaxed);
    }

    fn new_backend(
        &self,
        cluster: &str,
        addr: SocketAddr,
        config: &BackendConfig,
        origin: Origin,
    ) -> Arc<Backend> {
        let backend = Backend::new(
            cluster,
            addr,
            config.weight,
            config.max_connections,
            self.passive_window.load(Ordering::Relaxed),
        );
        backend.set_origin(origin);
        Arc::new(backend)
    }

    /// Create a cluster or apply a new definition to the existing one.
    ///
    /// Listed backends are added or updated in place (counters and health
    /// kept, drains undone). Backends the previous definition listed but this
    /// one does not are marked Draining. Discovered backends are left alone.
    pub fn upsert_cluster(&self, config: &ClusterConfig) -> Result<Arc<Cluster>, RegistryError> {
        let listed = config
            .backends
            .iter()
            .map(|b| checked_addr(b).map(|addr| (addr, b)))
            .collect::<Result<Vec<_>, _>>()?;

        let cluster = self
            .clusters
            .entry(config.name.clone())
            .or_insert_with(|| Arc::new(Cluster::new(config, Vec::new())))
            .value()
            .clone();
        cluster.reconfigure(config);

        let candidates: Vec<Arc<Backend>> = listed
            .iter()
            .filter(|(addr, _)| cluster.backend(*addr).is_none())
            .map(|(addr, b)| self.new_backend(&config.name, *addr, b, Origin::Config))
            .collect();
        cluster.add_missing(&candidates);

        let now = self.clock.now_millis();
        for backend in cluster.backends() {
            match listed.iter().find(|(addr, _)| *addr == backend.addr) {
                Some((_, backend_config)) => {
                    backend.set_weight(backend_config.weight);
                    backend.set_max_connections(backend_config.max_connections);
                    backend.set_origin(Origin::Config);
                    backend.revive();
                }
                None if backend.origin() == Origin::Config && !backend.is_draining() => {
                    backend.mark_draining(now);
                }
                None => {}
            }
        }
        cluster.refresh();

        tracing::debug!(
            cluster = %config.name,
            policy = cluster.balancer_name(),
            backends = config.backends.len(),
            "Cluster published"
        );
        Ok(cluster)
    }

    /// Remove a cluster; its backends drain through their own references.
    pub fn remove_cluster(&self, name: &str) -> Option<Arc<Cluster>> {
        let (_, cluster) = self.clusters.remove(name)?;
        let now = self.clock.now_millis();
        for backend in cluster.backends() {
            backend.mark_draining(now);
        }
        Some(cluster)
    }

    pub fn cluster(&self, name: &str) -> Option<Arc<Cluster>> {
        self.clusters.get(name).map(|c| c.value().clone())
    }

    /// All clusters ordered by name.
    pub fn clusters(&self) -> Vec<Arc<Cluster>> {
        let mut clusters: Vec<_> = self.clusters.iter().map(|c| c.value().clone()).collect();
        clusters.sort_by(|a, b| a.name.cmp(&b.name));
        clusters
    }

    /// Add a discovered backend, or update weight and limits of an existing
    /// one (which is revived if it was draining).
    pub fn upsert_backend(&self, cluster: &str, config: &BackendConfig) -> Result<Arc<Backend>, RegistryError> {
        let addr = checked_addr(config)?;
        let target = self
            .cluster(cluster)
            .ok_or_else(|| RegistryError::UnknownCluster(cluster.to_string()))?;

        if let Some(existing) = target.backend(addr) {
            existing.set_weight(config.weight);
            existing.set_max_connections(config.max_connections);
            existing.revive();
            target.refresh();
            return Ok(existing);
        }

        let backend = self.new_backend(cluster, addr, config, Origin::Discovery);
        target.add_missing(std::slice::from_ref(&backend));
        tracing::info!(cluster = %cluster, backend = %addr, "Backend added");
        Ok(target.backend(addr).unwrap_or(backend))
    }

    /// Mark a backend Draining. Returns false if it is not a member.
    pub fn remove_backend(&self, cluster: &str, addr: SocketAddr) -> Result<bool, RegistryError> {
        let target = self
            .cluster(cluster)
            .ok_or_else(|| RegistryError::UnknownCluster(cluster.to_string()))?;
        let Some(backend) = target.backend(addr) else {
            return Ok(false);
        };
        backend.mark_draining(self.clock.now_millis());
        target.refresh();
        tracing::info!(
            cluster = %cluster,
            backend = %addr,
            in_flight = backend.in_flight(),
            "Backend draining"
        );
        Ok(true)
    }

    /// Ordered members of a cluster, including draining ones.
    pub fn snapshot(&self, cluster: &str) -> Option<Vec<Arc<Backend>>> {
        self.cluster(cluster).map(|c| c.backends())
    }

    /// Drop draining backends that are idle or past the drain timeout.
    pub fn sweep_drained(&self) -> Vec<Arc<Backend>> {
        let now = self.clock.now_millis();
        let timeout = self.drain_timeout_ms.load(Ordering::Relaxed);
        let mut removed = Vec::new();

        for cluster in self.clusters() {
            let done = |b: &Arc<Backend>| {
                b.is_draining()
                    && (b.in_flight() == 0 || now.saturating_sub(b.draining_since_ms()) >= timeout)
            };
            if !cluster.backends().iter().any(done) {
                continue;
            }
            for backend in cluster.retain(|b| !done(b)) {
                tracing::info!(
                    cluster = %cluster.name(),
                    backend = %backend.addr,
                    abandoned = backend.in_flight(),
                    "Drained backend removed"
                );
                removed.push(backend);
            }
        }
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::health::state::HealthState;
    use crate::load_balancer::Liveness;

    fn cluster_config(name: &str, addrs: &[&str]) -> ClusterConfig {
        ClusterConfig {
            name: name.to_string(),
            backends: addrs.iter().map(|a| BackendConfig::new(*a)).collect(),
            ..Default::default()
        }
    }

    fn registry(clock: Arc<ManualClock>) -> BackendRegistry {
        BackendRegistry::new(clock, Duration::from_secs(30), 10)
    }

    fn admit_all(_: &Backend) -> bool {
        true
    }

    #[test]
    fn snapshot_keeps_registration_order() {
        let reg = registry(Arc::new(ManualClock::new()));
        reg.upsert_cluster(&cluster_config("web", &["127.0.0.1:3002", "127.0.0.1:3001"]))
            .unwrap();
        let ports: Vec<u16> = reg
            .snapshot("web")
            .unwrap()
            .iter()
            .map(|b| b.addr.port())
            .collect();
        assert_eq!(ports, vec![3002, 3001]);
    }

    #[test]
    fn readers_keep_their_snapshot_across_mutations() {
        let reg = registry(Arc::new(ManualClock::new()));
        let cluster = reg
            .upsert_cluster(&cluster_config("web", &["127.0.0.1:3001"]))
            .unwrap();
        let before = cluster.snapshot();
        reg.upsert_backend("web", &BackendConfig::new("127.0.0.1:3002"))
            .unwrap();
        assert_eq!(before.live.len(), 1);
        assert_eq!(cluster.snapshot().live.len(), 2);
    }

    #[test]
    fn upsert_existing_updates_in_place() {
        let reg = registry(Arc::new(ManualClock::new()));
        reg.upsert_cluster(&cluster_config("web", &["127.0.0.1:3001"]))
            .unwrap();
        let original = reg.snapshot("web").unwrap()[0].clone();
        original.record_failure();

        let mut update = BackendConfig::new("127.0.0.1:3001");
        update.weight = 7;
        let updated = reg.upsert_backend("web", &update).unwrap();
        assert!(Arc::ptr_eq(&original, &updated));
        assert_eq!(updated.weight(), 7);
        assert_eq!(updated.failures_total(), 1);
    }

    #[test]
    fn removed_backend_drains_then_sweeps() {
        let clock = Arc::new(ManualClock::new());
        let reg = registry(clock.clone());
        let cluster = reg
            .upsert_cluster(&cluster_config("web", &["127.0.0.1:3001", "127.0.0.1:3002"]))
            .unwrap();
        let addr: SocketAddr = "127.0.0.1:3001".parse().unwrap();

        let guard = cluster.select(None, &[], &admit_all).unwrap();
        assert_eq!(guard.addr, addr);

        assert!(reg.remove_backend("web", addr).unwrap());
        assert_eq!(cluster.snapshot().live.len(), 1);
        for _ in 0..3 {
            assert_ne!(cluster.select(None, &[], &admit_all).unwrap().addr, addr);
        }

        // Still in flight: kept.
        assert!(reg.sweep_drained().is_empty());
        assert_eq!(cluster.backends().len(), 2);

        drop(guard);
        let removed = reg.sweep_drained();
        assert_eq!(removed.len(), 1);
        assert_eq!(cluster.backends().len(), 1);
    }

    #[test]
    fn drain_timeout_forces_removal() {
        let clock = Arc::new(ManualClock::new());
        let reg = registry(clock.clone());
        let cluster = reg
            .upsert_cluster(&cluster_config("web", &["127.0.0.1:3001"]))
            .unwrap();
        let _stuck = cluster.select(None, &[], &admit_all).unwrap();
        reg.remove_backend("web", "127.0.0.1:3001".parse().unwrap())
            .unwrap();

        clock.advance(Duration::from_secs(29));
        assert!(reg.sweep_drained().is_empty());
        clock.advance(Duration::from_secs(1));
        assert_eq!(reg.sweep_drained().len(), 1);
    }

    #[test]
    fn reupsert_revives_draining_backend() {
        let reg = registry(Arc::new(ManualClock::new()));
        let cluster = reg
            .upsert_cluster(&cluster_config("web", &["127.0.0.1:3001"]))
            .unwrap();
        let addr: SocketAddr = "127.0.0.1:3001".parse().unwrap();
        reg.remove_backend("web", addr).unwrap();
        assert!(cluster.snapshot().live.is_empty());

        reg.upsert_backend("web", &BackendConfig::new("127.0.0.1:3001"))
            .unwrap();
        assert_eq!(cluster.snapshot().live.len(), 1);
    }

    #[test]
    fn cluster_rebuild_drains_dropped_addresses() {
        let reg = registry(Arc::new(ManualClock::new()));
        reg.upsert_cluster(&cluster_config("web", &["127.0.0.1:3001", "127.0.0.1:3002"]))
            .unwrap();
        let rebuilt = reg
            .upsert_cluster(&cluster_config("web", &["127.0.0.1:3002"]))
            .unwrap();
        let snapshot = rebuilt.snapshot();
        assert_eq!(snapshot.backends.len(), 2);
        assert_eq!(snapshot.live.len(), 1);
        let dropped = rebuilt.backend("127.0.0.1:3001".parse().unwrap()).unwrap();
        assert!(dropped.is_draining());
    }

    #[test]
    fn reload_keeps_discovered_backends() {
        let reg = registry(Arc::new(ManualClock::new()));
        let config = cluster_config("web", &["127.0.0.1:3001"]);
        let cluster = reg.upsert_cluster(&config).unwrap();
        let discovered = reg
            .upsert_backend("web", &BackendConfig::new("127.0.0.1:3002"))
            .unwrap();
        assert_eq!(discovered.origin(), Origin::Discovery);

        let reloaded = reg.upsert_cluster(&config).unwrap();
        assert!(Arc::ptr_eq(&cluster, &reloaded));
        assert_eq!(discovered.liveness(), Liveness::Healthy);
        assert_eq!(reloaded.snapshot().live.len(), 2);
    }

    #[test]
    fn reload_updates_the_cluster_discovery_writes_to() {
        let reg = registry(Arc::new(ManualClock::new()));
        let held = reg
            .upsert_cluster(&cluster_config("web", &["127.0.0.1:3001"]))
            .unwrap();
        reg.upsert_cluster(&cluster_config("web", &["127.0.0.1:3001", "127.0.0.1:3003"]))
            .unwrap();
        reg.upsert_backend("web", &BackendConfig::new("127.0.0.1:3002"))
            .unwrap();

        let ports: Vec<u16> = held.backends().iter().map(|b| b.addr.port()).collect();
        assert_eq!(ports, vec![3001, 3003, 3002]);
    }

    #[test]
    fn policy_change_swaps_balancer() {
        let reg = registry(Arc::new(ManualClock::new()));
        let mut config = cluster_config("web", &["127.0.0.1:3001", "127.0.0.1:3002"]);
        let cluster = reg.upsert_cluster(&config).unwrap();
        assert_eq!(cluster.balancer_name(), "round_robin");

        config.policy = PolicyConfig::WeightedRoundRobin;
        reg.upsert_cluster(&config).unwrap();
        assert_eq!(cluster.balancer_name(), "weighted_round_robin");
        assert_eq!(cluster.snapshot().weighted.len(), 2);
    }

    #[test]
    fn out_of_range_backends_are_rejected() {
        let reg = registry(Arc::new(ManualClock::new()));
        let cluster = reg
            .upsert_cluster(&cluster_config("web", &["127.0.0.1:3001"]))
            .unwrap();

        let mut heavy = BackendConfig::new("127.0.0.1:3002");
        heavy.weight = 20_000_000;
        assert!(matches!(
            reg.upsert_backend("web", &heavy),
            Err(RegistryError::InvalidBackend { .. })
        ));

        let mut closed = BackendConfig::new("127.0.0.1:3003");
        closed.max_connections = 0;
        assert!(matches!(
            reg.upsert_backend("web", &closed),
            Err(RegistryError::InvalidBackend { .. })
        ));

        let mut existing = BackendConfig::new("127.0.0.1:3001");
        existing.weight = 0;
        assert!(reg.upsert_backend("web", &existing).is_err());
        assert_eq!(cluster.backends().len(), 1);
        assert_eq!(cluster.backends()[0].weight(), 1);
    }

    #[test]
    fn exhausted_exclusion_reports_no_live_backends() {
        let reg = registry(Arc::new(ManualClock::new()));
        let cluster = reg
            .upsert_cluster(&cluster_config("web", &["127.0.0.1:3001", "127.0.0.1:3002"]))
            .unwrap();
        let tried: Vec<SocketAddr> = cluster.backends().iter().map(|b| b.addr).collect();
        assert_eq!(
            cluster.select(None, &tried, &admit_all).unwrap_err(),
            SelectError::NoLiveBackends
        );
        assert_eq!(
            cluster.select(None, &tried[..1], &admit_all).unwrap().addr,
            tried[1]
        );
    }

    #[test]
    fn selection_errors() {
        let reg = registry(Arc::new(ManualClock::new()));
        let mut config = cluster_config("web", &["127.0.0.1:3001"]);
        config.backends[0].max_connections = 1;
        let cluster = reg.upsert_cluster(&config).unwrap();

        let reject = |_: &Backend| false;
        assert_eq!(
            cluster.select(None, &[], &reject).unwrap_err(),
            SelectError::CircuitOpen
        );

        let _held = cluster.select(None, &[], &admit_all).unwrap();
        assert_eq!(
            cluster.select(None, &[], &admit_all).unwrap_err(),
            SelectError::Saturated
        );

        cluster.backends()[0].set_health(HealthState::Unhealthy);
        cluster.refresh();
        assert_eq!(
            cluster.select(None, &[], &admit_all).unwrap_err(),
            SelectError::NoLiveBackends
        );
    }

    #[test]
    fn unknown_cluster_and_bad_address() {
        let reg = registry(Arc::new(ManualClock::new()));
        assert_eq!(
            reg.upsert_backend("ghost", &BackendConfig::new("127.0.0.1:1"))
                .unwrap_err(),
            RegistryError::UnknownCluster("ghost".into())
        );
        assert!(matches!(
            reg.upsert_cluster(&cluster_config("web", &["not-an-addr"])),
            Err(RegistryError::InvalidAddress { .. })
        ));
    }
}
