//! Passive health checking.
//!
//! # Responsibilities
//! - Observe real traffic outcomes reported through circuit breaker permits
//! - Eject a backend once its recent failure ratio reaches the threshold
//! - Readmit ejected backends after a fixed period when no active checks run

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;

use crate::clock::SharedClock;
use crate::config::PassiveHealthConfig;
use crate::health::state::{next_state, HealthEvent, HealthState, Thresholds};
use crate::load_balancer::{Backend, BackendRegistry, Cluster};
use crate::observability::metrics;
use crate::resilience::{Outcome, OutcomeSink};

// Thresholds only matter for probe events, which passive checks never emit.
const PASSIVE_THRESHOLDS: Thresholds = Thresholds {
    unhealthy: 1,
    healthy: 1,
};

pub struct PassiveHealth {
    config: ArcSwap<PassiveHealthConfig>,
    registry: Arc<BackendRegistry>,
    clock: SharedClock,
}

impl PassiveHealth {
    pub fn new(config: PassiveHealthConfig, registry: Arc<BackendRegistry>, clock: SharedClock) -> Self {
        Self {
            config: ArcSwap::from_pointee(config),
            registry,
            clock,
        }
    }

    pub fn update_config(&self, config: PassiveHealthConfig) {
        self.config.store(Arc::new(config));
    }

    /// Account one traffic outcome for `backend`. Returns true if the backend
    /// was ejected by it.
    pub fn report(&self, cluster: &Cluster, backend: &Backend, outcome: Outcome) -> bool {
        if outcome == Outcome::Failure {
            backend.record_failure();
        }

        let config = self.config.load();
        if !config.enabled {
            return false;
        }

        backend.passive.record(outcome);
        if outcome == Outcome::Success || backend.health() != HealthState::Healthy {
            return false;
        }

        let stats = backend.passive.stats();
        if !stats.exceeds(config.failure_ratio, config.min_requests) {
            return false;
        }

        let next = next_state(
            HealthState::Healthy,
            HealthEvent::PassiveThresholdExceeded,
            PASSIVE_THRESHOLDS,
        );
        if !backend.set_health(next) {
            return false;
        }

        backend.set_ejected_at(self.clock.now_millis());
        backend.reset_streaks();
        backend.passive.reset();
        cluster.refresh();

        tracing::warn!(
            cluster = %cluster.name(),
            backend = %backend.addr,
            failures = stats.failures,
            samples = stats.samples,
            "Backend ejected by passive health check"
        );
        metrics::record_backend_health(cluster.name(), &backend.addr.to_string(), false);
        true
    }

    /// Readmit backends of `cluster` whose ejection period has run out.
    /// Only used for clusters without active checks.
    pub fn readmit_expired(&self, cluster: &Cluster) -> usize {
        let ejection = Duration::from_secs(self.config.load().ejection_secs).as_millis() as u64;
        let now = self.clock.now_millis();
        let mut readmitted = 0;

        for backend in cluster.backends() {
            let Some(ejected_at) = backend.ejected_at() else {
                continue;
            };
            if backend.health() != HealthState::Unhealthy || now.saturating_sub(ejected_at) < ejection {
                continue;
            }
            let next = next_state(
                HealthState::Unhealthy,
                HealthEvent::EjectionExpired,
                PASSIVE_THRESHOLDS,
            );
            if backend.set_health(next) {
                backend.clear_ejection();
                readmitted += 1;
                tracing::info!(
                    cluster = %cluster.name(),
                    backend = %backend.addr,
                    "Backend readmitted after passive ejection"
                );
                metrics::record_backend_health(cluster.name(), &backend.addr.to_string(), true);
            }
        }

        if readmitted > 0 {
            cluster.refresh();
        }
        readmitted
    }
}

impl OutcomeSink for PassiveHealth {
    fn observe(&self, cluster: &str, addr: SocketAddr, outcome: Outcome) {
        let Some(cluster) = self.registry.cluster(cluster) else {
            return;
        };
        if let Some(backend) = cluster.backend(addr) {
            self.report(&cluster, &backend, outcome);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::config::{BackendConfig, ClusterConfig};

    fn setup(clock: Arc<ManualClock>) -> (Arc<BackendRegistry>, Arc<Cluster>, PassiveHealth) {
        let registry = Arc::new(BackendRegistry::new(clock.clone(), Duration::from_secs(30), 10));
        let cluster = registry
            .upsert_cluster(&ClusterConfig {
                name: "web".into(),
                backends: vec![
                    BackendConfig::new("127.0.0.1:3001"),
                    BackendConfig::new("127.0.0.1:3002"),
                ],
                ..Default::default()
            })
            .unwrap();
        let passive = PassiveHealth::new(
            PassiveHealthConfig {
                enabled: true,
                window_size: 10,
                failure_ratio: 0.5,
                min_requests: 4,
                ejection_secs: 30,
            },
            registry.clone(),
            clock,
        );
        (registry, cluster, passive)
    }

    #[test]
    fn ejects_once_ratio_and_min_samples_are_met() {
        let clock = Arc::new(ManualClock::new());
        let (_registry, cluster, passive) = setup(clock);
        let backend = cluster.backends()[0].clone();

        assert!(!passive.report(&cluster, &backend, Outcome::Failure));
        assert!(!passive.report(&cluster, &backend, Outcome::Failure));
        assert!(!passive.report(&cluster, &backend, Outcome::Success));
        assert!(passive.report(&cluster, &backend, Outcome::Failure));

        assert_eq!(backend.health(), HealthState::Unhealthy);
        assert_eq!(backend.failures_total(), 3);
        assert_eq!(cluster.snapshot().live.len(), 1);
    }

    #[test]
    fn readmits_after_ejection_period() {
        let clock = Arc::new(ManualClock::new());
        let (_registry, cluster, passive) = setup(clock.clone());
        let backend = cluster.backends()[0].clone();
        for _ in 0..4 {
            passive.report(&cluster, &backend, Outcome::Failure);
        }
        assert!(!backend.is_available());

        clock.advance(Duration::from_secs(29));
        assert_eq!(passive.readmit_expired(&cluster), 0);
        clock.advance(Duration::from_secs(1));
        assert_eq!(passive.readmit_expired(&cluster), 1);
        assert!(backend.is_available());
        assert_eq!(cluster.snapshot().live.len(), 2);
    }

    #[test]
    fn sink_resolves_backend_through_registry() {
        let clock = Arc::new(ManualClock::new());
        let (_registry, cluster, passive) = setup(clock);
        let addr: SocketAddr = "127.0.0.1:3002".parse().unwrap();
        for _ in 0..4 {
            passive.observe("web", addr, Outcome::Failure);
        }
        assert!(!cluster.backend(addr).unwrap().is_available());
        passive.observe("ghost", addr, Outcome::Failure);
    }
}
