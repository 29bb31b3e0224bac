//! Active health checking.
//!
//! # Responsibilities
//! - Periodically probe every backend of every cluster
//! - Update backend health through the state machine
//! - Readmit passively ejected backends where active checks are off
//! - Sweep drained backends out of the registry

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use axum::body::Body;
use axum::http::Request;
use dashmap::DashMap;
use futures_util::future::{join_all, BoxFuture};
use hyper_util::{
    client::legacy::{connect::HttpConnector, Client},
    rt::TokioExecutor,
};
use tokio::sync::broadcast;
use tokio::time;

use crate::clock::SharedClock;
use crate::config::HealthCheckConfig;
use crate::health::passive::PassiveHealth;
use crate::health::state::{next_state, HealthEvent, HealthState, Thresholds};
use crate::load_balancer::{Backend, BackendRegistry, Cluster};
use crate::observability::metrics;
use crate::resilience::CircuitBreakers;

/// Performs one health probe.
pub trait Prober: Send + Sync {
    /// True when the backend answered `path` with a 2xx within `timeout`.
    fn probe<'a>(&'a self, addr: SocketAddr, path: &'a str, timeout: Duration) -> BoxFuture<'a, bool>;
}

/// HTTP GET prober.
pub struct HttpProber {
    client: Client<HttpConnector, Body>,
}

impl HttpProber {
    pub fn new() -> Self {
        let client = Client::builder(TokioExecutor::new()).build(HttpConnector::new());
        Self { client }
    }
}

impl Default for HttpProber {
    fn default() -> Self {
        Self::new()
    }
}

impl Prober for HttpProber {
    fn probe<'a>(&'a self, addr: SocketAddr, path: &'a str, timeout: Duration) -> BoxFuture<'a, bool> {
        Box::pin(async move {
            let request = match Request::builder()
                .method("GET")
                .uri(format!("http://{}{}", addr, path))
                .header("user-agent", "edge-gateway-health-check")
                .body(Body::empty())
            {
                Ok(req) => req,
                Err(e) => {
                    tracing::error!(error = %e, "Failed to build health check request");
                    return false;
                }
            };

            match time::timeout(timeout, self.client.request(request)).await {
                Ok(Ok(response)) => {
                    let success = response.status().is_success();
                    if !success {
                        tracing::debug!(backend = %addr, status = %response.status(), "Health check failed: non-success status");
                    }
                    success
                }
                Ok(Err(e)) => {
                    tracing::debug!(backend = %addr, error = %e, "Health check failed: connection error");
                    false
                }
                Err(_) => {
                    tracing::debug!(backend = %addr, "Health check failed: timeout");
                    false
                }
            }
        })
    }
}

pub struct HealthMonitor {
    registry: Arc<BackendRegistry>,
    passive: Arc<PassiveHealth>,
    breakers: Arc<CircuitBreakers>,
    prober: Arc<dyn Prober>,
    defaults: ArcSwap<HealthCheckConfig>,
    clock: SharedClock,
    last_probe_ms: DashMap<String, u64>,
    tick: Duration,
    jitter: Duration,
}

impl HealthMonitor {
    pub fn new(
        registry: Arc<BackendRegistry>,
        passive: Arc<PassiveHealth>,
        breakers: Arc<CircuitBreakers>,
        prober: Arc<dyn Prober>,
        defaults: HealthCheckConfig,
        clock: SharedClock,
    ) -> Self {
        Self {
            registry,
            passive,
            breakers,
            prober,
            defaults: ArcSwap::from_pointee(defaults),
            clock,
            last_probe_ms: DashMap::new(),
            tick: Duration::from_secs(1),
            jitter: Duration::ZERO,
        }
    }

    /// How often the monitor wakes up to see which clusters are due.
    pub fn with_tick(mut self, tick: Duration) -> Self {
        self.tick = tick;
        self
    }

    /// Random delay (up to this much) before each probe, to spread load.
    pub fn with_jitter(mut self, jitter: Duration) -> Self {
        self.jitter = jitter;
        self
    }

    pub fn update_defaults(&self, config: HealthCheckConfig) {
        self.defaults.store(Arc::new(config));
    }

    /// Global settings overridden by the cluster's own, if any.
    fn effective_config(&self, cluster: &Cluster) -> HealthCheckConfig {
        cluster
            .health_check()
            .unwrap_or_else(|| (**self.defaults.load()).clone())
    }

    pub async fn run(self: Arc<Self>, mut shutdown: broadcast::Receiver<()>) {
        tracing::info!(
            tick_ms = self.tick.as_millis() as u64,
            path = %self.defaults.load().path,
            "Health monitor starting"
        );

        let mut ticker = time::interval(self.tick);
        ticker.set_missed_tick_behavior(time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.tick_once().await;
                }
                _ = shutdown.recv() => {
                    tracing::info!("Health monitor received shutdown signal, exiting loop");
                    break;
                }
            }
        }
    }

    /// One maintenance pass: probe due clusters, readmit expired ejections,
    /// sweep drained backends.
    pub async fn tick_once(&self) {
        let now = self.clock.now_millis();
        for cluster in self.registry.clusters() {
            let config = self.effective_config(&cluster);
            if !config.enabled {
                self.passive.readmit_expired(&cluster);
                continue;
            }

            let interval_ms = config.interval_secs.saturating_mul(1000);
            let due = self
                .last_probe_ms
                .get(cluster.name())
                .map(|last| now.saturating_sub(*last) >= interval_ms)
                .unwrap_or(true);
            if due {
                self.last_probe_ms.insert(cluster.name().to_string(), now);
                self.check_cluster(&cluster, &config).await;
            }
        }

        for backend in self.registry.sweep_drained() {
            self.breakers.forget(&backend.cluster, backend.addr);
        }
    }

    /// Probe all non-draining backends of `cluster` concurrently and apply
    /// the results. Returns the number of liveness transitions.
    pub async fn check_cluster(&self, cluster: &Cluster, config: &HealthCheckConfig) -> usize {
        let thresholds = Thresholds::from(config);
        let timeout = Duration::from_millis(config.timeout_ms);
        let backends: Vec<Arc<Backend>> = cluster
            .backends()
            .into_iter()
            .filter(|b| !b.is_draining())
            .collect();

        let probes = backends.iter().map(|backend| {
            let prober = self.prober.clone();
            let path = config.path.as_str();
            let jitter = self.jitter;
            let addr = backend.addr;
            async move {
                if !jitter.is_zero() {
                    let delay = fastrand::u64(0..jitter.as_millis().max(1) as u64);
                    time::sleep(Duration::from_millis(delay)).await;
                }
                prober.probe(addr, path, timeout).await
            }
        });
        let results = join_all(probes).await;

        let mut transitions = 0;
        for (backend, healthy) in backends.iter().zip(results) {
            if self.apply_probe(cluster, backend, healthy, thresholds) {
                transitions += 1;
            }
        }
        if transitions > 0 {
            cluster.refresh();
        }
        transitions
    }

    fn apply_probe(&self, cluster: &Cluster, backend: &Backend, healthy: bool, thresholds: Thresholds) -> bool {
        let consecutive = backend.record_probe(healthy);
        let event = if healthy {
            HealthEvent::ProbeSucceeded { consecutive }
        } else {
            HealthEvent::ProbeFailed { consecutive }
        };
        let current = backend.health();
        let next = next_state(current, event, thresholds);
        if next == current || !backend.set_health(next) {
            return false;
        }

        if next == HealthState::Healthy {
            backend.clear_ejection();
            tracing::info!(cluster = %cluster.name(), backend = %backend.addr, consecutive, "Backend is healthy again");
        } else {
            tracing::warn!(cluster = %cluster.name(), backend = %backend.addr, consecutive, "Backend marked unhealthy");
        }
        metrics::record_backend_health(
            cluster.name(),
            &backend.addr.to_string(),
            next == HealthState::Healthy,
        );
        true
    }
}
