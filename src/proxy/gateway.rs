//! Request pipeline.
//!
//! # Responsibilities
//! - Route the request and apply the route's middleware chain
//! - Answer from the cache where the route allows it
//! - Select a backend, take a breaker permit and call it under the attempt
//!   timeout
//! - Retry retryable failures on a backend not yet tried, within the overall
//!   deadline and the retry budget
//! - Apply configuration snapshots all-or-nothing

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use arc_swap::ArcSwap;
use axum::http::HeaderValue;
use thiserror::Error;

use crate::cache::{
    is_cacheable_request, CacheEngine, CacheEntry, CacheKey, CacheStatus, Fill, FillGuard, Lookup,
    X_CACHE_STATUS,
};
use crate::clock::SharedClock;
use crate::config::validation::{validate_config, ValidationError};
use crate::config::{GatewayConfig, HashKeyConfig, PolicyConfig, RouteCacheConfig};
use crate::error::{GatewayError, UpstreamError};
use crate::health::{HealthMonitor, PassiveHealth, Prober};
use crate::load_balancer::consistent_hash::hash_key;
use crate::load_balancer::{Backend, BackendRegistry, Cluster, RegistryError, SelectError};
use crate::observability::metrics;
use crate::proxy::{ProxyRequest, ProxyResponse, Upstream};
use crate::resilience::timeouts::with_timeout;
use crate::resilience::{CircuitBreakers, Deadline, Outcome, RetryBudget, RetryPolicy, Timeouts};
use crate::routing::{Route, RouteError, RouteTable, Router};

/// A configuration snapshot was rejected; the previous one stays active.
#[derive(Debug, Error)]
pub enum ReloadError {
    #[error("invalid configuration ({} errors)", .0.len())]
    Invalid(Vec<ValidationError>),

    #[error(transparent)]
    Route(#[from] RouteError),

    #[error(transparent)]
    Registry(#[from] RegistryError),
}

fn error_kind(err: &UpstreamError) -> &'static str {
    match err {
        UpstreamError::Connect { .. } => "connect",
        UpstreamError::Timeout(_) => "timeout",
        UpstreamError::Status(_) => "status",
        UpstreamError::Protocol(_) => "protocol",
    }
}

fn tag(mut response: ProxyResponse, status: CacheStatus) -> ProxyResponse {
    response
        .headers
        .insert(X_CACHE_STATUS, HeaderValue::from_static(status.as_str()));
    response
}

/// Key hashed by the consistent-hash policy: the configured header or
/// cookie, falling back to the client IP.
fn hash_for(cluster: &Cluster, request: &ProxyRequest) -> Option<u64> {
    if cluster.policy() != PolicyConfig::ConsistentHash {
        return None;
    }
    let configured = match cluster.hash_key() {
        HashKeyConfig::Header { name } => request.header_str(&name).map(str::to_string),
        HashKeyConfig::Cookie { name } => request.cookie(&name).map(str::to_string),
        HashKeyConfig::ClientIp => None,
    };
    configured
        .or_else(|| request.client_addr.map(|a| a.ip().to_string()))
        .map(|key| hash_key(key.as_bytes()))
}

pub struct Gateway {
    config: ArcSwap<GatewayConfig>,
    routes: RouteTable,
    registry: Arc<BackendRegistry>,
    passive: Arc<PassiveHealth>,
    breakers: Arc<CircuitBreakers>,
    cache: CacheEngine,
    upstream: Arc<dyn Upstream>,
    retry: ArcSwap<RetryPolicy>,
    budget: ArcSwap<RetryBudget>,
    timeouts: ArcSwap<Timeouts>,
    clock: SharedClock,
    requests: AtomicU64,
}

impl Gateway {
    pub fn new(
        config: GatewayConfig,
        upstream: Arc<dyn Upstream>,
        clock: SharedClock,
    ) -> Result<Self, ReloadError> {
        validate_config(&config).map_err(ReloadError::Invalid)?;
        let router = Router::compile(&config.routes, config.routing.tie_break)?;
        let timeouts = Timeouts::from(&config.timeouts);

        let registry = Arc::new(BackendRegistry::new(
            clock.clone(),
            timeouts.drain,
            config.passive_health.window_size,
        ));
        for cluster in &config.clusters {
            registry.upsert_cluster(cluster)?;
        }

        let passive = Arc::new(PassiveHealth::new(
            config.passive_health.clone(),
            registry.clone(),
            clock.clone(),
        ));
        let breakers = Arc::new(
            CircuitBreakers::new(config.circuit_breaker.clone(), clock.clone())
                .with_sink(passive.clone()),
        );

        tracing::info!(
            routes = router.len(),
            clusters = config.clusters.len(),
            "Gateway initialized"
        );

        Ok(Self {
            routes: RouteTable::new(router),
            registry,
            passive,
            breakers,
            cache: CacheEngine::new(config.cache.clone(), clock.clone()),
            upstream,
            retry: ArcSwap::from_pointee(RetryPolicy::new(config.retries.clone())),
            budget: ArcSwap::from_pointee(RetryBudget::new(&config.retries, clock.clone())),
            timeouts: ArcSwap::from_pointee(timeouts),
            clock,
            config: ArcSwap::from_pointee(config),
            requests: AtomicU64::new(0),
        })
    }

    /// Apply a new configuration snapshot.
    ///
    /// Validation and route compilation happen before anything is touched,
    /// so a rejected snapshot leaves the running configuration intact.
    pub fn reload(&self, config: GatewayConfig) -> Result<(), ReloadError> {
        if let Err(errors) = validate_config(&config) {
            for error in &errors {
                tracing::error!(error = %error, "Configuration rejected");
            }
            return Err(ReloadError::Invalid(errors));
        }
        let router = Router::compile(&config.routes, config.routing.tie_break)?;
        let timeouts = Timeouts::from(&config.timeouts);

        self.registry.set_drain_timeout(timeouts.drain);
        self.registry
            .set_passive_window(config.passive_health.window_size);
        for cluster in &config.clusters {
            self.registry.upsert_cluster(cluster)?;
        }
        self.routes.replace(router);
        for existing in self.registry.clusters() {
            if !config.clusters.iter().any(|c| c.name == existing.name()) {
                self.registry.remove_cluster(existing.name());
                tracing::info!(cluster = %existing.name(), "Cluster removed");
            }
        }

        self.passive.update_config(config.passive_health.clone());
        self.breakers.update_settings(config.circuit_breaker.clone());
        self.retry
            .store(Arc::new(RetryPolicy::new(config.retries.clone())));
        self.budget
            .store(Arc::new(RetryBudget::new(&config.retries, self.clock.clone())));
        self.timeouts.store(Arc::new(timeouts));
        self.cache.update_config(config.cache.clone());

        tracing::info!(
            routes = config.routes.len(),
            clusters = config.clusters.len(),
            "Configuration reloaded"
        );
        self.config.store(Arc::new(config));
        Ok(())
    }

    /// Health monitor wired to this gateway's registry and breakers.
    pub fn health_monitor(&self, prober: Arc<dyn Prober>) -> HealthMonitor {
        HealthMonitor::new(
            self.registry.clone(),
            self.passive.clone(),
            self.breakers.clone(),
            prober,
            self.config.load().health_check.clone(),
            self.clock.clone(),
        )
    }

    pub fn config(&self) -> Arc<GatewayConfig> {
        self.config.load_full()
    }

    pub fn router(&self) -> Arc<Router> {
        self.routes.load()
    }

    pub fn registry(&self) -> &Arc<BackendRegistry> {
        &self.registry
    }

    pub fn breakers(&self) -> &Arc<CircuitBreakers> {
        &self.breakers
    }

    pub fn cache(&self) -> &CacheEngine {
        &self.cache
    }

    pub fn requests_total(&self) -> u64 {
        self.requests.load(Ordering::Relaxed)
    }

    /// Serve one request end to end.
    pub async fn handle(self: &Arc<Self>, request: ProxyRequest) -> Result<ProxyResponse, GatewayError> {
        let started = Instant::now();
        self.requests.fetch_add(1, Ordering::Relaxed);

        let route = match self.routes.route(&request) {
            Ok(route) => route,
            Err(err) => {
                tracing::debug!(path = %request.path(), "No route matched");
                metrics::record_request("none", "none", err.status_code().as_u16(), started.elapsed());
                return Err(err);
            }
        };

        let result = self.serve(&route, request).await;
        let status = match &result {
            Ok(response) => response.status.as_u16(),
            Err(err) => err.status_code().as_u16(),
        };
        metrics::record_request(&route.name, &route.cluster, status, started.elapsed());

        result.map(|mut response| {
            route.middlewares.apply_response(&mut response);
            response
        })
    }

    async fn serve(
        self: &Arc<Self>,
        route: &Arc<Route>,
        request: ProxyRequest,
    ) -> Result<ProxyResponse, GatewayError> {
        let deadline = Deadline::new(self.clock.clone(), self.timeouts.load().request);

        let Some(policy) = route.cache.as_ref().filter(|_| self.cache.is_enabled()) else {
            return self.forward(route, request, &deadline).await;
        };
        if !is_cacheable_request(&request) {
            self.cache.record(CacheStatus::Bypass);
            let response = self.forward(route, request, &deadline).await?;
            return Ok(tag(response, CacheStatus::Bypass));
        }

        let key = CacheKey::from_request(&request, &policy.key_headers);
        let mut waited = false;
        loop {
            let stale = match self.cache.lookup(&key) {
                Lookup::Fresh(entry) => return Ok(self.serve_cached(&entry, CacheStatus::Hit)),
                Lookup::Stale {
                    entry,
                    serve_while_revalidating: true,
                } => {
                    if let Some(guard) = self.cache.try_begin_refresh(&key) {
                        self.spawn_refresh(guard, entry.clone(), route.clone(), request.clone());
                    }
                    return Ok(self.serve_cached(&entry, CacheStatus::Stale));
                }
                Lookup::Stale { entry, .. } => Some(entry),
                Lookup::Miss => None,
            };

            // After one wait, fetch without the marker: the leader's response
            // was not storable or the wait timed out.
            if waited {
                return self.fill(route, &key, policy, request, stale, &deadline).await;
            }

            match self.cache.begin_fill(&key) {
                Fill::Leader(_guard) => {
                    return self.fill(route, &key, policy, request, stale, &deadline).await;
                }
                Fill::Follower(waiter) => {
                    let limit = self.cache.lock_timeout().min(deadline.remaining());
                    if !waiter.wait(limit).await {
                        tracing::debug!(key = %key, "Timed out waiting for cache fill");
                    }
                    waited = true;
                }
            }
        }
    }

    fn serve_cached(&self, entry: &CacheEntry, status: CacheStatus) -> ProxyResponse {
        self.cache.record(status);
        tag(entry.to_response(self.cache.now_ms()), status)
    }

    /// Fetch from upstream and update the cache. With a `stale` entry the
    /// request is made conditional and a 304 renews the entry.
    async fn fill(
        &self,
        route: &Route,
        key: &CacheKey,
        policy: &RouteCacheConfig,
        request: ProxyRequest,
        stale: Option<Arc<CacheEntry>>,
        deadline: &Deadline,
    ) -> Result<ProxyResponse, GatewayError> {
        match stale {
            Some(entry) => {
                let conditional = CacheEngine::conditional_request(&entry, &request);
                let response = self.forward(route, conditional, deadline).await.map_err(|err| {
                    tracing::warn!(key = %key, error = %err, "Revalidation failed; keeping stale entry");
                    err
                })?;
                let (response, status) = self.apply_revalidation(key, &entry, &request, response, policy);
                self.cache.record(status);
                Ok(tag(response, status))
            }
            None => {
                let response = self.forward(route, request.clone(), deadline).await?;
                self.cache.store(key, &request, &response, policy);
                self.cache.record(CacheStatus::Miss);
                Ok(tag(response, CacheStatus::Miss))
            }
        }
    }

    fn apply_revalidation(
        &self,
        key: &CacheKey,
        entry: &CacheEntry,
        request: &ProxyRequest,
        response: ProxyResponse,
        policy: &RouteCacheConfig,
    ) -> (ProxyResponse, CacheStatus) {
        if crate::cache::directives::is_not_modified(&response) {
            let renewed = self.cache.renew(entry, &response, policy);
            return (renewed.to_response(self.cache.now_ms()), CacheStatus::Revalidated);
        }
        if response.status.is_server_error() {
            tracing::warn!(key = %key, status = %response.status, "Revalidation failed; keeping stale entry");
            return (response, CacheStatus::Miss);
        }
        if !self.cache.store(key, request, &response, policy).is_stored() {
            self.cache.remove(key);
        }
        (response, CacheStatus::Miss)
    }

    /// Refresh a stale entry in a detached task; the client that triggered it
    /// has already been answered and cannot cancel it.
    fn spawn_refresh(
        self: &Arc<Self>,
        guard: FillGuard,
        entry: Arc<CacheEntry>,
        route: Arc<Route>,
        request: ProxyRequest,
    ) {
        let gateway = self.clone();
        tokio::spawn(async move {
            let Some(policy) = route.cache.as_ref() else {
                return;
            };
            let deadline = Deadline::new(gateway.clock.clone(), gateway.timeouts.load().request);
            let conditional = CacheEngine::conditional_request(&entry, &request);
            match gateway.forward(&route, conditional, &deadline).await {
                Ok(response) => {
                    let (_, status) =
                        gateway.apply_revalidation(&entry.key, &entry, &request, response, policy);
                    tracing::debug!(key = %entry.key, result = status.as_str(), "Background refresh complete");
                }
                Err(err) => {
                    tracing::warn!(key = %entry.key, error = %err, "Background refresh failed; keeping stale entry");
                }
            }
            drop(guard);
        });
    }

    async fn forward(
        &self,
        route: &Route,
        mut request: ProxyRequest,
        deadline: &Deadline,
    ) -> Result<ProxyResponse, GatewayError> {
        route.middlewares.apply_request(&mut request);
        self.dispatch(route, &request, deadline).await
    }

    /// Attempt loop against the route's cluster.
    async fn dispatch(
        &self,
        route: &Route,
        request: &ProxyRequest,
        deadline: &Deadline,
    ) -> Result<ProxyResponse, GatewayError> {
        let cluster = self
            .registry
            .cluster(&route.cluster)
            .ok_or_else(|| GatewayError::NoBackendAvailable {
                cluster: route.cluster.clone(),
            })?;
        let policy = self.retry.load_full();
        let budget = self.budget.load_full();
        let per_attempt = self.timeouts.load().attempt;
        let hash = hash_for(&cluster, request);
        budget.record_request();

        let mut tried: Vec<SocketAddr> = Vec::new();
        let mut attempts = 0u32;
        let mut last: Option<UpstreamError> = None;

        loop {
            let Some(limit) = deadline.attempt_timeout(per_attempt) else {
                return Err(GatewayError::DeadlineExceeded(deadline.total()));
            };

            let breakers = &self.breakers;
            let admit = |b: &Backend| breakers.admits(cluster.name(), b.addr);
            let guard = match cluster.select(hash, &tried, &admit) {
                Ok(guard) => guard,
                Err(reason) => {
                    return Err(match last {
                        Some(last) => GatewayError::RetriesExhausted { attempts, last },
                        None if reason == SelectError::CircuitOpen => GatewayError::CircuitOpen {
                            cluster: route.cluster.clone(),
                        },
                        None => GatewayError::NoBackendAvailable {
                            cluster: route.cluster.clone(),
                        },
                    });
                }
            };
            let addr = guard.backend().addr;
            tried.push(addr);

            // Lost a half-open trial slot between selection and here.
            let Ok(permit) = self.breakers.try_acquire(cluster.name(), addr) else {
                continue;
            };
            attempts += 1;

            let result = with_timeout(limit, self.upstream.send(addr, request.clone())).await;
            let (err, response) = match result {
                Ok(response) if !response.status.is_server_error() => {
                    self.breakers.record(permit, Outcome::Success);
                    return Ok(response);
                }
                Ok(response) => {
                    self.breakers.record(permit, Outcome::Failure);
                    (UpstreamError::Status(response.status.as_u16()), Some(response))
                }
                Err(err) => {
                    self.breakers.record(permit, Outcome::Failure);
                    (err, None)
                }
            };
            drop(guard);

            metrics::record_upstream_error(cluster.name(), error_kind(&err));
            tracing::warn!(
                cluster = %cluster.name(),
                backend = %addr,
                attempt = attempts,
                error = %err,
                "Upstream attempt failed"
            );

            let delay = policy.backoff(attempts);
            let retry = attempts < policy.max_attempts()
                && policy.is_retryable(&request.method, &err)
                && delay < deadline.remaining()
                && budget.try_withdraw();
            if !retry {
                return match response {
                    Some(response) => Ok(response),
                    None if attempts > 1 => Err(GatewayError::RetriesExhausted { attempts, last: err }),
                    None => Err(GatewayError::Upstream(err)),
                };
            }

            metrics::record_retry(cluster.name());
            tracing::info!(
                cluster = %cluster.name(),
                attempt = attempts,
                delay_ms = delay.as_millis() as u64,
                "Retrying on another backend"
            );
            tokio::time::sleep(delay).await;
            last = Some(err);
        }
    }
}
