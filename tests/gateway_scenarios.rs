//! End-to-end scenarios through the gateway core with a scripted upstream
//! and a manual clock.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::http::StatusCode;
use edge_gateway::config::{
    BackendConfig, ClusterConfig, GatewayConfig, HealthCheckConfig, PassiveHealthConfig,
    RouteCacheConfig, RouteConfig,
};
use edge_gateway::error::{GatewayError, UpstreamError};
use edge_gateway::health::Prober;
use edge_gateway::proxy::{Gateway, ProxyRequest, ProxyResponse, Upstream};
use edge_gateway::ManualClock;
use futures_util::future::{join_all, BoxFuture};

const B1: &str = "10.0.0.1:80";
const B2: &str = "10.0.0.2:80";
const B3: &str = "10.0.0.3:80";

fn addr(s: &str) -> SocketAddr {
    s.parse().unwrap()
}

struct Reply {
    delay: Duration,
    result: Result<ProxyResponse, UpstreamError>,
}

impl Reply {
    fn ok(response: ProxyResponse) -> Self {
        Self {
            delay: Duration::ZERO,
            result: Ok(response),
        }
    }

    fn after(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

type Handler = dyn Fn(SocketAddr, &ProxyRequest) -> Reply + Send + Sync;

/// Upstream driven by a closure; records the backend of every call.
struct ScriptedUpstream {
    handler: Box<Handler>,
    calls: Mutex<Vec<SocketAddr>>,
}

impl ScriptedUpstream {
    fn new(handler: impl Fn(SocketAddr, &ProxyRequest) -> Reply + Send + Sync + 'static) -> Arc<Self> {
        Arc::new(Self {
            handler: Box::new(handler),
            calls: Mutex::new(Vec::new()),
        })
    }

    fn calls(&self) -> Vec<SocketAddr> {
        self.calls.lock().unwrap().clone()
    }
}

impl Upstream for ScriptedUpstream {
    fn send<'a>(
        &'a self,
        addr: SocketAddr,
        request: ProxyRequest,
    ) -> BoxFuture<'a, Result<ProxyResponse, UpstreamError>> {
        self.calls.lock().unwrap().push(addr);
        let reply = (self.handler)(addr, &request);
        Box::pin(async move {
            if !reply.delay.is_zero() {
                tokio::time::sleep(reply.delay).await;
            }
            reply.result
        })
    }
}

/// Answers with the backend address as body.
fn echo_backend(addr: SocketAddr, _req: &ProxyRequest) -> Reply {
    Reply::ok(ProxyResponse::new(StatusCode::OK).with_body(addr.to_string()))
}

fn base_config(backends: &[&str]) -> GatewayConfig {
    GatewayConfig {
        clusters: vec![ClusterConfig {
            name: "web".into(),
            backends: backends.iter().map(|a| BackendConfig::new(*a)).collect(),
            ..Default::default()
        }],
        routes: vec![RouteConfig {
            name: "shop".into(),
            host: Some("shop.test".into()),
            cluster: "web".into(),
            ..Default::default()
        }],
        ..Default::default()
    }
}

fn cached(mut config: GatewayConfig, policy: RouteCacheConfig) -> GatewayConfig {
    config.routes[0].cache = Some(policy);
    config
}

fn gateway(config: GatewayConfig, upstream: Arc<ScriptedUpstream>, clock: Arc<ManualClock>) -> Arc<Gateway> {
    Arc::new(Gateway::new(config, upstream, clock).unwrap())
}

fn get(path: &str) -> ProxyRequest {
    ProxyRequest::get(path).with_header("host", "shop.test")
}

fn cache_status(response: &ProxyResponse) -> &str {
    response.header_str("x-cache-status").unwrap_or("-")
}

#[tokio::test]
async fn round_robin_rotates_in_registration_order() {
    let upstream = ScriptedUpstream::new(echo_backend);
    let gw = gateway(base_config(&[B1, B2, B3]), upstream.clone(), Arc::new(ManualClock::new()));

    for _ in 0..6 {
        let response = gw.handle(get("/")).await.unwrap();
        assert_eq!(response.status, StatusCode::OK);
    }
    assert_eq!(
        upstream.calls(),
        vec![addr(B1), addr(B2), addr(B3), addr(B1), addr(B2), addr(B3)]
    );
}

/// Fails every address in its set.
#[derive(Default)]
struct ScriptedProber {
    failing: Mutex<Vec<SocketAddr>>,
}

impl Prober for ScriptedProber {
    fn probe<'a>(&'a self, addr: SocketAddr, _path: &'a str, _timeout: Duration) -> BoxFuture<'a, bool> {
        let healthy = !self.failing.lock().unwrap().contains(&addr);
        Box::pin(async move { healthy })
    }
}

#[tokio::test]
async fn failed_probes_remove_backend_until_it_recovers() {
    let clock = Arc::new(ManualClock::new());
    let upstream = ScriptedUpstream::new(echo_backend);
    let mut config = base_config(&[B1, B2, B3]);
    config.health_check = HealthCheckConfig {
        interval_secs: 10,
        unhealthy_threshold: 3,
        healthy_threshold: 2,
        ..Default::default()
    };
    let gw = gateway(config, upstream.clone(), clock.clone());
    let prober = Arc::new(ScriptedProber::default());
    let monitor = gw.health_monitor(prober.clone());

    prober.failing.lock().unwrap().push(addr(B2));
    for _ in 0..3 {
        monitor.tick_once().await;
        clock.advance(Duration::from_secs(10));
    }

    for _ in 0..4 {
        gw.handle(get("/")).await.unwrap();
    }
    assert!(!upstream.calls().contains(&addr(B2)));

    prober.failing.lock().unwrap().clear();
    for _ in 0..2 {
        monitor.tick_once().await;
        clock.advance(Duration::from_secs(10));
    }
    for _ in 0..3 {
        gw.handle(get("/")).await.unwrap();
    }
    assert!(upstream.calls().contains(&addr(B2)));
}

#[tokio::test]
async fn no_store_is_never_cached() {
    let upstream = ScriptedUpstream::new(|_, _| {
        Reply::ok(
            ProxyResponse::new(StatusCode::OK)
                .with_header("cache-control", "no-store")
                .with_body("private"),
        )
    });
    let gw = gateway(
        cached(base_config(&[B1]), RouteCacheConfig::default()),
        upstream.clone(),
        Arc::new(ManualClock::new()),
    );

    for _ in 0..2 {
        let response = gw.handle(get("/account")).await.unwrap();
        assert_eq!(cache_status(&response), "MISS");
    }
    assert_eq!(upstream.calls().len(), 2);
    assert!(gw.cache().is_empty());
}

#[tokio::test]
async fn timed_out_attempt_is_retried_on_next_backend() {
    let upstream = ScriptedUpstream::new(|addr, req| {
        let reply = echo_backend(addr, req);
        if addr == "10.0.0.1:80".parse().unwrap() {
            reply.after(Duration::from_millis(500))
        } else {
            reply
        }
    });
    let mut config = base_config(&[B1, B2]);
    config.timeouts.attempt_ms = 50;
    config.retries.base_delay_ms = 5;
    let gw = gateway(config, upstream.clone(), Arc::new(ManualClock::new()));

    let response = gw.handle(get("/")).await.unwrap();
    assert_eq!(response.body, B2);
    assert_eq!(upstream.calls(), vec![addr(B1), addr(B2)]);
}

#[tokio::test]
async fn non_idempotent_timeout_is_not_retried() {
    let upstream = ScriptedUpstream::new(|addr, req| echo_backend(addr, req).after(Duration::from_millis(500)));
    let mut config = base_config(&[B1, B2]);
    config.timeouts.attempt_ms = 50;
    let gw = gateway(config, upstream.clone(), Arc::new(ManualClock::new()));

    let request = ProxyRequest::new(axum::http::Method::POST, "/orders".parse().unwrap())
        .with_header("host", "shop.test");
    let err = gw.handle(request).await.unwrap_err();
    assert!(matches!(err, GatewayError::Upstream(UpstreamError::Timeout(_))));
    assert_eq!(err.status_code(), StatusCode::GATEWAY_TIMEOUT);
    assert_eq!(upstream.calls().len(), 1);
}

#[tokio::test]
async fn open_circuit_fails_fast_without_calling_backend() {
    let clock = Arc::new(ManualClock::new());
    let upstream = ScriptedUpstream::new(|_, _| Reply::ok(ProxyResponse::new(StatusCode::INTERNAL_SERVER_ERROR)));
    let mut config = base_config(&[B1]);
    config.retries.enabled = false;
    config.passive_health = PassiveHealthConfig {
        enabled: false,
        ..Default::default()
    };
    config.circuit_breaker.min_requests = 3;
    config.circuit_breaker.window_size = 5;
    config.circuit_breaker.open_duration_ms = 10_000;
    let gw = gateway(config, upstream.clone(), clock.clone());

    for _ in 0..3 {
        let response = gw.handle(get("/")).await.unwrap();
        assert_eq!(response.status, StatusCode::INTERNAL_SERVER_ERROR);
    }
    let err = gw.handle(get("/")).await.unwrap_err();
    assert!(matches!(err, GatewayError::CircuitOpen { .. }));
    assert_eq!(err.status_code(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(upstream.calls().len(), 3);

    // After the cool-down one trial call is admitted.
    clock.advance(Duration::from_millis(10_001));
    let response = gw.handle(get("/")).await.unwrap();
    assert_eq!(response.status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(upstream.calls().len(), 4);
}

#[tokio::test]
async fn fresh_then_revalidated_with_etag() {
    let clock = Arc::new(ManualClock::new());
    let upstream = ScriptedUpstream::new(|_, req| {
        if req.header_str("if-none-match") == Some("\"v1\"") {
            return Reply::ok(
                ProxyResponse::new(StatusCode::NOT_MODIFIED)
                    .with_header("cache-control", "max-age=60")
                    .with_header("etag", "\"v1\""),
            );
        }
        Reply::ok(
            ProxyResponse::new(StatusCode::OK)
                .with_header("cache-control", "max-age=60")
                .with_header("etag", "\"v1\"")
                .with_body("page v1"),
        )
    });
    let gw = gateway(
        cached(base_config(&[B1]), RouteCacheConfig::default()),
        upstream.clone(),
        clock.clone(),
    );

    let first = gw.handle(get("/page")).await.unwrap();
    assert_eq!(cache_status(&first), "MISS");

    clock.advance(Duration::from_secs(30));
    let second = gw.handle(get("/page")).await.unwrap();
    assert_eq!(cache_status(&second), "HIT");
    assert_eq!(second.header_str("age"), Some("30"));
    assert_eq!(upstream.calls().len(), 1);

    clock.advance(Duration::from_secs(31));
    let third = gw.handle(get("/page")).await.unwrap();
    assert_eq!(cache_status(&third), "REVALIDATED");
    assert_eq!(third.status, StatusCode::OK);
    assert_eq!(third.body, "page v1");
    assert_eq!(upstream.calls().len(), 2);

    let fourth = gw.handle(get("/page")).await.unwrap();
    assert_eq!(cache_status(&fourth), "HIT");
    assert_eq!(upstream.calls().len(), 2);

    let stats = gw.cache().stats();
    assert_eq!((stats.hits, stats.misses, stats.revalidated), (2, 1, 1));
}

#[tokio::test]
async fn stale_while_revalidate_serves_stale_and_refreshes_once() {
    let clock = Arc::new(ManualClock::new());
    let version = Arc::new(AtomicUsize::new(1));
    let v = version.clone();
    let upstream = ScriptedUpstream::new(move |_, _| {
        Reply::ok(
            ProxyResponse::new(StatusCode::OK)
                .with_header("cache-control", "max-age=10, stale-while-revalidate=30")
                .with_body(format!("v{}", v.load(Ordering::SeqCst))),
        )
        .after(Duration::from_millis(20))
    });
    let gw = gateway(
        cached(base_config(&[B1]), RouteCacheConfig::default()),
        upstream.clone(),
        clock.clone(),
    );

    gw.handle(get("/feed")).await.unwrap();
    version.store(2, Ordering::SeqCst);
    clock.advance(Duration::from_secs(15));

    let stale = join_all((0..3).map(|_| gw.handle(get("/feed")))).await;
    for response in &stale {
        let response = response.as_ref().unwrap();
        assert_eq!(cache_status(response), "STALE");
        assert_eq!(response.body, "v1");
    }

    // One background refresh for the key.
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(upstream.calls().len(), 2);

    let refreshed = gw.handle(get("/feed")).await.unwrap();
    assert_eq!(cache_status(&refreshed), "HIT");
    assert_eq!(refreshed.body, "v2");
}

#[tokio::test]
async fn concurrent_misses_share_one_upstream_fetch() {
    let upstream = ScriptedUpstream::new(|_, _| {
        Reply::ok(
            ProxyResponse::new(StatusCode::OK)
                .with_header("cache-control", "max-age=60")
                .with_body("expensive"),
        )
        .after(Duration::from_millis(100))
    });
    let gw = gateway(
        cached(base_config(&[B1]), RouteCacheConfig::default()),
        upstream.clone(),
        Arc::new(ManualClock::new()),
    );

    let tasks: Vec<_> = (0..10)
        .map(|_| {
            let gw = gw.clone();
            tokio::spawn(async move { gw.handle(get("/report")).await })
        })
        .collect();
    let mut statuses = Vec::new();
    for task in tasks {
        let response = task.await.unwrap().unwrap();
        assert_eq!(response.body, "expensive");
        statuses.push(cache_status(&response).to_string());
    }

    assert_eq!(upstream.calls().len(), 1);
    assert_eq!(statuses.iter().filter(|s| *s == "MISS").count(), 1);
    assert_eq!(statuses.iter().filter(|s| *s == "HIT").count(), 9);
}

#[tokio::test]
async fn purge_forces_next_request_upstream() {
    let upstream = ScriptedUpstream::new(|_, _| {
        Reply::ok(
            ProxyResponse::new(StatusCode::OK)
                .with_header("cache-control", "max-age=600")
                .with_body("doc"),
        )
    });
    let gw = gateway(
        cached(base_config(&[B1]), RouteCacheConfig::default()),
        upstream.clone(),
        Arc::new(ManualClock::new()),
    );

    gw.handle(get("/docs/a")).await.unwrap();
    gw.handle(get("/docs/b")).await.unwrap();
    assert_eq!(gw.cache().len(), 2);

    assert_eq!(gw.cache().purge_prefix("http://shop.test/docs/"), 2);
    let response = gw.handle(get("/docs/a")).await.unwrap();
    assert_eq!(cache_status(&response), "MISS");
    assert_eq!(upstream.calls().len(), 3);
}

#[tokio::test]
async fn reload_swaps_routes_and_rejects_invalid_snapshot() {
    let upstream = ScriptedUpstream::new(echo_backend);
    let gw = gateway(base_config(&[B1]), upstream.clone(), Arc::new(ManualClock::new()));

    let mut next = base_config(&[B2]);
    next.routes[0].path_prefix = Some("/v2".into());
    gw.reload(next.clone()).unwrap();

    let err = gw.handle(get("/")).await.unwrap_err();
    assert!(matches!(err, GatewayError::NoRoute { .. }));
    let response = gw.handle(get("/v2/items")).await.unwrap();
    assert_eq!(response.body, B2);

    let mut broken = next;
    broken.routes[0].path_regex = Some("(".into());
    broken.routes[0].path_prefix = None;
    assert!(gw.reload(broken).is_err());
    let response = gw.handle(get("/v2/items")).await.unwrap();
    assert_eq!(response.body, B2);
}
