//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Create the axum router dispatching every path to the gateway
//! - Wire up middleware (request ID, tracing, timeout, concurrency limit)
//! - Run the health monitor, discovery listener and config reload loop
//! - Serve the admin API on its own listener
//! - Shut everything down gracefully

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::{HeaderName, Request},
    response::Response,
    routing::any,
    Router,
};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tower::limit::GlobalConcurrencyLimitLayer;
use tower::ServiceBuilder;
use tower_http::{
    request_id::{MakeRequestId, PropagateRequestIdLayer, RequestId, SetRequestIdLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};
use uuid::Uuid;

use crate::admin::{setup_admin_router, AdminState};
use crate::config::{load_config, GatewayConfig};
use crate::config::watcher::ConfigWatcher;
use crate::discovery::{DiscoveryEvent, DiscoveryListener};
use crate::health::{HealthMonitor, HttpProber, Prober};
use crate::http::request::{from_axum, request_id, X_REQUEST_ID};
use crate::http::response::finish;
use crate::lifecycle::{shutdown_signal, HangupSignal, Shutdown};
use crate::proxy::Gateway;

/// Margin on top of the gateway's own request deadline before the outer
/// timeout layer cuts the connection.
const OUTER_TIMEOUT_SLACK: Duration = Duration::from_secs(1);

/// UUID v4 request IDs.
#[derive(Clone, Copy, Default)]
pub struct UuidRequestId;

impl MakeRequestId for UuidRequestId {
    fn make_request_id<B>(&mut self, _request: &Request<B>) -> Option<RequestId> {
        Uuid::new_v4().to_string().parse().ok().map(RequestId::new)
    }
}

/// HTTP front end for a [`Gateway`].
pub struct HttpServer {
    gateway: Arc<Gateway>,
    prober: Arc<dyn Prober>,
    config_path: Option<PathBuf>,
    shutdown: Shutdown,
    discovery: Option<DiscoveryListener>,
}

impl HttpServer {
    pub fn new(gateway: Arc<Gateway>) -> Self {
        Self {
            gateway,
            prober: Arc::new(HttpProber::new()),
            config_path: None,
            shutdown: Shutdown::new(),
            discovery: None,
        }
    }

    /// Watch `path` and reload on change or SIGHUP.
    pub fn with_config_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config_path = Some(path.into());
        self
    }

    pub fn with_prober(mut self, prober: Arc<dyn Prober>) -> Self {
        self.prober = prober;
        self
    }

    /// Accept discovery events on the returned sender while running.
    pub fn discovery_channel(&mut self, capacity: usize) -> mpsc::Sender<DiscoveryEvent> {
        let (listener, tx) = DiscoveryListener::new(self.gateway.registry().clone(), capacity);
        self.discovery = Some(listener);
        tx
    }

    /// Handle to trigger shutdown from outside (tests, embedding).
    pub fn shutdown_handle(&self) -> Shutdown {
        self.shutdown.clone()
    }

    pub fn gateway(&self) -> &Arc<Gateway> {
        &self.gateway
    }

    /// Build the proxy router with all middleware layers.
    #[allow(deprecated)]
    pub fn router(&self) -> Router {
        let config = self.gateway.config();
        let x_request_id = HeaderName::from_static(X_REQUEST_ID);
        let outer_timeout = Duration::from_millis(config.timeouts.request_ms) + OUTER_TIMEOUT_SLACK;

        Router::new()
            .route("/", any(proxy_handler))
            .route("/{*path}", any(proxy_handler))
            .with_state(self.gateway.clone())
            .layer(
                ServiceBuilder::new()
                    .layer(SetRequestIdLayer::new(x_request_id.clone(), UuidRequestId))
                    .layer(TraceLayer::new_for_http())
                    .layer(PropagateRequestIdLayer::new(x_request_id))
                    .layer(GlobalConcurrencyLimitLayer::new(config.listener.max_connections))
                    .layer(TimeoutLayer::new(outer_timeout)),
            )
    }

    /// Run the server, accepting connections on the given listener, until
    /// SIGTERM/Ctrl+C or the shutdown handle fires.
    pub async fn run(mut self, listener: TcpListener) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        let config = self.gateway.config();
        tracing::info!(
            address = %addr,
            routes = config.routes.len(),
            clusters = config.clusters.len(),
            "HTTP server starting"
        );

        let monitor = Arc::new(self.gateway.health_monitor(self.prober.clone()));
        tokio::spawn(monitor.clone().run(self.shutdown.subscribe()));

        if let Some(discovery) = self.discovery.take() {
            tokio::spawn(discovery.run(self.shutdown.subscribe()));
        }

        // Kept alive for the lifetime of the server.
        let _watcher = match &self.config_path {
            Some(path) => self.spawn_reloader(path.clone(), monitor.clone()),
            None => None,
        };

        if config.admin.enabled {
            self.spawn_admin(&config).await?;
        }

        let app = self
            .router()
            .into_make_service_with_connect_info::<SocketAddr>();
        let shutdown = self.shutdown.clone();
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                tokio::select! {
                    _ = shutdown_signal() => {}
                    _ = shutdown.wait() => {}
                }
            })
            .await?;

        self.shutdown.trigger();
        let drain = Duration::from_secs(config.timeouts.drain_secs);
        self.shutdown.drain(drain).await;
        tracing::info!("HTTP server stopped");
        Ok(())
    }

    async fn spawn_admin(&self, config: &GatewayConfig) -> Result<(), std::io::Error> {
        let listener = TcpListener::bind(&config.admin.bind_address).await?;
        tracing::info!(address = %listener.local_addr()?, "Admin API listening");

        let app = setup_admin_router(AdminState::new(self.gateway.clone(), &config.admin.api_key));
        let mut stop = self.shutdown.subscribe();
        tokio::spawn(async move {
            let served = axum::serve(listener, app)
                .with_graceful_shutdown(async move {
                    let _ = stop.recv().await;
                })
                .await;
            if let Err(e) = served {
                tracing::error!(error = %e, "Admin API stopped");
            }
        });
        Ok(())
    }

    /// Apply configuration changes from the file watcher and SIGHUP.
    fn spawn_reloader(
        &self,
        path: PathBuf,
        monitor: Arc<HealthMonitor>,
    ) -> Option<notify::RecommendedWatcher> {
        let (watcher, mut updates) = ConfigWatcher::new(&path);
        let watcher = match watcher.run() {
            Ok(watcher) => Some(watcher),
            Err(e) => {
                tracing::error!(error = %e, path = ?path, "Config watcher unavailable; reload on SIGHUP only");
                None
            }
        };

        let gateway = self.gateway.clone();
        let mut stop = self.shutdown.subscribe();
        tokio::spawn(async move {
            let mut hangup = HangupSignal::new();
            loop {
                let next = tokio::select! {
                    update = updates.recv() => match update {
                        Some(config) => config,
                        None => break,
                    },
                    _ = hangup.recv() => {
                        tracing::info!(path = ?path, "SIGHUP received, reloading configuration");
                        match load_config(&path) {
                            Ok(config) => config,
                            Err(e) => {
                                tracing::error!(error = %e, "Failed to reload config, keeping current configuration");
                                continue;
                            }
                        }
                    }
                    _ = stop.recv() => break,
                };
                apply_reload(&gateway, &monitor, next);
            }
        });
        watcher
    }
}

fn apply_reload(gateway: &Gateway, monitor: &HealthMonitor, config: GatewayConfig) {
    let defaults = config.health_check.clone();
    match gateway.reload(config) {
        Ok(()) => monitor.update_defaults(defaults),
        Err(e) => tracing::error!(error = %e, "Reload rejected, keeping current configuration"),
    }
}

/// Every request lands here.
async fn proxy_handler(
    State(gateway): State<Arc<Gateway>>,
    ConnectInfo(client): ConnectInfo<SocketAddr>,
    request: Request<Body>,
) -> Response {
    let id = request.headers().get(X_REQUEST_ID).cloned();
    tracing::debug!(
        request_id = %request_id(request.headers()),
        method = %request.method(),
        path = %request.uri().path(),
        "Proxying request"
    );

    let limit = gateway.config().listener.max_body_bytes;
    let result = match from_axum(request, client, limit).await {
        Ok(request) => gateway.handle(request).await,
        Err(e) => Err(e),
    };
    if let Err(e) = &result {
        tracing::info!(code = e.code().as_str(), error = %e, "Request failed");
    }
    finish(result, id)
}
