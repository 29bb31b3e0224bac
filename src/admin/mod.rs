//! Admin API.
//!
//! Read-only views of routes, clusters, backends and the cache, plus cache
//! purge. Served on its own listener and protected by a bearer token.

pub mod auth;
pub mod handlers;

use std::sync::Arc;

use axum::{
    middleware,
    routing::{get, post},
    Router,
};

use self::auth::admin_auth_middleware;
use self::handlers::*;
use crate::proxy::Gateway;

/// State shared by admin handlers.
#[derive(Clone)]
pub struct AdminState {
    pub gateway: Arc<Gateway>,
    pub api_key: Arc<str>,
}

impl AdminState {
    pub fn new(gateway: Arc<Gateway>, api_key: &str) -> Self {
        Self {
            gateway,
            api_key: Arc::from(api_key),
        }
    }
}

pub fn setup_admin_router(state: AdminState) -> Router {
    Router::new()
        .route("/admin/status", get(get_status))
        .route("/admin/clusters", get(get_clusters))
        .route("/admin/backends", get(get_backends))
        .route("/admin/cache", get(get_cache))
        .route("/admin/cache/purge", post(purge_cache))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            admin_auth_middleware,
        ))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;
    use crate::config::{BackendConfig, ClusterConfig, GatewayConfig, RouteConfig};
    use crate::error::UpstreamError;
    use crate::proxy::{ProxyRequest, ProxyResponse, Upstream};
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use futures_util::future::BoxFuture;
    use std::net::SocketAddr;
    use tower::ServiceExt;

    struct Unreachable;

    impl Upstream for Unreachable {
        fn send<'a>(
            &'a self,
            addr: SocketAddr,
            _request: ProxyRequest,
        ) -> BoxFuture<'a, Result<ProxyResponse, UpstreamError>> {
            Box::pin(async move {
                Err(UpstreamError::Connect {
                    addr: addr.to_string(),
                    reason: "refused".into(),
                })
            })
        }
    }

    fn app() -> Router {
        let config = GatewayConfig {
            clusters: vec![ClusterConfig {
                name: "web".into(),
                backends: vec![
                    BackendConfig::new("127.0.0.1:7101"),
                    BackendConfig::new("127.0.0.1:7102"),
                ],
                ..Default::default()
            }],
            routes: vec![RouteConfig {
                name: "all".into(),
                cluster: "web".into(),
                ..Default::default()
            }],
            ..Default::default()
        };
        let gateway = Gateway::new(config, Arc::new(Unreachable), SystemClock::shared()).unwrap();
        setup_admin_router(AdminState::new(Arc::new(gateway), "secret"))
    }

    fn get(uri: &str, token: Option<&str>) -> Request<Body> {
        let mut builder = Request::builder().uri(uri);
        if let Some(token) = token {
            builder = builder.header("authorization", format!("Bearer {}", token));
        }
        builder.body(Body::empty()).unwrap()
    }

    async fn json(response: axum::response::Response) -> serde_json::Value {
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&body).unwrap()
    }

    #[tokio::test]
    async fn rejects_missing_or_wrong_token() {
        let response = app().oneshot(get("/admin/status", None)).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let response = app()
            .oneshot(get("/admin/status", Some("nope")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn lists_backends_with_liveness() {
        let response = app()
            .oneshot(get("/admin/backends", Some("secret")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = json(response).await;
        let backends = body.as_array().unwrap();
        assert_eq!(backends.len(), 2);
        assert_eq!(backends[0]["cluster"], "web");
        assert_eq!(backends[0]["address"], "127.0.0.1:7101");
        assert_eq!(backends[0]["liveness"], "healthy");
        assert_eq!(backends[0]["origin"], "config");
        assert_eq!(backends[0]["circuit"], "closed");
    }

    #[tokio::test]
    async fn cluster_summary_counts_live_members() {
        let response = app()
            .oneshot(get("/admin/clusters", Some("secret")))
            .await
            .unwrap();
        let body = json(response).await;
        assert_eq!(body[0]["name"], "web");
        assert_eq!(body[0]["policy"], "round_robin");
        assert_eq!(body[0]["backends"], 2);
        assert_eq!(body[0]["live"], 2);
    }

    #[tokio::test]
    async fn purge_requires_key_or_prefix() {
        let request = Request::builder()
            .method("POST")
            .uri("/admin/cache/purge")
            .header("authorization", "Bearer secret")
            .header("content-type", "application/json")
            .body(Body::from("{}"))
            .unwrap();
        let response = app().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let request = Request::builder()
            .method("POST")
            .uri("/admin/cache/purge")
            .header("authorization", "Bearer secret")
            .header("content-type", "application/json")
            .body(Body::from(r#"{"prefix":"http://shop.test/"}"#))
            .unwrap();
        let response = app().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json(response).await["purged"], 0);
    }
}
