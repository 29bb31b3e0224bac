//! Sending a request to one backend.

use std::net::SocketAddr;

use axum::body::Body;
use axum::http::{Request, Uri};
use futures_util::future::BoxFuture;
use hyper_util::{
    client::legacy::{connect::HttpConnector, Client},
    rt::TokioExecutor,
};

use crate::error::UpstreamError;
use crate::http::request::strip_hop_by_hop;
use crate::proxy::{ProxyRequest, ProxyResponse};

/// Sends one request to one backend.
///
/// A 5xx answer is a successful send; classifying it is the caller's job.
/// Timeouts are applied by the caller too.
pub trait Upstream: Send + Sync {
    fn send<'a>(
        &'a self,
        addr: SocketAddr,
        request: ProxyRequest,
    ) -> BoxFuture<'a, Result<ProxyResponse, UpstreamError>>;
}

/// HTTP/1.1 upstream over pooled hyper connections.
pub struct HyperUpstream {
    client: Client<HttpConnector, Body>,
    max_response_bytes: usize,
}

impl HyperUpstream {
    pub fn new() -> Self {
        let mut connector = HttpConnector::new();
        connector.set_nodelay(true);
        let client = Client::builder(TokioExecutor::new()).build(connector);
        Self {
            client,
            max_response_bytes: usize::MAX,
        }
    }

    pub fn with_max_response_bytes(mut self, limit: usize) -> Self {
        self.max_response_bytes = limit;
        self
    }

    fn build_request(addr: SocketAddr, request: ProxyRequest) -> Result<Request<Body>, UpstreamError> {
        let uri: Uri = format!("http://{}{}", addr, request.path_and_query())
            .parse()
            .map_err(|e: axum::http::uri::InvalidUri| UpstreamError::Protocol(e.to_string()))?;
        let mut upstream = Request::new(Body::from(request.body));
        *upstream.method_mut() = request.method;
        *upstream.uri_mut() = uri;
        *upstream.headers_mut() = request.headers;
        Ok(upstream)
    }
}

impl Default for HyperUpstream {
    fn default() -> Self {
        Self::new()
    }
}

impl Upstream for HyperUpstream {
    fn send<'a>(
        &'a self,
        addr: SocketAddr,
        request: ProxyRequest,
    ) -> BoxFuture<'a, Result<ProxyResponse, UpstreamError>> {
        Box::pin(async move {
            let upstream = Self::build_request(addr, request)?;
            let response = self.client.request(upstream).await.map_err(|e| {
                if e.is_connect() {
                    UpstreamError::Connect {
                        addr: addr.to_string(),
                        reason: e.to_string(),
                    }
                } else {
                    UpstreamError::Protocol(e.to_string())
                }
            })?;

            let (parts, body) = response.into_parts();
            let body = axum::body::to_bytes(Body::new(body), self.max_response_bytes)
                .await
                .map_err(|e| UpstreamError::Protocol(e.to_string()))?;

            let mut headers = parts.headers;
            strip_hop_by_hop(&mut headers);
            Ok(ProxyResponse {
                status: parts.status,
                headers,
                body,
            })
        })
    }
}
