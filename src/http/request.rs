//! Request handling and transformation.
//!
//! # Responsibilities
//! - Buffer the client body under the configured limit
//! - Strip hop-by-hop headers before forwarding
//! - Append `X-Forwarded-For/Proto/Host`
//! - Extract the request ID assigned by the request-id layer

use std::net::SocketAddr;

use axum::body::Body;
use axum::http::{header, HeaderMap, HeaderName, HeaderValue, Request};

use crate::error::GatewayError;
use crate::proxy::ProxyRequest;

pub const X_REQUEST_ID: &str = "x-request-id";
pub const X_FORWARDED_FOR: &str = "x-forwarded-for";
pub const X_FORWARDED_PROTO: &str = "x-forwarded-proto";
pub const X_FORWARDED_HOST: &str = "x-forwarded-host";

const HOP_BY_HOP: [HeaderName; 8] = [
    header::CONNECTION,
    HeaderName::from_static("keep-alive"),
    header::PROXY_AUTHENTICATE,
    header::PROXY_AUTHORIZATION,
    header::TE,
    header::TRAILER,
    header::TRANSFER_ENCODING,
    header::UPGRADE,
];

/// Remove hop-by-hop headers, including any named by `Connection`.
pub fn strip_hop_by_hop(headers: &mut HeaderMap) {
    let named: Vec<HeaderName> = headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .filter_map(|name| HeaderName::from_bytes(name.trim().as_bytes()).ok())
        .collect();
    for name in named.iter().chain(HOP_BY_HOP.iter()) {
        headers.remove(name);
    }
}

/// Add the forwarding headers describing the client hop.
pub fn append_forwarded(request: &mut ProxyRequest) {
    if let Some(addr) = request.client_addr {
        let ip = addr.ip().to_string();
        let value = match request.header_str(X_FORWARDED_FOR) {
            Some(existing) => format!("{}, {}", existing, ip),
            None => ip,
        };
        if let Ok(value) = HeaderValue::from_str(&value) {
            request.headers.insert(X_FORWARDED_FOR, value);
        }
    }
    request.headers.insert(
        X_FORWARDED_PROTO,
        HeaderValue::from_static(request.scheme),
    );
    if !request.headers.contains_key(X_FORWARDED_HOST) {
        if let Some(host) = request.headers.get(header::HOST).cloned() {
            request.headers.insert(X_FORWARDED_HOST, host);
        }
    }
}

pub fn request_id(headers: &HeaderMap) -> &str {
    headers
        .get(X_REQUEST_ID)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("unknown")
}

/// Buffer an inbound request into the core's representation.
pub async fn from_axum(
    request: Request<Body>,
    client_addr: SocketAddr,
    limit: usize,
) -> Result<ProxyRequest, GatewayError> {
    let declared = request
        .headers()
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<usize>().ok());
    if declared.is_some_and(|len| len > limit) {
        return Err(GatewayError::RequestTooLarge { limit });
    }

    let (parts, body) = request.into_parts();
    let body = axum::body::to_bytes(body, limit)
        .await
        .map_err(|_| GatewayError::RequestTooLarge { limit })?;

    let mut proxied = ProxyRequest::new(parts.method, parts.uri)
        .with_body(body)
        .with_client_addr(client_addr);
    proxied.headers = parts.headers;
    strip_hop_by_hop(&mut proxied.headers);
    append_forwarded(&mut proxied);
    Ok(proxied)
}
