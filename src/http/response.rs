//! Response handling and transformation.
//!
//! # Responsibilities
//! - Convert core responses into axum responses
//! - Map gateway errors to status, JSON body and `x-gateway-error`
//! - Echo the request ID back to the client

use axum::body::Body;
use axum::http::{header, HeaderValue, Response};
use axum::response::IntoResponse;
use axum::Json;

use crate::error::{ErrorBody, GatewayError};
use crate::proxy::ProxyResponse;

pub const X_GATEWAY_ERROR: &str = "x-gateway-error";

impl IntoResponse for ProxyResponse {
    fn into_response(self) -> axum::response::Response {
        let mut response = Response::new(Body::from(self.body));
        *response.status_mut() = self.status;
        *response.headers_mut() = self.headers;
        response
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> axum::response::Response {
        let mut response = (self.status_code(), Json(ErrorBody::from(&self))).into_response();
        response.headers_mut().insert(
            X_GATEWAY_ERROR,
            HeaderValue::from_static(self.code().as_str()),
        );
        response
    }
}

/// Final response for a proxied request.
pub fn finish(
    result: Result<ProxyResponse, GatewayError>,
    request_id: Option<HeaderValue>,
) -> axum::response::Response {
    let mut response = match result {
        Ok(resp) => resp.into_response(),
        Err(err) => err.into_response(),
    };
    if let Some(id) = request_id {
        response.headers_mut().insert(crate::http::X_REQUEST_ID, id);
    }
    response
        .headers_mut()
        .entry(header::SERVER)
        .or_insert(HeaderValue::from_static("edge-gateway"));
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;

    #[tokio::test]
    async fn error_maps_to_json_and_header() {
        let err = GatewayError::NoBackendAvailable {
            cluster: "api".into(),
        };
        let response = finish(Err(err), Some(HeaderValue::from_static("req-1")));
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(response.headers()[X_GATEWAY_ERROR], "NO_BACKEND_AVAILABLE");
        assert_eq!(response.headers()["x-request-id"], "req-1");

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["status"], 503);
    }

    #[test]
    fn proxy_response_keeps_status_and_headers() {
        let resp = ProxyResponse::new(StatusCode::CREATED)
            .with_header("x-cache-status", "MISS")
            .with_body("ok");
        let response = finish(Ok(resp), None);
        assert_eq!(response.status(), StatusCode::CREATED);
        assert_eq!(response.headers()["x-cache-status"], "MISS");
        assert_eq!(response.headers()["server"], "edge-gateway");
    }
}
