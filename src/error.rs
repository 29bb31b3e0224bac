//! Request-path error taxonomy.
//!
//! Every failure the core can surface to a client is a [`GatewayError`].
//! Each variant carries its client-facing status and a stable code that is
//! emitted in the `x-gateway-error` response header.

use std::time::Duration;

use axum::http::StatusCode;
use serde::Serialize;
use thiserror::Error;

/// Failure of a single upstream attempt.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum UpstreamError {
    /// TCP connect failed; the request never reached the backend.
    #[error("connection to {addr} failed: {reason}")]
    Connect { addr: String, reason: String },

    /// The attempt exceeded its deadline.
    #[error("upstream attempt timed out after {0:?}")]
    Timeout(Duration),

    /// The backend answered with a server error.
    #[error("upstream returned {0}")]
    Status(u16),

    /// Protocol or body error after the request was sent.
    #[error("upstream protocol error: {0}")]
    Protocol(String),
}

impl UpstreamError {
    /// True when the request is known not to have reached the backend.
    pub fn is_connect(&self) -> bool {
        matches!(self, UpstreamError::Connect { .. })
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, UpstreamError::Timeout(_))
    }
}

/// Errors surfaced to the client by the gateway core.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// No route matched the request.
    #[error("no route matches {host}{path}")]
    NoRoute { host: String, path: String },

    /// The cluster has no live backend to serve the request.
    #[error("no backend available in cluster {cluster}")]
    NoBackendAvailable { cluster: String },

    /// Every live backend in the cluster has an open circuit.
    #[error("all circuits open for cluster {cluster}")]
    CircuitOpen { cluster: String },

    /// Upstream call failed and was not (or could not be) retried.
    #[error("upstream failure: {0}")]
    Upstream(#[from] UpstreamError),

    /// All attempts failed.
    #[error("retries exhausted after {attempts} attempts: {last}")]
    RetriesExhausted { attempts: u32, last: UpstreamError },

    /// The overall request deadline elapsed.
    #[error("request deadline of {0:?} exceeded")]
    DeadlineExceeded(Duration),

    /// Request body exceeded the configured limit.
    #[error("request body exceeds {limit} bytes")]
    RequestTooLarge { limit: usize },
}

/// Stable machine-readable error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    NoRoute,
    NoBackendAvailable,
    CircuitOpen,
    UpstreamFailed,
    UpstreamTimeout,
    DeadlineExceeded,
    RequestTooLarge,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::NoRoute => "NO_ROUTE",
            ErrorCode::NoBackendAvailable => "NO_BACKEND_AVAILABLE",
            ErrorCode::CircuitOpen => "CIRCUIT_OPEN",
            ErrorCode::UpstreamFailed => "UPSTREAM_FAILED",
            ErrorCode::UpstreamTimeout => "UPSTREAM_TIMEOUT",
            ErrorCode::DeadlineExceeded => "DEADLINE_EXCEEDED",
            ErrorCode::RequestTooLarge => "REQUEST_TOO_LARGE",
        }
    }
}

impl GatewayError {
    pub fn code(&self) -> ErrorCode {
        match self {
            GatewayError::NoRoute { .. } => ErrorCode::NoRoute,
            GatewayError::NoBackendAvailable { .. } => ErrorCode::NoBackendAvailable,
            GatewayError::CircuitOpen { .. } => ErrorCode::CircuitOpen,
            GatewayError::Upstream(e) | GatewayError::RetriesExhausted { last: e, .. } => {
                if e.is_timeout() {
                    ErrorCode::UpstreamTimeout
                } else {
                    ErrorCode::UpstreamFailed
                }
            }
            GatewayError::DeadlineExceeded(_) => ErrorCode::DeadlineExceeded,
            GatewayError::RequestTooLarge { .. } => ErrorCode::RequestTooLarge,
        }
    }

    /// Client-facing status code.
    pub fn status_code(&self) -> StatusCode {
        match self.code() {
            ErrorCode::NoRoute => StatusCode::NOT_FOUND,
            ErrorCode::NoBackendAvailable | ErrorCode::CircuitOpen => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            ErrorCode::UpstreamFailed => StatusCode::BAD_GATEWAY,
            ErrorCode::UpstreamTimeout | ErrorCode::DeadlineExceeded => {
                StatusCode::GATEWAY_TIMEOUT
            }
            ErrorCode::RequestTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
        }
    }
}

/// JSON error body.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub code: ErrorCode,
    pub message: String,
    pub status: u16,
}

impl From<&GatewayError> for ErrorBody {
    fn from(err: &GatewayError) -> Self {
        Self {
            code: err.code(),
            message: err.to_string(),
            status: err.status_code().as_u16(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_mapping() {
        let no_route = GatewayError::NoRoute {
            host: "a.test".into(),
            path: "/".into(),
        };
        assert_eq!(no_route.status_code(), StatusCode::NOT_FOUND);

        let no_backend = GatewayError::NoBackendAvailable {
            cluster: "web".into(),
        };
        assert_eq!(no_backend.status_code(), StatusCode::SERVICE_UNAVAILABLE);

        let timeout = GatewayError::RetriesExhausted {
            attempts: 2,
            last: UpstreamError::Timeout(Duration::from_millis(50)),
        };
        assert_eq!(timeout.status_code(), StatusCode::GATEWAY_TIMEOUT);
        assert_eq!(timeout.code().as_str(), "UPSTREAM_TIMEOUT");

        let refused = GatewayError::Upstream(UpstreamError::Connect {
            addr: "127.0.0.1:1".into(),
            reason: "refused".into(),
        });
        assert_eq!(refused.status_code(), StatusCode::BAD_GATEWAY);
    }

    #[test]
    fn error_body_serializes_code() {
        let err = GatewayError::NoBackendAvailable {
            cluster: "api".into(),
        };
        let json = serde_json::to_string(&ErrorBody::from(&err)).unwrap();
        assert!(json.contains("\"code\":\"NO_BACKEND_AVAILABLE\""));
        assert!(json.contains("\"status\":503"));
    }
}
