//! Per-route middleware chain.
//!
//! Request-side steps run in order before the request is forwarded;
//! response-side steps run in order on the way back.

use axum::http::{uri::PathAndQuery, HeaderName, HeaderValue, Uri};

use crate::config::MiddlewareConfig;
use crate::proxy::{ProxyRequest, ProxyResponse};
use crate::routing::RouteError;

#[derive(Debug, Clone)]
pub enum Middleware {
    StripPrefix(String),
    AddPrefix(String),
    SetRequestHeader(HeaderName, HeaderValue),
    RemoveRequestHeader(HeaderName),
    SetResponseHeader(HeaderName, HeaderValue),
}

fn header_name(route: &str, name: &str) -> Result<HeaderName, RouteError> {
    HeaderName::from_bytes(name.as_bytes()).map_err(|_| RouteError::InvalidHeader {
        route: route.to_string(),
        header: name.to_string(),
    })
}

fn header_value(route: &str, name: &str, value: &str) -> Result<HeaderValue, RouteError> {
    HeaderValue::from_str(value).map_err(|_| RouteError::InvalidHeader {
        route: route.to_string(),
        header: name.to_string(),
    })
}

impl Middleware {
    pub fn compile(route: &str, config: &MiddlewareConfig) -> Result<Self, RouteError> {
        Ok(match config {
            MiddlewareConfig::StripPrefix { prefix } => {
                Middleware::StripPrefix(prefix.trim_end_matches('/').to_string())
            }
            MiddlewareConfig::AddPrefix { prefix } => {
                Middleware::AddPrefix(prefix.trim_end_matches('/').to_string())
            }
            MiddlewareConfig::SetRequestHeader { name, value } => Middleware::SetRequestHeader(
                header_name(route, name)?,
                header_value(route, name, value)?,
            ),
            MiddlewareConfig::RemoveRequestHeader { name } => {
                Middleware::RemoveRequestHeader(header_name(route, name)?)
            }
            MiddlewareConfig::SetResponseHeader { name, value } => Middleware::SetResponseHeader(
                header_name(route, name)?,
                header_value(route, name, value)?,
            ),
        })
    }
}

/// Replace the path of `uri`, keeping its query and authority.
fn with_path(uri: &Uri, path: &str) -> Option<Uri> {
    let path_and_query = match uri.query() {
        Some(q) => format!("{}?{}", path, q),
        None => path.to_string(),
    };
    let mut parts = uri.clone().into_parts();
    parts.path_and_query = Some(path_and_query.parse::<PathAndQuery>().ok()?);
    Uri::from_parts(parts).ok()
}

/// Ordered middlewares of one route.
#[derive(Debug, Clone, Default)]
pub struct MiddlewareChain {
    steps: Vec<Middleware>,
}

impl MiddlewareChain {
    pub fn compile(route: &str, configs: &[MiddlewareConfig]) -> Result<Self, RouteError> {
        let steps = configs
            .iter()
            .map(|c| Middleware::compile(route, c))
            .collect::<Result<_, _>>()?;
        Ok(Self { steps })
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn apply_request(&self, request: &mut ProxyRequest) {
        for step in &self.steps {
            match step {
                Middleware::StripPrefix(prefix) => {
                    let path = request.uri.path();
                    let Some(rest) = path.strip_prefix(prefix.as_str()) else {
                        continue;
                    };
                    if !(rest.is_empty() || rest.starts_with('/')) {
                        continue;
                    }
                    let new_path = if rest.is_empty() { "/" } else { rest };
                    if let Some(uri) = with_path(&request.uri, new_path) {
                        request.uri = uri;
                    }
                }
                Middleware::AddPrefix(prefix) => {
                    let new_path = format!("{}{}", prefix, request.uri.path());
                    if let Some(uri) = with_path(&request.uri, &new_path) {
                        request.uri = uri;
                    }
                }
                Middleware::SetRequestHeader(name, value) => {
                    request.headers.insert(name.clone(), value.clone());
                }
                Middleware::RemoveRequestHeader(name) => {
                    request.headers.remove(name);
                }
                Middleware::SetResponseHeader(..) => {}
            }
        }
    }

    pub fn apply_response(&self, response: &mut ProxyResponse) {
        for step in &self.steps {
            if let Middleware::SetResponseHeader(name, value) = step {
                response.headers.insert(name.clone(), value.clone());
            }
        }
    }
}
