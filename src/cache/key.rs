//! Cache keys.

use std::fmt;

use axum::http::Method;

use crate::proxy::ProxyRequest;

/// Identity of a stored response: method, absolute URL and the values of the
/// route's key headers (in configured order, lowercased names).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    method: Method,
    url: String,
    varied: Vec<(String, Option<String>)>,
}

impl CacheKey {
    pub fn from_request(request: &ProxyRequest, key_headers: &[String]) -> Self {
        let host = request.host().unwrap_or_default();
        let url = format!("{}://{}{}", request.scheme, host, request.path_and_query());
        let varied = key_headers
            .iter()
            .map(|name| {
                let name = name.to_ascii_lowercase();
                let value = request.header_str(&name).map(str::to_string);
                (name, value)
            })
            .collect();
        Self {
            method: request.method.clone(),
            url,
            varied,
        }
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    /// `scheme://host/path?query`, the unit purges operate on.
    pub fn url(&self) -> &str {
        &self.url
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.method, self.url)?;
        for (name, value) in &self.varied {
            write!(f, " {}={}", name, value.as_deref().unwrap_or("-"))?;
        }
        Ok(())
    }
}
