//! Route matching logic.
//!
//! # Responsibilities
//! - Match host (exact or single-label wildcard, case-insensitive, port ignored)
//! - Match path (exact, segment-aware prefix, regex; case-sensitive)
//! - Match headers (presence or exact value)
//! - Combine conditions with AND semantics
//!
//! # Design Decisions
//! - Host matching is case-insensitive and ignores the port
//! - Path matching is case-sensitive
//! - Empty condition = always matches (wildcard)
//! - Regexes are compiled once when the route table is built

use axum::http::{HeaderMap, HeaderName, HeaderValue};
use regex::Regex;

/// The parts of a request the router looks at, extracted once per request.
#[derive(Debug)]
pub struct RequestView<'a> {
    pub host: Option<String>,
    pub path: &'a str,
    pub headers: &'a HeaderMap,
}

/// Trait for matching requests against conditions.
pub trait Matcher: Send + Sync + std::fmt::Debug {
    /// Returns true if the request matches this condition.
    fn matches(&self, req: &RequestView<'_>) -> bool;
}

/// Matches the request host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostMatcher {
    /// `api.example.com`
    Exact(String),
    /// `*.example.com`; stores the suffix `.example.com`.
    Wildcard(String),
}

impl HostMatcher {
    /// Parse a host pattern. The host is normalized to lowercase.
    pub fn new(pattern: impl Into<String>) -> Self {
        let pattern = pattern.into().to_lowercase();
        match pattern.strip_prefix('*') {
            Some(suffix) => HostMatcher::Wildcard(suffix.to_string()),
            None => HostMatcher::Exact(pattern),
        }
    }

    pub fn is_exact(&self) -> bool {
        matches!(self, HostMatcher::Exact(_))
    }
}

impl Matcher for HostMatcher {
    fn matches(&self, req: &RequestView<'_>) -> bool {
        let Some(host) = req.host.as_deref() else {
            return false;
        };
        match self {
            HostMatcher::Exact(expected) => host == expected,
            HostMatcher::Wildcard(suffix) => host
                .strip_suffix(suffix.as_str())
                .map(|label| !label.is_empty() && !label.contains('.'))
                .unwrap_or(false),
        }
    }
}

/// Matches the request path.
#[derive(Debug, Clone)]
pub enum PathMatcher {
    Exact(String),
    Prefix(String),
    Regex(Regex),
}

impl PathMatcher {
    pub fn regex(pattern: &str) -> Result<Self, regex::Error> {
        Ok(PathMatcher::Regex(Regex::new(pattern)?))
    }

    /// Prefix length for longest-prefix ordering; zero for other kinds.
    pub fn prefix_len(&self) -> usize {
        match self {
            PathMatcher::Prefix(p) => p.len(),
            _ => 0,
        }
    }

    /// A prefix of `/` constrains nothing.
    pub fn is_root_prefix(&self) -> bool {
        matches!(self, PathMatcher::Prefix(p) if p == "/")
    }
}

impl Matcher for PathMatcher {
    fn matches(&self, req: &RequestView<'_>) -> bool {
        let path = req.path;
        match self {
            PathMatcher::Exact(expected) => path == expected,
            PathMatcher::Prefix(prefix) => {
                // Segment-aware: "/api" matches "/api" and "/api/x" but not "/apix".
                path.starts_with(prefix.as_str())
                    && (prefix.ends_with('/')
                        || path.len() == prefix.len()
                        || path.as_bytes()[prefix.len()] == b'/')
            }
            PathMatcher::Regex(re) => re.is_match(path),
        }
    }
}

/// Matches a header by presence or exact value.
#[derive(Debug, Clone)]
pub struct HeaderMatcher {
    name: HeaderName,
    value: Option<HeaderValue>,
}

impl HeaderMatcher {
    pub fn new(name: HeaderName, value: Option<HeaderValue>) -> Self {
        Self { name, value }
    }
}

impl Matcher for HeaderMatcher {
    fn matches(&self, req: &RequestView<'_>) -> bool {
        let mut values = req.headers.get_all(&self.name).iter().peekable();
        match &self.value {
            None => values.peek().is_some(),
            Some(expected) => values.any(|v| v == expected),
        }
    }
}
