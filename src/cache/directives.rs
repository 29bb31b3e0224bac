//! HTTP caching rules (RFC 9111): `Cache-Control` parsing, storability and
//! freshness lifetime.

use std::time::Duration;

use axum::http::{header, HeaderMap, Method, StatusCode};
use chrono::DateTime;

use crate::config::{CacheConfig, RouteCacheConfig};
use crate::proxy::{ProxyRequest, ProxyResponse};

/// Largest delta-seconds value honoured (2^31); larger values are clamped.
pub const MAX_DELTA_SECONDS: u64 = 1 << 31;

/// Statuses cacheable without explicit freshness information.
const HEURISTIC_STATUSES: [u16; 11] = [200, 203, 204, 300, 301, 308, 404, 405, 410, 414, 501];

/// Parsed `Cache-Control` directives of a request or response.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheControl {
    pub no_store: bool,
    pub no_cache: bool,
    pub private: bool,
    pub public: bool,
    /// `must-revalidate` or `proxy-revalidate`.
    pub must_revalidate: bool,
    pub max_age: Option<u64>,
    pub s_maxage: Option<u64>,
    pub stale_while_revalidate: Option<u64>,
}

impl CacheControl {
    pub fn parse(headers: &HeaderMap) -> Self {
        let mut cc = Self::default();
        let directives = headers
            .get_all(header::CACHE_CONTROL)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .flat_map(|v| v.split(','))
            .map(str::trim)
            .filter(|d| !d.is_empty());

        for directive in directives {
            let (name, value) = match directive.split_once('=') {
                Some((n, v)) => (n.trim(), Some(v.trim().trim_matches('"'))),
                None => (directive, None),
            };
            // An unparsable delta is treated as already stale.
            let seconds = || value.map(|v| delta_seconds(v).unwrap_or(0));
            match name.to_ascii_lowercase().as_str() {
                "no-store" => cc.no_store = true,
                "no-cache" => cc.no_cache = true,
                "private" => cc.private = true,
                "public" => cc.public = true,
                "must-revalidate" | "proxy-revalidate" => cc.must_revalidate = true,
                "max-age" => cc.max_age = seconds(),
                "s-maxage" => cc.s_maxage = seconds(),
                "stale-while-revalidate" => cc.stale_while_revalidate = seconds(),
                _ => {}
            }
        }
        cc
    }
}

/// Parse delta-seconds, clamping overflowing values to [`MAX_DELTA_SECONDS`].
fn delta_seconds(value: &str) -> Option<u64> {
    let value = value.trim();
    if value.is_empty() || !value.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    Some(value.parse::<u64>().map_or(MAX_DELTA_SECONDS, |v| v.min(MAX_DELTA_SECONDS)))
}

/// Seconds since the epoch of an HTTP-date.
pub fn parse_http_date(value: &str) -> Option<i64> {
    DateTime::parse_from_rfc2822(value.trim())
        .ok()
        .map(|d| d.timestamp())
}

fn header_date(headers: &HeaderMap, name: header::HeaderName) -> Option<i64> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .and_then(parse_http_date)
}

/// Why a response was not stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotStored {
    Method,
    Status(u16),
    NoStore,
    Private,
    Authorization,
    SetCookie,
    VaryStar,
    VaryUnkeyed(String),
    TooLarge(usize),
    NoFreshness,
}

impl NotStored {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotStored::Method => "method",
            NotStored::Status(_) => "status",
            NotStored::NoStore => "no-store",
            NotStored::Private => "private",
            NotStored::Authorization => "authorization",
            NotStored::SetCookie => "set-cookie",
            NotStored::VaryStar => "vary-star",
            NotStored::VaryUnkeyed(_) => "vary-unkeyed",
            NotStored::TooLarge(_) => "too-large",
            NotStored::NoFreshness => "no-freshness",
        }
    }
}

/// Whether a request may be answered from, or fill, the cache at all.
pub fn is_cacheable_request(request: &ProxyRequest) -> bool {
    (request.method == Method::GET || request.method == Method::HEAD)
        && !CacheControl::parse(&request.headers).no_store
}

/// Storability of `response` as the answer to `request`.
pub fn check_storable(
    request: &ProxyRequest,
    response: &ProxyResponse,
    response_cc: &CacheControl,
    policy: &RouteCacheConfig,
    config: &CacheConfig,
) -> Result<(), NotStored> {
    if !is_cacheable_request(request) {
        return Err(if request.method == Method::GET || request.method == Method::HEAD {
            NotStored::NoStore
        } else {
            NotStored::Method
        });
    }
    if !HEURISTIC_STATUSES.contains(&response.status.as_u16()) {
        return Err(NotStored::Status(response.status.as_u16()));
    }
    if response_cc.no_store {
        return Err(NotStored::NoStore);
    }
    if response_cc.private {
        return Err(NotStored::Private);
    }
    if request.headers.contains_key(header::AUTHORIZATION)
        && !(response_cc.public || response_cc.s_maxage.is_some() || response_cc.must_revalidate)
    {
        return Err(NotStored::Authorization);
    }
    if response.headers.contains_key(header::SET_COOKIE) {
        return Err(NotStored::SetCookie);
    }

    let vary = response
        .headers
        .get_all(header::VARY)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .map(|v| v.trim().to_ascii_lowercase())
        .filter(|v| !v.is_empty());
    for name in vary {
        if name == "*" {
            return Err(NotStored::VaryStar);
        }
        if !policy.key_headers.iter().any(|k| k.eq_ignore_ascii_case(&name)) {
            return Err(NotStored::VaryUnkeyed(name));
        }
    }

    if response.body.len() > config.max_entry_bytes {
        return Err(NotStored::TooLarge(response.body.len()));
    }
    Ok(())
}

/// Freshness lifetime of a response, before subtracting its age.
///
/// `s-maxage` > `max-age` > `Expires - Date` > heuristic on
/// `Last-Modified` > the route's default TTL. `no-cache` yields zero.
/// `now_unix` stands in for a missing `Date`.
pub fn freshness_lifetime(
    headers: &HeaderMap,
    cc: &CacheControl,
    policy: &RouteCacheConfig,
    config: &CacheConfig,
    now_unix: i64,
) -> Duration {
    if cc.no_cache {
        return Duration::ZERO;
    }
    if let Some(secs) = cc.s_maxage.or(cc.max_age) {
        return Duration::from_secs(secs);
    }

    let date = header_date(headers, header::DATE);
    if let Some(expires) = headers.get(header::EXPIRES) {
        let expires = expires.to_str().ok().and_then(parse_http_date);
        let date = date.unwrap_or(now_unix);
        // An invalid Expires means already expired.
        return match expires {
            Some(expires) => Duration::from_secs(expires.saturating_sub(date).max(0) as u64),
            None => Duration::ZERO,
        };
    }

    if let (Some(date), Some(modified)) = (date, header_date(headers, header::LAST_MODIFIED)) {
        if date > modified {
            let heuristic = ((date - modified) as f64 * config.heuristic_fraction) as u64;
            return Duration::from_secs(heuristic.min(config.heuristic_max_secs));
        }
    }

    policy
        .default_ttl_secs
        .map(Duration::from_secs)
        .unwrap_or(Duration::ZERO)
}

/// Stale-while-revalidate window: the response's own, else the route's.
pub fn stale_window(cc: &CacheControl, policy: &RouteCacheConfig) -> Duration {
    Duration::from_secs(
        cc.stale_while_revalidate
            .unwrap_or(policy.stale_while_revalidate_secs),
    )
}

/// Age the response already had when received (`Age` header).
pub fn initial_age(headers: &HeaderMap) -> Duration {
    headers
        .get(header::AGE)
        .and_then(|v| v.to_str().ok())
        .and_then(delta_seconds)
        .map(Duration::from_secs)
        .unwrap_or(Duration::ZERO)
}

pub fn is_not_modified(response: &ProxyResponse) -> bool {
    response.status == StatusCode::NOT_MODIFIED
}
