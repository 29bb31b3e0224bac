//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Check referential integrity (routes reference existing clusters)
//! - Validate value ranges (thresholds > 0, ratios within 0..=1)
//! - Compile-check route regexes and backend addresses
//!
//! Returns all validation errors, not just the first.

use std::collections::HashSet;
use std::net::SocketAddr;

use regex::Regex;

use crate::config::schema::{BackendConfig, GatewayConfig, HealthCheckConfig, MiddlewareConfig, RouteConfig};

/// Largest accepted backend weight.
pub const MAX_BACKEND_WEIGHT: u32 = 1000;

/// Largest accepted `retries.max_retries`.
pub const MAX_RETRIES: u32 = 10;

/// Limits every backend definition must respect, whether it comes from a
/// config file or a discovery event.
pub fn check_backend_limits(backend: &BackendConfig) -> Result<(), &'static str> {
    if backend.weight == 0 || backend.weight > MAX_BACKEND_WEIGHT {
        return Err("weight must be within 1..=1000");
    }
    if backend.max_connections == 0 {
        return Err("max_connections must be > 0");
    }
    Ok(())
}

/// A single semantic problem in a configuration snapshot.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{field}: {message}")]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

impl ValidationError {
    fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// Validate a configuration snapshot.
pub fn validate_config(config: &GatewayConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listener.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::new(
            "listener.bind_address",
            format!("invalid socket address '{}'", config.listener.bind_address),
        ));
    }

    let mut cluster_names = HashSet::new();
    for (i, cluster) in config.clusters.iter().enumerate() {
        let field = format!("clusters[{}]", i);
        if cluster.name.is_empty() {
            errors.push(ValidationError::new(&field, "cluster name is empty"));
        }
        if !cluster_names.insert(cluster.name.as_str()) {
            errors.push(ValidationError::new(
                &field,
                format!("duplicate cluster name '{}'", cluster.name),
            ));
        }

        let mut addresses = HashSet::new();
        for (j, backend) in cluster.backends.iter().enumerate() {
            let bfield = format!("{}.backends[{}]", field, j);
            match backend.address.parse::<SocketAddr>() {
                Ok(addr) => {
                    if !addresses.insert(addr) {
                        errors.push(ValidationError::new(
                            &bfield,
                            format!("duplicate backend address '{}'", addr),
                        ));
                    }
                }
                Err(_) => errors.push(ValidationError::new(
                    &bfield,
                    format!("invalid backend address '{}'", backend.address),
                )),
            }
            if let Err(reason) = check_backend_limits(backend) {
                errors.push(ValidationError::new(&bfield, reason));
            }
        }

        if let Some(hc) = &cluster.health_check {
            validate_health_check(&format!("{}.health_check", field), hc, &mut errors);
        }
    }

    for (i, route) in config.routes.iter().enumerate() {
        validate_route(i, route, &cluster_names, &mut errors);
    }

    validate_health_check("health_check", &config.health_check, &mut errors);

    let passive = &config.passive_health;
    if passive.window_size == 0 {
        errors.push(ValidationError::new("passive_health.window_size", "must be > 0"));
    }
    if !(0.0..=1.0).contains(&passive.failure_ratio) || passive.failure_ratio == 0.0 {
        errors.push(ValidationError::new(
            "passive_health.failure_ratio",
            "must be within (0.0, 1.0]",
        ));
    }

    let cb = &config.circuit_breaker;
    if cb.window_size == 0 {
        errors.push(ValidationError::new("circuit_breaker.window_size", "must be > 0"));
    }
    if !(0.0..=1.0).contains(&cb.failure_ratio) || cb.failure_ratio == 0.0 {
        errors.push(ValidationError::new(
            "circuit_breaker.failure_ratio",
            "must be within (0.0, 1.0]",
        ));
    }
    if cb.half_open_max_trials == 0 {
        errors.push(ValidationError::new(
            "circuit_breaker.half_open_max_trials",
            "must be > 0",
        ));
    }
    if cb.half_open_successes == 0 {
        errors.push(ValidationError::new(
            "circuit_breaker.half_open_successes",
            "must be > 0",
        ));
    }

    let retries = &config.retries;
    if retries.base_delay_ms > retries.max_delay_ms {
        errors.push(ValidationError::new(
            "retries.base_delay_ms",
            "must not exceed max_delay_ms",
        ));
    }
    if retries.max_retries > MAX_RETRIES {
        errors.push(ValidationError::new(
            "retries.max_retries",
            format!("must be <= {}", MAX_RETRIES),
        ));
    }
    if retries.budget_ratio < 0.0 {
        errors.push(ValidationError::new("retries.budget_ratio", "must be >= 0"));
    }
    for status in &retries.retryable_statuses {
        if !(500..=599).contains(status) {
            errors.push(ValidationError::new(
                "retries.retryable_statuses",
                format!("{} is not a 5xx status", status),
            ));
        }
    }

    let timeouts = &config.timeouts;
    if timeouts.attempt_ms == 0 || timeouts.request_ms == 0 {
        errors.push(ValidationError::new("timeouts", "timeouts must be > 0"));
    }

    let cache = &config.cache;
    if cache.max_entries == 0 {
        errors.push(ValidationError::new("cache.max_entries", "must be > 0"));
    }
    if cache.max_entry_bytes > cache.max_bytes {
        errors.push(ValidationError::new(
            "cache.max_entry_bytes",
            "must not exceed max_bytes",
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn validate_route(
    index: usize,
    route: &RouteConfig,
    clusters: &HashSet<&str>,
    errors: &mut Vec<ValidationError>,
) {
    let field = format!("routes[{}]", index);

    if !clusters.contains(route.cluster.as_str()) {
        errors.push(ValidationError::new(
            &field,
            format!("route '{}' references unknown cluster '{}'", route.name, route.cluster),
        ));
    }

    let path_kinds = [&route.path, &route.path_prefix, &route.path_regex]
        .iter()
        .filter(|p| p.is_some())
        .count();
    if path_kinds > 1 {
        errors.push(ValidationError::new(
            &field,
            "only one of path, path_prefix, path_regex may be set",
        ));
    }

    for p in [&route.path, &route.path_prefix].into_iter().flatten() {
        if !p.starts_with('/') {
            errors.push(ValidationError::new(&field, format!("path '{}' must start with '/'", p)));
        }
    }

    if let Some(pattern) = &route.path_regex {
        if let Err(e) = Regex::new(pattern) {
            errors.push(ValidationError::new(&field, format!("invalid path_regex: {}", e)));
        }
    }

    if let Some(host) = &route.host {
        let bare = host.strip_prefix("*.").unwrap_or(host);
        if bare.is_empty() || bare.contains('*') {
            errors.push(ValidationError::new(&field, format!("invalid host pattern '{}'", host)));
        }
    }

    for header in &route.headers {
        if axum::http::HeaderName::from_bytes(header.name.as_bytes()).is_err() {
            errors.push(ValidationError::new(
                &field,
                format!("invalid header name '{}'", header.name),
            ));
        }
    }

    for mw in &route.middlewares {
        let name = match mw {
            MiddlewareConfig::SetRequestHeader { name, .. }
            | MiddlewareConfig::RemoveRequestHeader { name }
            | MiddlewareConfig::SetResponseHeader { name, .. } => Some(name),
            _ => None,
        };
        if let Some(name) = name {
            if axum::http::HeaderName::from_bytes(name.as_bytes()).is_err() {
                errors.push(ValidationError::new(
                    &field,
                    format!("middleware uses invalid header name '{}'", name),
                ));
            }
        }
    }

    if let Some(cache) = &route.cache {
        for h in &cache.key_headers {
            if axum::http::HeaderName::from_bytes(h.as_bytes()).is_err() {
                errors.push(ValidationError::new(
                    &field,
                    format!("cache key header '{}' is invalid", h),
                ));
            }
        }
    }
}

fn validate_health_check(field: &str, hc: &HealthCheckConfig, errors: &mut Vec<ValidationError>) {
    if hc.interval_secs == 0 {
        errors.push(ValidationError::new(field, "interval_secs must be > 0"));
    }
    if hc.timeout_ms == 0 {
        errors.push(ValidationError::new(field, "timeout_ms must be > 0"));
    }
    if hc.unhealthy_threshold == 0 || hc.healthy_threshold == 0 {
        errors.push(ValidationError::new(field, "thresholds must be > 0"));
    }
    if !hc.path.starts_with('/') {
        errors.push(ValidationError::new(field, "path must start with '/'"));
    }
}
