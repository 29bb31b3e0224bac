//! Label adapter: translates flat key/value labels (container-label style)
//! into a [`GatewayConfig`] snapshot.
//!
//! ```text
//! gateway.cluster.web.backends = 10.0.0.1:80@3,10.0.0.2:80
//! gateway.cluster.web.policy   = weighted_round_robin
//! gateway.cluster.web.hash_key = header:x-user-id
//! gateway.route.api.host        = api.example.com
//! gateway.route.api.path_prefix = /v1
//! gateway.route.api.cluster     = web
//! gateway.route.api.header.x-tenant = blue
//! gateway.route.api.cache       = true
//! gateway.route.api.cache.swr   = 30
//! gateway.route.api.cache.ttl   = 60
//! ```
//!
//! Labels carry no order, so routes are registered in name order.

use std::collections::BTreeMap;

use crate::config::loader::ConfigError;
use crate::config::schema::{
    BackendConfig, ClusterConfig, GatewayConfig, HashKeyConfig, HeaderMatchConfig, PolicyConfig,
    RouteCacheConfig, RouteConfig,
};
use crate::config::validation::{validate_config, ValidationError};

const PREFIX: &str = "gateway.";

/// Build a configuration from labels, layered on top of `base`.
///
/// Clusters and routes found in labels replace same-named entries in `base`.
pub fn from_labels<I, K, V>(base: GatewayConfig, labels: I) -> Result<GatewayConfig, ConfigError>
where
    I: IntoIterator<Item = (K, V)>,
    K: AsRef<str>,
    V: AsRef<str>,
{
    let mut clusters: BTreeMap<String, ClusterConfig> = BTreeMap::new();
    let mut routes: BTreeMap<String, RouteConfig> = BTreeMap::new();
    let mut errors = Vec::new();

    let sorted: BTreeMap<String, String> = labels
        .into_iter()
        .map(|(k, v)| (k.as_ref().to_string(), v.as_ref().trim().to_string()))
        .collect();

    for (key, value) in &sorted {
        let Some(rest) = key.strip_prefix(PREFIX) else {
            continue;
        };
        let mut parts = rest.splitn(3, '.');
        let kind = parts.next().unwrap_or_default();
        let name = parts.next().unwrap_or_default();
        let attr = parts.next().unwrap_or_default();
        if name.is_empty() || attr.is_empty() {
            errors.push(ValidationError {
                field: key.clone(),
                message: "expected gateway.<kind>.<name>.<attribute>".into(),
            });
            continue;
        }

        let result = match kind {
            "cluster" => {
                let cluster = clusters.entry(name.to_string()).or_insert_with(|| ClusterConfig {
                    name: name.to_string(),
                    ..Default::default()
                });
                apply_cluster_label(cluster, attr, value)
            }
            "route" => {
                let route = routes.entry(name.to_string()).or_insert_with(|| RouteConfig {
                    name: name.to_string(),
                    ..Default::default()
                });
                apply_route_label(route, attr, value)
            }
            _ => Err(format!("unknown label kind '{}'", kind)),
        };

        if let Err(message) = result {
            errors.push(ValidationError {
                field: key.clone(),
                message,
            });
        }
    }

    if !errors.is_empty() {
        return Err(ConfigError::Validation(errors));
    }

    let mut config = base;
    config
        .clusters
        .retain(|c| !clusters.contains_key(&c.name));
    config.clusters.extend(clusters.into_values());
    config.routes.retain(|r| !routes.contains_key(&r.name));
    config.routes.extend(routes.into_values());

    validate_config(&config).map_err(ConfigError::Validation)?;
    Ok(config)
}

fn apply_cluster_label(cluster: &mut ClusterConfig, attr: &str, value: &str) -> Result<(), String> {
    match attr {
        "backends" => {
            for item in value.split(',').map(str::trim).filter(|s| !s.is_empty()) {
                let (address, weight) = match item.split_once('@') {
                    Some((addr, w)) => (
                        addr,
                        w.parse::<u32>()
                            .map_err(|_| format!("invalid weight in '{}'", item))?,
                    ),
                    None => (item, 1),
                };
                let mut backend = BackendConfig::new(address);
                backend.weight = weight;
                cluster.backends.push(backend);
            }
            Ok(())
        }
        "policy" => {
            cluster.policy = match value {
                "round_robin" => PolicyConfig::RoundRobin,
                "least_connections" => PolicyConfig::LeastConnections,
                "weighted_round_robin" => PolicyConfig::WeightedRoundRobin,
                "consistent_hash" => PolicyConfig::ConsistentHash,
                other => return Err(format!("unknown policy '{}'", other)),
            };
            Ok(())
        }
        "hash_key" => {
            cluster.hash_key = match value.split_once(':') {
                None if value == "client_ip" => HashKeyConfig::ClientIp,
                Some(("header", name)) => HashKeyConfig::Header { name: name.into() },
                Some(("cookie", name)) => HashKeyConfig::Cookie { name: name.into() },
                _ => return Err(format!("unknown hash key '{}'", value)),
            };
            Ok(())
        }
        "health_path" => {
            cluster
                .health_check
                .get_or_insert_with(Default::default)
                .path = value.to_string();
            Ok(())
        }
        other => Err(format!("unknown cluster attribute '{}'", other)),
    }
}

fn apply_route_label(route: &mut RouteConfig, attr: &str, value: &str) -> Result<(), String> {
    if let Some(header) = attr.strip_prefix("header.") {
        route.headers.push(HeaderMatchConfig {
            name: header.to_string(),
            value: (!value.is_empty()).then(|| value.to_string()),
        });
        return Ok(());
    }

    match attr {
        "host" => route.host = Some(value.to_string()),
        "path" => route.path = Some(value.to_string()),
        "path_prefix" => route.path_prefix = Some(value.to_string()),
        "path_regex" => route.path_regex = Some(value.to_string()),
        "cluster" => route.cluster = value.to_string(),
        "cache" => {
            let enabled = parse_bool(value)?;
            route.cache.get_or_insert_with(RouteCacheConfig::default).enabled = enabled;
        }
        "cache.swr" => {
            route
                .cache
                .get_or_insert_with(RouteCacheConfig::default)
                .stale_while_revalidate_secs = parse_secs(value)?;
        }
        "cache.ttl" => {
            route
                .cache
                .get_or_insert_with(RouteCacheConfig::default)
                .default_ttl_secs = Some(parse_secs(value)?);
        }
        other => return Err(format!("unknown route attribute '{}'", other)),
    }
    Ok(())
}

fn parse_bool(value: &str) -> Result<bool, String> {
    match value {
        "true" | "1" | "yes" => Ok(true),
        "false" | "0" | "no" => Ok(false),
        other => Err(format!("expected boolean, got '{}'", other)),
    }
}

fn parse_secs(value: &str) -> Result<u64, String> {
    value
        .parse()
        .map_err(|_| format!("expected seconds, got '{}'", value))
}
