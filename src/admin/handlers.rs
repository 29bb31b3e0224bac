use axum::{extract::State, http::StatusCode, Json};
use serde::{Deserialize, Serialize};

use crate::admin::AdminState;
use crate::cache::CacheStats;
use crate::config::PolicyConfig;
use crate::health::HealthState;
use crate::load_balancer::{Liveness, Origin};
use crate::resilience::CircuitState;

#[derive(Serialize)]
pub struct SystemStatus {
    pub version: &'static str,
    pub status: &'static str,
    pub requests_total: u64,
    pub routes: usize,
    pub clusters: usize,
    pub open_circuits: usize,
    pub cache_entries: usize,
}

#[derive(Serialize)]
pub struct ClusterStatus {
    pub name: String,
    pub policy: PolicyConfig,
    pub backends: usize,
    pub live: usize,
}

#[derive(Serialize)]
pub struct BackendStatus {
    pub cluster: String,
    pub address: String,
    pub liveness: Liveness,
    pub origin: Origin,
    pub health: HealthState,
    pub circuit: CircuitState,
    pub weight: u32,
    pub in_flight: usize,
    pub failures_total: u64,
}

/// Purge by exact URL (`key`) or URL prefix.
#[derive(Debug, Deserialize)]
pub struct PurgeRequest {
    #[serde(default)]
    pub key: Option<String>,
    #[serde(default)]
    pub prefix: Option<String>,
}

#[derive(Serialize)]
pub struct PurgeResponse {
    pub purged: usize,
}

pub async fn get_status(State(state): State<AdminState>) -> Json<SystemStatus> {
    let gateway = &state.gateway;
    Json(SystemStatus {
        version: env!("CARGO_PKG_VERSION"),
        status: "operational",
        requests_total: gateway.requests_total(),
        routes: gateway.router().len(),
        clusters: gateway.registry().clusters().len(),
        open_circuits: gateway.breakers().tripped().len(),
        cache_entries: gateway.cache().len(),
    })
}

pub async fn get_clusters(State(state): State<AdminState>) -> Json<Vec<ClusterStatus>> {
    let mut clusters: Vec<ClusterStatus> = state
        .gateway
        .registry()
        .clusters()
        .iter()
        .map(|cluster| {
            let snapshot = cluster.snapshot();
            ClusterStatus {
                name: cluster.name().to_string(),
                policy: cluster.policy(),
                backends: snapshot.backends.len(),
                live: snapshot.live.len(),
            }
        })
        .collect();
    clusters.sort_by(|a, b| a.name.cmp(&b.name));
    Json(clusters)
}

pub async fn get_backends(State(state): State<AdminState>) -> Json<Vec<BackendStatus>> {
    let gateway = &state.gateway;
    let mut clusters = gateway.registry().clusters();
    clusters.sort_by(|a, b| a.name().cmp(b.name()));

    let statuses = clusters
        .iter()
        .flat_map(|cluster| cluster.backends())
        .map(|b| BackendStatus {
            cluster: b.cluster.clone(),
            address: b.addr.to_string(),
            liveness: b.liveness(),
            origin: b.origin(),
            health: b.health(),
            circuit: gateway.breakers().state(&b.cluster, b.addr),
            weight: b.weight(),
            in_flight: b.in_flight(),
            failures_total: b.failures_total(),
        })
        .collect();
    Json(statuses)
}

pub async fn get_cache(State(state): State<AdminState>) -> Json<CacheStats> {
    Json(state.gateway.cache().stats())
}

pub async fn purge_cache(
    State(state): State<AdminState>,
    Json(request): Json<PurgeRequest>,
) -> Result<Json<PurgeResponse>, (StatusCode, Json<serde_json::Value>)> {
    let cache = state.gateway.cache();
    let purged = match (&request.key, &request.prefix) {
        (Some(key), _) => cache.purge_url(key),
        (None, Some(prefix)) => cache.purge_prefix(prefix),
        (None, None) => {
            return Err((
                StatusCode::BAD_REQUEST,
                Json(serde_json::json!({ "error": "expected \"key\" or \"prefix\"" })),
            ))
        }
    };
    Ok(Json(PurgeResponse { purged }))
}
