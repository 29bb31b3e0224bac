//! Configuration schema definitions.
//!
//! [`GatewayConfig`] is the single declarative configuration snapshot the
//! core consumes. File formats and label conventions are translated into it
//! by adapters (`loader.rs`, `labels.rs`); the core never parses them itself.

use serde::{Deserialize, Serialize};

/// Root configuration for the gateway.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct GatewayConfig {
    /// Listener configuration (bind address, limits).
    pub listener: ListenerConfig,

    /// Route matching behaviour.
    pub routing: RoutingConfig,

    /// Route definitions mapping requests to clusters.
    pub routes: Vec<RouteConfig>,

    /// Backend cluster definitions.
    pub clusters: Vec<ClusterConfig>,

    /// Default active health check settings.
    pub health_check: HealthCheckConfig,

    /// Passive (traffic-based) health settings.
    pub passive_health: PassiveHealthConfig,

    /// Circuit breaker thresholds.
    pub circuit_breaker: CircuitBreakerConfig,

    /// Retry configuration.
    pub retries: RetryConfig,

    /// Timeout configuration.
    pub timeouts: TimeoutConfig,

    /// Shared response cache.
    pub cache: CacheConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,

    /// Admin API settings.
    pub admin: AdminConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,

    /// Maximum concurrent in-flight requests (backpressure).
    pub max_connections: usize,

    /// Maximum buffered request body in bytes.
    pub max_body_bytes: usize,

    /// Maximum buffered upstream response body in bytes.
    pub max_response_bytes: usize,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
            max_connections: 10_000,
            max_body_bytes: 2 * 1024 * 1024,
            max_response_bytes: 64 * 1024 * 1024,
        }
    }
}

/// How equally specific routes are ordered.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum TieBreak {
    /// The route registered first wins.
    #[default]
    FirstRegistered,
    /// The route registered last wins.
    LastRegistered,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct RoutingConfig {
    pub tie_break: TieBreak,
}

/// Route configuration mapping requests to a cluster.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct RouteConfig {
    /// Route identifier for logging/metrics.
    pub name: String,

    /// Host to match: exact (`api.example.com`) or wildcard (`*.example.com`).
    #[serde(default)]
    pub host: Option<String>,

    /// Exact path to match.
    #[serde(default)]
    pub path: Option<String>,

    /// Path prefix to match.
    #[serde(default)]
    pub path_prefix: Option<String>,

    /// Regular expression the path must match.
    #[serde(default)]
    pub path_regex: Option<String>,

    /// Header conditions, all of which must hold.
    #[serde(default)]
    pub headers: Vec<HeaderMatchConfig>,

    /// Cluster name to forward to.
    pub cluster: String,

    /// Ordered middleware chain.
    #[serde(default)]
    pub middlewares: Vec<MiddlewareConfig>,

    /// Cache policy; routes without one are never cached.
    #[serde(default)]
    pub cache: Option<RouteCacheConfig>,
}

/// Header condition. Without a value only presence is required.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct HeaderMatchConfig {
    pub name: String,
    #[serde(default)]
    pub value: Option<String>,
}

/// A single middleware step.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MiddlewareConfig {
    StripPrefix { prefix: String },
    AddPrefix { prefix: String },
    SetRequestHeader { name: String, value: String },
    RemoveRequestHeader { name: String },
    SetResponseHeader { name: String, value: String },
}

/// Per-route cache policy.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RouteCacheConfig {
    pub enabled: bool,

    /// TTL applied when the response carries no freshness information.
    pub default_ttl_secs: Option<u64>,

    /// Stale-while-revalidate window applied when the response has none.
    pub stale_while_revalidate_secs: u64,

    /// Request headers that take part in the cache key.
    pub key_headers: Vec<String>,
}

impl Default for RouteCacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            default_ttl_secs: None,
            stale_while_revalidate_secs: 0,
            key_headers: vec!["accept-encoding".to_string()],
        }
    }
}

/// Backend selection policy.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum PolicyConfig {
    #[default]
    RoundRobin,
    LeastConnections,
    WeightedRoundRobin,
    ConsistentHash,
}

/// Key hashed by the consistent-hash policy.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq, Default)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum HashKeyConfig {
    #[default]
    ClientIp,
    Header { name: String },
    Cookie { name: String },
}

/// Backend cluster definition.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct ClusterConfig {
    /// Unique cluster name referenced by routes.
    pub name: String,

    #[serde(default)]
    pub policy: PolicyConfig,

    #[serde(default)]
    pub hash_key: HashKeyConfig,

    #[serde(default)]
    pub backends: Vec<BackendConfig>,

    /// Overrides the global active health check settings.
    #[serde(default)]
    pub health_check: Option<HealthCheckConfig>,
}

/// Backend server configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct BackendConfig {
    /// Backend address (e.g., "127.0.0.1:3000").
    pub address: String,

    /// Weight for weighted load balancing (default: 1).
    #[serde(default = "default_weight")]
    pub weight: u32,

    /// Maximum concurrent connections to this backend.
    #[serde(default = "default_max_backend_conns")]
    pub max_connections: usize,
}

impl BackendConfig {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            weight: default_weight(),
            max_connections: default_max_backend_conns(),
        }
    }
}

fn default_weight() -> u32 {
    1
}

fn default_max_backend_conns() -> usize {
    100
}

/// Active health check configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct HealthCheckConfig {
    /// Enable active health checks.
    pub enabled: bool,

    /// Health check interval in seconds.
    pub interval_secs: u64,

    /// Per-probe timeout in milliseconds.
    pub timeout_ms: u64,

    /// Path to probe for HTTP health checks.
    pub path: String,

    /// Number of consecutive failures before marking unhealthy.
    pub unhealthy_threshold: u32,

    /// Number of consecutive successes before marking healthy.
    pub healthy_threshold: u32,
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: 10,
            timeout_ms: 2000,
            path: "/health".to_string(),
            unhealthy_threshold: 3,
            healthy_threshold: 2,
        }
    }
}

/// Passive health configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct PassiveHealthConfig {
    pub enabled: bool,

    /// Number of most recent outcomes considered.
    pub window_size: usize,

    /// Failure ratio (0.0-1.0) at which the backend is ejected.
    pub failure_ratio: f64,

    /// Minimum samples in the window before the ratio is trusted.
    pub min_requests: usize,

    /// Readmission delay when active checks are disabled.
    pub ejection_secs: u64,
}

impl Default for PassiveHealthConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            window_size: 20,
            failure_ratio: 0.5,
            min_requests: 10,
            ejection_secs: 30,
        }
    }
}

/// Circuit breaker configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    pub enabled: bool,

    /// Number of most recent calls considered.
    pub window_size: usize,

    /// Failure ratio (0.0-1.0) that trips the breaker.
    pub failure_ratio: f64,

    /// Minimum calls in the window before tripping is allowed.
    pub min_requests: usize,

    /// How long the circuit stays open in milliseconds.
    pub open_duration_ms: u64,

    /// Concurrent trial calls admitted while half-open.
    pub half_open_max_trials: u32,

    /// Trial successes needed to close the circuit.
    pub half_open_successes: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            window_size: 20,
            failure_ratio: 0.5,
            min_requests: 5,
            open_duration_ms: 30_000,
            half_open_max_trials: 1,
            half_open_successes: 1,
        }
    }
}

/// Retry configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct RetryConfig {
    /// Enable retries.
    pub enabled: bool,

    /// Maximum number of retries after the first attempt.
    pub max_retries: u32,

    /// Base delay for exponential backoff in milliseconds.
    pub base_delay_ms: u64,

    /// Maximum delay for exponential backoff in milliseconds.
    pub max_delay_ms: u64,

    /// Retry timeouts and 5xx for non-idempotent methods too.
    pub retry_non_idempotent: bool,

    /// Upstream statuses treated as retryable failures.
    pub retryable_statuses: Vec<u16>,

    /// Retries allowed as a fraction of requests (retry budget).
    /// e.g., 0.2 for a 20% budget.
    pub budget_ratio: f64,

    /// Retries always allowed per budget window regardless of ratio.
    pub budget_min_retries: u64,

    /// Budget accounting window in seconds.
    pub budget_window_secs: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_retries: 2,
            base_delay_ms: 50,
            max_delay_ms: 2000,
            retry_non_idempotent: false,
            retryable_statuses: vec![502, 503, 504],
            budget_ratio: 0.2,
            budget_min_retries: 10,
            budget_window_secs: 10,
        }
    }
}

/// Timeout configuration for various operations.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Per-attempt upstream timeout in milliseconds.
    pub attempt_ms: u64,

    /// Overall request deadline in milliseconds (all attempts and backoff).
    pub request_ms: u64,

    /// How long a removed backend may drain in-flight requests, in seconds.
    pub drain_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            attempt_ms: 5_000,
            request_ms: 30_000,
            drain_secs: 30,
        }
    }
}

/// Shared response cache configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct CacheConfig {
    pub enabled: bool,

    /// Maximum number of stored entries.
    pub max_entries: usize,

    /// Maximum total body bytes stored.
    pub max_bytes: usize,

    /// Bodies larger than this are never stored.
    pub max_entry_bytes: usize,

    /// Fraction of (Date - Last-Modified) used as heuristic freshness.
    pub heuristic_fraction: f64,

    /// Upper bound for heuristic freshness in seconds.
    pub heuristic_max_secs: u64,

    /// How long a request waits for another request fetching the same key.
    pub lock_timeout_ms: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_entries: 10_000,
            max_bytes: 256 * 1024 * 1024,
            max_entry_bytes: 8 * 1024 * 1024,
            heuristic_fraction: 0.1,
            heuristic_max_secs: 86_400,
            lock_timeout_ms: 5_000,
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Pretty for development, JSON for production.
    pub log_format: LogFormat,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}

/// Admin API configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AdminConfig {
    /// Enable admin API.
    pub enabled: bool,

    /// API key for authentication (Bearer token).
    pub api_key: String,

    /// Admin API bind address.
    pub bind_address: String,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            // WARNING: This is a placeholder! Change this in production.
            api_key: "CHANGE_ME_IN_PRODUCTION".to_string(),
            bind_address: "127.0.0.1:8081".to_string(),
        }
    }
}
