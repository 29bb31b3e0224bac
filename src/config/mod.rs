//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)          labels (key/value)
//!     → loader.rs                 → labels.rs
//!            ↘                  ↙
//!          GatewayConfig snapshot
//!     → validation.rs (semantic checks)
//!     → Gateway::reload (compile routes, reconcile clusters)
//!     → atomic swap of the published route table
//!
//! On file change:
//!     watcher.rs detects change
//!     → loader.rs loads new config
//!     → validation.rs validates
//!     → snapshot sent to the server loop
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; changes require full reload
//! - All fields have defaults to allow minimal configs
//! - A rejected snapshot leaves the previous one active

pub mod labels;
pub mod loader;
pub mod schema;
pub mod validation;
pub mod watcher;

pub use labels::from_labels;
pub use loader::{load_config, parse_config, ConfigError};
pub use schema::{
    AdminConfig, BackendConfig, CacheConfig, CircuitBreakerConfig, ClusterConfig, GatewayConfig,
    HashKeyConfig, HealthCheckConfig, HeaderMatchConfig, ListenerConfig, LogFormat,
    MiddlewareConfig, ObservabilityConfig, PassiveHealthConfig, PolicyConfig, RetryConfig,
    RouteCacheConfig, RouteConfig, RoutingConfig, TieBreak, TimeoutConfig,
};
