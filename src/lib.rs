//! Edge gateway core: routing, backend pools, load balancing, health
//! checking, circuit breaking, retries and response caching.

pub mod admin;
pub mod cache;
pub mod clock;
pub mod config;
pub mod discovery;
pub mod error;
pub mod health;
pub mod http;
pub mod lifecycle;
pub mod load_balancer;
pub mod observability;
pub mod proxy;
pub mod resilience;
pub mod routing;

pub use clock::{Clock, ManualClock, SharedClock, SystemClock};
pub use config::GatewayConfig;
pub use error::{GatewayError, UpstreamError};
pub use http::HttpServer;
pub use lifecycle::Shutdown;
pub use proxy::{Gateway, ProxyRequest, ProxyResponse, Upstream};
