//! Proxy core.
//!
//! # Data Flow
//! ```text
//! ProxyRequest
//!     → gateway.rs: route → cache lookup → select → breaker permit
//!     → upstream.rs: send to the chosen backend
//!     → gateway.rs: classify, retry elsewhere or store in cache
//!     → ProxyResponse | GatewayError
//! ```

pub mod gateway;
pub mod message;
pub mod upstream;

pub use gateway::{Gateway, ReloadError};
pub use message::{ProxyRequest, ProxyResponse};
pub use upstream::{HyperUpstream, Upstream};
