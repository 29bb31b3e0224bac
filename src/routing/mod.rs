//! Routing subsystem.
//!
//! # Data Flow
//! ```text
//! ProxyRequest
//!     → router.rs (precedence-sorted scan of the published table)
//!     → matcher.rs (host / path / header conditions)
//!     → Route { cluster, middleware chain, cache policy } or NoRoute
//! ```
//!
//! # Design Decisions
//! - Routes are compiled at load time, not per request
//! - The table is replaced wholesale; readers never see a partial update
//! - First match in precedence order wins

use thiserror::Error;

pub mod matcher;
pub mod middleware;
pub mod router;

pub use middleware::MiddlewareChain;
pub use router::{Route, RouteTable, Router, Tier};

/// Route compilation errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RouteError {
    #[error("route '{route}': invalid path regex: {reason}")]
    InvalidRegex { route: String, reason: String },

    #[error("route '{route}': invalid header '{header}'")]
    InvalidHeader { route: String, header: String },
}
