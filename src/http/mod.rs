//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (axum, request ID, tracing, concurrency limit)
//!     → request.rs (buffer body, strip hop-by-hop, X-Forwarded-*)
//!     → proxy::Gateway
//!     → response.rs (error mapping, request ID echo)
//!     → Send to client
//! ```

pub mod request;
pub mod response;
pub mod server;

pub use request::X_REQUEST_ID;
pub use server::HttpServer;
