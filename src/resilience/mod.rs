//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Request to backend:
//!     → timeouts.rs (deadline for the whole request, bound per attempt)
//!     → circuit_breaker.rs (permit per backend; open circuits reject)
//!     → On failure: retries.rs (retryable? budget left? backoff.rs delay)
//!     → outcome recorded in window.rs, forwarded to passive health
//! ```
//!
//! # Design Decisions
//! - Timeouts are non-negotiable; every external call has a deadline
//! - Retries for timeouts and 5xx only for idempotent requests
//! - Breaker state lives in atomics; no lock on the request path

pub mod backoff;
pub mod circuit_breaker;
pub mod retries;
pub mod timeouts;
pub mod window;

pub use circuit_breaker::{CircuitBreakers, CircuitPermit, CircuitState, OutcomeSink};
pub use retries::{RetryBudget, RetryPolicy};
pub use timeouts::{Deadline, Timeouts};
pub use window::{Outcome, OutcomeWindow};
