//! Health checking subsystem.
//!
//! # Data Flow
//! ```text
//! Active health checks (active.rs):
//!     Periodic timer
//!     → Probe each backend of each due cluster (concurrently)
//!     → state.rs transition on consecutive results
//!
//! Passive health checks (passive.rs):
//!     Outcome reported through a circuit breaker permit
//!     → Sliding window per backend
//!     → state.rs transition when the failure ratio is exceeded
//!
//! State machine (state.rs):
//!     Healthy ←→ Unhealthy
//!     With thresholds to prevent flapping
//! ```
//!
//! # Design Decisions
//! - Active and passive checks are complementary
//! - Liveness lives in an atomic on the backend; the request path never waits
//! - Every transition republishes the cluster's live view

pub mod active;
pub mod passive;
pub mod state;

pub use active::{HealthMonitor, HttpProber, Prober};
pub use passive::PassiveHealth;
pub use state::HealthState;
