//! Backend abstraction.
//!
//! # Responsibilities
//! - Represent a single backend server within its cluster
//! - Track in-flight requests (for Least Connections LB)
//! - Enforce max connection limits
//! - Hold liveness (Healthy/Unhealthy/Draining) and health counters

use std::net::SocketAddr;
use std::ops::Deref;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;

use serde::Serialize;

use crate::health::state::HealthState;
use crate::resilience::window::OutcomeWindow;

/// Liveness as seen by the balancer.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Liveness {
    Healthy = 0,
    Unhealthy = 1,
    Draining = 2,
}

impl From<u8> for Liveness {
    fn from(val: u8) -> Self {
        match val {
            1 => Liveness::Unhealthy,
            2 => Liveness::Draining,
            _ => Liveness::Healthy,
        }
    }
}

impl From<HealthState> for Liveness {
    fn from(state: HealthState) -> Self {
        match state {
            HealthState::Healthy => Liveness::Healthy,
            HealthState::Unhealthy => Liveness::Unhealthy,
        }
    }
}

/// How a backend joined its cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Origin {
    /// Listed in the cluster's configuration.
    Config,
    /// Reported by service discovery only.
    Discovery,
}

/// A single backend server.
#[derive(Debug)]
pub struct Backend {
    /// The address of the backend.
    pub addr: SocketAddr,
    /// Owning cluster.
    pub cluster: String,
    weight: AtomicU32,
    max_connections: AtomicUsize,
    in_flight: AtomicUsize,
    liveness: AtomicU8,
    failures_total: AtomicU64,
    consecutive_failures: AtomicU32,
    consecutive_successes: AtomicU32,
    /// Clock millis of the passive ejection plus one; 0 when not ejected.
    ejected_at_ms: AtomicU64,
    draining_since_ms: AtomicU64,
    configured: AtomicBool,
    /// Recent traffic outcomes for passive health.
    pub passive: OutcomeWindow,
}

impl Backend {
    pub fn new(
        cluster: impl Into<String>,
        addr: SocketAddr,
        weight: u32,
        max_connections: usize,
        passive_window: usize,
    ) -> Self {
        Self {
            addr,
            cluster: cluster.into(),
            weight: AtomicU32::new(weight.max(1)),
            max_connections: AtomicUsize::new(max_connections),
            in_flight: AtomicUsize::new(0),
            liveness: AtomicU8::new(Liveness::Healthy as u8),
            failures_total: AtomicU64::new(0),
            consecutive_failures: AtomicU32::new(0),
            consecutive_successes: AtomicU32::new(0),
            ejected_at_ms: AtomicU64::new(0),
            draining_since_ms: AtomicU64::new(0),
            configured: AtomicBool::new(false),
            passive: OutcomeWindow::new(passive_window),
        }
    }

    pub fn weight(&self) -> u32 {
        self.weight.load(Ordering::Relaxed)
    }

    pub fn set_weight(&self, weight: u32) {
        self.weight.store(weight.max(1), Ordering::Relaxed);
    }

    pub fn max_connections(&self) -> usize {
        self.max_connections.load(Ordering::Relaxed)
    }

    pub fn set_max_connections(&self, max: usize) {
        self.max_connections.store(max, Ordering::Relaxed);
    }

    /// Get the current number of in-flight requests.
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::Relaxed)
    }

    /// Try to create a connection guard that increments the in-flight count.
    /// Returns `None` when the backend is at `max_connections`.
    pub fn try_acquire(self: &Arc<Self>) -> Option<ConnectionGuard> {
        let max = self.max_connections();
        self.in_flight
            .fetch_update(Ordering::AcqRel, Ordering::Relaxed, |n| {
                (n < max).then_some(n + 1)
            })
            .ok()?;
        Some(ConnectionGuard {
            backend: self.clone(),
        })
    }

    pub fn origin(&self) -> Origin {
        if self.configured.load(Ordering::Acquire) {
            Origin::Config
        } else {
            Origin::Discovery
        }
    }

    /// Record whether the cluster configuration lists this backend. A
    /// configured backend dropped from the configuration is drained; a
    /// discovered one is left to discovery.
    pub fn set_origin(&self, origin: Origin) {
        self.configured
            .store(origin == Origin::Config, Ordering::Release);
    }

    // --- Liveness ---

    pub fn liveness(&self) -> Liveness {
        Liveness::from(self.liveness.load(Ordering::Acquire))
    }

    /// Eligible for new selections.
    pub fn is_available(&self) -> bool {
        self.liveness() == Liveness::Healthy
    }

    pub fn is_draining(&self) -> bool {
        self.liveness() == Liveness::Draining
    }

    /// Health as tracked by the state machine; Draining counts as unhealthy.
    pub fn health(&self) -> HealthState {
        match self.liveness() {
            Liveness::Healthy => HealthState::Healthy,
            _ => HealthState::Unhealthy,
        }
    }

    /// Store a health decision. Never overrides Draining. Returns true if the
    /// liveness changed.
    pub fn set_health(&self, state: HealthState) -> bool {
        let target = Liveness::from(state) as u8;
        self.liveness
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |cur| {
                (cur != Liveness::Draining as u8 && cur != target).then_some(target)
            })
            .is_ok()
    }

    /// Exclude from new selections; in-flight requests continue.
    pub fn mark_draining(&self, now_ms: u64) {
        self.draining_since_ms.store(now_ms, Ordering::Release);
        self.liveness
            .store(Liveness::Draining as u8, Ordering::Release);
    }

    /// Undo a drain (the backend was re-added). Health starts over.
    pub fn revive(&self) {
        let _ = self.liveness.compare_exchange(
            Liveness::Draining as u8,
            Liveness::Healthy as u8,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
    }

    pub fn draining_since_ms(&self) -> u64 {
        self.draining_since_ms.load(Ordering::Acquire)
    }

    // --- Counters ---

    /// Record an active probe result; returns the streak length including it.
    pub fn record_probe(&self, success: bool) -> u32 {
        if success {
            self.consecutive_failures.store(0, Ordering::Relaxed);
            self.consecutive_successes.fetch_add(1, Ordering::Relaxed) + 1
        } else {
            self.consecutive_successes.store(0, Ordering::Relaxed);
            self.failures_total.fetch_add(1, Ordering::Relaxed);
            self.consecutive_failures.fetch_add(1, Ordering::Relaxed) + 1
        }
    }

    /// Forget probe streaks, e.g. after a passive ejection.
    pub fn reset_streaks(&self) {
        self.consecutive_failures.store(0, Ordering::Relaxed);
        self.consecutive_successes.store(0, Ordering::Relaxed);
    }

    /// Count a failed request against the backend.
    pub fn record_failure(&self) {
        self.failures_total.fetch_add(1, Ordering::Relaxed);
    }

    /// Monotonic count of failed probes and requests.
    pub fn failures_total(&self) -> u64 {
        self.failures_total.load(Ordering::Relaxed)
    }

    pub fn set_ejected_at(&self, now_ms: u64) {
        // Stored off by one so that 0 can mean "not ejected".
        self.ejected_at_ms
            .store(now_ms.saturating_add(1), Ordering::Release);
    }

    pub fn clear_ejection(&self) {
        self.ejected_at_ms.store(0, Ordering::Release);
    }

    pub fn ejected_at(&self) -> Option<u64> {
        match self.ejected_at_ms.load(Ordering::Acquire) {
            0 => None,
            at => Some(at - 1),
        }
    }
}

/// A RAII guard that holds one in-flight slot on a backend.
#[derive(Debug)]
pub struct ConnectionGuard {
    backend: Arc<Backend>,
}

impl ConnectionGuard {
    pub fn backend(&self) -> &Arc<Backend> {
        &self.backend
    }
}

impl Deref for ConnectionGuard {
    type Target = Backend;
    fn deref(&self) -> &Self::Target {
        &self.backend
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.backend.in_flight.fetch_sub(1, Ordering::AcqRel);
    }
}
