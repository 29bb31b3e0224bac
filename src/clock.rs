//! Monotonic time source.
//!
//! Every time-dependent decision in the gateway (cache freshness, circuit
//! cool-down, drain deadlines, retry budget windows) reads time through a
//! [`Clock`] so tests can move time forward without sleeping. HTTP dates
//! are compared against [`Clock::unix_secs`], which moves with the same clock.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Source of monotonic milliseconds.
pub trait Clock: Send + Sync + std::fmt::Debug {
    /// Milliseconds elapsed since the clock's origin.
    fn now_millis(&self) -> u64;

    /// Wall-clock seconds since the Unix epoch.
    fn unix_secs(&self) -> i64;
}

/// Shared handle to a clock.
pub type SharedClock = Arc<dyn Clock>;

/// Wall-clock backed implementation anchored at construction time.
#[derive(Debug)]
pub struct SystemClock {
    origin: Instant,
    origin_unix_ms: i64,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            origin_unix_ms: chrono::Utc::now().timestamp_millis(),
        }
    }

    /// Convenience constructor for the shared form.
    pub fn shared() -> SharedClock {
        Arc::new(Self::new())
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now_millis(&self) -> u64 {
        self.origin.elapsed().as_millis() as u64
    }

    fn unix_secs(&self) -> i64 {
        (self.origin_unix_ms + self.now_millis() as i64) / 1000
    }
}

/// A clock that only moves when told to.
#[derive(Debug, Default)]
pub struct ManualClock {
    millis: AtomicU64,
    origin_unix_secs: i64,
}

impl ManualClock {
    /// A clock whose origin is the Unix epoch.
    pub fn new() -> Self {
        Self::default()
    }

    /// A clock whose origin is `secs` past the Unix epoch.
    pub fn at_unix(secs: i64) -> Self {
        Self {
            millis: AtomicU64::new(0),
            origin_unix_secs: secs,
        }
    }

    /// Move the clock forward.
    pub fn advance(&self, by: Duration) {
        self.millis.fetch_add(by.as_millis() as u64, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_millis(&self) -> u64 {
        self.millis.load(Ordering::SeqCst)
    }

    fn unix_secs(&self) -> i64 {
        self.origin_unix_secs + (self.now_millis() / 1000) as i64
    }
}
