//! Timeout handling.
//!
//! Three independent layers exist: per-probe (health checks), per-attempt and
//! overall request deadline (this module), and the breaker open duration.

use std::future::Future;
use std::time::Duration;

use crate::clock::SharedClock;
use crate::config::TimeoutConfig;
use crate::error::UpstreamError;

/// Overall budget for one client request across all attempts and backoff.
#[derive(Debug, Clone)]
pub struct Deadline {
    clock: SharedClock,
    expires_at_ms: u64,
    total: Duration,
}

impl Deadline {
    pub fn new(clock: SharedClock, total: Duration) -> Self {
        let expires_at_ms = clock.now_millis().saturating_add(total.as_millis() as u64);
        Self {
            clock,
            expires_at_ms,
            total,
        }
    }

    pub fn total(&self) -> Duration {
        self.total
    }

    pub fn remaining(&self) -> Duration {
        Duration::from_millis(self.expires_at_ms.saturating_sub(self.clock.now_millis()))
    }

    pub fn is_expired(&self) -> bool {
        self.remaining().is_zero()
    }

    /// Timeout for the next attempt: the smaller of `per_attempt` and what is
    /// left of the deadline. `None` once the deadline has passed.
    pub fn attempt_timeout(&self, per_attempt: Duration) -> Option<Duration> {
        let remaining = self.remaining();
        if remaining.is_zero() {
            None
        } else {
            Some(per_attempt.min(remaining))
        }
    }
}

/// Resolved timeout settings.
#[derive(Debug, Clone, Copy)]
pub struct Timeouts {
    pub attempt: Duration,
    pub request: Duration,
    pub drain: Duration,
}

impl From<&TimeoutConfig> for Timeouts {
    fn from(config: &TimeoutConfig) -> Self {
        Self {
            attempt: Duration::from_millis(config.attempt_ms),
            request: Duration::from_millis(config.request_ms),
            drain: Duration::from_secs(config.drain_secs),
        }
    }
}

/// Run an upstream future under a timeout, mapping expiry to
/// [`UpstreamError::Timeout`]. Dropping the inner future on expiry cancels the
/// in-flight call.
pub async fn with_timeout<F, T>(limit: Duration, fut: F) -> Result<T, UpstreamError>
where
    F: Future<Output = Result<T, UpstreamError>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(UpstreamError::Timeout(limit)),
    }
}
