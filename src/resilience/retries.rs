//! Retry policy and retry budget.
//!
//! # Retryable classes
//! - Connection failures: the request never reached the backend, so any
//!   method may be retried.
//! - Timeouts and configured 5xx statuses: only idempotent methods, unless
//!   `retry_non_idempotent` is set.
//!
//! Every retry goes to a backend that has not been tried yet for the request.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use axum::http::Method;

use crate::clock::SharedClock;
use crate::config::RetryConfig;
use crate::error::UpstreamError;
use crate::resilience::backoff::calculate_backoff;

/// Methods whose repetition has no additional effect.
pub fn is_idempotent(method: &Method) -> bool {
    matches!(
        *method,
        Method::GET | Method::HEAD | Method::OPTIONS | Method::PUT | Method::DELETE | Method::TRACE
    )
}

/// Whether `err` for a request with `method` may be retried under `config`.
pub fn is_retryable(config: &RetryConfig, method: &Method, err: &UpstreamError) -> bool {
    let replay_safe = is_idempotent(method) || config.retry_non_idempotent;
    match err {
        UpstreamError::Connect { .. } => true,
        UpstreamError::Timeout(_) => replay_safe,
        UpstreamError::Status(code) => replay_safe && config.retryable_statuses.contains(code),
        UpstreamError::Protocol(_) => false,
    }
}

/// Retry decisions for one gateway configuration.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    config: RetryConfig,
}

impl RetryPolicy {
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    /// First attempt plus retries.
    pub fn max_attempts(&self) -> u32 {
        if self.config.enabled {
            self.config.max_retries.saturating_add(1)
        } else {
            1
        }
    }

    pub fn is_retryable(&self, method: &Method, err: &UpstreamError) -> bool {
        self.config.enabled && is_retryable(&self.config, method, err)
    }

    /// A backend status the retry loop treats as a failed attempt.
    pub fn is_retryable_status(&self, status: u16) -> bool {
        self.config.retryable_statuses.contains(&status)
    }

    /// Delay before retry number `retry` (1-based).
    pub fn backoff(&self, retry: u32) -> Duration {
        calculate_backoff(retry, self.config.base_delay_ms, self.config.max_delay_ms)
    }
}

/// Caps retries at a fraction of request volume per accounting window, with
/// a fixed floor so low-traffic services can still retry.
#[derive(Debug)]
pub struct RetryBudget {
    clock: SharedClock,
    ratio: f64,
    min_retries: u64,
    window_ms: u64,
    window_start: AtomicU64,
    requests: AtomicU64,
    retries: AtomicU64,
}

impl RetryBudget {
    pub fn new(config: &RetryConfig, clock: SharedClock) -> Self {
        let now = clock.now_millis();
        Self {
            clock,
            ratio: config.budget_ratio,
            min_retries: config.budget_min_retries,
            window_ms: config.budget_window_secs.max(1) * 1000,
            window_start: AtomicU64::new(now),
            requests: AtomicU64::new(0),
            retries: AtomicU64::new(0),
        }
    }

    fn roll_window(&self) {
        let now = self.clock.now_millis();
        let start = self.window_start.load(Ordering::Acquire);
        if now.saturating_sub(start) >= self.window_ms
            && self
                .window_start
                .compare_exchange(start, now, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
        {
            self.requests.store(0, Ordering::Release);
            self.retries.store(0, Ordering::Release);
        }
    }

    /// Count an inbound request toward the budget.
    pub fn record_request(&self) {
        self.roll_window();
        self.requests.fetch_add(1, Ordering::AcqRel);
    }

    /// Spend one retry if the budget allows it.
    pub fn try_withdraw(&self) -> bool {
        self.roll_window();
        let requests = self.requests.load(Ordering::Acquire);
        let allowed = ((requests as f64 * self.ratio) as u64).max(self.min_retries);
        self.retries
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |spent| {
                (spent < allowed).then_some(spent + 1)
            })
            .is_ok()
    }
}
