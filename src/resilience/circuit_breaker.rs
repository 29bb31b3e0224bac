//! Per-backend circuit breakers.
//!
//! # States
//! ```text
//! Closed ──(failure ratio ≥ R over last W calls, ≥ min samples)──▶ Open
//! Open ──(open duration elapsed)──▶ HalfOpen
//! HalfOpen ──(enough trial successes)──▶ Closed
//! HalfOpen ──(any trial failure)──▶ Open
//! ```
//!
//! Breakers are created lazily on the first failure of a backend and dropped
//! again once a full window of consecutive successes has been seen while
//! closed. Every recorded outcome is forwarded to an [`OutcomeSink`] (passive
//! health accounting).

use std::future::Future;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, AtomicU64, AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use dashmap::DashMap;
use serde::Serialize;
use thiserror::Error;

use crate::clock::SharedClock;
use crate::config::CircuitBreakerConfig;
use crate::observability::metrics;
use crate::resilience::window::{Outcome, OutcomeWindow, WindowStats};

/// Breaker state.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed = 0,
    Open = 1,
    HalfOpen = 2,
}

impl CircuitState {
    fn from_u8(val: u8) -> Self {
        match val {
            1 => CircuitState::Open,
            2 => CircuitState::HalfOpen,
            _ => CircuitState::Closed,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half_open",
        }
    }
}

/// Inputs to the breaker state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitSignal {
    /// The closed-state window crossed the trip threshold.
    Tripped,
    /// The open duration has elapsed.
    CooldownElapsed,
    /// Half-open trials reached the success quota.
    TrialsSucceeded,
    /// A half-open trial failed.
    TrialFailed,
}

/// Pure transition function. Signals that do not apply to a state leave it
/// unchanged.
pub fn next_state(state: CircuitState, signal: CircuitSignal) -> CircuitState {
    use CircuitSignal::*;
    use CircuitState::*;
    match (state, signal) {
        (Closed, Tripped) => Open,
        (Open, CooldownElapsed) => HalfOpen,
        (HalfOpen, TrialsSucceeded) => Closed,
        (HalfOpen, TrialFailed) => Open,
        (state, _) => state,
    }
}

/// Receives every outcome recorded through a breaker permit.
pub trait OutcomeSink: Send + Sync {
    fn observe(&self, cluster: &str, addr: SocketAddr, outcome: Outcome);
}

/// Returned when a breaker refuses a call.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("circuit open for {addr} in cluster {cluster}")]
pub struct CircuitOpenError {
    pub cluster: String,
    pub addr: SocketAddr,
}

/// Error from [`CircuitBreakers::call`].
#[derive(Debug, Error)]
pub enum BreakerError<E> {
    #[error(transparent)]
    Open(#[from] CircuitOpenError),
    #[error("{0}")]
    Inner(E),
}

/// State machine for a single backend.
#[derive(Debug)]
pub struct CircuitBreaker {
    settings: CircuitBreakerConfig,
    clock: SharedClock,
    state: AtomicU8,
    opened_at_ms: AtomicU64,
    window: OutcomeWindow,
    trials_in_flight: AtomicU32,
    trial_successes: AtomicU32,
    consecutive_successes: AtomicUsize,
}

impl CircuitBreaker {
    pub fn new(settings: CircuitBreakerConfig, clock: SharedClock) -> Self {
        let window = OutcomeWindow::new(settings.window_size);
        Self {
            settings,
            clock,
            state: AtomicU8::new(CircuitState::Closed as u8),
            opened_at_ms: AtomicU64::new(0),
            window,
            trials_in_flight: AtomicU32::new(0),
            trial_successes: AtomicU32::new(0),
            consecutive_successes: AtomicUsize::new(0),
        }
    }

    pub fn state(&self) -> CircuitState {
        CircuitState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn window_stats(&self) -> WindowStats {
        self.window.stats()
    }

    fn open_duration(&self) -> Duration {
        Duration::from_millis(self.settings.open_duration_ms)
    }

    fn cooldown_elapsed(&self) -> bool {
        let opened = self.opened_at_ms.load(Ordering::Acquire);
        self.clock.now_millis().saturating_sub(opened) >= self.open_duration().as_millis() as u64
    }

    /// Apply `signal` if the breaker is still in `from`. Returns true if this
    /// caller performed the transition.
    fn transition(&self, from: CircuitState, signal: CircuitSignal) -> bool {
        let to = next_state(from, signal);
        if to == from {
            return false;
        }
        if to == CircuitState::Open {
            // Trial counters are only claimed while half-open, so they can be
            // cleared here without racing new claims.
            self.trials_in_flight.store(0, Ordering::Release);
            self.trial_successes.store(0, Ordering::Release);
            self.opened_at_ms
                .store(self.clock.now_millis(), Ordering::Release);
        }
        let swapped = self
            .state
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok();
        if swapped && to == CircuitState::Closed {
            self.window.reset();
            self.consecutive_successes.store(0, Ordering::Release);
        }
        swapped
    }

    /// Admission check without claiming a trial slot.
    pub fn admits(&self) -> bool {
        match self.state() {
            CircuitState::Closed => true,
            CircuitState::Open => self.cooldown_elapsed(),
            CircuitState::HalfOpen => {
                self.trials_in_flight.load(Ordering::Acquire) < self.settings.half_open_max_trials.max(1)
            }
        }
    }

    /// Claim permission for one call. `Some(true)` means a half-open trial.
    fn try_enter(&self) -> Option<bool> {
        loop {
            match self.state() {
                CircuitState::Closed => return Some(false),
                CircuitState::Open => {
                    if !self.cooldown_elapsed() {
                        return None;
                    }
                    self.transition(CircuitState::Open, CircuitSignal::CooldownElapsed);
                }
                CircuitState::HalfOpen => {
                    let max = self.settings.half_open_max_trials.max(1);
                    let claimed = self
                        .trials_in_flight
                        .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                            (n < max).then_some(n + 1)
                        })
                        .is_ok();
                    return claimed.then_some(true);
                }
            }
        }
    }

    /// Record an outcome. Returns the resulting state and, when it changed,
    /// the state it changed from.
    fn on_outcome(&self, trial: bool, outcome: Outcome) -> (CircuitState, Option<CircuitState>) {
        if trial {
            self.release_trial();
            let changed = match outcome {
                Outcome::Success => {
                    let successes = self.trial_successes.fetch_add(1, Ordering::AcqRel) + 1;
                    successes >= self.settings.half_open_successes.max(1)
                        && self.transition(CircuitState::HalfOpen, CircuitSignal::TrialsSucceeded)
                }
                Outcome::Failure => {
                    self.transition(CircuitState::HalfOpen, CircuitSignal::TrialFailed)
                }
            };
            return (self.state(), changed.then_some(CircuitState::HalfOpen));
        }

        // Calls admitted while closed may complete after the breaker moved on;
        // only closed-state outcomes feed the window.
        if self.state() != CircuitState::Closed {
            return (self.state(), None);
        }

        self.window.record(outcome);
        match outcome {
            Outcome::Success => {
                self.consecutive_successes.fetch_add(1, Ordering::AcqRel);
                (CircuitState::Closed, None)
            }
            Outcome::Failure => {
                self.consecutive_successes.store(0, Ordering::Release);
                let stats = self.window.stats();
                let tripped = stats.exceeds(self.settings.failure_ratio, self.settings.min_requests)
                    && self.transition(CircuitState::Closed, CircuitSignal::Tripped);
                (self.state(), tripped.then_some(CircuitState::Closed))
            }
        }
    }

    /// A full window of consecutive successes while closed.
    fn is_recovered(&self) -> bool {
        self.state() == CircuitState::Closed
            && self.consecutive_successes.load(Ordering::Acquire) >= self.window.capacity()
    }

    fn release_trial(&self) {
        let _ = self
            .trials_in_flight
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));
    }
}

type BreakerKey = (String, SocketAddr);

/// Permission for one backend call.
///
/// Must be consumed with [`CircuitBreakers::record`]. Dropping it unrecorded
/// (a cancelled request) releases a half-open trial slot without counting.
#[derive(Debug)]
pub struct CircuitPermit {
    cluster: String,
    addr: SocketAddr,
    breaker: Option<Arc<CircuitBreaker>>,
    trial: bool,
    settled: bool,
}

impl CircuitPermit {
    pub fn is_trial(&self) -> bool {
        self.trial
    }
}

impl Drop for CircuitPermit {
    fn drop(&mut self) {
        if !self.settled && self.trial {
            if let Some(breaker) = &self.breaker {
                breaker.release_trial();
            }
        }
    }
}

/// Breaker registry keyed by (cluster, backend address).
pub struct CircuitBreakers {
    settings: ArcSwap<CircuitBreakerConfig>,
    clock: SharedClock,
    breakers: DashMap<BreakerKey, Arc<CircuitBreaker>>,
    sink: Option<Arc<dyn OutcomeSink>>,
}

impl std::fmt::Debug for CircuitBreakers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircuitBreakers")
            .field("tracked", &self.breakers.len())
            .finish()
    }
}

impl CircuitBreakers {
    pub fn new(settings: CircuitBreakerConfig, clock: SharedClock) -> Self {
        Self {
            settings: ArcSwap::from_pointee(settings),
            clock,
            breakers: DashMap::new(),
            sink: None,
        }
    }

    /// Forward every recorded outcome to `sink`.
    pub fn with_sink(mut self, sink: Arc<dyn OutcomeSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// New thresholds apply to breakers created from now on.
    pub fn update_settings(&self, settings: CircuitBreakerConfig) {
        self.settings.store(Arc::new(settings));
    }

    fn key(cluster: &str, addr: SocketAddr) -> BreakerKey {
        (cluster.to_string(), addr)
    }

    fn existing(&self, cluster: &str, addr: SocketAddr) -> Option<Arc<CircuitBreaker>> {
        self.breakers
            .get(&Self::key(cluster, addr))
            .map(|b| b.value().clone())
    }

    /// Admission predicate used during backend selection.
    pub fn admits(&self, cluster: &str, addr: SocketAddr) -> bool {
        if !self.settings.load().enabled {
            return true;
        }
        self.existing(cluster, addr)
            .map(|b| b.admits())
            .unwrap_or(true)
    }

    pub fn state(&self, cluster: &str, addr: SocketAddr) -> CircuitState {
        self.existing(cluster, addr)
            .map(|b| b.state())
            .unwrap_or(CircuitState::Closed)
    }

    /// All tracked breakers that are not closed.
    pub fn tripped(&self) -> Vec<(String, SocketAddr, CircuitState)> {
        self.breakers
            .iter()
            .filter(|e| e.value().state() != CircuitState::Closed)
            .map(|e| (e.key().0.clone(), e.key().1, e.value().state()))
            .collect()
    }

    pub fn tracked(&self) -> usize {
        self.breakers.len()
    }

    /// Ask for permission to call `addr`.
    pub fn try_acquire(&self, cluster: &str, addr: SocketAddr) -> Result<CircuitPermit, CircuitOpenError> {
        let breaker = if self.settings.load().enabled {
            self.existing(cluster, addr)
        } else {
            None
        };

        let trial = match &breaker {
            None => false,
            Some(b) => b.try_enter().ok_or_else(|| CircuitOpenError {
                cluster: cluster.to_string(),
                addr,
            })?,
        };

        Ok(CircuitPermit {
            cluster: cluster.to_string(),
            addr,
            breaker,
            trial,
            settled: false,
        })
    }

    /// Settle a permit with the call's outcome.
    pub fn record(&self, mut permit: CircuitPermit, outcome: Outcome) -> CircuitState {
        permit.settled = true;

        if let Some(sink) = &self.sink {
            sink.observe(&permit.cluster, permit.addr, outcome);
        }

        let settings = self.settings.load();
        if !settings.enabled {
            return CircuitState::Closed;
        }

        let breaker = match (&permit.breaker, outcome) {
            (Some(b), _) => b.clone(),
            (None, Outcome::Success) => return CircuitState::Closed,
            (None, Outcome::Failure) => self
                .breakers
                .entry(Self::key(&permit.cluster, permit.addr))
                .or_insert_with(|| {
                    Arc::new(CircuitBreaker::new((**settings).clone(), self.clock.clone()))
                })
                .value()
                .clone(),
        };

        let (state, changed_from) = breaker.on_outcome(permit.trial, outcome);
        if let Some(from) = changed_from {
            tracing::warn!(
                cluster = %permit.cluster,
                backend = %permit.addr,
                from = from.as_str(),
                to = state.as_str(),
                "Circuit state changed"
            );
            metrics::record_circuit_transition(&permit.cluster, &permit.addr.to_string(), state.as_str());
        }

        if breaker.is_recovered() {
            let removed = self
                .breakers
                .remove_if(&Self::key(&permit.cluster, permit.addr), |_, b| {
                    Arc::ptr_eq(b, &breaker) && b.is_recovered()
                });
            if removed.is_some() {
                tracing::debug!(cluster = %permit.cluster, backend = %permit.addr, "Circuit reset after sustained success");
            }
        }
        state
    }

    /// Run `f` under the breaker for `addr`.
    pub async fn call<F, Fut, T, E>(&self, cluster: &str, addr: SocketAddr, f: F) -> Result<T, BreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let permit = self.try_acquire(cluster, addr)?;
        match f().await {
            Ok(value) => {
                self.record(permit, Outcome::Success);
                Ok(value)
            }
            Err(e) => {
                self.record(permit, Outcome::Failure);
                Err(BreakerError::Inner(e))
            }
        }
    }

    /// Drop the breaker of a backend that left its cluster.
    pub fn forget(&self, cluster: &str, addr: SocketAddr) {
        self.breakers.remove(&Self::key(cluster, addr));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex;

    fn settings() -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            enabled: true,
            window_size: 4,
            failure_ratio: 0.5,
            min_requests: 4,
            open_duration_ms: 1_000,
            half_open_max_trials: 1,
            half_open_successes: 1,
        }
    }

    fn addr() -> SocketAddr {
        "127.0.0.1:9001".parse().unwrap()
    }

    fn fail(breakers: &CircuitBreakers, n: usize) {
        for _ in 0..n {
            let permit = breakers.try_acquire("api", addr()).unwrap();
            breakers.record(permit, Outcome::Failure);
        }
    }

    #[test]
    fn transition_table() {
        use CircuitSignal::*;
        use CircuitState::*;
        assert_eq!(next_state(Closed, Tripped), Open);
        assert_eq!(next_state(Closed, TrialFailed), Closed);
        assert_eq!(next_state(Open, CooldownElapsed), HalfOpen);
        assert_eq!(next_state(Open, Tripped), Open);
        assert_eq!(next_state(HalfOpen, TrialsSucceeded), Closed);
        assert_eq!(next_state(HalfOpen, TrialFailed), Open);
    }

    #[test]
    fn created_lazily_on_first_failure() {
        let breakers = CircuitBreakers::new(settings(), Arc::new(ManualClock::new()));
        let permit = breakers.try_acquire("api", addr()).unwrap();
        breakers.record(permit, Outcome::Success);
        assert_eq!(breakers.tracked(), 0);

        fail(&breakers, 1);
        assert_eq!(breakers.tracked(), 1);
        assert_eq!(breakers.state("api", addr()), CircuitState::Closed);
    }

    #[test]
    fn opens_after_threshold_and_rejects() {
        let clock = Arc::new(ManualClock::new());
        let breakers = CircuitBreakers::new(settings(), clock.clone());

        fail(&breakers, 4);
        assert_eq!(breakers.state("api", addr()), CircuitState::Open);
        assert!(!breakers.admits("api", addr()));
        assert!(breakers.try_acquire("api", addr()).is_err());

        clock.advance(Duration::from_millis(999));
        assert!(breakers.try_acquire("api", addr()).is_err());
    }

    #[test]
    fn half_open_limits_trials_and_closes_on_success() {
        let clock = Arc::new(ManualClock::new());
        let breakers = CircuitBreakers::new(settings(), clock.clone());
        fail(&breakers, 4);

        clock.advance(Duration::from_millis(1_000));
        assert!(breakers.admits("api", addr()));
        let trial = breakers.try_acquire("api", addr()).unwrap();
        assert!(trial.is_trial());
        assert_eq!(breakers.state("api", addr()), CircuitState::HalfOpen);
        assert!(breakers.try_acquire("api", addr()).is_err());

        assert_eq!(breakers.record(trial, Outcome::Success), CircuitState::Closed);
        assert!(breakers.try_acquire("api", addr()).is_ok());
    }

    #[test]
    fn trial_failure_reopens() {
        let clock = Arc::new(ManualClock::new());
        let breakers = CircuitBreakers::new(settings(), clock.clone());
        fail(&breakers, 4);
        clock.advance(Duration::from_millis(1_000));

        let trial = breakers.try_acquire("api", addr()).unwrap();
        assert_eq!(breakers.record(trial, Outcome::Failure), CircuitState::Open);
        assert!(breakers.try_acquire("api", addr()).is_err());
    }

    #[test]
    fn dropped_trial_releases_slot() {
        let clock = Arc::new(ManualClock::new());
        let breakers = CircuitBreakers::new(settings(), clock.clone());
        fail(&breakers, 4);
        clock.advance(Duration::from_millis(1_000));

        let trial = breakers.try_acquire("api", addr()).unwrap();
        drop(trial);
        assert_eq!(breakers.state("api", addr()), CircuitState::HalfOpen);
        assert!(breakers.try_acquire("api", addr()).unwrap().is_trial());
    }

    #[test]
    fn reset_after_full_window_of_successes() {
        let breakers = CircuitBreakers::new(settings(), Arc::new(ManualClock::new()));
        fail(&breakers, 1);
        assert_eq!(breakers.tracked(), 1);
        for _ in 0..4 {
            let permit = breakers.try_acquire("api", addr()).unwrap();
            breakers.record(permit, Outcome::Success);
        }
        assert_eq!(breakers.tracked(), 0);
    }

    #[tokio::test]
    async fn open_circuit_bypasses_the_call() {
        let breakers = CircuitBreakers::new(settings(), Arc::new(ManualClock::new()));
        let calls = AtomicUsize::new(0);

        for _ in 0..4 {
            let _ = breakers
                .call("api", addr(), || async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err::<(), _>("refused")
                })
                .await;
        }
        assert_eq!(calls.load(Ordering::SeqCst), 4);

        for _ in 0..10 {
            let result = breakers
                .call("api", addr(), || async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, &str>(())
                })
                .await;
            assert!(matches!(result, Err(BreakerError::Open(_))));
        }
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[derive(Default)]
    struct RecordingSink(Mutex<Vec<(String, Outcome)>>);

    impl OutcomeSink for RecordingSink {
        fn observe(&self, cluster: &str, _addr: SocketAddr, outcome: Outcome) {
            self.0.lock().unwrap().push((cluster.to_string(), outcome));
        }
    }

    #[test]
    fn outcomes_reach_the_sink() {
        let sink = Arc::new(RecordingSink::default());
        let breakers =
            CircuitBreakers::new(settings(), Arc::new(ManualClock::new())).with_sink(sink.clone());
        let permit = breakers.try_acquire("api", addr()).unwrap();
        breakers.record(permit, Outcome::Failure);
        assert_eq!(
            sink.0.lock().unwrap().as_slice(),
            &[("api".to_string(), Outcome::Failure)]
        );
    }
}
